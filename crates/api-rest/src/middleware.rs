//! HTTP middleware components.
//!
//! This module provides:
//! - The request pipeline (timing, request logging, error translation)
//! - Error translation into the taxonomy
//! - Rate limiting

pub mod error_handler;
pub mod logging;
pub mod rate_limit;

pub use error_handler::{ErrorContext, ErrorTranslator};
pub use logging::{wrap, PipelineLayer, PipelineService};
pub use rate_limit::{client_key, RateLimitLayer, RateLimitService};
