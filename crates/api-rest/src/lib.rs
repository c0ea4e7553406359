//! Taskboard REST API request pipeline
//!
//! Every API handler runs inside the same pipeline: the request is timed and
//! logged on completion, failures are classified into a closed error taxonomy
//! and answered with a uniform, client-safe JSON body, and selected endpoints
//! are rate limited per client.
//!
//! ## Architecture
//!
//! - **error**: error taxonomy, storage errors, response body
//! - **middleware**: error translator, request pipeline, rate limit layer
//! - **limiter**: fixed-window counters behind the `RateLimitStore` trait
//! - **extractors**: validated JSON bodies
//! - **routes**: health and authentication endpoints
//! - **app**: router assembly
//! - **config**: environment-driven configuration
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskboard_api_rest::app::{create_app, AppDependencies};
//! use taskboard_api_rest::config::ApiConfig;
//! use taskboard_api_rest::routes::auth::RejectingAuthenticator;
//! use taskboard_common::logger::Logger;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ApiConfig::from_env().expect("Failed to load config");
//!     let deps = AppDependencies::new(
//!         Logger::stdio(config.log_mode()),
//!         Arc::new(RejectingAuthenticator),
//!     );
//!     let app = create_app(&config, deps);
//!
//!     let listener = tokio::net::TcpListener::bind(config.server_address())
//!         .await
//!         .expect("Failed to bind");
//!
//!     axum::serve(listener, app)
//!         .await
//!         .expect("Server error");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod app;
pub mod config;
pub mod error;
pub mod extractors;
pub mod limiter;
pub mod middleware;
pub mod routes;

// Re-export commonly used types
pub use app::{create_app, AppDependencies};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, AppError, ErrorKind, ErrorRecord, ErrorResponse, StoreError};
pub use limiter::{InMemoryStore, Quota, RateLimitDecision, RateLimitStore};
