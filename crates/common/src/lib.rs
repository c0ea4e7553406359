//! Common utilities shared by the Taskboard services.
//!
//! This crate provides:
//! - The structured request logger (JSON lines in production, readable text elsewhere)
//! - Process telemetry setup (`tracing` subscriber)
//! - DateTime helpers

pub mod datetime;
pub mod logger;
pub mod telemetry;

// Re-export commonly used types
pub use datetime::{format_timestamp, now_utc, seconds_until};
pub use logger::{
    ErrorInfo, LogLevel, LogMode, LogRecord, LogSink, Logger, MemorySink, StdioSink, Stream,
    DEFAULT_SLOW_THRESHOLD,
};
pub use telemetry::init_tracing;
