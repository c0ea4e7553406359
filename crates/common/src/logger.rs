//! Structured request logger.
//!
//! The [`Logger`] renders [`LogRecord`]s in one of two shapes chosen once at
//! construction time:
//!
//! - [`LogMode::Production`]: one JSON object per line, suitable for log shippers.
//! - [`LogMode::Development`]: multi-line human-readable text.
//!
//! Both renderings carry the same data. Errors and warnings go to the error
//! stream, info and debug records to the standard stream. Debug records are
//! dropped in production.
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use taskboard_common::logger::{LogMode, Logger, MemorySink};
//!
//! let sink = Arc::new(MemorySink::new());
//! let logger = Logger::new(LogMode::Production, sink.clone());
//!
//! logger.log_request("GET", "/api/v1/projects", 200, Some(Duration::from_millis(12)));
//!
//! let records = sink.records();
//! assert_eq!(records[0]["data"]["statusCode"], 200);
//! ```

use crate::datetime::{format_timestamp, now_utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// Default threshold above which an operation is reported as slow.
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(500);

/// Rendering mode for log records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    /// One JSON record per line
    Production,

    /// Multi-line human-readable text
    #[default]
    Development,
}

impl LogMode {
    /// Whether records are rendered as JSON lines
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Failures
    Error,
    /// Degraded but handled conditions
    Warn,
    /// Routine events
    Info,
    /// Diagnostics, suppressed in production
    Debug,
}

impl LogLevel {
    /// Lowercase level name as it appears in JSON records
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }

    /// Output stream records of this level are written to
    pub fn stream(self) -> Stream {
        match self {
            Self::Error | Self::Warn => Stream::Stderr,
            Self::Info | Self::Debug => Stream::Stdout,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

/// Process output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// Error details attached to an `error` record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error type name
    pub name: String,

    /// Full, unredacted error message
    pub message: String,

    /// Cause chain or backtrace, if available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorInfo {
    /// Create error details without a stack
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Attach a stack or cause chain
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Build error details from a std error, using its source chain as the stack.
    pub fn from_std(name: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {}", cause));
            source = cause.source();
        }

        let info = Self::new(name, err.to_string());
        if chain.is_empty() {
            info
        } else {
            info.with_stack(chain.join("\n"))
        }
    }
}

/// A single log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Severity
    pub level: LogLevel,

    /// Human-readable message
    pub message: String,

    /// RFC 3339 timestamp
    pub timestamp: String,

    /// Structured payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,

    /// Surrounding context (request method, path, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
}

impl LogRecord {
    /// Create a record stamped with the current time
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: format_timestamp(&now_utc()),
            data: None,
            error: None,
            context: None,
        }
    }

    /// Render the record for the given mode
    pub fn render(&self, mode: LogMode) -> String {
        match mode {
            LogMode::Production => self.render_json(),
            LogMode::Development => self.render_pretty(),
        }
    }

    fn render_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            json!({
                "level": self.level,
                "message": self.message,
                "timestamp": self.timestamp,
            })
            .to_string()
        })
    }

    fn render_pretty(&self) -> String {
        let mut sections = vec![format!("[{}] {}: {}", self.timestamp, self.level, self.message)];

        if let Some(error) = &self.error {
            let mut section = format!("{}: {}", error.name, error.message);
            if let Some(stack) = &error.stack {
                section.push('\n');
                section.push_str(stack);
            }
            sections.push(section);
        }

        if let Some(data) = &self.data {
            sections.push(format!("Data: {}", pretty(data)));
        }

        if let Some(context) = &self.context {
            sections.push(format!("Context: {}", pretty(&Value::Object(context.clone()))));
        }

        sections.join("\n\n")
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Whole milliseconds, saturating at `u64::MAX`
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Destination for rendered log lines
pub trait LogSink: Send + Sync {
    /// Write one rendered record to the given stream
    fn write(&self, stream: Stream, rendered: &str);
}

/// Sink writing to the process's stdout and stderr
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioSink;

impl LogSink for StdioSink {
    fn write(&self, stream: Stream, rendered: &str) {
        // Nowhere left to report a failed write to stdio.
        let _ = match stream {
            Stream::Stdout => writeln!(std::io::stdout().lock(), "{}", rendered),
            Stream::Stderr => writeln!(std::io::stderr().lock(), "{}", rendered),
        };
    }
}

/// Sink that keeps rendered lines in memory, for tests and diagnostics
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(Stream, String)>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// All rendered records with the stream they were written to
    pub fn lines(&self) -> Vec<(Stream, String)> {
        self.lines.lock().clone()
    }

    /// Rendered records only
    pub fn rendered(&self) -> Vec<String> {
        self.lines.lock().iter().map(|(_, line)| line.clone()).collect()
    }

    /// Parse every rendered record as JSON, skipping lines that are not JSON.
    pub fn records(&self) -> Vec<Value> {
        self.lines
            .lock()
            .iter()
            .filter_map(|(_, line)| serde_json::from_str(line).ok())
            .collect()
    }
}

impl LogSink for MemorySink {
    fn write(&self, stream: Stream, rendered: &str) {
        self.lines.lock().push((stream, rendered.to_string()));
    }
}

/// Leveled structured logger
#[derive(Clone)]
pub struct Logger {
    mode: LogMode,
    sink: Arc<dyn LogSink>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("mode", &self.mode).finish_non_exhaustive()
    }
}

impl Logger {
    /// Create a logger writing to the given sink
    pub fn new(mode: LogMode, sink: Arc<dyn LogSink>) -> Self {
        Self { mode, sink }
    }

    /// Create a logger writing to stdout/stderr
    pub fn stdio(mode: LogMode) -> Self {
        Self::new(mode, Arc::new(StdioSink))
    }

    /// Log a failure, with optional error details and context
    pub fn error(
        &self,
        message: impl Into<String>,
        error: Option<ErrorInfo>,
        context: Option<Map<String, Value>>,
    ) {
        let mut record = LogRecord::new(LogLevel::Error, message);
        record.error = error;
        record.context = context;
        self.emit(record);
    }

    /// Log a warning
    pub fn warn(&self, message: impl Into<String>, data: Option<Value>) {
        self.emit_with_data(LogLevel::Warn, message, data);
    }

    /// Log a routine event
    pub fn info(&self, message: impl Into<String>, data: Option<Value>) {
        self.emit_with_data(LogLevel::Info, message, data);
    }

    /// Log a diagnostic. No-op in production.
    pub fn debug(&self, message: impl Into<String>, data: Option<Value>) {
        if self.mode.is_production() {
            return;
        }
        self.emit_with_data(LogLevel::Debug, message, data);
    }

    /// Log a completed request
    pub fn log_request(&self, method: &str, path: &str, status_code: u16, duration: Option<Duration>) {
        let mut data = json!({
            "method": method,
            "path": path,
            "statusCode": status_code,
        });
        if let Some(duration) = duration {
            data["duration"] = json!(millis(duration));
        }

        self.info(format!("{} {} {}", method, path, status_code), Some(data));
    }

    /// Log an operation whose duration exceeded `threshold`. Emits nothing otherwise.
    pub fn log_slow_operation(&self, description: &str, duration: Duration, threshold: Duration) {
        if duration <= threshold {
            return;
        }

        self.warn(
            format!("Slow operation detected: {}", description),
            Some(json!({
                "description": description,
                "duration": millis(duration),
                "threshold": millis(threshold),
            })),
        );
    }

    fn emit_with_data(&self, level: LogLevel, message: impl Into<String>, data: Option<Value>) {
        let mut record = LogRecord::new(level, message);
        record.data = data;
        self.emit(record);
    }

    fn emit(&self, record: LogRecord) {
        self.sink.write(record.level.stream(), &record.render(self.mode));
    }
}
