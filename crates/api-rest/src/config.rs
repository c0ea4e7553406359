//! API configuration.

use crate::limiter::Quota;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use taskboard_common::logger::LogMode;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set to a value that does not parse
    #[error("Invalid value for {name}: {value:?}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Offending value
        value: String,
    },
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Live traffic; logs are JSON lines
    Production,
    /// Local development
    #[default]
    Development,
    /// Automated tests
    Test,
}

impl Environment {
    /// Parse an `APP_ENV` value. Anything unrecognised is development.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "test" => Self::Test,
            _ => Self::Development,
        }
    }

    /// Log rendering for this environment
    pub fn log_mode(self) -> LogMode {
        match self {
            Self::Production => LogMode::Production,
            Self::Development | Self::Test => LogMode::Development,
        }
    }
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Server host to bind to
    pub host: String,

    /// Server port to bind to
    pub port: u16,

    /// Deployment environment
    pub environment: Environment,

    /// Log level for the tracing subscriber
    pub log_level: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Requests slower than this are logged as slow operations
    pub slow_request_threshold_ms: u64,

    /// Requests allowed per window on authentication endpoints
    pub auth_rate_limit_max_requests: u32,

    /// Window length for authentication endpoints, in seconds
    pub auth_rate_limit_window_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            environment: Environment::Development,
            log_level: "info".to_string(),
            request_timeout_seconds: 30,
            slow_request_threshold_ms: 500,
            auth_rate_limit_max_requests: 5,
            auth_rate_limit_window_seconds: 15 * 60,
        }
    }
}

impl ApiConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            host: lookup("API_HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "API_PORT", defaults.port)?,
            environment: lookup("APP_ENV")
                .map(|value| Environment::parse(&value))
                .unwrap_or(defaults.environment),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            request_timeout_seconds: parse_var(
                &lookup,
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            )?,
            slow_request_threshold_ms: parse_var(
                &lookup,
                "SLOW_REQUEST_THRESHOLD_MS",
                defaults.slow_request_threshold_ms,
            )?,
            auth_rate_limit_max_requests: parse_var(
                &lookup,
                "AUTH_RATE_LIMIT_MAX_REQUESTS",
                defaults.auth_rate_limit_max_requests,
            )?,
            auth_rate_limit_window_seconds: parse_var(
                &lookup,
                "AUTH_RATE_LIMIT_WINDOW_SECONDS",
                defaults.auth_rate_limit_window_seconds,
            )?,
        })
    }

    /// Log rendering mode
    pub fn log_mode(&self) -> LogMode {
        self.environment.log_mode()
    }

    /// Quota applied to authentication endpoints
    pub fn auth_quota(&self) -> Quota {
        Quota::new(
            self.auth_rate_limit_max_requests,
            Duration::from_secs(self.auth_rate_limit_window_seconds),
        )
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Get slow request threshold as Duration
    pub fn slow_request_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_request_threshold_ms)
    }

    /// Get server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
