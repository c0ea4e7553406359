//! HTTP error handling and conversion.
//!
//! This module defines the closed error taxonomy ([`ErrorKind`]), the errors
//! business logic raises on purpose ([`AppError`]), storage failures
//! ([`StoreError`]) and the union every handler returns ([`ApiError`]).
//! [`ApiError`] is turned into a client-safe [`ErrorRecord`] by the
//! [`ErrorTranslator`](crate::middleware::error_handler::ErrorTranslator).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{error::DatabaseError, postgres::PgDatabaseError};
use std::fmt;
use taskboard_common::datetime::{format_timestamp, now_utc};
use thiserror::Error;

/// Taxonomy of request failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input
    Validation,
    /// Missing or invalid credentials
    Authentication,
    /// Authenticated but not allowed
    Authorization,
    /// Resource does not exist
    NotFound,
    /// Conflicting state
    Conflict,
    /// Quota exceeded
    RateLimited,
    /// Storage failure
    Database,
    /// Downstream service failure
    ExternalService,
    /// Unclassified failure
    Internal,
}

impl ErrorKind {
    /// Every kind, in declaration order
    pub const ALL: [ErrorKind; 9] = [
        Self::Validation,
        Self::Authentication,
        Self::Authorization,
        Self::NotFound,
        Self::Conflict,
        Self::RateLimited,
        Self::Database,
        Self::ExternalService,
        Self::Internal,
    ];

    /// Get the HTTP status code for this kind
    pub fn status_code(self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Authorization => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Database => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ExternalService => StatusCode::BAD_GATEWAY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Name used in the `error` field of API responses
    pub fn name(self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::Authentication => "AuthenticationError",
            Self::Authorization => "AuthorizationError",
            Self::NotFound => "NotFoundError",
            Self::Conflict => "ConflictError",
            Self::RateLimited => "RateLimitError",
            Self::Database => "DatabaseError",
            Self::ExternalService => "ExternalServiceError",
            Self::Internal => "InternalServerError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An error raised deliberately by business logic.
///
/// The message is written for the client and is returned verbatim.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct AppError {
    kind: ErrorKind,
    message: String,
    context: Option<Value>,
}

impl AppError {
    /// Create an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
        }
    }

    /// Bad input
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Missing or invalid credentials
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    /// Authenticated but not allowed
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, message)
    }

    /// Resource does not exist
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Conflicting state
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Quota exceeded
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    /// Storage failure
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    /// Downstream service failure
    pub fn external_service(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalService, message)
    }

    /// Unclassified failure with a message chosen by the caller
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach structured context
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Taxonomy kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Client-facing message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Structured context, if any
    pub fn context(&self) -> Option<&Value> {
        self.context.as_ref()
    }
}

/// Storage-layer failures, classified by constraint kind.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write
    #[error("Unique constraint violated on {}", target.join(", "))]
    UniqueViolation {
        /// Offending fields or constraint names
        target: Vec<String>,
    },

    /// The record targeted by an update or delete does not exist
    #[error("Record to update or delete does not exist")]
    RecordNotFound,

    /// A foreign key constraint rejected the write
    #[error("Foreign key constraint violated: {}", constraint.as_deref().unwrap_or("unknown"))]
    ForeignKeyViolation {
        /// Constraint name, when reported by the driver
        constraint: Option<String>,
    },

    /// A required relation or column was left empty
    #[error("Required relation violated: {0}")]
    RequiredRelationViolation(String),

    /// The query was given data of the wrong shape
    #[error("Malformed query input: {0}")]
    MalformedInput(String),

    /// Any other storage failure
    #[error("Database error ({}): {message}", code.as_deref().unwrap_or("no code"))]
    Other {
        /// Driver error code, when available
        code: Option<String>,
        /// Driver message
        message: String,
    },
}

impl From<&sqlx::Error> for StoreError {
    fn from(err: &sqlx::Error) -> Self {
        use sqlx::error::ErrorKind as DbErrorKind;

        match err {
            sqlx::Error::RowNotFound => Self::RecordNotFound,
            sqlx::Error::Database(db) => {
                let db: &dyn DatabaseError = &**db;
                let constraint = db.constraint().map(str::to_string);
                match db.kind() {
                    DbErrorKind::UniqueViolation => Self::UniqueViolation {
                        target: unique_target(db),
                    },
                    DbErrorKind::ForeignKeyViolation => Self::ForeignKeyViolation { constraint },
                    DbErrorKind::NotNullViolation => {
                        Self::RequiredRelationViolation(db.message().to_string())
                    }
                    DbErrorKind::CheckViolation => Self::MalformedInput(db.message().to_string()),
                    _ => Self::Other {
                        code: db.code().map(|c| c.into_owned()),
                        message: db.message().to_string(),
                    },
                }
            }
            sqlx::Error::TypeNotFound { type_name } => {
                Self::MalformedInput(format!("unknown type {}", type_name))
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::MalformedInput(err.to_string())
            }
            other => Self::Other {
                code: None,
                message: other.to_string(),
            },
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::from(&err)
    }
}

/// Columns named by a unique violation.
///
/// Postgres reports them in the detail line (`Key (email)=(...) already
/// exists.`). Without it, a default constraint name `{table}_{columns}_key`
/// is unpicked; any other constraint name is reported as is.
fn unique_target(db: &dyn DatabaseError) -> Vec<String> {
    if let Some(columns) = db
        .try_downcast_ref::<PgDatabaseError>()
        .and_then(|pg| pg.detail())
        .and_then(columns_from_detail)
    {
        return columns;
    }

    let Some(constraint) = db.constraint() else {
        return Vec::new();
    };

    db.table()
        .and_then(|table| constraint.strip_prefix(table))
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|rest| rest.strip_suffix("_key"))
        .filter(|columns| !columns.is_empty())
        .map(|columns| vec![columns.to_string()])
        .unwrap_or_else(|| vec![constraint.to_string()])
}

/// Parse the column list out of `Key (a, b)=(x, y) already exists.`
fn columns_from_detail(detail: &str) -> Option<Vec<String>> {
    let (columns, _) = detail.strip_prefix("Key (")?.split_once(")=(")?;
    let columns: Vec<String> = columns
        .split(", ")
        .map(str::trim)
        .filter(|column| !column.is_empty())
        .map(str::to_string)
        .collect();

    (!columns.is_empty()).then_some(columns)
}

/// Everything a handler can fail with.
///
/// `App` carries taxonomy errors; the other variants wrap foreign failures
/// that are classified once, at the pipeline boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Deliberate taxonomy error
    #[error(transparent)]
    App(#[from] AppError),

    /// Request body failed schema validation
    #[error("Validation failed: {0}")]
    Schema(#[from] validator::ValidationErrors),

    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Anything else
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),

    /// The handler panicked
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl ApiError {
    /// Type name recorded in error logs
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::App(err) => err.kind().name(),
            Self::Schema(_) => "SchemaValidationError",
            Self::Store(_) => "StoreError",
            Self::Unexpected(_) => "UnexpectedError",
            Self::Panicked(_) => "Panic",
        }
    }
}

/// Responds without logging. Handlers behind the
/// [`PipelineLayer`](crate::middleware::logging::PipelineLayer) hand their
/// errors to the translator instead and never take this path.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let record = crate::middleware::error_handler::classify(&self);
        ErrorResponse::from_record(&record).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.into())
    }
}

/// Client-safe outcome of classifying an [`ApiError`]
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    /// Taxonomy kind
    pub kind: ErrorKind,

    /// Message safe to show to the client
    pub message: String,

    /// Whether the failure was foreseen
    pub operational: bool,

    /// Structured context
    pub context: Option<Value>,
}

impl ErrorRecord {
    /// HTTP status for this record
    pub fn status_code(&self) -> StatusCode {
        self.kind.status_code()
    }
}

/// Standardized error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Taxonomy kind name
    pub error: String,

    /// Human-readable message
    pub message: String,

    /// HTTP status code
    pub status_code: u16,

    /// When the error was produced
    pub timestamp: String,

    /// Request path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Validation details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorResponse {
    /// Build the response body for a classified error.
    ///
    /// Context is only exposed for validation errors.
    pub fn from_record(record: &ErrorRecord) -> Self {
        let details = match record.kind {
            ErrorKind::Validation => record.context.clone(),
            _ => None,
        };

        Self {
            error: record.kind.name().to_string(),
            message: record.message.clone(),
            status_code: record.status_code().as_u16(),
            timestamp: format_timestamp(&now_utc()),
            path: None,
            details,
        }
    }

    /// Add the request path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;
