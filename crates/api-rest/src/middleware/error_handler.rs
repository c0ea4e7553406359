//! Error translation.
//!
//! [`ErrorTranslator`] is the single place where a failed request is
//! classified: every [`ApiError`] becomes exactly one [`ErrorRecord`], and the
//! original error is logged once at `error` level with full detail.

use crate::error::{ApiError, AppError, ErrorKind, ErrorRecord, StoreError};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::any::Any;
use taskboard_common::logger::{ErrorInfo, Logger};
use validator::ValidationErrors;

/// Message returned for every non-operational failure
pub const GENERIC_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// One field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    /// Field name
    pub field: String,
    /// Violation message
    pub message: String,
}

/// Request attributes recorded alongside a translated error
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP method
    pub method: Option<String>,
    /// Request path
    pub path: Option<String>,
}

impl ErrorContext {
    /// Context for a request
    pub fn request(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            path: Some(path.into()),
        }
    }

    fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(method) = &self.method {
            map.insert("method".into(), json!(method));
        }
        if let Some(path) = &self.path {
            map.insert("path".into(), json!(path));
        }
        map
    }
}

/// Converts handler failures into client-safe records
#[derive(Debug, Clone)]
pub struct ErrorTranslator {
    logger: Logger,
}

impl ErrorTranslator {
    /// Create a translator logging through `logger`
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }

    /// Logger used for error records
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Classify `error`, logging the original exactly once.
    pub fn translate(&self, error: &ApiError, context: &ErrorContext) -> ErrorRecord {
        let record = classify(error);

        let mut log_context = context.to_map();
        log_context.insert("kind".into(), json!(record.kind.name()));
        log_context.insert("statusCode".into(), json!(record.status_code().as_u16()));
        log_context.insert("operational".into(), json!(record.operational));

        let message = if record.operational {
            "Request error"
        } else {
            "Unhandled error"
        };
        self.logger
            .error(message, Some(error_info(error)), Some(log_context));

        record
    }
}

/// Classify an error without side effects.
pub fn classify(error: &ApiError) -> ErrorRecord {
    match error {
        ApiError::App(err) => from_app_error(err),
        ApiError::Schema(errors) => from_schema(errors),
        ApiError::Store(err) => from_store(err),
        ApiError::Unexpected(err) => from_anyhow(err).unwrap_or_else(unhandled),
        ApiError::Panicked(_) => unhandled(),
    }
}

fn unhandled() -> ErrorRecord {
    ErrorRecord {
        kind: ErrorKind::Internal,
        message: GENERIC_ERROR_MESSAGE.to_string(),
        operational: false,
        context: None,
    }
}

/// Taxonomy and store errors keep their classification when carried by
/// `anyhow`, including underneath added context.
fn from_anyhow(err: &anyhow::Error) -> Option<ErrorRecord> {
    if let Some(app) = err.downcast_ref::<AppError>() {
        return Some(from_app_error(app));
    }
    if let Some(store) = err.downcast_ref::<StoreError>() {
        return Some(from_store(store));
    }
    if let Some(db) = err.downcast_ref::<sqlx::Error>() {
        return Some(from_store(&StoreError::from(db)));
    }
    if let Some(errors) = err.downcast_ref::<ValidationErrors>() {
        return Some(from_schema(errors));
    }
    if let Some(api) = err.downcast_ref::<ApiError>() {
        return Some(classify(api));
    }
    None
}

fn from_app_error(err: &AppError) -> ErrorRecord {
    ErrorRecord {
        kind: err.kind(),
        message: err.message().to_string(),
        operational: true,
        context: err.context().cloned(),
    }
}

fn from_schema(errors: &ValidationErrors) -> ErrorRecord {
    let violations = field_violations(errors);
    let message = violations
        .first()
        .map(|v| v.message.clone())
        .unwrap_or_else(|| "Validation failed".to_string());
    let field = violations.first().map(|v| v.field.clone());

    ErrorRecord {
        kind: ErrorKind::Validation,
        message,
        operational: true,
        context: Some(json!({
            "field": field,
            "errors": violations,
        })),
    }
}

fn from_store(err: &StoreError) -> ErrorRecord {
    let validation = |message: &str, context: Option<Value>| ErrorRecord {
        kind: ErrorKind::Validation,
        message: message.to_string(),
        operational: true,
        context,
    };

    match err {
        StoreError::UniqueViolation { target } => validation(
            "A record with this value already exists",
            Some(json!({ "code": "unique_violation", "target": target })),
        ),
        StoreError::RecordNotFound => validation(
            "Record not found",
            Some(json!({ "code": "record_not_found" })),
        ),
        StoreError::ForeignKeyViolation { .. } => validation(
            "Invalid reference to related records",
            Some(json!({ "code": "foreign_key_violation" })),
        ),
        StoreError::RequiredRelationViolation(_) => validation(
            "Required relation is missing",
            Some(json!({ "code": "required_relation_violation" })),
        ),
        StoreError::MalformedInput(_) => validation("Invalid data provided", None),
        StoreError::Other { .. } => ErrorRecord {
            kind: ErrorKind::Database,
            message: "Database operation failed".to_string(),
            operational: true,
            context: None,
        },
    }
}

/// Flatten validator output into field/message pairs, ordered by field name.
pub fn field_violations(errors: &ValidationErrors) -> Vec<FieldViolation> {
    let mut fields: Vec<_> = errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| (field.to_string(), errs))
        .collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    fields
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |err| FieldViolation {
                message: err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{} is invalid ({})", field, err.code)),
                field: field.clone(),
            })
        })
        .collect()
}

fn error_info(error: &ApiError) -> ErrorInfo {
    match error {
        // anyhow's Debug output carries the cause chain and backtrace.
        ApiError::Unexpected(err) => ErrorInfo::new(error.type_name(), err.to_string())
            .with_stack(format!("{:?}", err)),
        _ => ErrorInfo::from_std(error.type_name(), error),
    }
}

/// Extract a readable message from a panic payload
pub fn panic_message(payload: Box<dyn Any + Send + 'static>) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use taskboard_common::logger::{LogMode, MemorySink};
    use validator::ValidationError;

    fn translator() -> (ErrorTranslator, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let logger = Logger::new(LogMode::Production, sink.clone());
        (ErrorTranslator::new(logger), sink)
    }

    fn login_violations() -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        let mut email = ValidationError::new("email");
        email.message = Some("Invalid email address".into());
        let mut password = ValidationError::new("length");
        password.message = Some("Password must be at least 8 characters".into());
        errors.add("password", password);
        errors.add("email", email);
        errors
    }

    #[test]
    fn test_every_kind_passes_through() {
        for kind in ErrorKind::ALL {
            let err = ApiError::from(AppError::new(kind, "deliberate"));
            let record = classify(&err);

            assert_eq!(record.kind, kind);
            assert_eq!(record.status_code(), kind.status_code());
            assert_eq!(record.message, "deliberate");
            assert!(record.operational);
        }
    }

    #[test]
    fn test_schema_violations() {
        let record = classify(&ApiError::from(login_violations()));

        assert_eq!(record.kind, ErrorKind::Validation);
        assert_eq!(record.message, "Invalid email address");

        let context = record.context.unwrap();
        assert_eq!(context["field"], "email");
        let errors = context["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0]["field"], "email");
        assert_eq!(errors[1]["field"], "password");
    }

    #[test]
    fn test_violation_without_message_uses_code() {
        let mut errors = ValidationErrors::new();
        errors.add("title", ValidationError::new("required"));

        let violations = field_violations(&errors);
        assert_eq!(violations[0].message, "title is invalid (required)");
    }

    #[test]
    fn test_store_constraint_mapping() {
        let cases = [
            (StoreError::UniqueViolation { target: vec!["email".into()] }, ErrorKind::Validation),
            (StoreError::RecordNotFound, ErrorKind::Validation),
            (StoreError::ForeignKeyViolation { constraint: Some("tasks_project_id_fkey".into()) }, ErrorKind::Validation),
            (StoreError::RequiredRelationViolation("project".into()), ErrorKind::Validation),
            (StoreError::MalformedInput("expected uuid".into()), ErrorKind::Validation),
            (StoreError::Other { code: Some("53300".into()), message: "too many connections".into() }, ErrorKind::Database),
        ];

        for (err, kind) in cases {
            let record = classify(&ApiError::from(err));
            assert_eq!(record.kind, kind);
            assert!(record.operational);
        }
    }

    #[test]
    fn test_unique_violation_exposes_target() {
        let err = StoreError::UniqueViolation { target: vec!["email".into()] };
        let record = classify(&ApiError::from(err));

        assert_eq!(record.status_code().as_u16(), 400);
        assert_eq!(record.context.unwrap()["target"][0], "email");
    }

    #[test]
    fn test_store_internals_never_leak() {
        let err = StoreError::MalformedInput("column \"secret_hash\" expected text".into());
        let record = classify(&ApiError::from(err));
        assert!(!record.message.contains("secret_hash"));
        assert!(record.context.is_none());

        let err = StoreError::Other { code: None, message: "SELECT * FROM users".into() };
        assert!(!classify(&ApiError::from(err)).message.contains("SELECT"));
    }

    #[test]
    fn test_unexpected_errors_are_generic() {
        let errors = [
            ApiError::from(anyhow::anyhow!("null pointer in report builder")),
            ApiError::Panicked("index out of bounds: the len is 0".to_string()),
        ];

        for err in &errors {
            let record = classify(err);
            assert_eq!(record.kind, ErrorKind::Internal);
            assert_eq!(record.message, GENERIC_ERROR_MESSAGE);
            assert!(!record.operational);
            assert!(record.context.is_none());
        }
    }

    #[test]
    fn test_app_error_inside_anyhow_keeps_its_kind() {
        let err = ApiError::from(anyhow::Error::from(AppError::not_found("Task not found")));
        let record = classify(&err);

        assert_eq!(record.kind, ErrorKind::NotFound);
        assert_eq!(record.status_code().as_u16(), 404);
        assert_eq!(record.message, "Task not found");
        assert!(record.operational);

        let err = ApiError::from(
            anyhow::Error::from(AppError::conflict("Board is archived")).context("moving card"),
        );
        assert_eq!(classify(&err).kind, ErrorKind::Conflict);
    }

    #[test]
    fn test_store_errors_inside_anyhow() {
        let err = ApiError::from(anyhow::Error::from(StoreError::UniqueViolation {
            target: vec!["email".into()],
        }));
        let record = classify(&err);
        assert_eq!(record.kind, ErrorKind::Validation);
        assert_eq!(record.context.unwrap()["target"][0], "email");

        let err = ApiError::from(anyhow::Error::from(sqlx::Error::RowNotFound).context("archiving task"));
        let record = classify(&err);
        assert_eq!(record.kind, ErrorKind::Validation);
        assert_eq!(record.message, "Record not found");
    }

    #[test]
    fn test_schema_errors_inside_anyhow() {
        let err = ApiError::from(anyhow::Error::from(login_violations()));
        let record = classify(&err);

        assert_eq!(record.kind, ErrorKind::Validation);
        assert_eq!(record.message, "Invalid email address");
    }

    #[test]
    fn test_translate_logs_once_with_full_detail() {
        let (translator, sink) = translator();
        let err = ApiError::from(anyhow::anyhow!("connection refused").context("loading board"));

        let record = translator.translate(&err, &ErrorContext::request("GET", "/api/v1/boards/3"));

        assert_eq!(record.message, GENERIC_ERROR_MESSAGE);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["level"], "error");
        assert_eq!(records[0]["error"]["message"], "loading board");
        assert!(records[0]["error"]["stack"].as_str().unwrap().contains("connection refused"));
        assert_eq!(records[0]["context"]["path"], "/api/v1/boards/3");
        assert_eq!(records[0]["context"]["statusCode"], 500);
        assert_eq!(records[0]["context"]["operational"], false);
    }

    #[test]
    fn test_translate_logs_operational_errors_too() {
        let (translator, sink) = translator();

        translator.translate(
            &ApiError::from(AppError::not_found("Task not found")),
            &ErrorContext::default(),
        );

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["message"], "Request error");
        assert_eq!(records[0]["error"]["name"], "NotFoundError");
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42_u8)), "Unknown panic");
    }
}
