//! HTTP route handlers.
//!
//! Handlers are plain async functions returning [`ApiResult`](crate::error::ApiResult);
//! each is mounted through the request pipeline.

pub mod auth;
pub mod health;

use crate::error::{ApiResult, AppError};
use crate::middleware::logging::request_path;
use axum::{
    body::Body,
    http::{Request, Response},
};

// Re-export for convenience
pub use auth::routes as auth_routes;
pub use health::routes as health_routes;

/// Answers requests no route accepts, whether the path or only the method
/// is unknown.
pub async fn not_found(req: Request<Body>) -> ApiResult<Response<Body>> {
    Err(AppError::not_found(format!(
        "Route {} {} not found",
        req.method(),
        request_path(&req)
    ))
    .into())
}
