//! Health check endpoint.

use crate::error::ApiResult;
use crate::middleware::logging::{wrap, PipelineLayer};
use axum::{
    body::Body,
    http::{Request, Response},
    response::IntoResponse,
    routing::get_service,
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}

/// Health check routes
pub fn routes(pipeline: &PipelineLayer) -> Router {
    Router::new().route(
        "/health",
        get_service(wrap(pipeline, health)).fallback_service(wrap(pipeline, super::not_found)),
    )
}

async fn health(_req: Request<Body>) -> ApiResult<Response<Body>> {
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    Ok(Json(response).into_response())
}
