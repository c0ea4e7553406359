//! Authentication endpoints.
//!
//! Credential checking itself lives behind [`Authenticator`]; this module only
//! validates the request shape and maps the outcome onto the error taxonomy.

use crate::error::{ApiResult, AppError};
use crate::extractors::ValidatedJson;
use crate::middleware::logging::{wrap, PipelineLayer};
use crate::middleware::rate_limit::RateLimitLayer;
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::FromRequest,
    http::{Request, Response},
    response::IntoResponse,
    routing::post_service,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use validator::Validate;

/// Message returned for any failed credential check
pub const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Message returned when the login rate limit is exhausted
pub const TOO_MANY_LOGIN_ATTEMPTS: &str =
    "Too many authentication attempts, please try again later.";

/// A verified caller identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// User identifier
    pub id: String,

    /// User email
    pub email: String,
}

/// Verifies credentials and yields the caller's identity
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `Ok(None)` means the credentials were rejected
    async fn verify(&self, email: &str, password: &str) -> ApiResult<Option<Principal>>;
}

/// Authenticator used when no identity provider is configured. Rejects everyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectingAuthenticator;

#[async_trait]
impl Authenticator for RejectingAuthenticator {
    async fn verify(&self, _email: &str, _password: &str) -> ApiResult<Option<Principal>> {
        Ok(None)
    }
}

/// Login request body
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    /// Account email
    #[validate(email(message = "Invalid email address"))]
    pub email: String,

    /// Account password
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
}

/// Login response body
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    /// The authenticated user
    pub user: Principal,
}

/// Authentication routes. Every route is rate limited by `rate_limit`.
pub fn routes(
    authenticator: Arc<dyn Authenticator>,
    pipeline: &PipelineLayer,
    rate_limit: RateLimitLayer,
) -> Router {
    let login_service = wrap(pipeline, move |req: Request<Body>| {
        let authenticator = authenticator.clone();
        async move { login(authenticator.as_ref(), req).await }
    });

    Router::new().route(
        "/auth/login",
        post_service(ServiceBuilder::new().layer(rate_limit).service(login_service))
            .fallback_service(wrap(pipeline, super::not_found)),
    )
}

/// Log a user in
pub async fn login(
    authenticator: &dyn Authenticator,
    req: Request<Body>,
) -> ApiResult<Response<Body>> {
    let ValidatedJson(body) = ValidatedJson::<LoginRequest>::from_request(req, &()).await?;

    match authenticator.verify(&body.email, &body.password).await? {
        Some(user) => Ok(Json(LoginResponse { user }).into_response()),
        None => Err(AppError::authentication(INVALID_CREDENTIALS).into()),
    }
}
