//! Application builder.
//!
//! Assembles routes, the request pipeline and the rate limiters into an
//! Axum router.

use crate::{
    config::ApiConfig,
    limiter::{InMemoryStore, RateLimitStore},
    middleware::{wrap, ErrorTranslator, PipelineLayer, RateLimitLayer},
    routes::{self, auth::Authenticator},
};
use axum::Router;
use std::sync::Arc;
use taskboard_common::logger::Logger;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Collaborators the application is built from
#[derive(Clone)]
pub struct AppDependencies {
    /// Structured request logger
    pub logger: Logger,

    /// Credential verification
    pub authenticator: Arc<dyn Authenticator>,

    /// Backing store for rate limit counters
    pub rate_limit_store: Arc<dyn RateLimitStore>,
}

impl AppDependencies {
    /// Dependencies with an in-memory rate limit store
    pub fn new(logger: Logger, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            logger,
            authenticator,
            rate_limit_store: Arc::new(InMemoryStore::new()),
        }
    }

    /// Replace the rate limit store
    pub fn with_rate_limit_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.rate_limit_store = store;
        self
    }
}

/// Create the main application router
pub fn create_app(config: &ApiConfig, deps: AppDependencies) -> Router {
    let pipeline = PipelineLayer::new(ErrorTranslator::new(deps.logger.clone()))
        .with_slow_threshold(config.slow_request_threshold());

    let auth_rate_limit = RateLimitLayer::new(deps.rate_limit_store.clone(), deps.logger.clone())
        .with_quota(config.auth_quota())
        .with_scope("auth")
        .with_message(routes::auth::TOO_MANY_LOGIN_ATTEMPTS);

    Router::new()
        .merge(routes::health_routes(&pipeline))
        .nest(
            "/api/v1",
            routes::auth_routes(deps.authenticator.clone(), &pipeline, auth_rate_limit),
        )
        .fallback_service(wrap(&pipeline, routes::not_found))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(config.request_timeout())),
        )
}
