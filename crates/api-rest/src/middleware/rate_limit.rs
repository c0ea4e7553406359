//! Rate limiting middleware.
//!
//! Counts every request against a [`RateLimitStore`] keyed by scope and
//! client address. Every response carries `X-RateLimit-*` headers; rejected
//! requests get a 429 with `Retry-After`.
//!
//! Client addresses come from proxy headers only. Requests that arrive
//! without any of them share the single `unknown` bucket.

use crate::limiter::{Quota, RateLimitDecision, RateLimitStore};
use crate::middleware::logging::request_path;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    fmt,
    sync::Arc,
    task::{Context, Poll},
};
use taskboard_common::logger::Logger;
use tower::{Layer, Service};

/// `X-RateLimit-Limit`
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// `X-RateLimit-Remaining`
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// `X-RateLimit-Reset`
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Key used when no forwarding header identifies the client
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Default rejection message
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

/// Headers consulted for the client address, in priority order
const CLIENT_ADDRESS_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

/// Body of a 429 response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitExceeded {
    /// Rejection message
    pub error: String,

    /// Seconds until the window resets
    pub retry_after: u64,

    /// Requests allowed per window
    pub limit: u32,

    /// Window length in seconds
    pub window: u64,
}

/// Derive the rate limit key for a request from its forwarding headers.
///
/// The first address of a comma-separated chain is used.
pub fn client_key(headers: &HeaderMap) -> String {
    CLIENT_ADDRESS_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(',').next())
        .map(str::trim)
        .find(|address| !address.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

/// Layer for rate limiting
#[derive(Clone)]
pub struct RateLimitLayer {
    store: Arc<dyn RateLimitStore>,
    logger: Logger,
    quota: Quota,
    scope: Arc<str>,
    message: Arc<str>,
}

impl fmt::Debug for RateLimitLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitLayer")
            .field("quota", &self.quota)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl RateLimitLayer {
    /// Create a layer counting against `store` with the default quota
    pub fn new(store: Arc<dyn RateLimitStore>, logger: Logger) -> Self {
        Self {
            store,
            logger,
            quota: Quota::default(),
            scope: Arc::from("global"),
            message: Arc::from(DEFAULT_MESSAGE),
        }
    }

    /// Set the quota
    pub fn with_quota(mut self, quota: Quota) -> Self {
        self.quota = quota;
        self
    }

    /// Namespace for keys, so endpoints with different quotas never share counters
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Arc::from(scope.into());
        self
    }

    /// Set the rejection message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Arc::from(message.into());
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            config: self.clone(),
        }
    }
}

/// Service that performs rate limiting
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    config: RateLimitLayer,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let config = self.config.clone();
        // Use the instance that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let key = format!("{}:{}", config.scope, client_key(req.headers()));
            let decision = config.store.check(&key, config.quota).await;

            if !decision.allowed {
                config.logger.warn(
                    "Rate limit exceeded",
                    Some(json!({
                        "key": key,
                        "path": request_path(&req),
                        "limit": decision.limit,
                        "window": config.quota.window.as_secs(),
                    })),
                );

                let mut response = rejection(&decision, config.quota, &config.message);
                apply_headers(response.headers_mut(), &decision);
                return Ok(response);
            }

            let mut response = inner.call(req).await?;
            apply_headers(response.headers_mut(), &decision);
            Ok(response)
        })
    }
}

fn rejection(decision: &RateLimitDecision, quota: Quota, message: &str) -> Response<Body> {
    let body = RateLimitExceeded {
        error: message.to_string(),
        retry_after: decision.retry_after_secs,
        limit: decision.limit,
        window: quota.window.as_secs(),
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(decision.retry_after_secs));
    response
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_unix()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_client_key_priority() {
        let map = headers(&[
            ("cf-connecting-ip", "203.0.113.9"),
            ("x-real-ip", "198.51.100.4"),
            ("x-forwarded-for", "192.0.2.1, 10.0.0.1"),
        ]);
        assert_eq!(client_key(&map), "192.0.2.1");

        let map = headers(&[("cf-connecting-ip", "203.0.113.9"), ("x-real-ip", "198.51.100.4")]);
        assert_eq!(client_key(&map), "198.51.100.4");

        let map = headers(&[("cf-connecting-ip", "203.0.113.9")]);
        assert_eq!(client_key(&map), "203.0.113.9");
    }

    #[test]
    fn test_client_key_unknown() {
        assert_eq!(client_key(&HeaderMap::new()), UNKNOWN_CLIENT);
        assert_eq!(client_key(&headers(&[("x-forwarded-for", " ")])), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_rejection_body() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 5,
            remaining: 0,
            reset_at: chrono::Utc::now(),
            retry_after_secs: 42,
        };

        let response = rejection(&decision, Quota::default(), DEFAULT_MESSAGE);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }
}
