//! Request pipeline middleware.
//!
//! [`PipelineLayer`] wraps a fallible handler service and turns it into an
//! infallible one: every request is timed and logged on completion, and any
//! error (or panic) is classified by the [`ErrorTranslator`] and answered
//! with an [`ErrorResponse`]. The wrapper never propagates an error.

use crate::error::{ApiError, ErrorResponse};
use crate::middleware::error_handler::{panic_message, ErrorContext, ErrorTranslator};
use axum::{
    body::Body,
    extract::OriginalUri,
    http::{Request, Response},
    response::IntoResponse,
};
use futures::FutureExt;
use std::{
    convert::Infallible,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    task::{Context, Poll},
    time::{Duration, Instant},
};
use taskboard_common::logger::DEFAULT_SLOW_THRESHOLD;
use tower::{service_fn, util::ServiceFn, Layer, Service, ServiceExt};

/// Layer that applies the request pipeline
#[derive(Debug, Clone)]
pub struct PipelineLayer {
    translator: ErrorTranslator,
    slow_threshold: Duration,
}

impl PipelineLayer {
    /// Create a pipeline around `translator`, logging through its logger
    pub fn new(translator: ErrorTranslator) -> Self {
        Self {
            translator,
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
        }
    }

    /// Requests slower than this are also logged as slow operations
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }
}

impl<S> Layer<S> for PipelineLayer {
    type Service = PipelineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PipelineService {
            inner,
            translator: self.translator.clone(),
            slow_threshold: self.slow_threshold,
        }
    }
}

/// Wrap an async handler function in the pipeline.
///
/// ```rust,no_run
/// use axum::{body::Body, http::{Request, Response}};
/// use taskboard_api_rest::error::{ApiResult, AppError};
/// use taskboard_api_rest::middleware::{error_handler::ErrorTranslator, logging::{wrap, PipelineLayer}};
/// use taskboard_common::logger::{LogMode, Logger};
///
/// async fn archive(_req: Request<Body>) -> ApiResult<Response<Body>> {
///     Err(AppError::conflict("Board is already archived").into())
/// }
///
/// let layer = PipelineLayer::new(ErrorTranslator::new(Logger::stdio(LogMode::Development)));
/// let service = wrap(&layer, archive);
/// let app: axum::Router = axum::Router::new().route_service("/boards/archive", service);
/// ```
pub fn wrap<F, Fut, E>(layer: &PipelineLayer, handler: F) -> PipelineService<ServiceFn<F>>
where
    F: FnMut(Request<Body>) -> Fut,
    Fut: Future<Output = Result<Response<Body>, E>>,
{
    layer.layer(service_fn(handler))
}

/// Service that times, logs and error-translates every request
#[derive(Clone)]
pub struct PipelineService<S> {
    inner: S,
    translator: ErrorTranslator,
    slow_threshold: Duration,
}

impl<S> fmt::Debug for PipelineService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineService")
            .field("slow_threshold", &self.slow_threshold)
            .finish_non_exhaustive()
    }
}

impl<S, E> Service<Request<Body>> for PipelineService<S>
where
    S: Service<Request<Body>, Response = Response<Body>, Error = E> + Clone + Send + 'static,
    S::Future: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness of the inner service is awaited per call so that its errors
        // are translated like any other failure.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let inner = self.inner.clone();
        let translator = self.translator.clone();
        let slow_threshold = self.slow_threshold;
        let method = req.method().to_string();
        let path = request_path(&req);

        Box::pin(async move {
            let start = Instant::now();

            let outcome = AssertUnwindSafe(inner.oneshot(req)).catch_unwind().await;
            let result = match outcome {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(err)) => Err(err.into()),
                Err(payload) => Err(ApiError::Panicked(panic_message(payload))),
            };

            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    let record = translator.translate(&err, &ErrorContext::request(&method, &path));
                    ErrorResponse::from_record(&record)
                        .with_path(path.clone())
                        .into_response()
                }
            };

            let elapsed = start.elapsed();
            let logger = translator.logger();
            logger.log_request(&method, &path, response.status().as_u16(), Some(elapsed));
            logger.log_slow_operation(&format!("{} {}", method, path), elapsed, slow_threshold);

            Ok(response)
        })
    }
}

/// Path as the client sent it, including any prefix stripped by nesting
pub(crate) fn request_path(req: &Request<Body>) -> String {
    req.extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.0.path())
        .unwrap_or_else(|| req.uri().path())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, ErrorKind};
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Arc;
    use taskboard_common::logger::{LogMode, Logger, MemorySink};

    fn layer() -> (PipelineLayer, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let logger = Logger::new(LogMode::Production, sink.clone());
        (PipelineLayer::new(ErrorTranslator::new(logger)), sink)
    }

    fn request(path: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: Response<Body>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_success_passes_through_and_is_logged() {
        let (layer, sink) = layer();
        let service = wrap(&layer, |_req: Request<Body>| async {
            Ok::<_, ApiError>(
                Response::builder()
                    .status(StatusCode::CREATED)
                    .header("x-task-id", "17")
                    .body(Body::from("created"))
                    .unwrap(),
            )
        });

        let response = service.oneshot(request("/api/v1/tasks")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-task-id"], "17");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"created");

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["data"]["method"], "POST");
        assert_eq!(records[0]["data"]["path"], "/api/v1/tasks");
        assert_eq!(records[0]["data"]["statusCode"], 201);
        assert!(records[0]["data"]["duration"].is_u64());
    }

    #[tokio::test]
    async fn test_taxonomy_error_synthesizes_response() {
        for kind in ErrorKind::ALL {
            let (layer, _) = layer();
            let service = wrap(&layer, move |_req: Request<Body>| async move {
                Err::<Response<Body>, _>(AppError::new(kind, "nope"))
            });

            let response = service.oneshot(request("/api/v1/projects/4")).await.unwrap();
            assert_eq!(response.status(), kind.status_code());

            let body = body_json(response).await;
            assert_eq!(body["error"], kind.name());
            assert_eq!(body["message"], "nope");
            assert_eq!(body["statusCode"], kind.status_code().as_u16());
            assert_eq!(body["path"], "/api/v1/projects/4");
            assert!(body["timestamp"].is_string());
        }
    }

    #[tokio::test]
    async fn test_error_logged_by_translator_and_request_line() {
        let (layer, sink) = layer();
        let service = wrap(&layer, |_req: Request<Body>| async {
            Err::<Response<Body>, _>(ApiError::from(anyhow::anyhow!("relation \"tasks\" does not exist")))
        });

        let response = service.oneshot(request("/api/v1/tasks")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["message"], "An unexpected error occurred");
        assert!(!body.to_string().contains("relation"));

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["level"], "error");
        assert_eq!(records[0]["context"]["statusCode"], 500);
        assert_eq!(records[1]["level"], "info");
        assert_eq!(records[1]["data"]["statusCode"], 500);
        assert!(records[0]["timestamp"].as_str() <= records[1]["timestamp"].as_str());
    }

    #[tokio::test]
    async fn test_panic_becomes_generic_500() {
        let (layer, sink) = layer();
        let service = wrap(&layer, |_req: Request<Body>| async {
            if true {
                panic!("secret token abc123 missing");
            }
            Ok::<Response<Body>, ApiError>(Response::new(Body::empty()))
        });

        let response = service.oneshot(request("/api/v1/reports")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "InternalServerError");
        assert!(!body.to_string().contains("abc123"));

        let records = sink.records();
        assert_eq!(records[0]["error"]["name"], "Panic");
        assert!(records[0]["error"]["message"].as_str().unwrap().contains("abc123"));
    }

    #[tokio::test]
    async fn test_slow_requests_are_flagged() {
        let (layer, sink) = layer();
        let layer = layer.with_slow_threshold(Duration::ZERO);
        let service = wrap(&layer, |_req: Request<Body>| async {
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok::<_, ApiError>(Response::new(Body::empty()))
        });

        service.oneshot(request("/api/v1/reports")).await.unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["level"], "warn");
        assert_eq!(records[1]["data"]["description"], "POST /api/v1/reports");
    }
}
