use std::any::Any;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::idempotency::middleware::is_json_content;
use crate::metrics;
use crate::problem::Problem;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request id stored in request extensions for downstream usage (e.g., logging).
#[derive(Debug, Clone)]
pub struct RequestId(pub HeaderValue);

impl RequestId {
    pub fn as_str(&self) -> &str {
        self.0.to_str().unwrap_or("")
    }
}

tokio::task_local! {
    static CURRENT_REQUEST_ID: RequestId;
}

/// Request id of the request being served on this task, if any.
///
/// Set by [`request_id`] for everything that runs inside it, including the
/// panic handler.
pub fn current_request_id() -> Option<String> {
    CURRENT_REQUEST_ID
        .try_with(|id| id.as_str().to_owned())
        .ok()
        .filter(|id| !id.is_empty())
}

// Middleware that ensures each request has an X-Request-Id and mirrors it on the response
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static(REQUEST_ID_HEADER);

    // If the incoming request already has a request-id, preserve it; otherwise generate one
    let req_id_value = match req.headers().get(&header_name) {
        Some(existing) => existing.clone(),
        None => {
            let generated = HeaderValue::from_str(&Uuid::new_v4().to_string());
            match generated {
                Ok(value) => value,
                Err(_) => HeaderValue::from_static("unknown"),
            }
        }
    };

    req.extensions_mut().insert(RequestId(req_id_value.clone()));

    let mut res = CURRENT_REQUEST_ID
        .scope(RequestId(req_id_value.clone()), next.run(req))
        .await;

    res.headers_mut().insert(header_name, req_id_value);

    res
}

/// Gives every request a [`CancellationToken`] that fires once `timeout` elapses
/// or the request future is dropped (client went away).
///
/// The deadline does not abort the handler. Code that observes the token
/// stops waiting for an idempotency lock, and a response produced after the
/// token fired is not recorded for replay.
pub async fn request_deadline(
    State(timeout): State<Duration>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = CancellationToken::new();
    req.extensions_mut().insert(token.clone());
    let _cancel_on_drop = token.clone().drop_guard();

    let run = next.run(req);
    tokio::pin!(run);

    tokio::select! {
        res = &mut run => return res,
        _ = tokio::time::sleep(timeout) => {
            tracing::debug!(timeout_ms = timeout.as_millis() as u64, "request deadline elapsed");
            token.cancel();
        }
    }

    run.await
}

// Requests with a body must declare JSON (application/json or application/*+json).
pub async fn json_only(req: Request<Body>, next: Next) -> Response {
    let method = req.method();
    let needs_body_type = *method == Method::POST || *method == Method::PUT || *method == Method::PATCH;

    if needs_body_type && has_body(req.headers()) && !is_json_content(req.headers()) {
        return Problem::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, "Unsupported Media Type")
            .with_detail("Content-Type must be application/json")
            .into_response();
    }

    next.run(req).await
}

/// Only a declared positive Content-Length counts; chunked bodies pass through.
fn has_body(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .is_some_and(|len| len > 0)
}

/// Records request count and latency per method, normalized path and status.
pub async fn http_metrics(req: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let res = next.run(req).await;

    metrics::record_http_request(method.as_str(), &path, res.status().as_u16(), started.elapsed());
    res
}

/// Converts a handler panic into a 500 problem response.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic payload".to_string()
    };
    let trace_id = current_request_id();
    tracing::error!(panic = %detail, trace_id = ?trace_id, "handler panicked");

    let problem = Problem::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        .with_detail("An unexpected error occurred.");
    match trace_id {
        Some(id) => problem.with_trace_id(id),
        None => problem,
    }
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::ApiError;
    use axum::{Router, middleware, routing::post};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/echo", post(|body: String| async move { body }))
            .layer(middleware::from_fn(json_only))
            .layer(middleware::from_fn(request_id))
    }

    #[tokio::test]
    async fn request_id_is_generated_and_preserved() {
        let res = app()
            .oneshot(Request::post("/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let generated = res.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert!(Uuid::try_parse(generated).is_ok());

        let res = app()
            .oneshot(
                Request::post("/echo")
                    .header(REQUEST_ID_HEADER, "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.headers()[REQUEST_ID_HEADER], "abc-123");
    }

    #[tokio::test]
    async fn non_json_body_is_rejected() {
        let res = app()
            .oneshot(
                Request::post("/echo")
                    .header(header::CONTENT_TYPE, "text/plain")
                    .header(header::CONTENT_LENGTH, "5")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "application/problem+json");
    }

    #[tokio::test]
    async fn json_and_empty_bodies_pass() {
        let res = app()
            .oneshot(
                Request::post("/echo")
                    .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
                    .header(header::CONTENT_LENGTH, "2")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app()
            .oneshot(Request::post("/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn chunked_body_without_length_is_not_checked() {
        let res = app()
            .oneshot(
                Request::post("/echo")
                    .header(header::CONTENT_TYPE, "text/plain")
                    .header(header::TRANSFER_ENCODING, "chunked")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_token_without_aborting_handler() {
        let app = Router::new()
            .route(
                "/slow",
                post(|req: Request<Body>| async move {
                    let token = req.extensions().get::<CancellationToken>().cloned().unwrap();
                    token.cancelled().await;
                    "cancelled"
                }),
            )
            .layer(middleware::from_fn_with_state(
                Duration::from_millis(100),
                request_deadline,
            ));

        let res = app
            .oneshot(Request::post("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, "cancelled");
    }

    #[test]
    fn panic_becomes_problem() {
        let res = handle_panic(Box::new("boom"));
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(current_request_id().is_none());
    }

    async fn problem_json(res: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn explode() -> StatusCode {
        panic!("boom")
    }

    #[tokio::test]
    async fn server_errors_carry_the_request_id() {
        let app = Router::new()
            .route("/panic", post(explode))
            .route(
                "/internal",
                post(|| async { Err::<(), _>(ApiError::Internal("disk on fire".into())) }),
            )
            .layer(tower_http::catch_panic::CatchPanicLayer::custom(handle_panic))
            .layer(middleware::from_fn(request_id));

        for path in ["/panic", "/internal"] {
            let res = app
                .clone()
                .oneshot(
                    Request::post(path)
                        .header(REQUEST_ID_HEADER, "req-42")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(res.headers()[REQUEST_ID_HEADER], "req-42");
            let json = problem_json(res).await;
            assert_eq!(json["traceId"], "req-42", "{path}");
            assert_eq!(json["title"], "Internal Server Error");
        }
    }
}
