//! Request correlation for the HTTP surface.
//!
//! Every request gets a correlation id: a caller-supplied `X-Request-ID`
//! when it passes validation, a fresh UUIDv4 otherwise. The id is attached
//! to the request's tracing span, stored in the extensions for handlers,
//! echoed in the response, and stamped on a per-request latency log line.

use axum::{
    body::Body,
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use uuid::Uuid;

/// Correlation header, read and echoed.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest caller-supplied id accepted before falling back to a fresh one.
const MAX_CALLER_ID_LEN: usize = 64;

/// Correlation id stored in request extensions.
#[derive(Clone, Debug)]
#[allow(dead_code)] // Field is public for handler access
pub struct RequestId(pub String);

/// Take a caller-supplied id only when it is short and header-safe;
/// anything else (oversized, empty, exotic bytes) is replaced rather than
/// propagated into logs.
fn accept_caller_id(value: &HeaderValue) -> Option<String> {
    let s = value.to_str().ok()?;
    let clean = !s.is_empty()
        && s.len() <= MAX_CALLER_ID_LEN
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    clean.then(|| s.to_string())
}

/// Correlation middleware: resolve the id, run the request inside a span
/// carrying it, then echo it back and log the request's latency.
pub async fn correlate(mut request: Request<Body>, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(accept_caller_id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(id.clone()));

    let span = tracing::info_span!(
        "http",
        id = %id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let started = Instant::now();
    let mut response = {
        let _enter = span.enter();
        next.run(request).await
    };
    tracing::debug!(
        id = %id,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request served"
    );

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    fn test_app() -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn(correlate))
    }

    async fn echoed_id(request: Request<Body>) -> String {
        let response = test_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response
            .headers()
            .get(REQUEST_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_missing_id_gets_generated() {
        let id = echoed_id(Request::builder().uri("/").body(Body::empty()).unwrap()).await;
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_clean_caller_id_is_echoed() {
        let id = echoed_id(
            Request::builder()
                .uri("/")
                .header(REQUEST_ID_HEADER, "deploy-42_a")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(id, "deploy-42_a");
    }

    #[tokio::test]
    async fn test_dirty_caller_id_is_replaced() {
        let id = echoed_id(
            Request::builder()
                .uri("/")
                .header(REQUEST_ID_HEADER, "id with spaces!")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_ne!(id, "id with spaces!");
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_oversized_caller_id_is_replaced() {
        let long = "a".repeat(MAX_CALLER_ID_LEN + 1);
        let id = echoed_id(
            Request::builder()
                .uri("/")
                .header(REQUEST_ID_HEADER, long.as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_accept_caller_id_rules() {
        let ok = |s: &str| accept_caller_id(&HeaderValue::from_str(s).unwrap());
        assert_eq!(ok("abc-123_X"), Some("abc-123_X".to_string()));
        assert_eq!(ok(""), None);
        assert_eq!(ok("has space"), None);
        assert_eq!(ok("semi;colon"), None);
        assert_eq!(ok(&"a".repeat(MAX_CALLER_ID_LEN)), Some("a".repeat(MAX_CALLER_ID_LEN)));
        assert_eq!(ok(&"a".repeat(MAX_CALLER_ID_LEN + 1)), None);
    }
}
