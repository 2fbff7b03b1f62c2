//! Middleware implementations for the proxy service

use crate::domain::RequestId;
use crate::proxy::error_response::extract_request_id;
use crate::proxy::headers::X_REQUEST_ID;
use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::{from_fn, Next},
    response::Response,
    Router,
};
use std::time::Instant;
use tracing::{info, warn};

/// Applies the middleware stack to a router
///
/// Outer to inner: request ID, then access logging, so every log line carries an ID.
pub fn apply_middleware<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(from_fn(logging_middleware))
        .layer(from_fn(request_id_middleware))
}

/// Request ID middleware - ensures every request has a unique ID for tracing
///
/// A valid UUID in an incoming `x-request-id` is kept; anything else is replaced
/// by a fresh v7 ID. The ID lives in a request extension and is echoed on the
/// response. Inbound headers are left as the client sent them, so a generated ID
/// never reaches the upstream or the captured request.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = extract_request_id(request.headers())
        .and_then(|value| RequestId::parse(&value))
        .unwrap_or_else(RequestId::generate);
    request.extensions_mut().insert(request_id);

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }

    response
}

/// Logging middleware - logs request/response details with timing
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown".to_string());

    info!(
        request_id = %request_id,
        method = %method,
        path = %uri.path(),
        "Incoming request"
    );

    let response = next.run(request).await;
    let duration = start.elapsed();
    let status = response.status();

    if status.is_server_error() {
        warn!(
            request_id = %request_id,
            method = %method,
            path = %uri.path(),
            status = status.as_u16(),
            duration_ms = duration.as_millis(),
            "Request failed"
        );
    } else {
        info!(
            request_id = %request_id,
            method = %method,
            path = %uri.path(),
            status = status.as_u16(),
            duration_ms = duration.as_millis(),
            "Request completed"
        );
    }

    response
}
