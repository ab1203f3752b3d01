use std::time::Instant;

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tracing::{debug, error, warn};

use crate::cache::CacheContext;

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = start.elapsed().as_millis();
    let cache = response
        .headers()
        .get("x-cache")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("BYPASS");
    let from_cache = response
        .extensions()
        .get::<CacheContext>()
        .is_some_and(|context| context.from_cache);

    if status.is_server_error() {
        error!(
            target = "relaycache::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            query = uri.query().unwrap_or(""),
            elapsed_ms = elapsed_ms,
            cache,
            "request failed",
        );
    } else if status.is_client_error() {
        warn!(
            target = "relaycache::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            query = uri.query().unwrap_or(""),
            elapsed_ms = elapsed_ms,
            cache,
            "client request error",
        );
    } else {
        debug!(
            target = "relaycache::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            elapsed_ms = elapsed_ms,
            cache,
            from_cache,
            "request served",
        );
    }

    response
}
