//! Demo HTTP surface served behind the response cache.

mod middleware;

use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    http::{Request, StatusCode},
    middleware as axum_middleware,
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::cache::{CacheContext, CacheState, response_cache_layer};

use self::middleware::log_responses;

const INDEX_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
struct IndexBody {
    id: i32,
    test: bool,
}

pub fn build_router(cache: CacheState) -> Router {
    // Routes behind the cache: GET is read-through, every other method invalidates.
    let cached_routes = Router::new()
        .route("/", get(index))
        .fallback(echo)
        .layer(axum_middleware::from_fn_with_state(
            cache,
            response_cache_layer,
        ));

    let uncached_routes = Router::new().route("/_health", get(health));

    cached_routes
        .merge(uncached_routes)
        .layer(axum_middleware::from_fn(log_responses))
}

/// Deliberately slow so cache hits are visible.
async fn index() -> Json<IndexBody> {
    tokio::time::sleep(INDEX_DELAY).await;
    Json(IndexBody {
        id: 32,
        test: false,
    })
}

async fn echo(request: Request<Body>) -> Json<Value> {
    let key = request
        .extensions()
        .get::<CacheContext>()
        .map(|context| context.key.to_string());

    Json(json!({
        "method": request.method().as_str(),
        "path": request.uri().path(),
        "key": key,
    }))
}

async fn health() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}
