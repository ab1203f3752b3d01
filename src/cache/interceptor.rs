//! Response capture for cache misses.
//!
//! One interceptor is built per read request that missed the cache. It sees the
//! downstream response, buffers the body up to the configured limit, forwards it
//! unchanged and issues a single store write. Bodies with no upper size bound are
//! forwarded without being read.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, HttpBody},
    http::{
        HeaderValue, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE, SET_COOKIE},
        response::Parts,
    },
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream};
use http_body_util::BodyExt;
use metrics::counter;
use tracing::{debug, warn};

use super::{
    context::CacheContext,
    middleware::{CacheState, METRIC_STORE, X_CACHE, record_store_error},
    store::{CacheStore, bounded},
};

/// Wraps the downstream response of exactly one request.
pub struct ResponseInterceptor {
    store: Arc<dyn CacheStore>,
    context: CacheContext,
    ttl: Duration,
    store_timeout: Duration,
    max_body_bytes: usize,
}

/// Outcome of reading a body up to a byte limit.
enum Buffered {
    Complete(Bytes),
    /// The limit was crossed; the body replays the frames already read, then the rest.
    Overflow(Body),
}

impl ResponseInterceptor {
    pub fn new(cache: &CacheState, context: CacheContext) -> Self {
        Self {
            store: cache.store.clone(),
            context,
            ttl: cache.config.ttl,
            store_timeout: cache.config.store_timeout,
            max_body_bytes: cache.config.max_body_bytes,
        }
    }

    /// Whether the body of `response` should be written to the store.
    pub fn should_capture(&self, response: &Response) -> bool {
        should_store_response(response, self.max_body_bytes)
    }

    /// Forward `response`, storing its body when the capture rules allow it.
    pub async fn intercept(self, response: Response) -> Response {
        if !self.context.is_read() || self.context.from_cache || is_replay(&response) {
            return response;
        }

        if !self.should_capture(&response) {
            debug!(cache = "response", key = %self.context.key, "response not cacheable");
            return mark_miss(response);
        }

        let (parts, body) = response.into_parts();
        self.capture(parts, body).await
    }

    async fn capture(&self, parts: Parts, body: Body) -> Response {
        match buffer_within(body, self.max_body_bytes).await {
            Ok(Buffered::Complete(bytes)) => {
                self.persist(bytes.clone()).await;
                mark_miss(Response::from_parts(parts, Body::from(bytes)))
            }
            Ok(Buffered::Overflow(body)) => {
                debug!(
                    cache = "response",
                    key = %self.context.key,
                    limit = self.max_body_bytes,
                    "response body exceeds cache limit"
                );
                mark_miss(Response::from_parts(parts, body))
            }
            Err(error) => {
                warn!(
                    cache = "response",
                    key = %self.context.key,
                    error = %error,
                    "failed to buffer response body"
                );
                mark_miss(StatusCode::INTERNAL_SERVER_ERROR.into_response())
            }
        }
    }

    async fn persist(&self, body: Bytes) {
        let key = self.context.key.as_str();
        let body_len = body.len();
        match bounded("set", self.store_timeout, self.store.set(key, body, self.ttl)).await {
            Ok(()) => {
                counter!(METRIC_STORE).increment(1);
                debug!(cache = "response", key, body_len, "stored response body");
            }
            Err(error) => record_store_error("set", key, &error),
        }
    }
}

/// Read `body` until it ends or more than `limit` bytes have arrived.
async fn buffer_within(mut body: Body, limit: usize) -> Result<Buffered, axum::Error> {
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut len = 0;

    while let Some(frame) = body.frame().await {
        let Ok(data) = frame?.into_data() else {
            continue;
        };
        len += data.len();
        chunks.push(data);

        if len > limit {
            let head = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
            let rest = body.into_data_stream();
            return Ok(Buffered::Overflow(Body::from_stream(head.chain(rest))));
        }
    }

    let mut bytes = BytesMut::with_capacity(len);
    for chunk in chunks {
        bytes.extend_from_slice(&chunk);
    }
    Ok(Buffered::Complete(bytes.freeze()))
}

/// Responses replayed by a cache layer carry a `from_cache` context.
fn is_replay(response: &Response) -> bool {
    response
        .extensions()
        .get::<CacheContext>()
        .is_some_and(|context| context.from_cache)
}

fn should_store_response(response: &Response, max_body_bytes: usize) -> bool {
    if !response.status().is_success() {
        return false;
    }

    let headers = response.headers();
    if headers.contains_key(SET_COOKIE) {
        return false;
    }

    if headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"))
    {
        return false;
    }

    let declared_len = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > max_body_bytes) {
        return false;
    }

    // Streams of unknown length may never finish.
    response
        .body()
        .size_hint()
        .upper()
        .is_some_and(|upper| upper <= max_body_bytes as u64)
}

fn mark_miss(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static("MISS"));
    response
}
