//! Response cache middleware.
//!
//! GET requests are answered from the store when possible; a miss runs the handler
//! behind a [`ResponseInterceptor`]. Every other method first evicts the cached reads
//! of each endpoint grouped with the request path, then runs the handler untouched.
//! Store failures never reach the client: lookups degrade to misses, writes and
//! deletes are logged and skipped.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Method, Request},
    middleware::Next,
    response::Response,
};
use bytes::Bytes;
use futures::future::join_all;
use metrics::counter;
use tracing::{debug, instrument, warn};

use super::{
    CacheConfig, CacheGroupIndex,
    context::CacheContext,
    interceptor::ResponseInterceptor,
    keys::{CacheKey, request_host},
    store::{CacheStore, StoreError, bounded},
};

pub(crate) const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

pub const METRIC_HIT: &str = "relaycache_hit_total";
pub const METRIC_MISS: &str = "relaycache_miss_total";
pub const METRIC_STORE: &str = "relaycache_store_total";
pub const METRIC_INVALIDATED: &str = "relaycache_invalidated_total";
pub const METRIC_STORE_ERROR: &str = "relaycache_store_error_total";

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct CacheState {
    pub config: CacheConfig,
    pub store: Arc<dyn CacheStore>,
    pub groups: Arc<CacheGroupIndex>,
}

impl CacheState {
    /// The group index is frozen here; it is only read from now on.
    pub fn new(config: CacheConfig, store: Arc<dyn CacheStore>, groups: CacheGroupIndex) -> Self {
        Self {
            config,
            store,
            groups: Arc::new(groups),
        }
    }

    /// Keys a write to `endpoint` on `host` evicts, in a stable order.
    pub fn related_keys(&self, host: &str, endpoint: &str) -> Vec<CacheKey> {
        self.groups
            .related_endpoints(endpoint)
            .into_iter()
            .map(|member| CacheKey::new(&self.config.prefix, host, member))
            .collect()
    }

    /// Look `key` up, treating any store failure as a miss.
    pub async fn lookup(&self, key: &CacheKey) -> Option<Bytes> {
        let timeout = self.config.store_timeout;
        match bounded("get", timeout, self.store.get(key.as_str())).await {
            Ok(value) => value,
            Err(error) => {
                record_store_error("get", key.as_str(), &error);
                None
            }
        }
    }

    /// Delete every key, returning how many deletes the store acknowledged.
    pub async fn invalidate(&self, keys: &[CacheKey]) -> usize {
        let timeout = self.config.store_timeout;
        let deletes = keys.iter().map(|key| async move {
            match bounded("delete", timeout, self.store.delete(key.as_str())).await {
                Ok(()) => true,
                Err(error) => {
                    record_store_error("delete", key.as_str(), &error);
                    false
                }
            }
        });

        let deleted = join_all(deletes).await.into_iter().filter(|ok| *ok).count();
        counter!(METRIC_INVALIDATED).increment(deleted as u64);
        deleted
    }
}

/// Middleware for response caching and grouped invalidation.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !cache.config.enabled {
        return next.run(request).await;
    }

    let Some(key) = CacheKey::for_request(&cache.config.prefix, &request) else {
        debug!(cache = "response", outcome = "bypass", "malformed host header");
        return next.run(request).await;
    };

    if request.method() == Method::GET {
        read_through(&cache, key, request, next).await
    } else {
        invalidate_then_run(&cache, key, request, next).await
    }
}

async fn read_through(
    cache: &CacheState,
    key: CacheKey,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(body) = cache.lookup(&key).await {
        counter!(METRIC_HIT).increment(1);
        debug!(cache = "response", outcome = "hit", key = %key, "serving cached response");
        return replay(key, body);
    }

    counter!(METRIC_MISS).increment(1);
    debug!(cache = "response", outcome = "miss", key = %key, "cache miss, executing handler");

    let context = CacheContext::miss(Method::GET, key);
    request.extensions_mut().insert(context.clone());
    let interceptor = ResponseInterceptor::new(cache, context);

    let response = next.run(request).await;
    interceptor.intercept(response).await
}

async fn invalidate_then_run(
    cache: &CacheState,
    key: CacheKey,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let keys = request_host(&request)
        .map(|host| cache.related_keys(host, request.uri().path()))
        .unwrap_or_default();
    let context = CacheContext::miss(request.method().clone(), key);

    if !keys.is_empty() {
        let deleted = cache.invalidate(&keys).await;
        debug!(
            cache = "response",
            outcome = "invalidate",
            related = keys.len(),
            deleted,
            "evicted related entries"
        );
    }

    request.extensions_mut().insert(context);
    next.run(request).await
}

/// Build a response from a cached body.
fn replay(key: CacheKey, body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static("HIT"));
    response.extensions_mut().insert(CacheContext::hit(key));
    response
}

pub(crate) fn record_store_error(op: &'static str, key: &str, error: &StoreError) {
    counter!(METRIC_STORE_ERROR, "op" => op).increment(1);
    warn!(cache = "response", op, key, error = %error, "cache store operation failed");
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::cache::{CacheGroup, MemoryStore};

    fn state_with_groups(groups: CacheGroupIndex) -> CacheState {
        CacheState::new(
            CacheConfig::default(),
            Arc::new(MemoryStore::new(NonZeroUsize::new(16).expect("capacity"))),
            groups,
        )
    }

    #[test]
    fn related_keys_cover_every_group_member() {
        let groups: CacheGroupIndex = [CacheGroup::new(["/", "/test", "/toto"])]
            .into_iter()
            .collect();
        let state = state_with_groups(groups);

        let keys: Vec<String> = state
            .related_keys("example.test", "/test")
            .into_iter()
            .map(CacheKey::into_string)
            .collect();
        assert_eq!(
            keys,
            vec![
                "cache:example.test:/",
                "cache:example.test:/test",
                "cache:example.test:/toto",
            ]
        );
    }

    #[test]
    fn related_keys_empty_for_ungrouped_endpoint() {
        let state = state_with_groups(CacheGroupIndex::new());
        assert!(state.related_keys("example.test", "/orders").is_empty());
    }

    #[test]
    fn replay_marks_response_as_cached() {
        let key = CacheKey::new("cache", "h", "/");
        let response = replay(key.clone(), Bytes::from_static(b"body"));

        assert_eq!(response.headers().get(X_CACHE).unwrap(), "HIT");
        let context = response
            .extensions()
            .get::<CacheContext>()
            .expect("replay context");
        assert!(context.from_cache);
        assert_eq!(context.key, key);
    }

    #[tokio::test]
    async fn invalidate_counts_acknowledged_deletes() {
        let state = state_with_groups(CacheGroupIndex::new());
        let keys = vec![CacheKey::new("cache", "h", "/a"), CacheKey::new("cache", "h", "/b")];
        assert_eq!(state.invalidate(&keys).await, 2);
    }
}
