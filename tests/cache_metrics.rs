use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header::HOST},
    middleware,
    routing::get,
};
use bytes::Bytes;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use relaycache::cache::{
    CacheConfig, CacheGroup, CacheGroupIndex, CacheState, CacheStore, MemoryStore, StoreError,
    response_cache_layer,
};
use tower::ServiceExt;

struct BrokenStore;

#[async_trait]
impl CacheStore for BrokenStore {
    async fn get(&self, _key: &str) -> Result<Option<Bytes>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn set(
        &self,
        _key: &str,
        _value: Bytes,
        _ttl: std::time::Duration,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

fn app(store: Arc<dyn CacheStore>) -> Router {
    let groups: CacheGroupIndex = [CacheGroup::new(["/", "/test", "/toto"])]
        .into_iter()
        .collect();
    let cache = CacheState::new(CacheConfig::default(), store, groups);

    Router::new()
        .route("/", get(|| async { "home" }))
        .route("/test", get(|| async { "test" }).post(|| async { StatusCode::CREATED }))
        .layer(middleware::from_fn_with_state(cache, response_cache_layer))
}

async fn send(app: &Router, method: Method, uri: &str) -> StatusCode {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(HOST, "metrics.test")
        .body(Body::empty())
        .expect("request should build");
    app.clone()
        .oneshot(request)
        .await
        .expect("router should respond")
        .status()
}

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let healthy = app(Arc::new(MemoryStore::new(
        NonZeroUsize::new(8).expect("capacity"),
    )));
    assert_eq!(send(&healthy, Method::GET, "/").await, StatusCode::OK);
    assert_eq!(send(&healthy, Method::GET, "/").await, StatusCode::OK);
    assert_eq!(send(&healthy, Method::POST, "/test").await, StatusCode::CREATED);

    let broken = app(Arc::new(BrokenStore));
    assert_eq!(send(&broken, Method::GET, "/").await, StatusCode::OK);

    let counters: HashMap<String, u64> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter_map(|(composite_key, _, _, value)| match value {
            DebugValue::Counter(count) => Some((composite_key.key().name().to_string(), count)),
            _ => None,
        })
        .fold(HashMap::new(), |mut totals, (name, count)| {
            *totals.entry(name).or_default() += count;
            totals
        });

    let expected = [
        "relaycache_hit_total",
        "relaycache_miss_total",
        "relaycache_store_total",
        "relaycache_invalidated_total",
        "relaycache_store_error_total",
    ];
    for metric in expected {
        assert!(counters.contains_key(metric), "missing metric: {metric}");
    }

    assert_eq!(counters["relaycache_hit_total"], 1);
    // One miss on the healthy store, one on the broken store.
    assert_eq!(counters["relaycache_miss_total"], 2);
    assert_eq!(counters["relaycache_store_total"], 1);
    assert_eq!(counters["relaycache_invalidated_total"], 3);
    // Broken store: failed lookup plus failed write.
    assert_eq!(counters["relaycache_store_error_total"], 2);
}
