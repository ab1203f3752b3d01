//! Store bootstrap: turns validated settings into the shared cache state.

use std::sync::Arc;

use tracing::info;
use url::Url;

use crate::cache::{
    CacheConfig, CacheGroupIndex, CacheState, CacheStore, MemoryStore, RedisStore, bounded,
};
use crate::config::{Settings, StoreBackend, StoreSettings};

use super::error::InfraError;

/// Connect the configured backend. A Redis server that is unreachable or does not
/// answer `PING` within the connect timeout is a startup error.
pub async fn connect(settings: &StoreSettings) -> Result<Arc<dyn CacheStore>, InfraError> {
    match &settings.backend {
        StoreBackend::Redis { url } => {
            let store = bounded(
                "connect",
                settings.connect_timeout,
                RedisStore::connect(url.as_str()),
            )
            .await?;
            info!(
                target = "relaycache::store",
                backend = "redis",
                url = %redacted(url),
                "cache store connected"
            );
            Ok(Arc::new(store))
        }
        StoreBackend::Memory { capacity } => {
            info!(
                target = "relaycache::store",
                backend = "memory",
                capacity = capacity.get(),
                "cache store ready"
            );
            Ok(Arc::new(MemoryStore::new(*capacity)))
        }
    }
}

/// Build the middleware state: connected store, runtime config and frozen group index.
pub async fn build_cache_state(settings: &Settings) -> Result<CacheState, InfraError> {
    let store = connect(&settings.store).await?;
    let groups = CacheGroupIndex::from(&settings.cache);
    info!(
        target = "relaycache::store",
        groups = groups.len(),
        prefix = %settings.cache.prefix,
        ttl_secs = settings.cache.ttl.as_secs(),
        enabled = settings.cache.enabled,
        "cache groups loaded"
    );
    Ok(CacheState::new(CacheConfig::from(settings), store, groups))
}

fn redacted(url: &Url) -> Url {
    let mut url = url.clone();
    if url.password().is_some() {
        let _ = url.set_password(Some("***"));
    }
    url
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;

    fn store_settings(backend: StoreBackend) -> StoreSettings {
        StoreSettings {
            backend,
            timeout: Duration::from_millis(250),
            connect_timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn memory_backend_is_usable_immediately() {
        let settings = store_settings(StoreBackend::Memory {
            capacity: NonZeroUsize::new(4).expect("capacity"),
        });
        let store = connect(&settings).await.expect("memory store");

        store
            .set("k", Bytes::from_static(b"v"), Duration::ZERO)
            .await
            .expect("set");
        assert!(store.get("k").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn unreachable_redis_fails_at_startup() {
        let settings = store_settings(StoreBackend::Redis {
            url: Url::parse("redis://127.0.0.1:1/0").expect("url"),
        });

        let result = connect(&settings).await;
        assert!(matches!(result, Err(InfraError::Store(_))));
    }

    #[test]
    fn redacted_hides_password() {
        let url = Url::parse("redis://:s3cret@localhost:6379/0").expect("url");
        assert_eq!(redacted(&url).as_str(), "redis://:***@localhost:6379/0");

        let plain = Url::parse("redis://localhost:6379/0").expect("url");
        assert_eq!(redacted(&plain), plain);
    }
}
