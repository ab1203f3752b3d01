//! Cache storage backends.
//!
//! The middleware only needs get / set-with-expiry / delete. `RedisStore` talks to a
//! Redis-compatible server; `MemoryStore` keeps entries in-process with LRU eviction.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use redis::{AsyncCommands, Client, RedisError, aio::MultiplexedConnection};
use thiserror::Error;
use tracing::debug;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("store `{op}` timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
}

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

/// Key-value store holding cached response bodies.
///
/// Implementations must be safe to share across request tasks.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the value at `key`. `Ok(None)` means absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Store `value` at `key`, replacing any previous value. A zero `ttl` never expires.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError>;

    /// Remove `key`. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Run a store operation, turning an elapsed deadline into [`StoreError::Timeout`].
pub async fn bounded<T, F>(op: &'static str, after: Duration, future: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(after, future)
        .await
        .unwrap_or_else(|_| Err(StoreError::Timeout { op, after }))
}

// ============================================================================
// Redis
// ============================================================================

/// Store backed by a Redis-compatible server over one multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Open a client for `url` and verify the server answers `PING`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(target = SOURCE, reply = %pong, "redis store connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        if ttl.is_zero() {
            let _: () = conn.set(key, value.as_ref()).await?;
        } else {
            // PSETEX rejects 0; round sub-millisecond TTLs up.
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            let _: () = conn.pset_ex(key, value.as_ref(), millis).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }
}

// ============================================================================
// In-process
// ============================================================================

#[derive(Clone)]
struct MemoryEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-process store with LRU eviction and per-entry expiry.
pub struct MemoryStore {
    entries: Mutex<LruCache<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of entries held, including ones that expired but were not read since.
    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "memory_len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "memory_get");
        let expired = match entries.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => true,
            Some(entry) => return Ok(Some(entry.value.clone())),
            None => return Ok(None),
        };
        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        mutex_lock(&self.entries, SOURCE, "memory_set")
            .put(key.to_string(), MemoryEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        mutex_lock(&self.entries, SOURCE, "memory_delete").pop(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    fn store(capacity: usize) -> MemoryStore {
        MemoryStore::new(NonZeroUsize::new(capacity).expect("non-zero capacity"))
    }

    #[tokio::test]
    async fn missing_key_is_not_an_error() {
        let store = store(4);
        assert!(store.get("cache:h:/").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn set_then_get_roundtrip() {
        let store = store(4);
        store
            .set("cache:h:/", Bytes::from_static(b"hello"), Duration::ZERO)
            .await
            .expect("set");

        let value = store.get("cache:h:/").await.expect("get");
        assert_eq!(value, Some(Bytes::from_static(b"hello")));
    }

    #[tokio::test]
    async fn set_overwrites_previous_value() {
        let store = store(4);
        store
            .set("k", Bytes::from_static(b"one"), Duration::ZERO)
            .await
            .expect("set");
        store
            .set("k", Bytes::from_static(b"two"), Duration::ZERO)
            .await
            .expect("set");

        assert_eq!(
            store.get("k").await.expect("get"),
            Some(Bytes::from_static(b"two"))
        );
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let store = store(4);
        store
            .set("k", Bytes::from_static(b"v"), Duration::from_millis(1))
            .await
            .expect("set");

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(store.get("k").await.expect("get").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn zero_ttl_entries_persist() {
        let store = store(4);
        store
            .set("k", Bytes::from_static(b"v"), Duration::ZERO)
            .await
            .expect("set");

        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(store.get("k").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn delete_missing_key_is_no_op() {
        let store = store(4);
        store.delete("nothing-here").await.expect("delete");

        store
            .set("k", Bytes::from_static(b"v"), Duration::ZERO)
            .await
            .expect("set");
        store.delete("k").await.expect("delete");
        assert!(store.get("k").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn least_recently_used_entry_is_evicted() {
        let store = store(2);
        for key in ["a", "b"] {
            store
                .set(key, Bytes::from_static(b"v"), Duration::ZERO)
                .await
                .expect("set");
        }
        // Touch "a" so "b" becomes the eviction candidate.
        assert!(store.get("a").await.expect("get").is_some());

        store
            .set("c", Bytes::from_static(b"v"), Duration::ZERO)
            .await
            .expect("set");

        assert!(store.get("a").await.expect("get").is_some());
        assert!(store.get("b").await.expect("get").is_none());
        assert!(store.get("c").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn memory_store_recovers_from_poisoned_lock() {
        let store = store(2);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store.entries.lock().expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        store
            .set("k", Bytes::from_static(b"v"), Duration::ZERO)
            .await
            .expect("set");
        assert!(store.get("k").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn bounded_reports_timeout() {
        let result: Result<(), StoreError> = bounded("get", Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(StoreError::Timeout { op: "get", .. })));
    }

    #[tokio::test]
    async fn bounded_passes_results_through() {
        let result = bounded("get", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.expect("inner result"), 7);
    }
}
