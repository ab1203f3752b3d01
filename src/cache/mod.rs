//! Response cache with grouped invalidation.
//!
//! - **Read path**: GET responses are stored under `{prefix}:{host}:{path+query}` and
//!   replayed on later requests without running the handler.
//! - **Write path**: any other method evicts the cached reads of every endpoint that
//!   shares a cache group with the request path.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! prefix = "cache"
//! ttl_seconds = 0
//! groups = [["/", "/test", "/toto"]]
//! ```

mod config;
mod context;
mod groups;
mod interceptor;
mod keys;
mod lock;
mod middleware;
mod store;

pub use config::CacheConfig;
pub(crate) use config::{DEFAULT_MAX_BODY_BYTES, DEFAULT_PREFIX, DEFAULT_STORE_TIMEOUT_MS};
pub use context::CacheContext;
pub use groups::{CacheGroup, CacheGroupIndex};
pub use interceptor::ResponseInterceptor;
pub use keys::{CacheKey, request_host};
pub use middleware::{
    CacheState, METRIC_HIT, METRIC_INVALIDATED, METRIC_MISS, METRIC_STORE, METRIC_STORE_ERROR,
    response_cache_layer,
};
pub use store::{CacheStore, MemoryStore, RedisStore, StoreError, bounded};
