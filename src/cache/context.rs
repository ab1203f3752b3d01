use axum::http::Method;

use super::keys::CacheKey;

/// Per-request cache state, attached to the request as an extension so later stages
/// (and handlers, via `Extension<CacheContext>`) can see it.
///
/// Replayed responses carry a copy with `from_cache` set, which is what keeps an
/// outer cache layer from storing a body that an inner layer just read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheContext {
    pub method: Method,
    pub key: CacheKey,
    pub from_cache: bool,
}

impl CacheContext {
    pub fn miss(method: Method, key: CacheKey) -> Self {
        Self {
            method,
            key,
            from_cache: false,
        }
    }

    pub fn hit(key: CacheKey) -> Self {
        Self {
            method: Method::GET,
            key,
            from_cache: true,
        }
    }

    pub fn is_read(&self) -> bool {
        self.method == Method::GET
    }
}
