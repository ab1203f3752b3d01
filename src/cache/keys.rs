//! Cache key definitions.
//!
//! A key is `{prefix}:{host}:{path+query}`. Hosts are validated as URI authorities, so
//! they never contain `/`, and paths always start with one: the first `/` after the
//! prefix marks where the path begins.

use std::fmt;

use axum::http::{Request, Uri, header::HOST, uri::Authority};

const SEPARATOR: char = ':';

/// Identifies one cached response body in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from its three components. `host` must be empty or a valid authority.
    pub fn new(prefix: &str, host: &str, path_and_query: &str) -> Self {
        let mut key = String::with_capacity(prefix.len() + host.len() + path_and_query.len() + 2);
        key.push_str(prefix);
        key.push(SEPARATOR);
        key.push_str(host);
        key.push(SEPARATOR);
        key.push_str(path_and_query);
        Self(key)
    }

    /// Key for a read request: path and query both count. `None` when the `Host`
    /// header is not a valid authority.
    pub fn for_request<B>(prefix: &str, request: &Request<B>) -> Option<Self> {
        let host = request_host(request)?;
        Some(Self::new(prefix, host, path_and_query(request.uri())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Host the client addressed, preferring the `Host` header over the URI authority
/// (HTTP/1.1 origin-form requests carry no authority). Empty when neither is present;
/// `None` when the `Host` header is malformed.
pub fn request_host<B>(request: &Request<B>) -> Option<&str> {
    match request.headers().get(HOST) {
        Some(value) => value
            .to_str()
            .ok()
            .filter(|host| host.parse::<Authority>().is_ok()),
        None => Some(
            request
                .uri()
                .authority()
                .map_or("", |authority| authority.as_str()),
        ),
    }
}

fn path_and_query(uri: &Uri) -> &str {
    uri.path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path())
}
