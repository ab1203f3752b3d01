//! Cache configuration.
//!
//! Runtime view of the `[cache]` and `[store]` settings the middleware consults per request.

use std::time::Duration;

use super::groups::{CacheGroup, CacheGroupIndex};

// Default values for cache configuration
pub(crate) const DEFAULT_PREFIX: &str = "cache";
pub(crate) const DEFAULT_STORE_TIMEOUT_MS: u64 = 250;
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Settings the middleware reads on every request.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Pass every request through untouched when false.
    pub enabled: bool,
    /// First component of every key.
    pub prefix: String,
    /// Expiry attached to stored bodies; zero keeps them until invalidated.
    pub ttl: Duration,
    /// Deadline for a single store call.
    pub store_timeout: Duration,
    /// Larger bodies are served but not stored.
    pub max_body_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: DEFAULT_PREFIX.to_string(),
            ttl: Duration::ZERO,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl From<&crate::config::Settings> for CacheConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            enabled: settings.cache.enabled,
            prefix: settings.cache.prefix.clone(),
            ttl: settings.cache.ttl,
            store_timeout: settings.store.timeout,
            max_body_bytes: settings.cache.max_body_bytes,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheGroupIndex {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        settings
            .groups
            .iter()
            .map(|endpoints| CacheGroup::new(endpoints.iter().cloned()))
            .collect()
    }
}

impl CacheConfig {
    /// Returns true when stored entries carry an expiry.
    pub fn expires(&self) -> bool {
        !self.ttl.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.prefix, "cache");
        assert_eq!(config.ttl, Duration::ZERO);
        assert!(!config.expires());
        assert_eq!(config.store_timeout, Duration::from_millis(250));
        assert_eq!(config.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn expires_when_ttl_set() {
        let config = CacheConfig {
            ttl: Duration::from_secs(30),
            ..Default::default()
        };
        assert!(config.expires());
    }

    #[test]
    fn group_index_from_settings_preserves_order() {
        let settings = crate::config::CacheSettings {
            groups: vec![
                vec!["/".to_string(), "/test".to_string(), "/toto".to_string()],
                vec!["/posts".to_string(), "/".to_string()],
            ],
            ..Default::default()
        };

        let index = CacheGroupIndex::from(&settings);
        assert_eq!(index.len(), 2);
        let related: Vec<usize> = index.related_group_indexes("/").iter().copied().collect();
        assert_eq!(related, vec![0, 1]);
        assert_eq!(
            index.group(1).map(CacheGroup::endpoints),
            Some(&["/posts".to_string(), "/".to_string()][..])
        );
    }
}
