//! Routing configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Settings for the tenant resolution cache and its loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Maximum number of resident cache entries.
    pub capacity: usize,
    /// Lifetime of an active (routable) entry.
    pub entry_ttl: Duration,
    /// Upper bound on a single directory lookup.
    pub load_timeout: Duration,
    /// Lifetime of not-found, suspended and deleted markers.
    pub negative_ttl: Duration,
    /// How many times a resolve restarts after its load was superseded by an
    /// invalidation before giving up with `Unavailable`.
    pub max_stale_retries: u32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            entry_ttl: Duration::from_secs(3600), // 1 hour
            load_timeout: Duration::from_millis(2000),
            negative_ttl: Duration::from_secs(30),
            max_stale_retries: 3,
        }
    }
}

impl RoutingConfig {
    /// Create a new routing config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            capacity: std::env::var("TENANTRY_CACHE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.capacity),
            entry_ttl: std::env::var("TENANTRY_CACHE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.entry_ttl),
            load_timeout: std::env::var("TENANTRY_LOAD_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.load_timeout),
            negative_ttl: std::env::var("TENANTRY_NEGATIVE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.negative_ttl),
            max_stale_retries: std::env::var("TENANTRY_MAX_STALE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_stale_retries),
        }
    }

    /// Set the cache capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    /// Set the directory load timeout.
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    /// Set the TTL for negative entries.
    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = ttl;
        self
    }

    pub fn with_max_stale_retries(mut self, retries: u32) -> Self {
        self.max_stale_retries = retries;
        self
    }

    /// Check the configuration for values the cache cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "capacity".to_string(),
                value: "0".to_string(),
                reason: "cache capacity must be at least 1".to_string(),
            });
        }
        if self.load_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "load_timeout".to_string(),
                value: format!("{:?}", self.load_timeout),
                reason: "load timeout must be non-zero".to_string(),
            });
        }
        if self.entry_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "entry_ttl".to_string(),
                value: format!("{:?}", self.entry_ttl),
                reason: "entry TTL must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = RoutingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capacity, 1000);
        assert_eq!(config.entry_ttl, Duration::from_secs(3600));
        assert!(config.negative_ttl < config.entry_ttl);
    }

    #[test]
    fn test_builder() {
        let config = RoutingConfig::new()
            .with_capacity(2)
            .with_ttl(Duration::from_secs(60))
            .with_load_timeout(Duration::from_millis(50))
            .with_negative_ttl(Duration::from_secs(5))
            .with_max_stale_retries(1);
        assert_eq!(config.capacity, 2);
        assert_eq!(config.entry_ttl, Duration::from_secs(60));
        assert_eq!(config.load_timeout, Duration::from_millis(50));
        assert_eq!(config.negative_ttl, Duration::from_secs(5));
        assert_eq!(config.max_stale_retries, 1);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let err = RoutingConfig::new()
            .with_capacity(0)
            .validate()
            .expect_err("zero capacity should be rejected");
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "capacity"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let err = RoutingConfig::new()
            .with_load_timeout(Duration::ZERO)
            .validate()
            .expect_err("zero timeout should be rejected");
        assert!(
            matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "load_timeout")
        );
    }
}
