//! Cache configuration
//!
//! Configuration is loaded from environment variables with defaults that
//! suit a single-process deployment (pure in-memory caches).

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which store backs the caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// Process-local maps. Operations never fail and never block on I/O.
    InMemory,
    /// Memory-mapped LMDB environments, one per relation.
    Lmdb,
}

impl BackendKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "memory" | "in_memory" | "inmemory" => Some(BackendKind::InMemory),
            "lmdb" => Some(BackendKind::Lmdb),
            _ => None,
        }
    }
}

/// Configuration shared by every cache instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Backing store for all caches.
    pub backend: BackendKind,
    /// Root directory for LMDB environments (one subdirectory per relation).
    pub lmdb_path: PathBuf,
    /// Map size of each LMDB environment in megabytes.
    pub lmdb_max_size_mb: usize,
    /// Deadline applied to every operation against a non-memory store.
    pub operation_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::InMemory,
            lmdb_path: PathBuf::from("./data/relcache"),
            lmdb_max_size_mb: 64,
            operation_timeout: Duration::from_millis(250),
        }
    }
}

impl CacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backing store.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the LMDB root directory.
    pub fn with_lmdb_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lmdb_path = path.into();
        self
    }

    /// Set the LMDB map size.
    pub fn with_lmdb_max_size_mb(mut self, size_mb: usize) -> Self {
        self.lmdb_max_size_mb = size_mb;
        self
    }

    /// Set the per-operation deadline.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Create CacheConfig from environment variables.
    ///
    /// Environment variables:
    /// - `RELCACHE_BACKEND`: "memory" or "lmdb" (default: memory)
    /// - `RELCACHE_LMDB_PATH`: LMDB root directory (default: ./data/relcache)
    /// - `RELCACHE_LMDB_MAX_SIZE_MB`: LMDB map size per relation (default: 64)
    /// - `RELCACHE_OPERATION_TIMEOUT_MS`: per-operation deadline (default: 250)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend = match lookup("RELCACHE_BACKEND") {
            Some(value) => BackendKind::parse(&value).ok_or_else(|| ConfigError::InvalidValue {
                field: "RELCACHE_BACKEND".to_string(),
                value: value.clone(),
                reason: "expected memory or lmdb".to_string(),
            })?,
            None => defaults.backend,
        };

        let lmdb_path = lookup("RELCACHE_LMDB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.lmdb_path);

        let lmdb_max_size_mb = match lookup("RELCACHE_LMDB_MAX_SIZE_MB") {
            Some(value) => parse_number("RELCACHE_LMDB_MAX_SIZE_MB", &value)?,
            None => defaults.lmdb_max_size_mb,
        };

        let operation_timeout = match lookup("RELCACHE_OPERATION_TIMEOUT_MS") {
            Some(value) => {
                Duration::from_millis(parse_number("RELCACHE_OPERATION_TIMEOUT_MS", &value)?)
            }
            None => defaults.operation_timeout,
        };

        let config = Self {
            backend,
            lmdb_path,
            lmdb_max_size_mb,
            operation_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values no backing store can work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operation_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "operation_timeout".to_string(),
                value: "0".to_string(),
                reason: "deadline must be positive".to_string(),
            });
        }

        if self.backend == BackendKind::Lmdb {
            if self.lmdb_path.as_os_str().is_empty() {
                return Err(ConfigError::MissingRequired {
                    field: "lmdb_path".to_string(),
                });
            }
            if self.lmdb_max_size_mb == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "lmdb_max_size_mb".to_string(),
                    value: "0".to_string(),
                    reason: "map size must be positive".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: "expected a non-negative integer".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.backend, BackendKind::InMemory);
        assert_eq!(config.lmdb_max_size_mb, 64);
        assert_eq!(config.operation_timeout, Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_empty_uses_defaults() {
        let config = CacheConfig::from_lookup(lookup_from(&[])).expect("defaults are valid");
        assert_eq!(config, CacheConfig::default());
    }

    #[test]
    fn test_from_lookup_lmdb() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("RELCACHE_BACKEND", "LMDB"),
            ("RELCACHE_LMDB_PATH", "/var/lib/relcache"),
            ("RELCACHE_LMDB_MAX_SIZE_MB", "128"),
            ("RELCACHE_OPERATION_TIMEOUT_MS", "50"),
        ]))
        .expect("valid lmdb config");

        assert_eq!(config.backend, BackendKind::Lmdb);
        assert_eq!(config.lmdb_path, PathBuf::from("/var/lib/relcache"));
        assert_eq!(config.lmdb_max_size_mb, 128);
        assert_eq!(config.operation_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_from_lookup_rejects_unknown_backend() {
        let err = CacheConfig::from_lookup(lookup_from(&[("RELCACHE_BACKEND", "redis")]))
            .expect_err("unknown backend");
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "RELCACHE_BACKEND"));
    }

    #[test]
    fn test_from_lookup_rejects_bad_number() {
        let err = CacheConfig::from_lookup(lookup_from(&[(
            "RELCACHE_OPERATION_TIMEOUT_MS",
            "soon",
        )]))
        .expect_err("non-numeric timeout");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = CacheConfig::new().with_operation_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_lmdb_requirements() {
        let config = CacheConfig::new()
            .with_backend(BackendKind::Lmdb)
            .with_lmdb_path("");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired { .. })
        ));

        let config = CacheConfig::new()
            .with_backend(BackendKind::Lmdb)
            .with_lmdb_max_size_mb(0);
        assert!(config.validate().is_err());

        // Zero map size is irrelevant for the in-memory backend.
        let config = CacheConfig::new().with_lmdb_max_size_mb(0);
        assert!(config.validate().is_ok());
    }
}
