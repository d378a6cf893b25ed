//! Error types for relcache operations

use crate::RelationKind;
use thiserror::Error;

/// Errors returned by cache operations.
///
/// `NotFound` is the only error of the logical contract: a point lookup on
/// an absent key. Callers treat it as "consult the authoritative store".
/// `BackingStoreUnavailable` only comes from non-memory backing stores and
/// means "the cache is unusable right now, go straight to the authoritative
/// store".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("No cached {kind} entry for {key}")]
    NotFound { kind: RelationKind, key: String },

    #[error("Backing store for {kind} unavailable: {reason}")]
    BackingStoreUnavailable { kind: RelationKind, reason: String },
}

impl CacheError {
    /// Build a `NotFound` for the given relation and (non-secret) key.
    pub fn not_found(kind: RelationKind, key: impl Into<String>) -> Self {
        CacheError::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Build a `BackingStoreUnavailable` from any displayable cause.
    pub fn unavailable(kind: RelationKind, reason: impl ToString) -> Self {
        CacheError::BackingStoreUnavailable {
            kind,
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, CacheError::BackingStoreUnavailable { .. })
    }

    /// Relation the failing operation targeted.
    pub fn kind(&self) -> RelationKind {
        match self {
            CacheError::NotFound { kind, .. } => *kind,
            CacheError::BackingStoreUnavailable { kind, .. } => *kind,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = CacheError::not_found(RelationKind::DeviceGroup, "dev-1");
        let msg = format!("{}", err);
        assert!(msg.contains("device_group"));
        assert!(msg.contains("dev-1"));
        assert!(err.is_not_found());
        assert!(!err.is_unavailable());
        assert_eq!(err.kind(), RelationKind::DeviceGroup);
    }

    #[test]
    fn test_unavailable_display() {
        let err = CacheError::unavailable(RelationKind::Role, "environment closed");
        let msg = format!("{}", err);
        assert!(msg.contains("role"));
        assert!(msg.contains("environment closed"));
        assert!(err.is_unavailable());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            field: "RELCACHE_BACKEND".to_string(),
            value: "redis".to_string(),
            reason: "expected memory or lmdb".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("RELCACHE_BACKEND"));
        assert!(msg.contains("redis"));

        let err = ConfigError::MissingRequired {
            field: "lmdb_path".to_string(),
        };
        assert!(format!("{}", err).contains("lmdb_path"));
    }
}
