//! relcache core - identifiers, errors and configuration
//!
//! Pure data types shared by the cache implementations. This crate performs
//! no I/O and holds no cache logic.

pub mod config;
pub mod error;
pub mod identity;
pub mod relation;

pub use config::{BackendKind, CacheConfig};
pub use error::{CacheError, CacheResult, ConfigError};
pub use identity::{CredentialKey, DeviceId, GroupId, MemberId, OrgId, ProfileId, Role};
pub use relation::RelationKind;
