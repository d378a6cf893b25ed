//! Relationship caches.
//!
//! Four kinds of lookup table mirror facts owned by the authoritative
//! store:
//!
//! - [`CredentialCache`]: credential key -> device
//! - [`ParentLinkCache`]: device or profile -> group (one instance per kind)
//! - [`GroupOrgCache`]: group -> organization
//! - [`RoleCache`]: (group, member) -> role, plus memberships by member
//!
//! The caches are passive. They never consult the authoritative store and
//! never expire entries on their own; callers populate them after an
//! authoritative lookup and remove entries when the authoritative store
//! deletes or reassigns the corresponding relationship.
//!
//! # Example
//!
//! ```ignore
//! let caches = RelationCaches::in_memory();
//! caches.credentials.save(&key, &device_id).await?;
//!
//! match caches.credentials.resolve(&key).await {
//!     Ok(device_id) => authorize(device_id),
//!     Err(e) if e.is_not_found() => consult_authoritative_store(),
//!     Err(e) => bypass_cache(e),
//! }
//! ```

pub mod bounded;
pub mod lmdb;
pub mod memory;
pub mod role_key;
pub mod set;
pub mod traits;

pub use bounded::Bounded;
pub use lmdb::{
    LmdbCredentialCache, LmdbGroupOrgCache, LmdbParentLinkCache, LmdbRoleCache, LmdbStoreError,
};
pub use memory::{
    InMemoryCredentialCache, InMemoryGroupOrgCache, InMemoryParentLinkCache, InMemoryRoleCache,
};
pub use role_key::RoleKey;
pub use set::RelationCaches;
pub use traits::{
    CacheStats, ChildId, CredentialCache, DeviceGroupCache, GroupOrgCache, ParentLinkCache,
    ProfileGroupCache, RoleCache,
};
