//! relcache Storage - relationship caches and their callers
//!
//! The [`cache`] module holds the four lookup caches with their in-memory
//! and LMDB implementations. [`resolver`] is the authorization-path
//! consumer that walks the hierarchy with write-through on miss, and
//! [`invalidation`] is the authoritative-service side that keeps the
//! caches from serving removed relationships.

pub mod cache;
pub mod invalidation;
pub mod resolver;

pub use cache::{
    Bounded, CacheStats, ChildId, CredentialCache, DeviceGroupCache, GroupOrgCache,
    InMemoryCredentialCache, InMemoryGroupOrgCache, InMemoryParentLinkCache, InMemoryRoleCache,
    LmdbCredentialCache, LmdbGroupOrgCache, LmdbParentLinkCache, LmdbRoleCache, LmdbStoreError,
    ParentLinkCache, ProfileGroupCache, RelationCaches, RoleCache, RoleKey,
};
pub use invalidation::{Invalidator, RelationEvent};
pub use resolver::{
    AccessContext, AccessRequest, AccessResolver, AuthoritativeSource, ResolveError, SourceError,
};
