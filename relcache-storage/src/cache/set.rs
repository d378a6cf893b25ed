//! The full set of relationship caches.

use std::sync::Arc;

use relcache_core::{BackendKind, CacheConfig, CacheResult, DeviceId, ProfileId, RelationKind};
use tracing::info;

use super::bounded::Bounded;
use super::lmdb::{LmdbCredentialCache, LmdbGroupOrgCache, LmdbParentLinkCache, LmdbRoleCache};
use super::memory::{
    InMemoryCredentialCache, InMemoryGroupOrgCache, InMemoryParentLinkCache, InMemoryRoleCache,
};
use super::traits::{CacheStats, CredentialCache, GroupOrgCache, ParentLinkCache, RoleCache};

/// Handles to the five cache instances.
///
/// Cloning is cheap and shares the underlying caches. Each handle is its
/// own lock domain; nothing here spans two caches atomically.
#[derive(Clone)]
pub struct RelationCaches {
    pub credentials: Arc<dyn CredentialCache>,
    pub device_groups: Arc<dyn ParentLinkCache<DeviceId>>,
    pub profile_groups: Arc<dyn ParentLinkCache<ProfileId>>,
    pub group_orgs: Arc<dyn GroupOrgCache>,
    pub roles: Arc<dyn RoleCache>,
}

impl RelationCaches {
    /// Pure in-process caches.
    pub fn in_memory() -> Self {
        Self {
            credentials: Arc::new(InMemoryCredentialCache::new()),
            device_groups: Arc::new(InMemoryParentLinkCache::<DeviceId>::new()),
            profile_groups: Arc::new(InMemoryParentLinkCache::<ProfileId>::new()),
            group_orgs: Arc::new(InMemoryGroupOrgCache::new()),
            roles: Arc::new(InMemoryRoleCache::new()),
        }
    }

    /// Build the caches selected by `config`.
    ///
    /// LMDB-backed caches are wrapped in [`Bounded`] with the configured
    /// operation deadline. In-memory caches never stall and are used as is.
    pub fn from_config(config: &CacheConfig) -> CacheResult<Self> {
        match config.backend {
            BackendKind::InMemory => {
                info!("using in-memory relation caches");
                Ok(Self::in_memory())
            }
            BackendKind::Lmdb => {
                let root = config.lmdb_path.as_path();
                let size = config.lmdb_max_size_mb;
                let deadline = config.operation_timeout;
                info!(path = %root.display(), size_mb = size, ?deadline, "opening LMDB relation caches");

                Ok(Self {
                    credentials: Arc::new(Bounded::new(
                        LmdbCredentialCache::open(root, size)?,
                        deadline,
                    )),
                    device_groups: Arc::new(Bounded::new(
                        LmdbParentLinkCache::<DeviceId>::open(root, size)?,
                        deadline,
                    )),
                    profile_groups: Arc::new(Bounded::new(
                        LmdbParentLinkCache::<ProfileId>::open(root, size)?,
                        deadline,
                    )),
                    group_orgs: Arc::new(Bounded::new(
                        LmdbGroupOrgCache::open(root, size)?,
                        deadline,
                    )),
                    roles: Arc::new(Bounded::new(LmdbRoleCache::open(root, size)?, deadline)),
                })
            }
        }
    }

    /// Statistics of every cache, labelled by relation.
    pub fn stats(&self) -> Vec<(RelationKind, CacheStats)> {
        vec![
            (RelationKind::Credential, self.credentials.stats()),
            (RelationKind::DeviceGroup, self.device_groups.stats()),
            (RelationKind::ProfileGroup, self.profile_groups.stats()),
            (RelationKind::GroupOrg, self.group_orgs.stats()),
            (RelationKind::Role, self.roles.stats()),
        ]
    }
}
