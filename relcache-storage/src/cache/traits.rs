//! Cache traits and statistics.
//!
//! One trait per logical table. Each implementation is an independent unit
//! of mutual exclusion: an operation on one cache never waits on another.
//! The caches are passive mirrors; population and invalidation are driven
//! entirely by callers.

use std::collections::HashSet;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use relcache_core::{
    CacheResult, CredentialKey, DeviceId, GroupId, MemberId, OrgId, ProfileId, RelationKind, Role,
};
use serde::{de::DeserializeOwned, Serialize};

/// Child resource that belongs to exactly one group.
///
/// Implemented for devices and profiles; each implementation selects the
/// relation its [`ParentLinkCache`] instance mirrors.
pub trait ChildId:
    Clone + Eq + Hash + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Relation mirrored by caches keyed by this id type.
    const KIND: RelationKind;

    fn as_str(&self) -> &str;
}

impl ChildId for DeviceId {
    const KIND: RelationKind = RelationKind::DeviceGroup;

    fn as_str(&self) -> &str {
        DeviceId::as_str(self)
    }
}

impl ChildId for ProfileId {
    const KIND: RelationKind = RelationKind::ProfileGroup;

    fn as_str(&self) -> &str {
        ProfileId::as_str(self)
    }
}

/// Credential key -> device.
#[async_trait]
pub trait CredentialCache: Send + Sync {
    /// Store or overwrite the device a key authorizes.
    async fn save(&self, key: &CredentialKey, device_id: &DeviceId) -> CacheResult<()>;

    /// Device authorized by `key`, or `NotFound`.
    async fn resolve(&self, key: &CredentialKey) -> CacheResult<DeviceId>;

    /// Drop every key that maps to `device_id`. Removing an unknown device
    /// is a no-op.
    async fn remove(&self, device_id: &DeviceId) -> CacheResult<()>;

    fn stats(&self) -> CacheStats;
}

/// Child (device or profile) -> owning group.
#[async_trait]
pub trait ParentLinkCache<C: ChildId>: Send + Sync {
    /// Store or overwrite the group owning `child`.
    async fn save(&self, child: &C, group_id: &GroupId) -> CacheResult<()>;

    /// Group owning `child`, or `NotFound`.
    async fn resolve(&self, child: &C) -> CacheResult<GroupId>;

    /// Drop the link recorded for `child`. No-op if absent.
    async fn remove(&self, child: &C) -> CacheResult<()>;

    fn stats(&self) -> CacheStats;
}

/// Device -> group cache.
pub type DeviceGroupCache = dyn ParentLinkCache<DeviceId>;

/// Profile -> group cache.
pub type ProfileGroupCache = dyn ParentLinkCache<ProfileId>;

/// Group -> owning organization.
#[async_trait]
pub trait GroupOrgCache: Send + Sync {
    async fn save(&self, group_id: &GroupId, org_id: &OrgId) -> CacheResult<()>;

    async fn resolve(&self, group_id: &GroupId) -> CacheResult<OrgId>;

    async fn remove(&self, group_id: &GroupId) -> CacheResult<()>;

    fn stats(&self) -> CacheStats;
}

/// (group, member) -> role, with reverse lookup by member.
#[async_trait]
pub trait RoleCache: Send + Sync {
    /// Store or overwrite the role of `member_id` in `group_id`.
    async fn save(&self, group_id: &GroupId, member_id: &MemberId, role: &Role)
        -> CacheResult<()>;

    /// Role of `member_id` in `group_id`, or `NotFound`.
    async fn resolve(&self, group_id: &GroupId, member_id: &MemberId) -> CacheResult<Role>;

    /// Drop the assignment for the pair. No-op if absent.
    async fn remove(&self, group_id: &GroupId, member_id: &MemberId) -> CacheResult<()>;

    /// Every group in which `member_id` holds any role.
    ///
    /// Never fails with `NotFound`: a member without assignments yields an
    /// empty set.
    async fn memberships_of(&self, member_id: &MemberId) -> CacheResult<HashSet<GroupId>>;

    fn stats(&self) -> CacheStats;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of point lookups answered from the cache.
    pub hits: u64,
    /// Number of point lookups that returned `NotFound`.
    pub misses: u64,
    /// Number of entries currently cached.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lock-free hit/miss counters shared by the implementations.
#[derive(Debug, Default)]
pub(crate) struct StatsCounter {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StatsCounter {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a point lookup.
    pub(crate) fn record<T>(&self, found: &Option<T>) {
        if found.is_some() {
            self.record_hit();
        } else {
            self.record_miss();
        }
    }

    pub(crate) fn snapshot(&self, entry_count: u64) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_stats_counter_records_outcomes() {
        let counter = StatsCounter::default();
        counter.record(&Some(1));
        counter.record(&Some(2));
        counter.record::<u8>(&None);

        let stats = counter.snapshot(7);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 7);
    }

    #[test]
    fn test_child_kinds() {
        assert_eq!(<DeviceId as ChildId>::KIND, RelationKind::DeviceGroup);
        assert_eq!(<ProfileId as ChildId>::KIND, RelationKind::ProfileGroup);
        assert_eq!(ChildId::as_str(&DeviceId::from("dev-1")), "dev-1");
    }
}
