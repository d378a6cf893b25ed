//! In-process cache implementations.
//!
//! Each cache owns one `parking_lot::Mutex`, so every operation on an
//! instance is serialized while separate instances never contend. Reverse
//! indices are updated under the same lock as the forward map, which keeps
//! value-keyed removal and membership queries proportional to the size of
//! the answer instead of the size of the cache.
//!
//! None of these operations can fail: the only error they return is
//! `NotFound` from a point lookup.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::marker::PhantomData;

use async_trait::async_trait;
use parking_lot::Mutex;
use relcache_core::{
    CacheError, CacheResult, CredentialKey, DeviceId, GroupId, MemberId, OrgId, RelationKind,
    Role,
};
use tracing::{debug, trace};

use super::role_key::RoleKey;
use super::traits::{
    CacheStats, ChildId, CredentialCache, GroupOrgCache, ParentLinkCache, RoleCache, StatsCounter,
};

/// Remove `value` from the bucket stored under `key`, dropping the bucket
/// once it is empty.
fn detach<K, V>(index: &mut HashMap<K, HashSet<V>>, key: &K, value: &V)
where
    K: Eq + Hash,
    V: Eq + Hash,
{
    if let Some(bucket) = index.get_mut(key) {
        bucket.remove(value);
        if bucket.is_empty() {
            index.remove(key);
        }
    }
}

// ============================================================================
// CREDENTIALS
// ============================================================================

#[derive(Debug, Default)]
struct CredentialTable {
    devices: HashMap<CredentialKey, DeviceId>,
    keys_by_device: HashMap<DeviceId, HashSet<CredentialKey>>,
}

/// In-memory credential cache with a device -> keys reverse index.
#[derive(Debug, Default)]
pub struct InMemoryCredentialCache {
    table: Mutex<CredentialTable>,
    stats: StatsCounter,
}

impl InMemoryCredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.lock().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CredentialCache for InMemoryCredentialCache {
    async fn save(&self, key: &CredentialKey, device_id: &DeviceId) -> CacheResult<()> {
        let mut table = self.table.lock();
        if let Some(previous) = table.devices.insert(key.clone(), device_id.clone()) {
            detach(&mut table.keys_by_device, &previous, key);
        }
        table
            .keys_by_device
            .entry(device_id.clone())
            .or_default()
            .insert(key.clone());

        debug!(kind = %RelationKind::Credential, device_id = %device_id, "saved credential");
        Ok(())
    }

    async fn resolve(&self, key: &CredentialKey) -> CacheResult<DeviceId> {
        let found = self.table.lock().devices.get(key).cloned();
        self.stats.record(&found);
        trace!(kind = %RelationKind::Credential, hit = found.is_some(), "credential lookup");
        // The key itself is secret and stays out of the error.
        found.ok_or_else(|| CacheError::not_found(RelationKind::Credential, "<credential>"))
    }

    async fn remove(&self, device_id: &DeviceId) -> CacheResult<()> {
        let mut table = self.table.lock();
        let removed = match table.keys_by_device.remove(device_id) {
            Some(keys) => {
                for key in &keys {
                    table.devices.remove(key);
                }
                keys.len()
            }
            None => 0,
        };

        debug!(kind = %RelationKind::Credential, device_id = %device_id, removed, "removed credentials");
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len() as u64)
    }
}

// ============================================================================
// SINGLE-PARENT LINKS
// ============================================================================

/// Map from a child to its single parent, shared by the parent-link and
/// group-org caches.
#[derive(Debug)]
struct LinkTable<K, V> {
    kind: RelationKind,
    links: Mutex<HashMap<K, V>>,
    stats: StatsCounter,
}

impl<K, V> LinkTable<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Display,
    V: Clone + std::fmt::Display,
{
    fn new(kind: RelationKind) -> Self {
        Self {
            kind,
            links: Mutex::new(HashMap::new()),
            stats: StatsCounter::default(),
        }
    }

    fn save(&self, child: &K, parent: &V) {
        self.links.lock().insert(child.clone(), parent.clone());
        debug!(kind = %self.kind, child = %child, parent = %parent, "saved link");
    }

    fn resolve(&self, child: &K) -> CacheResult<V> {
        let found = self.links.lock().get(child).cloned();
        self.stats.record(&found);
        trace!(kind = %self.kind, child = %child, hit = found.is_some(), "link lookup");
        found.ok_or_else(|| CacheError::not_found(self.kind, child.to_string()))
    }

    fn remove(&self, child: &K) {
        let removed = self.links.lock().remove(child).is_some();
        debug!(kind = %self.kind, child = %child, removed, "removed link");
    }

    fn len(&self) -> usize {
        self.links.lock().len()
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len() as u64)
    }
}

/// In-memory child -> group cache. One instance per child kind.
#[derive(Debug)]
pub struct InMemoryParentLinkCache<C: ChildId> {
    table: LinkTable<C, GroupId>,
    _child: PhantomData<fn() -> C>,
}

impl<C: ChildId> InMemoryParentLinkCache<C> {
    pub fn new() -> Self {
        Self {
            table: LinkTable::new(C::KIND),
            _child: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: ChildId> Default for InMemoryParentLinkCache<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<C: ChildId> ParentLinkCache<C> for InMemoryParentLinkCache<C> {
    async fn save(&self, child: &C, group_id: &GroupId) -> CacheResult<()> {
        self.table.save(child, group_id);
        Ok(())
    }

    async fn resolve(&self, child: &C) -> CacheResult<GroupId> {
        self.table.resolve(child)
    }

    async fn remove(&self, child: &C) -> CacheResult<()> {
        self.table.remove(child);
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        self.table.stats()
    }
}

/// In-memory group -> organization cache.
#[derive(Debug)]
pub struct InMemoryGroupOrgCache {
    table: LinkTable<GroupId, OrgId>,
}

impl InMemoryGroupOrgCache {
    pub fn new() -> Self {
        Self {
            table: LinkTable::new(RelationKind::GroupOrg),
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryGroupOrgCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GroupOrgCache for InMemoryGroupOrgCache {
    async fn save(&self, group_id: &GroupId, org_id: &OrgId) -> CacheResult<()> {
        self.table.save(group_id, org_id);
        Ok(())
    }

    async fn resolve(&self, group_id: &GroupId) -> CacheResult<OrgId> {
        self.table.resolve(group_id)
    }

    async fn remove(&self, group_id: &GroupId) -> CacheResult<()> {
        self.table.remove(group_id);
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        self.table.stats()
    }
}

// ============================================================================
// ROLES
// ============================================================================

#[derive(Debug, Default)]
struct RoleTable {
    roles: HashMap<RoleKey, Role>,
    groups_by_member: HashMap<MemberId, HashSet<GroupId>>,
}

/// In-memory role cache with a member -> groups reverse index.
#[derive(Debug, Default)]
pub struct InMemoryRoleCache {
    table: Mutex<RoleTable>,
    stats: StatsCounter,
}

impl InMemoryRoleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.lock().roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RoleCache for InMemoryRoleCache {
    async fn save(
        &self,
        group_id: &GroupId,
        member_id: &MemberId,
        role: &Role,
    ) -> CacheResult<()> {
        let mut table = self.table.lock();
        table.roles.insert(
            RoleKey::new(group_id.clone(), member_id.clone()),
            role.clone(),
        );
        table
            .groups_by_member
            .entry(member_id.clone())
            .or_default()
            .insert(group_id.clone());

        debug!(
            kind = %RelationKind::Role,
            group_id = %group_id,
            member_id = %member_id,
            role = %role,
            "saved role"
        );
        Ok(())
    }

    async fn resolve(&self, group_id: &GroupId, member_id: &MemberId) -> CacheResult<Role> {
        let key = RoleKey::new(group_id.clone(), member_id.clone());
        let found = self.table.lock().roles.get(&key).cloned();
        self.stats.record(&found);
        trace!(kind = %RelationKind::Role, group_id = %group_id, member_id = %member_id, hit = found.is_some(), "role lookup");
        found.ok_or_else(|| {
            CacheError::not_found(RelationKind::Role, format!("({}, {})", group_id, member_id))
        })
    }

    async fn remove(&self, group_id: &GroupId, member_id: &MemberId) -> CacheResult<()> {
        let key = RoleKey::new(group_id.clone(), member_id.clone());
        let mut table = self.table.lock();
        let removed = table.roles.remove(&key).is_some();
        if removed {
            detach(&mut table.groups_by_member, member_id, group_id);
        }

        debug!(kind = %RelationKind::Role, group_id = %group_id, member_id = %member_id, removed, "removed role");
        Ok(())
    }

    async fn memberships_of(&self, member_id: &MemberId) -> CacheResult<HashSet<GroupId>> {
        Ok(self
            .table
            .lock()
            .groups_by_member
            .get(member_id)
            .cloned()
            .unwrap_or_default())
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len() as u64)
    }
}
