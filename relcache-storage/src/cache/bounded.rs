//! Deadline decorator for caches backed by non-memory stores.
//!
//! [`Bounded`] wraps any cache and races every operation against a fixed
//! deadline. An operation that misses its deadline fails with
//! `BackingStoreUnavailable`, which callers treat as "skip the cache". The
//! wrapped future is dropped on expiry, so dropping the future returned by
//! any operation is also how a caller cancels it.
//!
//! Dropping the future stops waiting; it does not undo work already handed
//! to a store. LMDB caches run their transactions on the blocking pool, and
//! such a transaction finishes even after the deadline fired. A timed-out
//! Save or Remove therefore has an unknown outcome and should be retried.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use relcache_core::{
    CacheError, CacheResult, CredentialKey, DeviceId, GroupId, MemberId, OrgId, RelationKind,
    Role,
};
use tracing::warn;

use super::traits::{
    CacheStats, ChildId, CredentialCache, GroupOrgCache, ParentLinkCache, RoleCache,
};

/// A cache whose operations complete within `deadline` or fail.
#[derive(Debug)]
pub struct Bounded<C> {
    inner: C,
    deadline: Duration,
}

impl<C> Bounded<C> {
    pub fn new(inner: C, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    async fn guard<T, F>(&self, kind: RelationKind, op: &'static str, fut: F) -> CacheResult<T>
    where
        T: Send,
        F: Future<Output = CacheResult<T>> + Send,
    {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(kind = %kind, op, deadline_ms = self.deadline.as_millis() as u64, "cache operation exceeded deadline");
                Err(CacheError::unavailable(
                    kind,
                    format!("{} exceeded deadline of {:?}", op, self.deadline),
                ))
            }
        }
    }
}

#[async_trait]
impl<C: CredentialCache> CredentialCache for Bounded<C> {
    async fn save(&self, key: &CredentialKey, device_id: &DeviceId) -> CacheResult<()> {
        self.guard(RelationKind::Credential, "save", self.inner.save(key, device_id))
            .await
    }

    async fn resolve(&self, key: &CredentialKey) -> CacheResult<DeviceId> {
        self.guard(RelationKind::Credential, "resolve", self.inner.resolve(key))
            .await
    }

    async fn remove(&self, device_id: &DeviceId) -> CacheResult<()> {
        self.guard(RelationKind::Credential, "remove", self.inner.remove(device_id))
            .await
    }

    fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

#[async_trait]
impl<K: ChildId, C: ParentLinkCache<K>> ParentLinkCache<K> for Bounded<C> {
    async fn save(&self, child: &K, group_id: &GroupId) -> CacheResult<()> {
        self.guard(K::KIND, "save", self.inner.save(child, group_id)).await
    }

    async fn resolve(&self, child: &K) -> CacheResult<GroupId> {
        self.guard(K::KIND, "resolve", self.inner.resolve(child)).await
    }

    async fn remove(&self, child: &K) -> CacheResult<()> {
        self.guard(K::KIND, "remove", self.inner.remove(child)).await
    }

    fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

#[async_trait]
impl<C: GroupOrgCache> GroupOrgCache for Bounded<C> {
    async fn save(&self, group_id: &GroupId, org_id: &OrgId) -> CacheResult<()> {
        self.guard(RelationKind::GroupOrg, "save", self.inner.save(group_id, org_id))
            .await
    }

    async fn resolve(&self, group_id: &GroupId) -> CacheResult<OrgId> {
        self.guard(RelationKind::GroupOrg, "resolve", self.inner.resolve(group_id))
            .await
    }

    async fn remove(&self, group_id: &GroupId) -> CacheResult<()> {
        self.guard(RelationKind::GroupOrg, "remove", self.inner.remove(group_id))
            .await
    }

    fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

#[async_trait]
impl<C: RoleCache> RoleCache for Bounded<C> {
    async fn save(
        &self,
        group_id: &GroupId,
        member_id: &MemberId,
        role: &Role,
    ) -> CacheResult<()> {
        self.guard(
            RelationKind::Role,
            "save",
            self.inner.save(group_id, member_id, role),
        )
        .await
    }

    async fn resolve(&self, group_id: &GroupId, member_id: &MemberId) -> CacheResult<Role> {
        self.guard(
            RelationKind::Role,
            "resolve",
            self.inner.resolve(group_id, member_id),
        )
        .await
    }

    async fn remove(&self, group_id: &GroupId, member_id: &MemberId) -> CacheResult<()> {
        self.guard(
            RelationKind::Role,
            "remove",
            self.inner.remove(group_id, member_id),
        )
        .await
    }

    async fn memberships_of(&self, member_id: &MemberId) -> CacheResult<HashSet<GroupId>> {
        self.guard(
            RelationKind::Role,
            "memberships_of",
            self.inner.memberships_of(member_id),
        )
        .await
    }

    fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}
