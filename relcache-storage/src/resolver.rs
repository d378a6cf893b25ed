//! Caller-side resolution chain for protocol adapters.
//!
//! The caches never reach out to the authoritative store. This module is
//! the adapter half of the contract: it walks credential -> device -> group
//! -> organization -> role, consults the caller's [`AuthoritativeSource`]
//! on every miss and writes the answer through to the cache.
//!
//! Stages are independent lock acquisitions on independent caches, so the
//! composed answer is not a snapshot and may mix generations of facts.

use std::sync::Arc;

use async_trait::async_trait;
use relcache_core::{
    CacheError, CacheResult, CredentialKey, DeviceId, GroupId, MemberId, OrgId, ProfileId,
    RelationKind, Role,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::RelationCaches;

/// Failure reported by the authoritative store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct SourceError(pub String);

/// The adapter's view of the authoritative store.
///
/// `Ok(None)` means the store has no such relationship.
#[async_trait]
pub trait AuthoritativeSource: Send + Sync {
    async fn device_by_key(&self, key: &CredentialKey) -> Result<Option<DeviceId>, SourceError>;

    async fn group_of_device(&self, device_id: &DeviceId) -> Result<Option<GroupId>, SourceError>;

    async fn group_of_profile(
        &self,
        profile_id: &ProfileId,
    ) -> Result<Option<GroupId>, SourceError>;

    async fn org_of_group(&self, group_id: &GroupId) -> Result<Option<OrgId>, SourceError>;

    async fn role_of(
        &self,
        group_id: &GroupId,
        member_id: &MemberId,
    ) -> Result<Option<Role>, SourceError>;
}

/// Errors from the resolution chain.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// Neither the cache nor the authoritative store knows the relation.
    #[error("Unknown {kind} relation for {key}")]
    Unknown { kind: RelationKind, key: String },

    /// The member holds no role in the group.
    #[error("Member {member_id} has no role in group {group_id}")]
    NoRole { group_id: GroupId, member_id: MemberId },

    /// The profile belongs to a different group than the device.
    #[error("Profile {profile_id} belongs to group {profile_group}, device belongs to {device_group}")]
    GroupMismatch {
        profile_id: ProfileId,
        profile_group: GroupId,
        device_group: GroupId,
    },

    /// The authoritative store failed.
    #[error("Authoritative store error: {0}")]
    Source(#[from] SourceError),
}

/// What an authorized request resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub key: CredentialKey,
    pub profile_id: Option<ProfileId>,
    pub member_id: Option<MemberId>,
}

impl AccessRequest {
    pub fn new(key: CredentialKey) -> Self {
        Self {
            key,
            profile_id: None,
            member_id: None,
        }
    }

    pub fn with_profile(mut self, profile_id: ProfileId) -> Self {
        self.profile_id = Some(profile_id);
        self
    }

    pub fn with_member(mut self, member_id: MemberId) -> Self {
        self.member_id = Some(member_id);
        self
    }
}

/// Fully resolved relationships of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessContext {
    pub device_id: DeviceId,
    pub group_id: GroupId,
    pub org_id: OrgId,
    /// Present when the request named a profile.
    pub profile_id: Option<ProfileId>,
    /// Present when the request named a member.
    pub role: Option<Role>,
    /// True when every stage was answered by the caches.
    pub from_cache: bool,
}

/// Outcome of one cache lookup.
enum Lookup<T> {
    Hit(T),
    /// `NotFound`: consult the store and write through.
    Miss,
    /// Backing store unusable: consult the store, do not write through.
    Bypass,
}

fn classify<T>(result: CacheResult<T>) -> Lookup<T> {
    match result {
        Ok(value) => Lookup::Hit(value),
        Err(CacheError::NotFound { .. }) => Lookup::Miss,
        Err(e) => {
            warn!(kind = %e.kind(), error = %e, "cache bypassed");
            Lookup::Bypass
        }
    }
}

/// Write-through failures are logged and dropped: the answer already came
/// from the authoritative store.
fn written(result: CacheResult<()>) {
    if let Err(e) = result {
        warn!(kind = %e.kind(), error = %e, "write-through failed");
    }
}

/// Resolves requests against the caches, falling back to the store.
#[derive(Clone)]
pub struct AccessResolver {
    caches: RelationCaches,
    source: Arc<dyn AuthoritativeSource>,
}

impl AccessResolver {
    pub fn new(caches: RelationCaches, source: Arc<dyn AuthoritativeSource>) -> Self {
        Self { caches, source }
    }

    pub fn caches(&self) -> &RelationCaches {
        &self.caches
    }

    /// Device authorized by `key`. Returns whether the cache answered.
    pub async fn identify(&self, key: &CredentialKey) -> Result<(DeviceId, bool), ResolveError> {
        let lookup = classify(self.caches.credentials.resolve(key).await);
        if let Lookup::Hit(device_id) = lookup {
            return Ok((device_id, true));
        }

        let device_id = self
            .source
            .device_by_key(key)
            .await?
            .ok_or_else(|| ResolveError::Unknown {
                kind: RelationKind::Credential,
                key: "<credential>".to_string(),
            })?;
        if matches!(lookup, Lookup::Miss) {
            written(self.caches.credentials.save(key, &device_id).await);
        }
        Ok((device_id, false))
    }

    /// Group owning `device_id`. Returns whether the cache answered.
    pub async fn device_group(&self, device_id: &DeviceId) -> Result<(GroupId, bool), ResolveError> {
        let lookup = classify(self.caches.device_groups.resolve(device_id).await);
        if let Lookup::Hit(group_id) = lookup {
            return Ok((group_id, true));
        }

        let group_id = self
            .source
            .group_of_device(device_id)
            .await?
            .ok_or_else(|| ResolveError::Unknown {
                kind: RelationKind::DeviceGroup,
                key: device_id.to_string(),
            })?;
        if matches!(lookup, Lookup::Miss) {
            written(self.caches.device_groups.save(device_id, &group_id).await);
        }
        Ok((group_id, false))
    }

    /// Group owning `profile_id`. Returns whether the cache answered.
    pub async fn profile_group(
        &self,
        profile_id: &ProfileId,
    ) -> Result<(GroupId, bool), ResolveError> {
        let lookup = classify(self.caches.profile_groups.resolve(profile_id).await);
        if let Lookup::Hit(group_id) = lookup {
            return Ok((group_id, true));
        }

        let group_id = self
            .source
            .group_of_profile(profile_id)
            .await?
            .ok_or_else(|| ResolveError::Unknown {
                kind: RelationKind::ProfileGroup,
                key: profile_id.to_string(),
            })?;
        if matches!(lookup, Lookup::Miss) {
            written(self.caches.profile_groups.save(profile_id, &group_id).await);
        }
        Ok((group_id, false))
    }

    /// Organization owning `group_id`. Returns whether the cache answered.
    pub async fn group_org(&self, group_id: &GroupId) -> Result<(OrgId, bool), ResolveError> {
        let lookup = classify(self.caches.group_orgs.resolve(group_id).await);
        if let Lookup::Hit(org_id) = lookup {
            return Ok((org_id, true));
        }

        let org_id = self
            .source
            .org_of_group(group_id)
            .await?
            .ok_or_else(|| ResolveError::Unknown {
                kind: RelationKind::GroupOrg,
                key: group_id.to_string(),
            })?;
        if matches!(lookup, Lookup::Miss) {
            written(self.caches.group_orgs.save(group_id, &org_id).await);
        }
        Ok((org_id, false))
    }

    /// Role of `member_id` in `group_id`. Returns whether the cache answered.
    pub async fn role(
        &self,
        group_id: &GroupId,
        member_id: &MemberId,
    ) -> Result<(Role, bool), ResolveError> {
        let lookup = classify(self.caches.roles.resolve(group_id, member_id).await);
        if let Lookup::Hit(role) = lookup {
            return Ok((role, true));
        }

        let role = self
            .source
            .role_of(group_id, member_id)
            .await?
            .ok_or_else(|| ResolveError::NoRole {
                group_id: group_id.clone(),
                member_id: member_id.clone(),
            })?;
        if matches!(lookup, Lookup::Miss) {
            written(self.caches.roles.save(group_id, member_id, &role).await);
        }
        Ok((role, false))
    }

    /// Walk the whole chain for one request.
    pub async fn resolve(&self, request: &AccessRequest) -> Result<AccessContext, ResolveError> {
        let (device_id, mut from_cache) = self.identify(&request.key).await?;
        let (group_id, hit) = self.device_group(&device_id).await?;
        from_cache &= hit;

        if let Some(profile_id) = &request.profile_id {
            let (profile_group, hit) = self.profile_group(profile_id).await?;
            from_cache &= hit;
            if profile_group != group_id {
                return Err(ResolveError::GroupMismatch {
                    profile_id: profile_id.clone(),
                    profile_group,
                    device_group: group_id,
                });
            }
        }

        let (org_id, hit) = self.group_org(&group_id).await?;
        from_cache &= hit;

        let role = match &request.member_id {
            Some(member_id) => {
                let (role, hit) = self.role(&group_id, member_id).await?;
                from_cache &= hit;
                Some(role)
            }
            None => None,
        };

        debug!(
            device_id = %device_id,
            group_id = %group_id,
            org_id = %org_id,
            from_cache,
            "resolved access"
        );

        Ok(AccessContext {
            device_id,
            group_id,
            org_id,
            profile_id: request.profile_id.clone(),
            role,
            from_cache,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStats, GroupOrgCache};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store with fixed answers that counts how often it is asked.
    #[derive(Default)]
    struct FixedSource {
        devices: HashMap<String, DeviceId>,
        device_groups: HashMap<DeviceId, GroupId>,
        profile_groups: HashMap<ProfileId, GroupId>,
        orgs: HashMap<GroupId, OrgId>,
        roles: HashMap<(GroupId, MemberId), Role>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl FixedSource {
        fn reference() -> Self {
            let mut source = Self::default();
            source.devices.insert("key-A".into(), DeviceId::from("dev-1"));
            source
                .device_groups
                .insert(DeviceId::from("dev-1"), GroupId::from("grp-9"));
            source
                .profile_groups
                .insert(ProfileId::from("prof-1"), GroupId::from("grp-9"));
            source
                .profile_groups
                .insert(ProfileId::from("prof-2"), GroupId::from("grp-2"));
            source.orgs.insert(GroupId::from("grp-9"), OrgId::from("org-3"));
            source.roles.insert(
                (GroupId::from("grp-9"), MemberId::from("user-7")),
                Role::from("editor"),
            );
            source
        }

        fn answer<T: Clone>(&self, value: Option<&T>) -> Result<Option<T>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SourceError("store offline".to_string()));
            }
            Ok(value.cloned())
        }
    }

    #[async_trait]
    impl AuthoritativeSource for FixedSource {
        async fn device_by_key(&self, key: &CredentialKey) -> Result<Option<DeviceId>, SourceError> {
            self.answer(self.devices.get(key.expose()))
        }

        async fn group_of_device(
            &self,
            device_id: &DeviceId,
        ) -> Result<Option<GroupId>, SourceError> {
            self.answer(self.device_groups.get(device_id))
        }

        async fn group_of_profile(
            &self,
            profile_id: &ProfileId,
        ) -> Result<Option<GroupId>, SourceError> {
            self.answer(self.profile_groups.get(profile_id))
        }

        async fn org_of_group(&self, group_id: &GroupId) -> Result<Option<OrgId>, SourceError> {
            self.answer(self.orgs.get(group_id))
        }

        async fn role_of(
            &self,
            group_id: &GroupId,
            member_id: &MemberId,
        ) -> Result<Option<Role>, SourceError> {
            self.answer(self.roles.get(&(group_id.clone(), member_id.clone())))
        }
    }

    /// Group-org cache whose backing store is down.
    #[derive(Default)]
    struct DownGroupOrgCache {
        saves: Mutex<usize>,
    }

    #[async_trait]
    impl GroupOrgCache for DownGroupOrgCache {
        async fn save(&self, _: &GroupId, _: &OrgId) -> CacheResult<()> {
            *self.saves.lock() += 1;
            Err(CacheError::unavailable(RelationKind::GroupOrg, "down"))
        }

        async fn resolve(&self, _: &GroupId) -> CacheResult<OrgId> {
            Err(CacheError::unavailable(RelationKind::GroupOrg, "down"))
        }

        async fn remove(&self, _: &GroupId) -> CacheResult<()> {
            Err(CacheError::unavailable(RelationKind::GroupOrg, "down"))
        }

        fn stats(&self) -> CacheStats {
            CacheStats::default()
        }
    }

    fn request() -> AccessRequest {
        AccessRequest::new(CredentialKey::from("key-A"))
            .with_profile(ProfileId::from("prof-1"))
            .with_member(MemberId::from("user-7"))
    }

    #[tokio::test]
    async fn test_cold_then_warm_resolution() {
        let source = Arc::new(FixedSource::reference());
        let resolver = AccessResolver::new(RelationCaches::in_memory(), source.clone());

        let cold = resolver.resolve(&request()).await.expect("cold resolve");
        assert_eq!(cold.device_id, DeviceId::from("dev-1"));
        assert_eq!(cold.group_id, GroupId::from("grp-9"));
        assert_eq!(cold.org_id, OrgId::from("org-3"));
        assert_eq!(cold.role, Some(Role::from("editor")));
        assert!(!cold.from_cache);
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);

        let warm = resolver.resolve(&request()).await.expect("warm resolve");
        assert!(warm.from_cache);
        assert_eq!(warm.org_id, cold.org_id);
        // Every stage was written through, so the store was not asked again.
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_unknown_credential() {
        let resolver =
            AccessResolver::new(RelationCaches::in_memory(), Arc::new(FixedSource::reference()));
        let err = resolver
            .resolve(&AccessRequest::new(CredentialKey::from("stolen")))
            .await
            .expect_err("unknown key");
        assert!(matches!(
            err,
            ResolveError::Unknown {
                kind: RelationKind::Credential,
                ..
            }
        ));
        assert!(!format!("{}", err).contains("stolen"));
    }

    #[tokio::test]
    async fn test_profile_in_other_group_is_rejected() {
        let resolver =
            AccessResolver::new(RelationCaches::in_memory(), Arc::new(FixedSource::reference()));
        let err = resolver
            .resolve(
                &AccessRequest::new(CredentialKey::from("key-A"))
                    .with_profile(ProfileId::from("prof-2")),
            )
            .await
            .expect_err("group mismatch");
        assert!(matches!(err, ResolveError::GroupMismatch { .. }));
    }

    #[tokio::test]
    async fn test_member_without_role() {
        let resolver =
            AccessResolver::new(RelationCaches::in_memory(), Arc::new(FixedSource::reference()));
        let err = resolver
            .resolve(
                &AccessRequest::new(CredentialKey::from("key-A"))
                    .with_member(MemberId::from("stranger")),
            )
            .await
            .expect_err("no role");
        assert!(matches!(err, ResolveError::NoRole { .. }));
    }

    #[tokio::test]
    async fn test_source_failure_propagates() {
        let source = FixedSource {
            fail: true,
            ..FixedSource::default()
        };
        let resolver = AccessResolver::new(RelationCaches::in_memory(), Arc::new(source));
        let err = resolver
            .resolve(&AccessRequest::new(CredentialKey::from("key-A")))
            .await
            .expect_err("store offline");
        assert_eq!(err, ResolveError::Source(SourceError("store offline".into())));
    }

    #[tokio::test]
    async fn test_unavailable_cache_is_bypassed() {
        let down = Arc::new(DownGroupOrgCache::default());
        let mut caches = RelationCaches::in_memory();
        caches.group_orgs = down.clone() as Arc<dyn GroupOrgCache>;

        let source = Arc::new(FixedSource::reference());
        let resolver = AccessResolver::new(caches, source.clone());

        let ctx = resolver.resolve(&request()).await.expect("resolved via store");
        assert_eq!(ctx.org_id, OrgId::from("org-3"));

        let ctx = resolver.resolve(&request()).await.expect("resolved via store");
        assert!(!ctx.from_cache);
        // No write-through is attempted against an unusable store.
        assert_eq!(*down.saves.lock(), 0);
        // Five calls cold, then only the org stage goes back to the store.
        assert_eq!(source.calls.load(Ordering::SeqCst), 6);
    }
}
