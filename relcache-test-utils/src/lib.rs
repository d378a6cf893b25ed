//! relcache Test Utilities
//!
//! Shared test infrastructure for the relcache workspace:
//! - Proptest generators for identifiers, including hostile ones
//! - A mock authoritative store
//! - Fixtures for the reference hierarchy
//! - Assertions for the cache error taxonomy

pub use relcache_core::{
    CacheError, CacheResult, CredentialKey, DeviceId, GroupId, MemberId, OrgId, ProfileId,
    RelationKind, Role,
};
pub use relcache_storage::{AuthoritativeSource, RelationCaches, SourceError};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

// ============================================================================
// MOCK AUTHORITATIVE STORE
// ============================================================================

#[derive(Debug, Default)]
struct AuthorityState {
    devices_by_key: HashMap<String, DeviceId>,
    device_groups: HashMap<DeviceId, GroupId>,
    profile_groups: HashMap<ProfileId, GroupId>,
    group_orgs: HashMap<GroupId, OrgId>,
    roles: HashMap<(GroupId, MemberId), Role>,
}

/// In-process stand-in for the authoritative store.
///
/// Counts every lookup so tests can tell cache hits from store round trips,
/// and can be switched offline to simulate an outage.
#[derive(Debug, Default)]
pub struct MockAuthority {
    state: Mutex<AuthorityState>,
    lookups: AtomicUsize,
    offline: AtomicBool,
}

impl MockAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, key: &CredentialKey, device_id: &DeviceId, group_id: &GroupId) {
        let mut state = self.state.lock();
        state
            .devices_by_key
            .insert(key.expose().to_string(), device_id.clone());
        state.device_groups.insert(device_id.clone(), group_id.clone());
    }

    pub fn remove_device(&self, device_id: &DeviceId) {
        let mut state = self.state.lock();
        state.devices_by_key.retain(|_, d| d != device_id);
        state.device_groups.remove(device_id);
    }

    pub fn move_device(&self, device_id: &DeviceId, group_id: &GroupId) {
        self.state
            .lock()
            .device_groups
            .insert(device_id.clone(), group_id.clone());
    }

    pub fn add_profile(&self, profile_id: &ProfileId, group_id: &GroupId) {
        self.state
            .lock()
            .profile_groups
            .insert(profile_id.clone(), group_id.clone());
    }

    pub fn add_group(&self, group_id: &GroupId, org_id: &OrgId) {
        self.state
            .lock()
            .group_orgs
            .insert(group_id.clone(), org_id.clone());
    }

    pub fn assign_role(&self, group_id: &GroupId, member_id: &MemberId, role: &Role) {
        self.state
            .lock()
            .roles
            .insert((group_id.clone(), member_id.clone()), role.clone());
    }

    pub fn revoke_role(&self, group_id: &GroupId, member_id: &MemberId) {
        self.state
            .lock()
            .roles
            .remove(&(group_id.clone(), member_id.clone()));
    }

    /// Number of lookups served so far, failed ones included.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn lookup<T>(&self, f: impl FnOnce(&AuthorityState) -> Option<T>) -> Result<Option<T>, SourceError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(SourceError("authority offline".to_string()));
        }
        Ok(f(&*self.state.lock()))
    }
}

#[async_trait]
impl AuthoritativeSource for MockAuthority {
    async fn device_by_key(&self, key: &CredentialKey) -> Result<Option<DeviceId>, SourceError> {
        self.lookup(|s| s.devices_by_key.get(key.expose()).cloned())
    }

    async fn group_of_device(&self, device_id: &DeviceId) -> Result<Option<GroupId>, SourceError> {
        self.lookup(|s| s.device_groups.get(device_id).cloned())
    }

    async fn group_of_profile(
        &self,
        profile_id: &ProfileId,
    ) -> Result<Option<GroupId>, SourceError> {
        self.lookup(|s| s.profile_groups.get(profile_id).cloned())
    }

    async fn org_of_group(&self, group_id: &GroupId) -> Result<Option<OrgId>, SourceError> {
        self.lookup(|s| s.group_orgs.get(group_id).cloned())
    }

    async fn role_of(
        &self,
        group_id: &GroupId,
        member_id: &MemberId,
    ) -> Result<Option<Role>, SourceError> {
        self.lookup(|s| s.roles.get(&(group_id.clone(), member_id.clone())).cloned())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for relcache identifiers.
    //!
    //! Identifier strategies draw from an alphabet that includes common
    //! separator characters, so composite keys built from them must keep
    //! component boundaries exact.

    use super::*;
    use proptest::prelude::*;

    const ID_PATTERN: &str = "[a-z0-9:/|._-]{1,16}";

    /// Generate an identifier string that may contain separators.
    pub fn arb_raw_id() -> impl Strategy<Value = String> {
        ID_PATTERN
    }

    /// Generate an identifier that is sometimes empty or longer than any
    /// byte-keyed store accepts as a key.
    pub fn arb_wide_id() -> impl Strategy<Value = String> {
        prop_oneof![
            2 => arb_raw_id(),
            1 => Just(String::new()),
            1 => "[a-z:]{500,700}",
        ]
    }

    pub fn arb_credential_key() -> impl Strategy<Value = CredentialKey> {
        arb_raw_id().prop_map(CredentialKey::new)
    }

    pub fn arb_device_id() -> impl Strategy<Value = DeviceId> {
        arb_raw_id().prop_map(DeviceId::new)
    }

    pub fn arb_profile_id() -> impl Strategy<Value = ProfileId> {
        arb_raw_id().prop_map(ProfileId::new)
    }

    pub fn arb_group_id() -> impl Strategy<Value = GroupId> {
        arb_raw_id().prop_map(GroupId::new)
    }

    pub fn arb_org_id() -> impl Strategy<Value = OrgId> {
        arb_raw_id().prop_map(OrgId::new)
    }

    pub fn arb_member_id() -> impl Strategy<Value = MemberId> {
        arb_raw_id().prop_map(MemberId::new)
    }

    /// Generate a role label from the usual set.
    pub fn arb_role() -> impl Strategy<Value = Role> {
        prop_oneof![
            Just(Role::from("admin")),
            Just(Role::from("editor")),
            Just(Role::from("viewer")),
        ]
    }

    pub fn arb_relation_kind() -> impl Strategy<Value = RelationKind> {
        prop::sample::select(RelationKind::ALL.to_vec())
    }

    /// Generate a batch of role assignments over a small id space, so that
    /// groups and members collide often.
    pub fn arb_role_assignments(
        max: usize,
    ) -> impl Strategy<Value = Vec<(GroupId, MemberId, Role)>> {
        prop::collection::vec(
            (
                "[gx:]{1,3}".prop_map(GroupId::new),
                "[mx:]{1,3}".prop_map(MemberId::new),
                arb_role(),
            ),
            0..max,
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built scenarios.

    use super::*;

    /// The reference hierarchy: key-A -> dev-1 -> grp-9 -> org-3, with
    /// user-7 holding `editor` in grp-9 and prof-1 attached to grp-9.
    #[derive(Debug, Clone)]
    pub struct ReferenceHierarchy {
        pub key: CredentialKey,
        pub device_id: DeviceId,
        pub profile_id: ProfileId,
        pub group_id: GroupId,
        pub org_id: OrgId,
        pub member_id: MemberId,
        pub role: Role,
    }

    impl Default for ReferenceHierarchy {
        fn default() -> Self {
            Self {
                key: CredentialKey::from("key-A"),
                device_id: DeviceId::from("dev-1"),
                profile_id: ProfileId::from("prof-1"),
                group_id: GroupId::from("grp-9"),
                org_id: OrgId::from("org-3"),
                member_id: MemberId::from("user-7"),
                role: Role::from("editor"),
            }
        }
    }

    impl ReferenceHierarchy {
        /// Populate every cache with the hierarchy.
        pub async fn seed(&self, caches: &RelationCaches) -> CacheResult<()> {
            caches.credentials.save(&self.key, &self.device_id).await?;
            caches
                .device_groups
                .save(&self.device_id, &self.group_id)
                .await?;
            caches
                .profile_groups
                .save(&self.profile_id, &self.group_id)
                .await?;
            caches.group_orgs.save(&self.group_id, &self.org_id).await?;
            caches
                .roles
                .save(&self.group_id, &self.member_id, &self.role)
                .await
        }

        /// Register the hierarchy with a mock authority.
        pub fn register(&self, authority: &MockAuthority) {
            authority.add_device(&self.key, &self.device_id, &self.group_id);
            authority.add_profile(&self.profile_id, &self.group_id);
            authority.add_group(&self.group_id, &self.org_id);
            authority.assign_role(&self.group_id, &self.member_id, &self.role);
        }
    }

    /// Authority pre-loaded with the reference hierarchy.
    pub fn reference_authority() -> MockAuthority {
        let authority = MockAuthority::new();
        ReferenceHierarchy::default().register(&authority);
        authority
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over the cache error taxonomy.

    use super::*;

    /// Assert that a lookup missed for the given relation.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &CacheResult<T>, kind: RelationKind) {
        match result {
            Err(CacheError::NotFound { kind: k, .. }) => {
                assert_eq!(*k, kind, "Wrong relation kind in NotFound error");
            }
            other => panic!("Expected NotFound error for {}, got: {:?}", kind, other),
        }
    }

    /// Assert that the backing store was reported unavailable.
    #[track_caller]
    pub fn assert_unavailable<T: std::fmt::Debug>(result: &CacheResult<T>, kind: RelationKind) {
        match result {
            Err(CacheError::BackingStoreUnavailable { kind: k, .. }) => {
                assert_eq!(*k, kind, "Wrong relation kind in unavailable error");
            }
            other => panic!("Expected BackingStoreUnavailable for {}, got: {:?}", kind, other),
        }
    }

    /// Assert that every cache in the set is empty.
    #[track_caller]
    pub fn assert_all_empty(caches: &RelationCaches) {
        for (kind, stats) in caches.stats() {
            assert_eq!(stats.entry_count, 0, "{} cache still holds entries", kind);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
