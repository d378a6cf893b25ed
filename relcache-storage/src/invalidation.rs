//! Invalidation driven by mutations in the authoritative store.
//!
//! The authoritative service applies a [`RelationEvent`] after committing
//! the corresponding change. Errors are returned so the service can fail
//! or retry the mutation instead of leaving a stale mirror behind.

use relcache_core::{CacheResult, CredentialKey, DeviceId, GroupId, MemberId, OrgId, ProfileId, Role};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::RelationCaches;

/// A committed change to a cached relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RelationEvent {
    /// A device was provisioned with a key inside a group.
    DeviceConnected {
        key: CredentialKey,
        device_id: DeviceId,
        group_id: GroupId,
    },
    /// Every previous key of the device is revoked in favour of `key`.
    KeyRotated { device_id: DeviceId, key: CredentialKey },
    DeviceRemoved { device_id: DeviceId },
    DeviceReassigned { device_id: DeviceId, group_id: GroupId },
    ProfileAssigned { profile_id: ProfileId, group_id: GroupId },
    ProfileRemoved { profile_id: ProfileId },
    GroupAssigned { group_id: GroupId, org_id: OrgId },
    /// The group is gone. `members` lists the members that held a role in
    /// it; the caches keep no group -> members index.
    GroupRemoved {
        group_id: GroupId,
        #[serde(default)]
        members: Vec<MemberId>,
    },
    RoleAssigned {
        group_id: GroupId,
        member_id: MemberId,
        role: Role,
    },
    RoleRevoked { group_id: GroupId, member_id: MemberId },
    /// The member left every group.
    MemberRemoved { member_id: MemberId },
}

impl RelationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RelationEvent::DeviceConnected { .. } => "device_connected",
            RelationEvent::KeyRotated { .. } => "key_rotated",
            RelationEvent::DeviceRemoved { .. } => "device_removed",
            RelationEvent::DeviceReassigned { .. } => "device_reassigned",
            RelationEvent::ProfileAssigned { .. } => "profile_assigned",
            RelationEvent::ProfileRemoved { .. } => "profile_removed",
            RelationEvent::GroupAssigned { .. } => "group_assigned",
            RelationEvent::GroupRemoved { .. } => "group_removed",
            RelationEvent::RoleAssigned { .. } => "role_assigned",
            RelationEvent::RoleRevoked { .. } => "role_revoked",
            RelationEvent::MemberRemoved { .. } => "member_removed",
        }
    }
}

/// Applies [`RelationEvent`]s to a set of caches.
#[derive(Clone)]
pub struct Invalidator {
    caches: RelationCaches,
}

impl Invalidator {
    pub fn new(caches: RelationCaches) -> Self {
        Self { caches }
    }

    pub async fn apply(&self, event: &RelationEvent) -> CacheResult<()> {
        debug!(event = event.name(), "applying relation event");
        let caches = &self.caches;

        match event {
            RelationEvent::DeviceConnected {
                key,
                device_id,
                group_id,
            } => {
                caches.credentials.save(key, device_id).await?;
                caches.device_groups.save(device_id, group_id).await
            }
            RelationEvent::KeyRotated { device_id, key } => {
                // Old mapping first, or the new key would be dropped with it.
                caches.credentials.remove(device_id).await?;
                caches.credentials.save(key, device_id).await
            }
            RelationEvent::DeviceRemoved { device_id } => {
                caches.credentials.remove(device_id).await?;
                caches.device_groups.remove(device_id).await
            }
            RelationEvent::DeviceReassigned {
                device_id,
                group_id,
            } => caches.device_groups.save(device_id, group_id).await,
            RelationEvent::ProfileAssigned {
                profile_id,
                group_id,
            } => caches.profile_groups.save(profile_id, group_id).await,
            RelationEvent::ProfileRemoved { profile_id } => {
                caches.profile_groups.remove(profile_id).await
            }
            RelationEvent::GroupAssigned { group_id, org_id } => {
                caches.group_orgs.save(group_id, org_id).await
            }
            RelationEvent::GroupRemoved { group_id, members } => {
                caches.group_orgs.remove(group_id).await?;
                for member_id in members {
                    caches.roles.remove(group_id, member_id).await?;
                }
                Ok(())
            }
            RelationEvent::RoleAssigned {
                group_id,
                member_id,
                role,
            } => caches.roles.save(group_id, member_id, role).await,
            RelationEvent::RoleRevoked {
                group_id,
                member_id,
            } => caches.roles.remove(group_id, member_id).await,
            RelationEvent::MemberRemoved { member_id } => {
                let groups = caches.roles.memberships_of(member_id).await?;
                for group_id in &groups {
                    caches.roles.remove(group_id, member_id).await?;
                }
                Ok(())
            }
        }
    }

    /// Apply events in order, stopping at the first failure.
    pub async fn apply_all<'a, I>(&self, events: I) -> CacheResult<()>
    where
        I: IntoIterator<Item = &'a RelationEvent>,
    {
        for event in events {
            self.apply(event).await?;
        }
        Ok(())
    }
}
