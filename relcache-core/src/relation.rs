//! Relation kinds mirrored by the caches

use serde::{Deserialize, Serialize};
use std::fmt;

/// The logical tables held by the caches.
///
/// Used to label errors and log events, and to name the per-relation
/// databases of persistent backing stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    /// Credential key -> device.
    Credential,
    /// Device -> owning group.
    DeviceGroup,
    /// Profile -> owning group.
    ProfileGroup,
    /// Group -> owning organization.
    GroupOrg,
    /// (group, member) -> role.
    Role,
}

impl RelationKind {
    /// Every relation kind, in discriminant order.
    pub const ALL: [RelationKind; 5] = [
        RelationKind::Credential,
        RelationKind::DeviceGroup,
        RelationKind::ProfileGroup,
        RelationKind::GroupOrg,
        RelationKind::Role,
    ];

    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Credential => "credential",
            RelationKind::DeviceGroup => "device_group",
            RelationKind::ProfileGroup => "profile_group",
            RelationKind::GroupOrg => "group_org",
            RelationKind::Role => "role",
        }
    }

    /// Single-byte discriminant.
    pub fn to_byte(self) -> u8 {
        match self {
            RelationKind::Credential => 0,
            RelationKind::DeviceGroup => 1,
            RelationKind::ProfileGroup => 2,
            RelationKind::GroupOrg => 3,
            RelationKind::Role => 4,
        }
    }

    /// Inverse of [`RelationKind::to_byte`].
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(RelationKind::Credential),
            1 => Some(RelationKind::DeviceGroup),
            2 => Some(RelationKind::ProfileGroup),
            3 => Some(RelationKind::GroupOrg),
            4 => Some(RelationKind::Role),
            _ => None,
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
