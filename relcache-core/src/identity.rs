//! Identity types for cached relationships
//!
//! Identifiers are opaque strings owned by the authoritative store. Each
//! resource kind gets its own newtype so a device id can never be passed
//! where a group id is expected. No character set is enforced: an id may
//! contain separators such as `:`.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the wrapper and return the raw identifier.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(
    /// Identifier of a device, the leaf resource in the hierarchy.
    DeviceId
);
opaque_id!(
    /// Identifier of a configuration profile attached to devices.
    ProfileId
);
opaque_id!(
    /// Identifier of a group: the unit of role-based membership.
    GroupId
);
opaque_id!(
    /// Identifier of an organization, the tenant boundary.
    OrgId
);
opaque_id!(
    /// Identifier of a group member (a user or service account).
    MemberId
);
opaque_id!(
    /// Role label assigned to a member within a group (e.g. `admin`).
    ///
    /// The cache stores whatever label the caller supplies.
    Role
);

/// Secret key a device presents to authenticate.
///
/// The `Debug` output is redacted and there is no `Display` impl, so the
/// secret cannot leak into log lines or error messages by accident.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialKey(String);

impl CredentialKey {
    /// Wrap a raw credential.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the raw secret. Avoid passing the result to loggers.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialKey(<redacted, {} bytes>)", self.0.len())
    }
}

impl From<&str> for CredentialKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for CredentialKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_keep_raw_value() {
        let id = DeviceId::new("dev-1");
        assert_eq!(id.as_str(), "dev-1");
        assert_eq!(id.to_string(), "dev-1");
        assert_eq!(GroupId::from("grp:9").as_str(), "grp:9");
        assert_eq!(OrgId::from(String::from("org-3")).into_inner(), "org-3");
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let key = CredentialKey::new("super-secret");
        let debug = format!("{:?}", key);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("12 bytes"));
        assert_eq!(key.expose(), "super-secret");
    }

    #[test]
    fn test_serde_is_transparent() {
        let role = Role::new("editor");
        let json = serde_json::to_string(&role).expect("serialize role");
        assert_eq!(json, "\"editor\"");
        let back: Role = serde_json::from_str(&json).expect("deserialize role");
        assert_eq!(back, role);
    }
}
