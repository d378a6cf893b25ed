//! Structured composite keys.
//!
//! A role assignment is keyed by the pair (group, member). The pair is kept
//! as two fields rather than one joined string, so an identifier containing
//! any separator character can never be confused with a component boundary.
//! Byte-oriented stores get a length-prefixed encoding with the same
//! guarantee.
//!
//! # Bounded Key Parts
//!
//! LMDB rejects empty keys and keys longer than 511 bytes, while identifiers
//! are opaque and unbounded. Each identifier therefore enters a byte key
//! through [`key_part`]: verbatim when it is non-empty and at most
//! [`MAX_INLINE_ID`] bytes, otherwise as [`DIGEST_TAG`] followed by its
//! SHA-256. `0xFF` never occurs in UTF-8, so the two forms cannot collide.
//! Digested keys are lossy; stores keep the full identifiers in the value
//! and compare them on read.

use std::borrow::Cow;

use relcache_core::{GroupId, MemberId};
use sha2::{Digest, Sha256};

/// Width of the big-endian length prefix.
const LEN_PREFIX: usize = 4;

/// Longest identifier stored verbatim inside a byte key.
pub const MAX_INLINE_ID: usize = 200;

/// First byte of a digested key part.
pub const DIGEST_TAG: u8 = 0xFF;

/// Composite key of a role assignment.
///
/// # Binary Format
///
/// `encode` produces:
/// - Bytes 0-3: length of the group key part (u32, big-endian)
/// - Next `len` bytes: group key part
/// - Remaining bytes: member key part
///
/// `encode_by_member` produces the same layout with the components swapped,
/// so all assignments of one member share the prefix returned by
/// [`RoleKey::member_prefix`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoleKey {
    group_id: GroupId,
    member_id: MemberId,
}

impl RoleKey {
    pub fn new(group_id: GroupId, member_id: MemberId) -> Self {
        Self {
            group_id,
            member_id,
        }
    }

    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    pub fn member_id(&self) -> &MemberId {
        &self.member_id
    }

    pub fn into_parts(self) -> (GroupId, MemberId) {
        (self.group_id, self.member_id)
    }

    /// Group-first encoding, used as the primary key.
    pub fn encode(&self) -> Vec<u8> {
        encode_pair(self.group_id.as_str(), self.member_id.as_str())
    }

    /// Member-first encoding, used by the membership index.
    pub fn encode_by_member(&self) -> Vec<u8> {
        encode_pair(self.member_id.as_str(), self.group_id.as_str())
    }

    /// Prefix shared by every member-first key of `member_id`.
    pub fn member_prefix(member_id: &MemberId) -> Vec<u8> {
        pair_prefix(member_id.as_str())
    }
}

/// Byte form of one identifier inside a key. Never empty, at most
/// `MAX_INLINE_ID` bytes.
pub fn key_part(id: &str) -> Cow<'_, [u8]> {
    if !id.is_empty() && id.len() <= MAX_INLINE_ID {
        return Cow::Borrowed(id.as_bytes());
    }
    let mut part = Vec::with_capacity(33);
    part.push(DIGEST_TAG);
    part.extend_from_slice(&Sha256::digest(id.as_bytes()));
    Cow::Owned(part)
}

/// Encode an ordered pair as `[len(first part)][first part][second part]`.
///
/// The length prefix fixes the boundary between the components whatever
/// bytes they contain.
pub fn encode_pair(first: &str, second: &str) -> Vec<u8> {
    let mut bytes = pair_prefix(first);
    bytes.extend_from_slice(&key_part(second));
    bytes
}

/// The bytes of `encode_pair(first, _)` that precede the second component.
pub fn pair_prefix(first: &str) -> Vec<u8> {
    let part = key_part(first);
    // A part is at most MAX_INLINE_ID bytes, so the cast cannot truncate.
    let len = part.len() as u32;
    let mut bytes = Vec::with_capacity(LEN_PREFIX + part.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&part);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(group: &str, member: &str) -> RoleKey {
        RoleKey::new(GroupId::from(group), MemberId::from(member))
    }

    #[test]
    fn test_new_and_getters() {
        let k = key("grp-9", "user-7");
        assert_eq!(k.group_id().as_str(), "grp-9");
        assert_eq!(k.member_id().as_str(), "user-7");
        let (g, m) = k.into_parts();
        assert_eq!(g.as_str(), "grp-9");
        assert_eq!(m.as_str(), "user-7");
    }

    #[test]
    fn test_encode_layout() {
        let encoded = key("ab", "xyz").encode();
        assert_eq!(&encoded[0..4], &[0, 0, 0, 2]);
        assert_eq!(&encoded[4..6], b"ab");
        assert_eq!(&encoded[6..], b"xyz");
    }

    #[test]
    fn test_separator_in_ids_does_not_collide() {
        // A joined "group:member" string would map both of these to "a:b:c".
        let left = key("a:b", "c");
        let right = key("a", "b:c");
        assert_ne!(left, right);
        assert_ne!(left.encode(), right.encode());
        assert_ne!(left.encode_by_member(), right.encode_by_member());
    }

    #[test]
    fn test_empty_ids_are_digested() {
        let part = key_part("");
        assert_eq!(part.len(), 33);
        assert_eq!(part[0], DIGEST_TAG);

        let k = key("", "");
        assert_eq!(&k.encode()[0..4], &[0, 0, 0, 33]);
        assert_eq!(k.encode().len(), 4 + 33 + 33);
    }

    #[test]
    fn test_long_ids_stay_within_lmdb_key_limit() {
        let long = "g".repeat(300);
        let longer = "m".repeat(5_000);
        assert_eq!(key_part(&long).len(), 33);
        assert!(key(&long, &longer).encode().len() <= 511);
        assert_ne!(key_part(&long), key_part(&"g".repeat(301)));

        let boundary = "b".repeat(MAX_INLINE_ID);
        assert_eq!(key_part(&boundary).as_ref(), boundary.as_bytes());
        assert!(key(&boundary, &boundary).encode().len() <= 511);
    }

    #[test]
    fn test_member_prefix_matches_member_encoding() {
        let member = MemberId::from("user-5");
        let prefix = RoleKey::member_prefix(&member);
        for group in ["grp-1", "grp-2", ""] {
            let k = RoleKey::new(GroupId::from(group), member.clone());
            assert!(k.encode_by_member().starts_with(&prefix));
        }

        // A member whose id extends another's must not share its prefix.
        let other = RoleKey::new(GroupId::from("grp-1"), MemberId::from("user-55"));
        assert!(!other.encode_by_member().starts_with(&prefix));
    }
}
