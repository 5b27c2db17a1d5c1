//! SHA-256-derived protocol hashes.
//!
//! Two wire-contract truncations live here: the 4-byte ACK checksum and the
//! 1-byte group channel hash. Both are prefix truncations of a single
//! SHA-256, matching what constrained firmware computes.

use sha2::{Digest, Sha256};

use crate::identity::NodeId;

/// Compute the ACK hash for a message.
///
/// `u32` (little-endian) of the first four bytes of
/// `SHA-256(content ‖ pub_key)`.
///
/// The key is the *sender's* for plain text and the *receiver's* for signed
/// text — the party whose identity the acknowledgement binds.
pub fn ack_hash(content: &[u8], key: &NodeId) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Compute the 1-byte routing hash of a group channel key.
pub fn channel_hash(channel_key: &[u8]) -> u8 {
    Sha256::digest(channel_key)[0]
}

/// First eight bytes of `SHA-256` over the given parts, concatenated.
///
/// Used by packet deduplication; exposed here so the hash construction stays
/// next to its siblings.
pub fn short_hash(parts: &[&[u8]]) -> [u8; 8] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}
