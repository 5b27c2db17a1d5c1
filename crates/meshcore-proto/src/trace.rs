//! Network trace payloads (TRACE packet type).
//!
//! ## Wire layout
//!
//! ```text
//! [tag:4 LE][auth_code:4 LE][flags:1][relay_hashes:n*hash_size]
//! ```
//!
//! `hash_size = 1 << (flags & 3)` — 1, 2, 4 or 8 bytes per relay.
//!
//! TRACE overloads the packet's `path` field: it carries one SNR byte per
//! traversed hop, **not** hop hashes. The relay list lives here in the
//! payload, and the packet's `path_len` indexes into it: relay number
//! `path_len` is the next node expected to forward. Deduplication of TRACE
//! therefore mixes `path_len` into the packet hash so each relay leg is
//! distinct.

use meshcore_crypto::NodeId;

use crate::{read_u32_le, ProtoError, Result};

/// A parsed TRACE payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracePayload {
    /// Correlation tag chosen by the trace originator.
    pub tag: u32,
    /// Repeater authentication code.
    pub auth_code: u32,
    /// Flags; the low two bits select the per-relay hash size.
    pub flags: u8,
    /// Concatenated relay hashes, `hash_size` bytes each.
    pub path_hashes: Vec<u8>,
}

impl TracePayload {
    /// Bytes per relay hash: `1 << (flags & 3)`.
    pub fn hash_size(&self) -> usize {
        1 << (self.flags & 0x03)
    }

    /// Parse a TRACE payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::TooShort`] for fewer than nine bytes and
    /// [`ProtoError::InvalidEncoding`] when the hash list is not a multiple
    /// of the hash size.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 9 {
            return Err(ProtoError::TooShort {
                needed: 9,
                have: payload.len(),
            });
        }
        let trace = Self {
            tag: read_u32_le(payload, 0)?,
            auth_code: read_u32_le(payload, 4)?,
            flags: payload[8],
            path_hashes: payload[9..].to_vec(),
        };
        if trace.path_hashes.len() % trace.hash_size() != 0 {
            return Err(ProtoError::InvalidEncoding(format!(
                "relay hash list length {} is not a multiple of hash size {}",
                trace.path_hashes.len(),
                trace.hash_size()
            )));
        }
        Ok(trace)
    }

    /// Serialise to payload bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9 + self.path_hashes.len());
        out.extend_from_slice(&self.tag.to_le_bytes());
        out.extend_from_slice(&self.auth_code.to_le_bytes());
        out.push(self.flags);
        out.extend_from_slice(&self.path_hashes);
        out
    }

    /// The relay hash starting at byte `offset`, if in range.
    pub fn hash_at_offset(&self, offset: usize) -> Option<&[u8]> {
        let end = offset + self.hash_size();
        if end <= self.path_hashes.len() {
            Some(&self.path_hashes[offset..end])
        } else {
            None
        }
    }

    /// Whether the relay hash at `offset` addresses the given node.
    pub fn is_addressed_to(&self, offset: usize, node: &NodeId) -> bool {
        self.hash_at_offset(offset)
            .is_some_and(|prefix| node.is_hash_match(prefix))
    }
}
