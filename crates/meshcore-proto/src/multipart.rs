//! Fragment framing for oversized logical packets (MULTIPART packet type).
//!
//! ## Wire layout
//!
//! ```text
//! [remaining:4|inner_type:4][data:rest]
//! ```
//!
//! `remaining` counts the fragments still to come after this one; the final
//! fragment carries 0. `inner_type` is the payload type of the reassembled
//! logical packet. Reassembly itself lives with the router; this module only
//! frames fragments.

use crate::{ProtoError, Result};

/// One fragment of a logical packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Fragments still to come after this one (0 = last).
    pub remaining: u8,
    /// Payload type of the reassembled packet.
    pub inner_type: u8,
    /// This fragment's share of the logical payload.
    pub data: Vec<u8>,
}

impl Fragment {
    /// Parse a MULTIPART payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::TooShort`] when no data bytes follow the header.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 2 {
            return Err(ProtoError::TooShort {
                needed: 2,
                have: payload.len(),
            });
        }
        Ok(Self {
            remaining: payload[0] >> 4,
            inner_type: payload[0] & 0x0F,
            data: payload[1..].to_vec(),
        })
    }

    /// Serialise to a MULTIPART payload.
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.data.len());
        out.push((self.remaining << 4) | (self.inner_type & 0x0F));
        out.extend_from_slice(&self.data);
        out
    }
}
