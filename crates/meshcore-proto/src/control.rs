//! Control payloads (CONTROL packet type).
//!
//! The first payload byte is a flags byte whose high nibble selects the
//! control subtype. Two subtypes exist today: discover request (0x8) and
//! discover response (0x9).
//!
//! ## Wire layouts
//!
//! ```text
//! DISCOVER_REQ  (0x8): [flags:1][type_filter:1][tag:4 LE][since:4 LE?]
//! DISCOVER_RESP (0x9): [flags:1][snr:1][tag:4 LE][pubkey:8|32]
//! ```
//!
//! In a request, flag bit 0 asks responders for 8-byte key prefixes instead
//! of full keys. In a response the low nibble of the flags byte carries the
//! responder's node type.

use crate::{read_u32_le, ProtoError, Result};

/// Control subtype: discover request.
pub const SUBTYPE_DISCOVER_REQ: u8 = 0x8;
/// Control subtype: discover response.
pub const SUBTYPE_DISCOVER_RESP: u8 = 0x9;

/// Extract the control subtype from a control payload's flags byte.
pub fn subtype(payload: &[u8]) -> Result<u8> {
    if payload.is_empty() {
        return Err(ProtoError::TooShort { needed: 1, have: 0 });
    }
    Ok(payload[0] >> 4)
}

/// A discover request: "which nodes are out there?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverRequest {
    /// Ask responders to return 8-byte key prefixes instead of full keys.
    pub prefix_only: bool,
    /// Node-type filter; 0 matches every type.
    pub type_filter: u8,
    /// Correlation tag echoed by responses.
    pub tag: u32,
    /// Only nodes heard since this timestamp should answer, when present.
    pub since: Option<u32>,
}

impl DiscoverRequest {
    /// Parse a discover request from a control payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::UnexpectedType`] if the subtype nibble is not
    /// 0x8 and [`ProtoError::TooShort`] for a truncated body.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let st = subtype(payload)?;
        if st != SUBTYPE_DISCOVER_REQ {
            return Err(ProtoError::UnexpectedType {
                what: "control subtype",
                expected: SUBTYPE_DISCOVER_REQ,
                actual: st,
            });
        }
        if payload.len() < 6 {
            return Err(ProtoError::TooShort {
                needed: 6,
                have: payload.len(),
            });
        }
        let since = if payload.len() >= 10 {
            Some(read_u32_le(payload, 6)?)
        } else {
            None
        };
        Ok(Self {
            prefix_only: payload[0] & 0x01 != 0,
            type_filter: payload[1],
            tag: read_u32_le(payload, 2)?,
            since,
        })
    }

    /// Serialise to a control payload.
    pub fn build(&self) -> Vec<u8> {
        let mut flags = SUBTYPE_DISCOVER_REQ << 4;
        if self.prefix_only {
            flags |= 0x01;
        }
        let mut out = vec![flags, self.type_filter];
        out.extend_from_slice(&self.tag.to_le_bytes());
        if let Some(since) = self.since {
            out.extend_from_slice(&since.to_le_bytes());
        }
        out
    }
}

/// A discover response: one responding node's identity and link quality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverResponse {
    /// The responder's node type (low nibble of the flags byte).
    pub node_type: u8,
    /// SNR of the request as the responder heard it (raw; dB = snr / 4).
    pub snr: i8,
    /// Correlation tag from the request.
    pub tag: u32,
    /// The responder's public key: 8-byte prefix or full 32 bytes.
    pub pub_key: Vec<u8>,
}

impl DiscoverResponse {
    /// Parse a discover response from a control payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::UnexpectedType`] for a wrong subtype,
    /// [`ProtoError::TooShort`] for a truncated body, and
    /// [`ProtoError::InvalidEncoding`] when the key is neither 8 nor 32
    /// bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let st = subtype(payload)?;
        if st != SUBTYPE_DISCOVER_RESP {
            return Err(ProtoError::UnexpectedType {
                what: "control subtype",
                expected: SUBTYPE_DISCOVER_RESP,
                actual: st,
            });
        }
        if payload.len() < 6 {
            return Err(ProtoError::TooShort {
                needed: 6,
                have: payload.len(),
            });
        }
        let pub_key = payload[6..].to_vec();
        if pub_key.len() != 8 && pub_key.len() != 32 {
            return Err(ProtoError::InvalidEncoding(format!(
                "discover response key must be 8 or 32 bytes, got {}",
                pub_key.len()
            )));
        }
        Ok(Self {
            node_type: payload[0] & 0x0F,
            snr: payload[1] as i8,
            tag: read_u32_le(payload, 2)?,
            pub_key,
        })
    }

    /// Serialise to a control payload.
    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![
            (SUBTYPE_DISCOVER_RESP << 4) | (self.node_type & 0x0F),
            self.snr as u8,
        ];
        out.extend_from_slice(&self.tag.to_le_bytes());
        out.extend_from_slice(&self.pub_key);
        out
    }
}
