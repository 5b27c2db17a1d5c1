//! # meshcore-proto
//!
//! Wire codec for the MeshCore mesh network protocol.
//!
//! Every byte layout on a MeshCore network is defined here, hand-written —
//! the format was fixed by radio firmware and leaves no room for a
//! serialization framework:
//!
//! - [`packet`] — the outer packet: header bitfield, transport codes, path, payload
//! - [`advert`] — signed identity announcements and their app-data section
//! - [`payload`] — addressed, group, anonymous, ACK, path and text payloads
//! - [`control`] — control payloads (discover request/response)
//! - [`trace`] — network trace payloads (the path field carries SNR bytes)
//! - [`multipart`] — fragment framing for oversized logical packets
//! - [`framing`] — RS-232 frame codec with Fletcher-16 checksums

pub mod advert;
pub mod control;
pub mod framing;
pub mod multipart;
pub mod packet;
pub mod payload;
pub mod trace;

pub use packet::{Packet, PayloadType, RouteType, MAX_PATH_LEN, MAX_PAYLOAD_LEN};

/// The well-known key of the public group channel.
pub const PUBLIC_CHANNEL_KEY: [u8; 16] = [
    0x8B, 0x33, 0x87, 0xE9, 0xC5, 0xCD, 0xEA, 0x6A, 0xC9, 0xE5, 0xED, 0xBA, 0xA1, 0x15, 0xCD,
    0x72,
];

/// Error types for wire parsing and building.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtoError {
    /// The input ended before the declared structure did.
    #[error("input too short: need {needed} bytes, have {have}")]
    TooShort { needed: usize, have: usize },

    /// A declared path length exceeded the 64-byte maximum.
    #[error("path length {0} exceeds maximum {MAX_PATH_LEN}")]
    PathTooLong(usize),

    /// A payload exceeded the 184-byte maximum.
    #[error("payload length {0} exceeds maximum {MAX_PAYLOAD_LEN}")]
    PayloadTooLarge(usize),

    /// An RS-232 frame payload exceeded the 256-byte MTU.
    #[error("frame payload length {0} exceeds maximum {max}", max = framing::MAX_FRAME_PAYLOAD)]
    FrameTooLarge(usize),

    /// An RS-232 frame failed its Fletcher-16 check.
    #[error("frame checksum mismatch: computed 0x{computed:04x}, received 0x{received:04x}")]
    ChecksumMismatch { computed: u16, received: u16 },

    /// A field carried a value the layout does not permit.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// A specialised parser was handed a different payload or subtype.
    #[error("unexpected {what}: expected {expected}, got {actual}")]
    UnexpectedType {
        what: &'static str,
        expected: u8,
        actual: u8,
    },
}

/// Convenience result type for codec operations.
pub type Result<T> = std::result::Result<T, ProtoError>;

/// Bounds-checked little-endian u16 read.
pub(crate) fn read_u16_le(data: &[u8], offset: usize) -> Result<u16> {
    let end = offset + 2;
    if data.len() < end {
        return Err(ProtoError::TooShort {
            needed: end,
            have: data.len(),
        });
    }
    Ok(u16::from_le_bytes([data[offset], data[offset + 1]]))
}

/// Bounds-checked little-endian u32 read.
pub(crate) fn read_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    let end = offset + 4;
    if data.len() < end {
        return Err(ProtoError::TooShort {
            needed: end,
            have: data.len(),
        });
    }
    Ok(u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ]))
}
