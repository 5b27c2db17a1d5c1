//! Region transport codes.
//!
//! Transport-coded packets (TRANSPORT_FLOOD / TRANSPORT_DIRECT) carry a
//! 16-bit tag derived from a shared region name. Repeaters configured for a
//! region forward only packets whose tag one of their keys reproduces, which
//! segments overlapping meshes without any routing-table state.
//!
//! ```text
//! key  = SHA-256(region_name)[0..16]
//! code = HMAC-SHA256(key, payload_type ‖ payload)[0..2] as u16 LE
//! ```
//!
//! The all-zero and all-one code values are reserved by the framing, so
//! 0x0000 is substituted with 0x0001 and 0xFFFF with 0xFFFE.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use meshcore_proto::Packet;

type HmacSha256 = Hmac<Sha256>;

/// Derive a region key from its configured name.
pub fn region_key(region_name: &str) -> [u8; 16] {
    let digest = Sha256::digest(region_name.as_bytes());
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}

/// Compute the transport code a packet carries in a given region.
pub fn transport_code(key: &[u8; 16], packet: &Packet) -> u16 {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        // HMAC accepts any key length; this arm is unreachable.
        Err(_) => return 0x0001,
    };
    mac.update(&[packet.payload_type_bits()]);
    mac.update(&packet.payload);
    let digest = mac.finalize().into_bytes();
    match u16::from_le_bytes([digest[0], digest[1]]) {
        0x0000 => 0x0001,
        0xFFFF => 0xFFFE,
        code => code,
    }
}

/// The set of regions this node participates in.
///
/// A packet passes validation when any configured key reproduces its first
/// transport code.
#[derive(Debug, Clone, Default)]
pub struct RegionSet {
    regions: Vec<(String, [u8; 16])>,
}

impl RegionSet {
    /// Create an empty region set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from region names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for name in names {
            set.add_region(name.as_ref());
        }
        set
    }

    /// Add a region by name.
    pub fn add_region(&mut self, name: &str) {
        self.regions.push((name.to_string(), region_key(name)));
    }

    /// Number of configured regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether no regions are configured.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Validate a transport-coded packet against the configured regions.
    pub fn validate(&self, packet: &Packet) -> bool {
        self.regions
            .iter()
            .any(|(_, key)| transport_code(key, packet) == packet.transport_codes[0])
    }

    /// Stamp a packet's first transport code for the given region, if that
    /// region is configured. Returns whether a stamp was applied.
    pub fn stamp(&self, packet: &mut Packet, region_name: &str) -> bool {
        match self.regions.iter().find(|(name, _)| name == region_name) {
            Some((_, key)) => {
                packet.transport_codes[0] = transport_code(key, packet);
                true
            }
            None => false,
        }
    }
}
