//! Signed identity announcements (ADVERT payloads).
//!
//! ## Wire layout
//!
//! ```text
//! [pubkey:32][timestamp:4 LE][signature:64][app_data:0..]
//! ```
//!
//! The signature covers `pubkey ‖ timestamp_le ‖ app_data`, so app data
//! cannot be swapped without invalidating the advert.
//!
//! App-data layout (all sections optional, gated by the flags byte):
//!
//! ```text
//! [flags:1][lat:4 LE][lon:4 LE][feature1:2 LE][feature2:2 LE][name:rest]
//! ```
//!
//! Low nibble of flags = node type; 0x10 gates lat/lon (degrees × 1e6),
//! 0x20/0x40 gate the feature words, 0x80 gates the name.

use meshcore_crypto::{identity, NodeId, NodeKeys};

use crate::{read_u16_le, read_u32_le, ProtoError, Result};

/// App-data flag: latitude/longitude present.
pub const FLAG_HAS_LOCATION: u8 = 0x10;
/// App-data flag: feature word 1 present.
pub const FLAG_HAS_FEATURE1: u8 = 0x20;
/// App-data flag: feature word 2 present.
pub const FLAG_HAS_FEATURE2: u8 = 0x40;
/// App-data flag: node name present.
pub const FLAG_HAS_NAME: u8 = 0x80;

/// Scale factor for advertised GPS coordinates.
pub const GPS_SCALE: f64 = 1_000_000.0;

/// Advertised node role, the low nibble of the app-data flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// End-user chat node.
    Chat = 1,
    /// Packet repeater.
    Repeater = 2,
    /// Room server.
    Room = 3,
    /// Telemetry sensor.
    Sensor = 4,
}

impl NodeType {
    /// Decode from the low nibble of the flags byte.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0x0F {
            1 => Some(NodeType::Chat),
            2 => Some(NodeType::Repeater),
            3 => Some(NodeType::Room),
            4 => Some(NodeType::Sensor),
            _ => None,
        }
    }
}

/// A GPS position scaled by [`GPS_SCALE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatLon {
    /// Latitude × 1e6.
    pub lat: i32,
    /// Longitude × 1e6.
    pub lon: i32,
}

/// Parsed advert app data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertAppData {
    /// The advertised node role.
    pub node_type: NodeType,
    /// GPS position, if advertised.
    pub location: Option<LatLon>,
    /// Feature word 1, if advertised.
    pub feature1: Option<u16>,
    /// Feature word 2, if advertised.
    pub feature2: Option<u16>,
    /// Node name, if advertised. Empty-name adverts are rejected at contact
    /// ingest, not here.
    pub name: Option<String>,
}

impl AdvertAppData {
    /// A minimal app data section: role and name only.
    pub fn named(node_type: NodeType, name: &str) -> Self {
        Self {
            node_type,
            location: None,
            feature1: None,
            feature2: None,
            name: Some(name.to_string()),
        }
    }

    /// Serialise to app-data bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut flags = self.node_type as u8;
        if self.location.is_some() {
            flags |= FLAG_HAS_LOCATION;
        }
        if self.feature1.is_some() {
            flags |= FLAG_HAS_FEATURE1;
        }
        if self.feature2.is_some() {
            flags |= FLAG_HAS_FEATURE2;
        }
        if self.name.is_some() {
            flags |= FLAG_HAS_NAME;
        }

        let mut out = vec![flags];
        if let Some(loc) = self.location {
            out.extend_from_slice(&loc.lat.to_le_bytes());
            out.extend_from_slice(&loc.lon.to_le_bytes());
        }
        if let Some(f1) = self.feature1 {
            out.extend_from_slice(&f1.to_le_bytes());
        }
        if let Some(f2) = self.feature2 {
            out.extend_from_slice(&f2.to_le_bytes());
        }
        if let Some(ref name) = self.name {
            out.extend_from_slice(name.as_bytes());
        }
        out
    }

    /// Parse app-data bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::TooShort`] when a flag demands more bytes than
    /// remain and [`ProtoError::InvalidEncoding`] for an unknown node type.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(ProtoError::TooShort { needed: 1, have: 0 });
        }
        let flags = data[0];
        let node_type = NodeType::from_bits(flags).ok_or_else(|| {
            ProtoError::InvalidEncoding(format!("unknown node type {}", flags & 0x0F))
        })?;

        let mut offset = 1;
        let location = if flags & FLAG_HAS_LOCATION != 0 {
            let lat = read_u32_le(data, offset)? as i32;
            let lon = read_u32_le(data, offset + 4)? as i32;
            offset += 8;
            Some(LatLon { lat, lon })
        } else {
            None
        };
        let feature1 = if flags & FLAG_HAS_FEATURE1 != 0 {
            let f = read_u16_le(data, offset)?;
            offset += 2;
            Some(f)
        } else {
            None
        };
        let feature2 = if flags & FLAG_HAS_FEATURE2 != 0 {
            let f = read_u16_le(data, offset)?;
            offset += 2;
            Some(f)
        } else {
            None
        };
        let name = if flags & FLAG_HAS_NAME != 0 {
            // Radio firmware sends raw bytes; tolerate non-UTF-8 names.
            Some(String::from_utf8_lossy(&data[offset..]).into_owned())
        } else {
            None
        };

        Ok(Self {
            node_type,
            location,
            feature1,
            feature2,
            name,
        })
    }
}

/// A parsed ADVERT payload.
///
/// `app_data` stays in raw byte form because the signature covers those exact
/// bytes; parse on demand with [`Advert::app_data`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advert {
    /// The announcing node's identity.
    pub node_id: NodeId,
    /// Advert timestamp (epoch seconds); the contact store's replay guard.
    pub timestamp: u32,
    /// Ed25519 signature over `pubkey ‖ timestamp_le ‖ app_data`.
    pub signature: [u8; 64],
    /// Raw app-data bytes, exactly as signed.
    pub app_data: Vec<u8>,
}

impl Advert {
    const FIXED_LEN: usize = 32 + 4 + 64;

    /// Build and sign a self-advert payload.
    pub fn build_signed(keys: &NodeKeys, timestamp: u32, app_data: &AdvertAppData) -> Self {
        let app_bytes = app_data.build();
        let signature = keys.sign_advert(timestamp, &app_bytes);
        Self {
            node_id: keys.node_id(),
            timestamp,
            signature,
            app_data: app_bytes,
        }
    }

    /// Parse an ADVERT payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::TooShort`] when the fixed section is truncated
    /// or [`ProtoError::InvalidEncoding`] when the public key is malformed.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < Self::FIXED_LEN {
            return Err(ProtoError::TooShort {
                needed: Self::FIXED_LEN,
                have: payload.len(),
            });
        }
        let node_id = NodeId::from_slice(&payload[..32])
            .map_err(|e| ProtoError::InvalidEncoding(e.to_string()))?;
        let timestamp = read_u32_le(payload, 32)?;
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&payload[36..100]);
        let app_data = payload[100..].to_vec();
        Ok(Self {
            node_id,
            timestamp,
            signature,
            app_data,
        })
    }

    /// Serialise to payload bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::FIXED_LEN + self.app_data.len());
        out.extend_from_slice(self.node_id.as_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(&self.app_data);
        out
    }

    /// Parse the app-data section.
    pub fn app_data(&self) -> Result<AdvertAppData> {
        AdvertAppData::parse(&self.app_data)
    }

    /// Verify the signature against the reconstructed signing message.
    pub fn verify(&self) -> bool {
        identity::verify_advert_signature(
            &self.node_id,
            self.timestamp,
            &self.app_data,
            &self.signature,
        )
    }
}
