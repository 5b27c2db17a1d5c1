//! The outer MeshCore packet.
//!
//! ## Wire layout
//!
//! ```text
//! [header:1][transport_codes:4?][path_len:1][path:path_len][payload:1..184]
//! ```
//!
//! Header bitfield: route type = bits 0-1, payload type = bits 2-5,
//! version = bits 6-7. The four transport-code bytes (two u16 LE) are present
//! only for the TRANSPORT_FLOOD and TRANSPORT_DIRECT route types.
//!
//! The out-of-band SNR of the receiving radio rides on the struct but is
//! never serialised; dB = snr / 4.

use crate::{read_u16_le, ProtoError, Result};

/// Maximum number of path bytes a packet may carry.
pub const MAX_PATH_LEN: usize = 64;

/// Maximum payload size in bytes.
pub const MAX_PAYLOAD_LEN: usize = 184;

/// Reserved header value: the owning application has poisoned this packet
/// and the forward path must not retransmit it. Never valid on the wire.
pub const DO_NOT_RETRANSMIT: u8 = 0xFF;

/// Highest protocol version this implementation accepts (header bits 6-7).
pub const MAX_SUPPORTED_VERSION: u8 = 1;

/// Routing discipline, header bits 0-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteType {
    /// Flood routing with transport codes attached.
    TransportFlood = 0,
    /// Plain flood routing: receivers append their hash and rebroadcast.
    Flood = 1,
    /// Direct routing along an explicit hop list (empty list = zero-hop).
    Direct = 2,
    /// Direct routing with transport codes attached.
    TransportDirect = 3,
}

impl RouteType {
    /// Decode from the low two header bits.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => RouteType::TransportFlood,
            1 => RouteType::Flood,
            2 => RouteType::Direct,
            _ => RouteType::TransportDirect,
        }
    }

    /// Whether packets of this route type carry the 4 transport-code bytes.
    pub fn has_transport_codes(self) -> bool {
        matches!(self, RouteType::TransportFlood | RouteType::TransportDirect)
    }

    /// Whether this is a flood discipline (plain or transport-coded).
    pub fn is_flood(self) -> bool {
        matches!(self, RouteType::Flood | RouteType::TransportFlood)
    }

    /// Whether this is a direct discipline (plain or transport-coded).
    pub fn is_direct(self) -> bool {
        matches!(self, RouteType::Direct | RouteType::TransportDirect)
    }
}

/// Payload kind, header bits 2-5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    /// Addressed service request.
    Req = 0,
    /// Addressed service response.
    Response = 1,
    /// Addressed text message.
    TxtMsg = 2,
    /// Acknowledgement carrying a 4-byte checksum.
    Ack = 3,
    /// Signed identity announcement.
    Advert = 4,
    /// Group-channel text.
    GrpTxt = 5,
    /// Group-channel data.
    GrpData = 6,
    /// Anonymous request with an ephemeral public key.
    AnonReq = 7,
    /// Routed path announcement.
    Path = 8,
    /// Network trace.
    Trace = 9,
    /// Fragment of an oversized logical packet.
    Multipart = 10,
    /// Control (discover et al.).
    Control = 11,
}

impl PayloadType {
    /// Decode from the 4-bit payload-type field. Unassigned values (12-15)
    /// return `None`; such packets still forward, they just have no local
    /// dispatch.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0x0F {
            0 => Some(PayloadType::Req),
            1 => Some(PayloadType::Response),
            2 => Some(PayloadType::TxtMsg),
            3 => Some(PayloadType::Ack),
            4 => Some(PayloadType::Advert),
            5 => Some(PayloadType::GrpTxt),
            6 => Some(PayloadType::GrpData),
            7 => Some(PayloadType::AnonReq),
            8 => Some(PayloadType::Path),
            9 => Some(PayloadType::Trace),
            10 => Some(PayloadType::Multipart),
            11 => Some(PayloadType::Control),
            _ => None,
        }
    }

    /// The 4-bit wire value.
    pub fn bits(self) -> u8 {
        self as u8
    }
}

/// A wire-level MeshCore packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Header bitfield (route type, payload type, version).
    pub header: u8,
    /// Region transport codes; meaningful only when
    /// [`RouteType::has_transport_codes`] holds for this packet.
    pub transport_codes: [u16; 2],
    /// Path bytes. Hop hashes for flood/direct packets; per-hop SNR bytes
    /// for TRACE (see [`crate::trace`]).
    pub path: Vec<u8>,
    /// Payload bytes, laid out per the payload type.
    pub payload: Vec<u8>,
    /// Receive-side SNR (raw; dB = snr / 4). Out of band, never serialised.
    pub snr: i8,
}

impl Packet {
    /// Create a packet with version 0 and no path.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::PayloadTooLarge`] when the payload exceeds
    /// [`MAX_PAYLOAD_LEN`], and [`ProtoError::InvalidEncoding`] when it is
    /// empty.
    pub fn new(route: RouteType, payload_type: PayloadType, payload: Vec<u8>) -> Result<Self> {
        if payload.is_empty() {
            return Err(ProtoError::InvalidEncoding("empty payload".into()));
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtoError::PayloadTooLarge(payload.len()));
        }
        Ok(Self {
            header: (route as u8) | (payload_type.bits() << 2),
            transport_codes: [0, 0],
            path: Vec::new(),
            payload,
            snr: 0,
        })
    }

    /// Route type, header bits 0-1.
    pub fn route_type(&self) -> RouteType {
        RouteType::from_bits(self.header)
    }

    /// Raw payload-type field, header bits 2-5.
    pub fn payload_type_bits(&self) -> u8 {
        (self.header >> 2) & 0x0F
    }

    /// Decoded payload type, if assigned.
    pub fn payload_type(&self) -> Option<PayloadType> {
        PayloadType::from_bits(self.payload_type_bits())
    }

    /// Protocol version, header bits 6-7.
    pub fn version(&self) -> u8 {
        self.header >> 6
    }

    /// Replace the route-type bits, preserving payload type and version.
    pub fn set_route_type(&mut self, route: RouteType) {
        self.header = (self.header & !0x03) | route as u8;
    }

    /// Whether this packet carries transport codes on the wire.
    pub fn has_transport_codes(&self) -> bool {
        self.route_type().has_transport_codes()
    }

    /// Number of path bytes.
    pub fn path_len(&self) -> usize {
        self.path.len()
    }

    /// Poison this packet so the forward path will not retransmit it.
    pub fn mark_do_not_retransmit(&mut self) {
        self.header = DO_NOT_RETRANSMIT;
    }

    /// Whether the packet has been poisoned against retransmission.
    pub fn is_do_not_retransmit(&self) -> bool {
        self.header == DO_NOT_RETRANSMIT
    }

    /// Parse a packet from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::TooShort`] when the input ends early,
    /// [`ProtoError::PathTooLong`] / [`ProtoError::PayloadTooLarge`] when a
    /// declared length is out of range, and [`ProtoError::InvalidEncoding`]
    /// when no payload bytes remain.
    pub fn read_from(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(ProtoError::TooShort { needed: 1, have: 0 });
        }
        let header = data[0];
        let mut offset = 1;

        let mut transport_codes = [0u16; 2];
        if RouteType::from_bits(header).has_transport_codes() {
            transport_codes[0] = read_u16_le(data, offset)?;
            transport_codes[1] = read_u16_le(data, offset + 2)?;
            offset += 4;
        }

        if data.len() < offset + 1 {
            return Err(ProtoError::TooShort {
                needed: offset + 1,
                have: data.len(),
            });
        }
        let path_len = data[offset] as usize;
        offset += 1;
        if path_len > MAX_PATH_LEN {
            return Err(ProtoError::PathTooLong(path_len));
        }
        if data.len() < offset + path_len {
            return Err(ProtoError::TooShort {
                needed: offset + path_len,
                have: data.len(),
            });
        }
        let path = data[offset..offset + path_len].to_vec();
        offset += path_len;

        let payload = data[offset..].to_vec();
        if payload.is_empty() {
            return Err(ProtoError::InvalidEncoding("empty payload".into()));
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtoError::PayloadTooLarge(payload.len()));
        }

        Ok(Self {
            header,
            transport_codes,
            path,
            payload,
            snr: 0,
        })
    }

    /// Serialise to wire bytes. SNR is never written.
    pub fn write_to(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.raw_length());
        out.push(self.header);
        if self.has_transport_codes() {
            out.extend_from_slice(&self.transport_codes[0].to_le_bytes());
            out.extend_from_slice(&self.transport_codes[1].to_le_bytes());
        }
        out.push(self.path.len() as u8);
        out.extend_from_slice(&self.path);
        out.extend_from_slice(&self.payload);
        out
    }

    /// The exact byte count [`Packet::write_to`] produces.
    pub fn raw_length(&self) -> usize {
        let codes = if self.has_transport_codes() { 4 } else { 0 };
        1 + codes + 1 + self.path.len() + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(route: RouteType) -> Packet {
        let mut p = Packet::new(route, PayloadType::TxtMsg, vec![1, 2, 3]).expect("valid");
        p.path = vec![0xAA, 0xBB];
        p.transport_codes = [0x1234, 0x5678];
        p
    }

    #[test]
    fn test_header_bit_packing() {
        let p = Packet::new(RouteType::Direct, PayloadType::Advert, vec![0]).expect("valid");
        assert_eq!(p.route_type(), RouteType::Direct);
        assert_eq!(p.payload_type(), Some(PayloadType::Advert));
        assert_eq!(p.version(), 0);
        assert_eq!(p.header, 0b0001_0010);
    }

    #[test]
    fn test_roundtrip_without_transport_codes() {
        let p = sample(RouteType::Flood);
        let bytes = p.write_to();
        assert_eq!(bytes.len(), p.raw_length());

        let parsed = Packet::read_from(&bytes).expect("parse");
        assert_eq!(parsed.header, p.header);
        assert_eq!(parsed.path, p.path);
        assert_eq!(parsed.payload, p.payload);
        // Codes were not on the wire.
        assert_eq!(parsed.transport_codes, [0, 0]);
    }

    #[test]
    fn test_roundtrip_with_transport_codes() {
        for route in [RouteType::TransportFlood, RouteType::TransportDirect] {
            let p = sample(route);
            let parsed = Packet::read_from(&p.write_to()).expect("parse");
            assert_eq!(parsed.transport_codes, [0x1234, 0x5678]);
            assert_eq!(parsed.path, p.path);
            assert_eq!(parsed.payload, p.payload);
        }
    }

    #[test]
    fn test_snr_is_out_of_band() {
        let mut p = sample(RouteType::Flood);
        p.snr = -48; // -12 dB
        let parsed = Packet::read_from(&p.write_to()).expect("parse");
        assert_eq!(parsed.snr, 0);
    }

    #[test]
    fn test_rejects_path_too_long() {
        let mut bytes = vec![0x05]; // Flood, payload type 1
        bytes.push(65);
        bytes.extend_from_slice(&[0u8; 65]);
        bytes.push(0xFF);
        assert_eq!(Packet::read_from(&bytes), Err(ProtoError::PathTooLong(65)));
    }

    #[test]
    fn test_rejects_truncated_path() {
        let bytes = vec![0x05, 4, 0xAA, 0xBB];
        assert!(matches!(
            Packet::read_from(&bytes),
            Err(ProtoError::TooShort { .. })
        ));
    }

    #[test]
    fn test_rejects_missing_payload() {
        let bytes = vec![0x05, 1, 0xAA];
        assert!(matches!(
            Packet::read_from(&bytes),
            Err(ProtoError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_payload() {
        let mut bytes = vec![0x05, 0];
        bytes.extend_from_slice(&[0u8; MAX_PAYLOAD_LEN + 1]);
        assert_eq!(
            Packet::read_from(&bytes),
            Err(ProtoError::PayloadTooLarge(MAX_PAYLOAD_LEN + 1))
        );
    }

    #[test]
    fn test_rejects_truncated_transport_codes() {
        // TransportFlood header demands 4 code bytes.
        let bytes = vec![0x04, 0x12];
        assert!(matches!(
            Packet::read_from(&bytes),
            Err(ProtoError::TooShort { .. })
        ));
    }

    #[test]
    fn test_set_route_type_preserves_other_bits() {
        let mut p = Packet::new(RouteType::Flood, PayloadType::Ack, vec![0; 4]).expect("valid");
        p.header |= 0x40; // version 1
        p.set_route_type(RouteType::Direct);
        assert_eq!(p.route_type(), RouteType::Direct);
        assert_eq!(p.payload_type(), Some(PayloadType::Ack));
        assert_eq!(p.version(), 1);
    }

    #[test]
    fn test_do_not_retransmit_marker() {
        let mut p = sample(RouteType::Flood);
        assert!(!p.is_do_not_retransmit());
        p.mark_do_not_retransmit();
        assert!(p.is_do_not_retransmit());
    }

    #[test]
    fn test_unassigned_payload_type() {
        let p = Packet {
            header: 0b0011_1101, // payload type 15
            transport_codes: [0, 0],
            path: Vec::new(),
            payload: vec![1],
            snr: 0,
        };
        assert_eq!(p.payload_type(), None);
        assert_eq!(p.payload_type_bits(), 15);
    }
}
