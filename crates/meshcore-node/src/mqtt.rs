//! The MQTT transport contract.
//!
//! MeshCore bridges mesh segments over an ordinary MQTT broker. This module
//! fixes the parts of that bridge that are protocol, not plumbing: the topic
//! layout and the on-topic packet encoding. An actual broker client plugs
//! these into the [`crate::transport::Transport`] trait.
//!
//! - Topic: `{prefix}/{mesh_id}`, prefix defaulting to `meshcore`.
//! - Message body: the packet's wire bytes, base64-encoded, published at
//!   QoS 0 — the mesh already assumes lossy links.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use meshcore_proto::{Packet, ProtoError};

use crate::Result;

/// Default topic prefix.
pub const DEFAULT_TOPIC_PREFIX: &str = "meshcore";

/// Connection settings for an MQTT bridge.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker URL, e.g. `tcp://broker.example.net:1883`.
    pub broker_url: String,
    /// Optional username.
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
    /// Whether to connect over TLS.
    pub tls: bool,
    /// Topic prefix; almost always [`DEFAULT_TOPIC_PREFIX`].
    pub topic_prefix: String,
    /// The mesh identifier this bridge belongs to.
    pub mesh_id: String,
}

impl MqttConfig {
    /// Settings for an anonymous, non-TLS broker.
    pub fn new(broker_url: &str, mesh_id: &str) -> Self {
        Self {
            broker_url: broker_url.to_string(),
            username: None,
            password: None,
            tls: false,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            mesh_id: mesh_id.to_string(),
        }
    }

    /// The topic packets are published to and subscribed from.
    pub fn topic(&self) -> String {
        format!("{}/{}", self.topic_prefix, self.mesh_id)
    }
}

/// Encode a packet for publication.
pub fn encode_packet(packet: &Packet) -> String {
    BASE64.encode(packet.write_to())
}

/// Decode a received message body into a packet.
///
/// # Errors
///
/// Returns a codec error for invalid base64 or invalid packet bytes.
pub fn decode_packet(body: &str) -> Result<Packet> {
    let bytes = BASE64
        .decode(body.trim())
        .map_err(|e| ProtoError::InvalidEncoding(format!("base64: {e}")))?;
    Ok(Packet::read_from(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcore_proto::{PayloadType, RouteType};

    #[test]
    fn test_topic_layout() {
        let config = MqttConfig::new("tcp://broker:1883", "alpsmesh");
        assert_eq!(config.topic(), "meshcore/alpsmesh");

        let custom = MqttConfig {
            topic_prefix: "mc2".to_string(),
            ..config
        };
        assert_eq!(custom.topic(), "mc2/alpsmesh");
    }

    #[test]
    fn test_packet_roundtrip() {
        let mut packet =
            Packet::new(RouteType::Flood, PayloadType::TxtMsg, vec![1, 2, 3]).expect("valid");
        packet.path = vec![0xAA];

        let body = encode_packet(&packet);
        let decoded = decode_packet(&body).expect("decode");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_whitespace_tolerated() {
        let packet =
            Packet::new(RouteType::Flood, PayloadType::TxtMsg, vec![7]).expect("valid");
        let body = format!("{}\n", encode_packet(&packet));
        assert_eq!(decode_packet(&body).expect("decode"), packet);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(decode_packet("not base64 !!!").is_err());
        // Valid base64, invalid packet.
        assert!(decode_packet(&BASE64.encode([0xFFu8])).is_err());
    }
}
