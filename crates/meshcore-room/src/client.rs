//! Client-side construction of the room protocol.
//!
//! Everything a chat node needs to talk to a room server: the login
//! request, its encrypted response, outgoing text messages with their
//! expected ACK hashes, and the ACK returned for a pushed post. Each
//! helper is the exact inverse of the server path in [`crate::server`].

use meshcore_crypto::{cipher, hashes, NodeId, NodeKeys};
use meshcore_proto::payload::{Addressed, AnonRequest, AckPayload, TextContent};
use meshcore_proto::{Packet, PayloadType, RouteType};

use crate::clients::Permission;
use crate::{Result, RoomError};

/// A parsed login response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginAck {
    /// The server's (unique) timestamp for this login.
    pub server_timestamp: u32,
    /// The role the server granted.
    pub permission: Permission,
}

/// Build a login request packet.
///
/// The key slot carries the client's long-term identity key; `timestamp`
/// must be strictly newer than any previous login or message from this
/// client or the server will silently ignore it.
///
/// # Errors
///
/// Returns a crypto error if the room's key does not decode.
pub fn build_login(
    keys: &NodeKeys,
    room: &NodeId,
    timestamp: u32,
    sync_since: u32,
    password: &str,
) -> Result<Packet> {
    let secret = keys.shared_secret(room)?;
    let mut plain = timestamp.to_le_bytes().to_vec();
    plain.extend_from_slice(&sync_since.to_le_bytes());
    plain.extend_from_slice(password.as_bytes());
    plain.push(0);

    let sealed = cipher::encrypt_then_mac(&secret, &plain)?;
    let anon = AnonRequest {
        dest_hash: room.hash(),
        ephemeral_pub: keys.node_id().to_bytes(),
        sealed,
    };
    Ok(Packet::new(
        RouteType::Direct,
        PayloadType::AnonReq,
        anon.build(),
    )?)
}

/// Decrypt and parse a login response addressed to us.
///
/// # Errors
///
/// Returns a MAC error when the response is not for us, and
/// [`RoomError::Proto`] for a malformed interior.
pub fn parse_login_response(keys: &NodeKeys, room: &NodeId, packet: &Packet) -> Result<LoginAck> {
    let addressed = Addressed::parse(&packet.payload)?;
    let secret = keys.shared_secret(room)?;
    let plain = cipher::mac_then_decrypt(&secret, &addressed.sealed)?;
    if plain.len() < 5 {
        return Err(RoomError::Proto(meshcore_proto::ProtoError::TooShort {
            needed: 5,
            have: plain.len(),
        }));
    }
    let server_timestamp = u32::from_le_bytes([plain[0], plain[1], plain[2], plain[3]]);
    let permission = match plain[4] {
        0 => Permission::Guest,
        1 => Permission::ReadOnly,
        2 => Permission::ReadWrite,
        3 => Permission::Admin,
        other => {
            return Err(RoomError::Proto(meshcore_proto::ProtoError::InvalidEncoding(
                format!("unknown permission byte {other}"),
            )))
        }
    };
    Ok(LoginAck {
        server_timestamp,
        permission,
    })
}

/// Build an addressed text message for the room.
///
/// Returns the packet and the ACK hash the room will answer with
/// (plain text binds the *sender's* key).
///
/// # Errors
///
/// Returns a crypto error if the room's key does not decode and a codec
/// error when the message overflows the payload.
pub fn build_text(
    keys: &NodeKeys,
    room: &NodeId,
    timestamp: u32,
    message: &[u8],
) -> Result<(Packet, u32)> {
    let secret = keys.shared_secret(room)?;
    let content = TextContent::plain(timestamp, message).build();
    let sealed = cipher::encrypt_then_mac(&secret, &content)?;
    let addressed = Addressed {
        dest_hash: room.hash(),
        src_hash: keys.node_id().hash(),
        sealed,
    };
    let packet = Packet::new(RouteType::Direct, PayloadType::TxtMsg, addressed.build())?;
    Ok((packet, hashes::ack_hash(&content, &keys.node_id())))
}

/// Decrypt a pushed post and build the ACK that confirms it.
///
/// The push's ACK hash binds the *room's* key — the pusher is the sender.
///
/// # Errors
///
/// Returns a MAC error when the packet is not a push for us.
pub fn open_push(keys: &NodeKeys, room: &NodeId, packet: &Packet) -> Result<(TextContent, Packet)> {
    let addressed = Addressed::parse(&packet.payload)?;
    let secret = keys.shared_secret(room)?;
    let plain = cipher::mac_then_decrypt(&secret, &addressed.sealed)?;
    let content = TextContent::parse(&plain)?;

    let hash = hashes::ack_hash(&content.build(), room);
    let ack = Packet::new(
        RouteType::Direct,
        PayloadType::Ack,
        AckPayload { checksum: hash }.build(),
    )?;
    Ok((content, ack))
}
