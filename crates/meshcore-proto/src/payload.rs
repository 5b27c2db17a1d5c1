//! Addressed, group, anonymous, ACK, path and text payloads.
//!
//! ## Wire layouts
//!
//! ```text
//! TXT_MSG / REQ / RESPONSE / PATH:  [dest_hash:1][src_hash:1][mac:2][ciphertext]
//! GRP_TXT / GRP_DATA:               [channel_hash:1][mac:2][ciphertext]
//! ANON_REQ:                         [dest_hash:1][ephemeral_pub:32][mac:2][ciphertext]
//! ACK:                              [checksum:4 LE]
//! ```
//!
//! The `mac ‖ ciphertext` tail of the encrypted variants is exactly the
//! output of the encrypt-then-MAC construction and is kept contiguous here.
//!
//! Decrypted interiors:
//!
//! ```text
//! PATH content: [path_len:1][path:path_len][extra_type:1][extra:rest]
//! text content: [timestamp:4 LE][txt_type:6|attempt:2][sender_prefix:4?][message]
//! ```

use crate::{read_u32_le, ProtoError, Result, MAX_PATH_LEN};

/// Minimum length of the `mac ‖ ciphertext` tail (2-byte MAC, one AES block).
const MIN_SEALED_LEN: usize = 2 + 16;

/// Text type carried in bits 2-7 of the type/attempt byte: plain text.
pub const TXT_TYPE_PLAIN: u8 = 0;
/// Text type: signed text, carrying a 4-byte sender-key prefix.
pub const TXT_TYPE_SIGNED: u8 = 2;

/// An addressed (unicast) payload: TXT_MSG, REQ, RESPONSE or PATH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addressed {
    /// First byte of the destination's public key.
    pub dest_hash: u8,
    /// First byte of the sender's public key.
    pub src_hash: u8,
    /// `mac[2] ‖ ciphertext`, as produced by encrypt-then-MAC.
    pub sealed: Vec<u8>,
}

impl Addressed {
    /// Parse an addressed payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::TooShort`] if the sealed tail cannot hold a MAC
    /// and at least one cipher block.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 2 + MIN_SEALED_LEN {
            return Err(ProtoError::TooShort {
                needed: 2 + MIN_SEALED_LEN,
                have: payload.len(),
            });
        }
        Ok(Self {
            dest_hash: payload[0],
            src_hash: payload[1],
            sealed: payload[2..].to_vec(),
        })
    }

    /// Serialise to payload bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.sealed.len());
        out.push(self.dest_hash);
        out.push(self.src_hash);
        out.extend_from_slice(&self.sealed);
        out
    }

    /// The truncated MAC (little-endian u16 view of the first two sealed bytes).
    pub fn mac(&self) -> u16 {
        u16::from_le_bytes([self.sealed[0], self.sealed[1]])
    }
}

/// A group-channel payload: GRP_TXT or GRP_DATA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMessage {
    /// First byte of SHA-256 of the channel key.
    pub channel_hash: u8,
    /// `mac[2] ‖ ciphertext`.
    pub sealed: Vec<u8>,
}

impl GroupMessage {
    /// Parse a group payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::TooShort`] if the sealed tail is too small.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 1 + MIN_SEALED_LEN {
            return Err(ProtoError::TooShort {
                needed: 1 + MIN_SEALED_LEN,
                have: payload.len(),
            });
        }
        Ok(Self {
            channel_hash: payload[0],
            sealed: payload[1..].to_vec(),
        })
    }

    /// Serialise to payload bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.sealed.len());
        out.push(self.channel_hash);
        out.extend_from_slice(&self.sealed);
        out
    }
}

/// An anonymous request payload (ANON_REQ): the sender identifies itself only
/// through an ephemeral key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonRequest {
    /// First byte of the destination's public key.
    pub dest_hash: u8,
    /// The sender's ephemeral X25519 public key.
    pub ephemeral_pub: [u8; 32],
    /// `mac[2] ‖ ciphertext`.
    pub sealed: Vec<u8>,
}

impl AnonRequest {
    /// Parse an anonymous request payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::TooShort`] if the input cannot hold the key and
    /// sealed tail.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 1 + 32 + MIN_SEALED_LEN {
            return Err(ProtoError::TooShort {
                needed: 1 + 32 + MIN_SEALED_LEN,
                have: payload.len(),
            });
        }
        let mut ephemeral_pub = [0u8; 32];
        ephemeral_pub.copy_from_slice(&payload[1..33]);
        Ok(Self {
            dest_hash: payload[0],
            ephemeral_pub,
            sealed: payload[33..].to_vec(),
        })
    }

    /// Serialise to payload bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(33 + self.sealed.len());
        out.push(self.dest_hash);
        out.extend_from_slice(&self.ephemeral_pub);
        out.extend_from_slice(&self.sealed);
        out
    }
}

/// An acknowledgement payload: the 4-byte ACK hash of the message it confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPayload {
    /// The acknowledged message's ACK hash.
    pub checksum: u32,
}

impl AckPayload {
    /// Parse an ACK payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::TooShort`] for fewer than four bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            checksum: read_u32_le(payload, 0)?,
        })
    }

    /// Serialise to payload bytes.
    pub fn build(&self) -> Vec<u8> {
        self.checksum.to_le_bytes().to_vec()
    }
}

/// The decrypted interior of a PATH payload: a returned route plus an
/// optional piggybacked extra payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathContent {
    /// The hop hashes of the announced route. Empty means zero-hop.
    pub path: Vec<u8>,
    /// Payload type of the piggybacked extra, if any.
    pub extra_type: u8,
    /// Raw extra payload bytes.
    pub extra: Vec<u8>,
}

impl PathContent {
    /// Parse decrypted PATH content.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::PathTooLong`] or [`ProtoError::TooShort`] when
    /// the declared path overruns.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(ProtoError::TooShort { needed: 1, have: 0 });
        }
        let path_len = data[0] as usize;
        if path_len > MAX_PATH_LEN {
            return Err(ProtoError::PathTooLong(path_len));
        }
        if data.len() < 1 + path_len + 1 {
            return Err(ProtoError::TooShort {
                needed: 1 + path_len + 1,
                have: data.len(),
            });
        }
        Ok(Self {
            path: data[1..1 + path_len].to_vec(),
            extra_type: data[1 + path_len],
            extra: data[2 + path_len..].to_vec(),
        })
    }

    /// Serialise to plaintext bytes (ready for encryption).
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.path.len() + self.extra.len());
        out.push(self.path.len() as u8);
        out.extend_from_slice(&self.path);
        out.push(self.extra_type);
        out.extend_from_slice(&self.extra);
        out
    }
}

/// The decrypted interior of a text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextContent {
    /// Sender timestamp (epoch seconds); the per-client replay watermark.
    pub timestamp: u32,
    /// Text type, bits 2-7 of the type/attempt byte.
    pub txt_type: u8,
    /// Delivery attempt counter, bits 0-1.
    pub attempt: u8,
    /// First four bytes of the sender's public key; present iff
    /// `txt_type == TXT_TYPE_SIGNED`.
    pub sender_prefix: Option<[u8; 4]>,
    /// Message bytes with any trailing nul removed.
    pub message: Vec<u8>,
}

impl TextContent {
    /// A plain text message on its first delivery attempt.
    pub fn plain(timestamp: u32, message: &[u8]) -> Self {
        Self {
            timestamp,
            txt_type: TXT_TYPE_PLAIN,
            attempt: 0,
            sender_prefix: None,
            message: message.to_vec(),
        }
    }

    /// Parse decrypted text content.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::TooShort`] for fewer than five bytes, or fewer
    /// than nine when the signed flag demands a sender prefix.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 5 {
            return Err(ProtoError::TooShort {
                needed: 5,
                have: data.len(),
            });
        }
        let timestamp = read_u32_le(data, 0)?;
        let txt_type = data[4] >> 2;
        let attempt = data[4] & 0x03;

        let (sender_prefix, body_start) = if txt_type == TXT_TYPE_SIGNED {
            if data.len() < 9 {
                return Err(ProtoError::TooShort {
                    needed: 9,
                    have: data.len(),
                });
            }
            let mut prefix = [0u8; 4];
            prefix.copy_from_slice(&data[5..9]);
            (Some(prefix), 9)
        } else {
            (None, 5)
        };

        // Tolerate a trailing nul from zero padding / C-string senders.
        let mut message = data[body_start..].to_vec();
        if let Some(nul) = message.iter().position(|&b| b == 0) {
            message.truncate(nul);
        }

        Ok(Self {
            timestamp,
            txt_type,
            attempt,
            sender_prefix,
            message,
        })
    }

    /// Serialise to plaintext bytes (ready for encryption).
    pub fn build(&self) -> Vec<u8> {
        let prefix_len = if self.sender_prefix.is_some() { 4 } else { 0 };
        let mut out = Vec::with_capacity(5 + prefix_len + self.message.len());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.push((self.txt_type << 2) | (self.attempt & 0x03));
        if let Some(prefix) = self.sender_prefix {
            out.extend_from_slice(&prefix);
        }
        out.extend_from_slice(&self.message);
        out
    }
}
