//! Node identities and advert signing (RFC 8032).
//!
//! Every MeshCore node is identified by its 32-byte Ed25519 public key. The
//! first byte of the key doubles as the node's 1-byte routing address, so
//! hash collisions are expected and every hash-based lookup must tolerate
//! multiple matches.
//!
//! This module wraps `ed25519-dalek` with MeshCore-specific types.

use ed25519_dalek::{Signer, Verifier};
use zeroize::Zeroize;

use crate::{x25519, CryptoError, Result};

/// A 32-byte MeshCore node identity (an Ed25519 public key).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    bytes: [u8; 32],
}

impl NodeId {
    /// Size of a node identity in bytes.
    pub const SIZE: usize = 32;

    /// Create a node ID from raw public key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Create a node ID from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the slice is not 32 bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.len() != Self::SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "node id must be {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(data);
        Ok(Self { bytes })
    }

    /// Get the raw public key bytes.
    pub fn to_bytes(self) -> [u8; 32] {
        self.bytes
    }

    /// Get the raw public key bytes as a slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// The node's 1-byte routing address: the first byte of the public key.
    pub fn hash(&self) -> u8 {
        self.bytes[0]
    }

    /// Compare the leading bytes of this identity against a hash prefix.
    ///
    /// Used for variable-length prefix addressing (1-byte routing hashes,
    /// 8-byte discover responses, full 32-byte keys).
    pub fn is_hash_match(&self, prefix: &[u8]) -> bool {
        prefix.len() <= Self::SIZE && self.bytes[..prefix.len()] == *prefix
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.bytes))
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short fingerprint for logs; the full key is rarely useful there.
        write!(f, "NodeId({}..)", hex::encode(&self.bytes[..4]))
    }
}

/// A node's Ed25519 keypair plus its cached X25519 conversion.
///
/// The X25519 secret is derived once at construction because every encrypted
/// payload needs it and the SHA-512 clamp derivation is deterministic.
pub struct NodeKeys {
    signing: ed25519_dalek::SigningKey,
    node_id: NodeId,
    x25519_secret: [u8; 32],
}

impl NodeKeys {
    /// Generate a new random node identity.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        let signing = ed25519_dalek::SigningKey::generate(&mut csprng);
        Self::from_signing_key(signing)
    }

    /// Create a node identity from a 32-byte Ed25519 seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(ed25519_dalek::SigningKey::from_bytes(seed))
    }

    fn from_signing_key(signing: ed25519_dalek::SigningKey) -> Self {
        let node_id = NodeId::from_bytes(signing.verifying_key().to_bytes());
        let x25519_secret = x25519::ed25519_seed_to_x25519(&signing.to_bytes());
        Self {
            signing,
            node_id,
            x25519_secret,
        }
    }

    /// The public identity of this keypair.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The converted X25519 static secret for ECDH.
    pub fn x25519_secret(&self) -> &[u8; 32] {
        &self.x25519_secret
    }

    /// Sign an arbitrary message.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }

    /// Sign a self-advert: the signature covers `pubkey ‖ timestamp_le ‖ app_data`.
    pub fn sign_advert(&self, timestamp: u32, app_data: &[u8]) -> [u8; 64] {
        let msg = advert_signing_message(&self.node_id, timestamp, app_data);
        self.sign(&msg)
    }

    /// Compute the X25519 shared secret with a remote node identity.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the remote public key does not
    /// decode to a valid Edwards point.
    pub fn shared_secret(&self, remote: &NodeId) -> Result<[u8; 32]> {
        let remote_x = x25519::ed25519_pub_to_x25519(remote.as_bytes())?;
        Ok(x25519::diffie_hellman(&self.x25519_secret, &remote_x))
    }

    /// Compute the X25519 shared secret with a raw X25519 public key
    /// (an ephemeral key from an anonymous request).
    pub fn shared_secret_x25519(&self, remote_x25519_pub: &[u8; 32]) -> [u8; 32] {
        x25519::diffie_hellman(&self.x25519_secret, remote_x25519_pub)
    }
}

impl Drop for NodeKeys {
    fn drop(&mut self) {
        self.x25519_secret.zeroize();
        // ed25519_dalek::SigningKey zeroizes its own seed via its Drop.
    }
}

impl std::fmt::Debug for NodeKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeys").field("node_id", &self.node_id).finish()
    }
}

/// Assemble the byte string an advert signature covers.
pub fn advert_signing_message(node_id: &NodeId, timestamp: u32, app_data: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(NodeId::SIZE + 4 + app_data.len());
    msg.extend_from_slice(node_id.as_bytes());
    msg.extend_from_slice(&timestamp.to_le_bytes());
    msg.extend_from_slice(app_data);
    msg
}

/// Verify an advert signature against its reconstructed signing message.
pub fn verify_advert_signature(
    node_id: &NodeId,
    timestamp: u32,
    app_data: &[u8],
    signature: &[u8; 64],
) -> bool {
    let verifying = match ed25519_dalek::VerifyingKey::from_bytes(node_id.as_bytes()) {
        Ok(vk) => vk,
        Err(_) => return false,
    };
    let msg = advert_signing_message(node_id, timestamp, app_data);
    let sig = ed25519_dalek::Signature::from_bytes(signature);
    verifying.verify(&msg, &sig).is_ok()
}
