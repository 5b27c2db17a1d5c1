//! # meshcore-crypto
//!
//! Cryptographic primitives for the MeshCore mesh network protocol.
//!
//! The constructions here are part of the wire contract and are fixed — no
//! algorithm negotiation exists on a MeshCore network:
//!
//! - [`identity`] — Ed25519 node identities, advert signing (RFC 8032)
//! - [`x25519`] — Ed25519→X25519 conversion and ECDH shared secrets (RFC 7748)
//! - [`cipher`] — AES-128-ECB + truncated HMAC-SHA256 encrypt-then-MAC
//! - [`hashes`] — SHA-256-derived ACK hashes and channel hashes

pub mod cipher;
pub mod hashes;
pub mod identity;
pub mod x25519;

pub use identity::{NodeId, NodeKeys};

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Ed25519 signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// Truncated HMAC did not match the received MAC bytes.
    #[error("MAC mismatch")]
    MacMismatch,

    /// A key had the wrong length or did not decode to a valid curve point.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience result type for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
