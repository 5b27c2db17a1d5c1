//! X25519 key agreement over converted Ed25519 keys (RFC 7748).
//!
//! MeshCore nodes carry a single Ed25519 identity; encryption derives X25519
//! keys from it on both sides:
//!
//! - public: Edwards point decode → Montgomery u-coordinate
//! - secret: SHA-512 of the 32-byte seed, clamped, first 32 bytes
//!
//! Shared secrets feed the AES+HMAC construction in [`crate::cipher`].

use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{CryptoError, Result};

/// Convert an Ed25519 public key to its X25519 (Montgomery) form.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKey`] if the bytes do not decode to a valid
/// Edwards point.
pub fn ed25519_pub_to_x25519(ed_public: &[u8; 32]) -> Result<[u8; 32]> {
    let vk = ed25519_dalek::VerifyingKey::from_bytes(ed_public)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    Ok(vk.to_montgomery().to_bytes())
}

/// Convert an Ed25519 seed to an X25519 static secret.
///
/// SHA-512 of the 32-byte seed, clamped per RFC 7748, first 32 bytes — the
/// standard ed25519-to-x25519 secret conversion.
pub fn ed25519_seed_to_x25519(seed: &[u8; 32]) -> [u8; 32] {
    let digest = Sha512::digest(seed);
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&digest[..32]);
    secret[0] &= 248;
    secret[31] &= 127;
    secret[31] |= 64;
    secret
}

/// Raw X25519 Diffie-Hellman between a static secret and a public key.
pub fn diffie_hellman(secret: &[u8; 32], remote_public: &[u8; 32]) -> [u8; 32] {
    let sk = StaticSecret::from(*secret);
    let pk = PublicKey::from(*remote_public);
    sk.diffie_hellman(&pk).to_bytes()
}

/// Compute the X25519 public key for a raw static secret.
pub fn basepoint_mult(secret: &[u8; 32]) -> [u8; 32] {
    let sk = StaticSecret::from(*secret);
    PublicKey::from(&sk).to_bytes()
}

/// Generate a fresh ephemeral X25519 secret.
pub fn ephemeral_secret() -> [u8; 32] {
    let sk = StaticSecret::random_from_rng(rand::rngs::OsRng);
    sk.to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeKeys;

    #[test]
    fn test_converted_keys_agree() {
        // DH over converted keys must agree in both directions.
        let a = NodeKeys::generate();
        let b = NodeKeys::generate();

        let b_x = ed25519_pub_to_x25519(b.node_id().as_bytes()).expect("valid point");
        let a_x = ed25519_pub_to_x25519(a.node_id().as_bytes()).expect("valid point");

        let ab = diffie_hellman(a.x25519_secret(), &b_x);
        let ba = diffie_hellman(b.x25519_secret(), &a_x);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_seed_conversion_is_clamped() {
        let secret = ed25519_seed_to_x25519(&[0x5Au8; 32]);
        assert_eq!(secret[0] & 7, 0);
        assert_eq!(secret[31] & 128, 0);
        assert_eq!(secret[31] & 64, 64);
    }

    #[test]
    fn test_pub_conversion_rejects_garbage() {
        // Not every 32-byte string decodes to an Edwards point.
        let mut found_invalid = false;
        for b in 0..=255u8 {
            let candidate = [b; 32];
            if ed25519_pub_to_x25519(&candidate).is_err() {
                found_invalid = true;
                break;
            }
        }
        assert!(found_invalid);
    }

    #[test]
    fn test_rfc7748_basepoint_vector() {
        // RFC 7748 Section 6.1 test vector.
        let alice_private =
            hex::decode("77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a")
                .expect("valid hex");
        let alice_public =
            hex::decode("8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a")
                .expect("valid hex");

        let mut secret = [0u8; 32];
        secret.copy_from_slice(&alice_private);
        assert_eq!(basepoint_mult(&secret).as_slice(), alice_public.as_slice());
    }

    #[test]
    fn test_ephemeral_secrets_are_unique() {
        assert_ne!(ephemeral_secret(), ephemeral_secret());
    }
}
