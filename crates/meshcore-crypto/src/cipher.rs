//! AES-128-ECB + truncated HMAC-SHA256 encrypt-then-MAC.
//!
//! This is the symmetric construction every encrypted MeshCore payload uses.
//! It is deliberately simple to fit radio-firmware constraints and is part of
//! the wire contract:
//!
//! ```text
//! EncryptThenMac(secret, pt):
//!   1. pad pt with zeros to a 16-byte multiple (empty pt -> one zero block)
//!   2. ct  = AES-128-ECB(secret[0..16], padded)
//!   3. mac = HMAC-SHA256(pad32(secret), ct)[0..2]
//!   4. return mac || ct
//! ```
//!
//! Zero padding is not removed on decrypt; callers that transported a
//! C-string recover it with [`until_nul`].

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{identity::NodeId, x25519, CryptoError, Result};

type HmacSha256 = Hmac<Sha256>;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Length of the truncated MAC prepended to every ciphertext.
pub const MAC_SIZE: usize = 2;

/// Compute the truncated HMAC for a ciphertext.
///
/// The HMAC key is the shared secret zero-padded to 32 bytes, so 16-byte
/// group channel keys and 32-byte ECDH secrets share one code path.
fn truncated_hmac(secret: &[u8], ciphertext: &[u8]) -> Result<[u8; MAC_SIZE]> {
    let mut key = [0u8; 32];
    let n = secret.len().min(32);
    key[..n].copy_from_slice(&secret[..n]);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(&key)
        .map_err(|_| CryptoError::InvalidKey("HMAC key rejected".into()))?;
    mac.update(ciphertext);
    let digest = mac.finalize().into_bytes();

    let mut out = [0u8; MAC_SIZE];
    out.copy_from_slice(&digest[..MAC_SIZE]);
    Ok(out)
}

fn aes_key(secret: &[u8]) -> Result<[u8; BLOCK_SIZE]> {
    if secret.len() < BLOCK_SIZE {
        return Err(CryptoError::InvalidKey(format!(
            "secret must be at least {BLOCK_SIZE} bytes, got {}",
            secret.len()
        )));
    }
    let mut key = [0u8; BLOCK_SIZE];
    key.copy_from_slice(&secret[..BLOCK_SIZE]);
    Ok(key)
}

/// Encrypt a plaintext and prepend its truncated MAC.
///
/// Output layout: `mac[2] ‖ ciphertext`.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKey`] if the secret is shorter than one AES
/// block.
pub fn encrypt_then_mac(secret: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let key = aes_key(secret)?;
    let cipher = Aes128::new(GenericArray::from_slice(&key));

    // Zero-pad to a block multiple; an empty plaintext still produces one
    // block so the MAC always covers something.
    let padded_len = plaintext.len().div_ceil(BLOCK_SIZE).max(1) * BLOCK_SIZE;
    let mut ciphertext = vec![0u8; padded_len];
    ciphertext[..plaintext.len()].copy_from_slice(plaintext);

    for block in ciphertext.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }

    let mac = truncated_hmac(secret, &ciphertext)?;

    let mut out = Vec::with_capacity(MAC_SIZE + ciphertext.len());
    out.extend_from_slice(&mac);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Verify the truncated MAC, then decrypt.
///
/// Returns the padded plaintext; trailing zero padding is preserved.
///
/// # Errors
///
/// Returns [`CryptoError::MacMismatch`] if the MAC does not verify — the
/// common outcome for group traffic that is simply not for us.
/// Returns [`CryptoError::InvalidInput`] if the data is too short or the
/// ciphertext is not a block multiple.
pub fn mac_then_decrypt(secret: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < MAC_SIZE + BLOCK_SIZE {
        return Err(CryptoError::InvalidInput(format!(
            "encrypted payload too short: {} bytes",
            data.len()
        )));
    }
    let (received_mac, ciphertext) = data.split_at(MAC_SIZE);
    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidInput(format!(
            "ciphertext length {} is not a block multiple",
            ciphertext.len()
        )));
    }

    let expected = truncated_hmac(secret, ciphertext)?;

    // Accumulate the difference over both bytes before deciding, so the
    // comparison cost does not depend on where a mismatch occurs.
    let mut diff = 0u8;
    for (a, b) in expected.iter().zip(received_mac.iter()) {
        diff |= a ^ b;
    }
    if diff != 0 {
        return Err(CryptoError::MacMismatch);
    }

    let key = aes_key(secret)?;
    let cipher = Aes128::new(GenericArray::from_slice(&key));
    let mut plaintext = ciphertext.to_vec();
    for block in plaintext.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(plaintext)
}

/// Encrypt to a node without revealing the sender: a fresh ephemeral X25519
/// keypair is generated per call.
///
/// Returns `(ephemeral_public, mac ‖ ciphertext)` — the layout of an
/// anonymous-request payload body.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKey`] if the recipient's public key does not
/// decode.
pub fn encrypt_anonymous(plaintext: &[u8], recipient: &NodeId) -> Result<([u8; 32], Vec<u8>)> {
    let recipient_x = x25519::ed25519_pub_to_x25519(recipient.as_bytes())?;
    let eph_secret = x25519::ephemeral_secret();
    let eph_public = x25519::basepoint_mult(&eph_secret);
    let secret = x25519::diffie_hellman(&eph_secret, &recipient_x);
    let sealed = encrypt_then_mac(&secret, plaintext)?;
    Ok((eph_public, sealed))
}

/// The prefix of `bytes` up to (not including) the first nul byte.
///
/// Encrypted text payloads are zero-padded; this recovers the original
/// C-string content.
pub fn until_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(idx) => &bytes[..idx],
        None => bytes,
    }
}
