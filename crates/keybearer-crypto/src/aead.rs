//! AES-GCM sealing for the current envelope format.
//!
//! Ciphertext layout: `[ciphertext][16-byte GCM tag]`; the 96-bit nonce is
//! stored separately in the envelope (`iv` fields).
//!
//! `open` either returns the full plaintext or fails with
//! [`KeybearerError::Authentication`]. No partial output is ever produced.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes128Gcm, Aes256Gcm, Nonce,
};

use crate::error::{KeybearerError, KeybearerResult};
use crate::NONCE_SIZE;

/// Seal `plaintext` under `key` (16 or 32 bytes) with the given nonce.
pub fn seal(
    key: &[u8],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> KeybearerResult<Vec<u8>> {
    let nonce = Nonce::from_slice(nonce);
    let payload = Payload {
        msg: plaintext,
        aad,
    };
    let sealed = match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .map_err(|e| KeybearerError::Crypto(format!("AES-128-GCM key: {e}")))?
            .encrypt(nonce, payload),
        32 => Aes256Gcm::new_from_slice(key)
            .map_err(|e| KeybearerError::Crypto(format!("AES-256-GCM key: {e}")))?
            .encrypt(nonce, payload),
        n => {
            return Err(KeybearerError::UnsupportedAlgorithm(format!(
                "AES-GCM with a {}-bit key",
                n * 8
            )))
        }
    };
    sealed.map_err(|e| KeybearerError::Crypto(format!("AES-GCM encryption failed: {e}")))
}

/// Open a ciphertext produced by [`seal`].
pub fn open(
    key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> KeybearerResult<Vec<u8>> {
    if nonce.len() != NONCE_SIZE {
        return Err(KeybearerError::Authentication);
    }
    let nonce = Nonce::from_slice(nonce);
    let payload = Payload {
        msg: ciphertext,
        aad,
    };
    let opened = match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .map_err(|_| KeybearerError::Authentication)?
            .decrypt(nonce, payload),
        32 => Aes256Gcm::new_from_slice(key)
            .map_err(|_| KeybearerError::Authentication)?
            .decrypt(nonce, payload),
        _ => return Err(KeybearerError::Authentication),
    };
    opened.map_err(|_| KeybearerError::Authentication)
}
