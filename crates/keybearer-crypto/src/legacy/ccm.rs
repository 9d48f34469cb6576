//! AES-CCM as the legacy writer used it.
//!
//! The stored IV is 16 bytes, but CCM only takes `15 - L` of them, where `L`
//! (the size of the message-length field) grows with the message:
//! 2 bytes below 64 KiB, 3 below 16 MiB, 4 beyond.

use aes::{Aes128, Aes192, Aes256};
use ccm::aead::{Aead, KeyInit, Nonce, Payload};
use ccm::aead::consts::{U10, U11, U12, U13, U14, U16, U4, U6, U8};
use ccm::Ccm;

use super::bits::BitArray;
use crate::error::{KeybearerError, KeybearerResult};

/// Length-field size for a message of `len` bytes and an IV of `iv_len` bytes.
fn length_field_size(len: usize, iv_len: usize) -> usize {
    let mut l = 2;
    while l < 4 && (len as u64) >> (8 * l) != 0 {
        l += 1;
    }
    l.max(15usize.saturating_sub(iv_len))
}

/// The part of `iv` actually fed to CCM for a `len`-byte message.
fn nonce_for(iv: &[u8], len: usize) -> KeybearerResult<Vec<u8>> {
    if iv.len() < 7 {
        return Err(KeybearerError::MalformedEnvelope(format!(
            "CCM IV must be at least 7 bytes, got {}",
            iv.len()
        )));
    }
    let l = length_field_size(len, iv.len());
    Ok(BitArray::from_bytes(iv).clamp(8 * (15 - l)).to_bytes())
}

fn open_with<C: Aead + KeyInit>(key: &[u8], nonce: &[u8], msg: &[u8], aad: &[u8]) -> Option<Vec<u8>> {
    let cipher = C::new_from_slice(key).ok()?;
    cipher.decrypt(Nonce::<C>::from_slice(nonce), Payload { msg, aad }).ok()
}

#[cfg(test)]
fn seal_with<C: Aead + KeyInit>(key: &[u8], nonce: &[u8], msg: &[u8], aad: &[u8]) -> Option<Vec<u8>> {
    let cipher = C::new_from_slice(key).ok()?;
    cipher.encrypt(Nonce::<C>::from_slice(nonce), Payload { msg, aad }).ok()
}

// Expands to a match over key size, tag size and nonce size, calling `$f`
// with the concrete CCM instantiation.
macro_rules! ccm_dispatch {
    ($f:ident, $key:expr, $tag:expr, $nonce:expr, $msg:expr, $aad:expr) => {
        match $key.len() {
            16 => ccm_dispatch!(@tag Aes128, $f, $key, $tag, $nonce, $msg, $aad),
            24 => ccm_dispatch!(@tag Aes192, $f, $key, $tag, $nonce, $msg, $aad),
            32 => ccm_dispatch!(@tag Aes256, $f, $key, $tag, $nonce, $msg, $aad),
            _ => None,
        }
    };
    (@tag $aes:ty, $f:ident, $key:expr, $tag:expr, $nonce:expr, $msg:expr, $aad:expr) => {
        match $tag {
            4 => ccm_dispatch!(@nonce $aes, U4, $f, $key, $nonce, $msg, $aad),
            6 => ccm_dispatch!(@nonce $aes, U6, $f, $key, $nonce, $msg, $aad),
            8 => ccm_dispatch!(@nonce $aes, U8, $f, $key, $nonce, $msg, $aad),
            10 => ccm_dispatch!(@nonce $aes, U10, $f, $key, $nonce, $msg, $aad),
            12 => ccm_dispatch!(@nonce $aes, U12, $f, $key, $nonce, $msg, $aad),
            14 => ccm_dispatch!(@nonce $aes, U14, $f, $key, $nonce, $msg, $aad),
            16 => ccm_dispatch!(@nonce $aes, U16, $f, $key, $nonce, $msg, $aad),
            _ => None,
        }
    };
    (@nonce $aes:ty, $t:ty, $f:ident, $key:expr, $nonce:expr, $msg:expr, $aad:expr) => {
        match $nonce.len() {
            11 => $f::<Ccm<$aes, $t, U11>>($key, $nonce, $msg, $aad),
            12 => $f::<Ccm<$aes, $t, U12>>($key, $nonce, $msg, $aad),
            13 => $f::<Ccm<$aes, $t, U13>>($key, $nonce, $msg, $aad),
            _ => None,
        }
    };
}

/// Decrypt `ciphertext || tag` with a `tag_bits`-bit tag.
pub fn decrypt(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
    tag_bits: u32,
) -> KeybearerResult<Vec<u8>> {
    let tag_len = (tag_bits / 8) as usize;
    if ciphertext.len() < tag_len {
        return Err(KeybearerError::Authentication);
    }
    let nonce = nonce_for(iv, ciphertext.len() - tag_len)?;
    ccm_dispatch!(open_with, key, tag_len, &nonce, ciphertext, aad)
        .ok_or(KeybearerError::Authentication)
}

/// Encrypt exactly as the legacy writer did. Only tests produce legacy data.
#[cfg(test)]
pub(crate) fn encrypt(
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
    aad: &[u8],
    tag_bits: u32,
) -> KeybearerResult<Vec<u8>> {
    let tag_len = (tag_bits / 8) as usize;
    let nonce = nonce_for(iv, plaintext.len())?;
    ccm_dispatch!(seal_with, key, tag_len, &nonce, plaintext, aad)
        .ok_or_else(|| KeybearerError::Crypto("CCM encryption failed".into()))
}

/// Tag sizes this reader can verify.
pub fn supports_tag_bits(tag_bits: u32) -> bool {
    (32..=128).contains(&tag_bits) && tag_bits % 16 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_field_size() {
        assert_eq!(length_field_size(0, 16), 2);
        assert_eq!(length_field_size(0xFFFF, 16), 2);
        assert_eq!(length_field_size(0x1_0000, 16), 3);
        assert_eq!(length_field_size(0x100_0000, 16), 4);
        // Short IVs force a longer length field.
        assert_eq!(length_field_size(10, 10), 5);
    }

    #[test]
    fn test_nonce_truncation() {
        let iv = [0x11u8; 16];
        assert_eq!(nonce_for(&iv, 100).unwrap().len(), 13);
        assert_eq!(nonce_for(&iv, 70_000).unwrap().len(), 12);
        assert!(nonce_for(&iv[..6], 1).is_err());
    }

    // Reference output from an independent AES-CCM implementation, fed the
    // first 13 bytes of the stored IV.
    #[test]
    fn test_known_answer_vectors() {
        let iv: Vec<u8> = (0x10..0x20).collect();

        let key: Vec<u8> = (0..16).collect();
        let expected = hex::decode("10841720db25cea4da2024fe4e63953ad6d658da5ef6").unwrap();
        assert_eq!(encrypt(&key, &iv, b"legacy payload", b"header", 64).unwrap(), expected);
        assert_eq!(
            decrypt(&key, &iv, &expected, b"header", 64).unwrap(),
            b"legacy payload"
        );
        assert!(decrypt(&key, &iv, &expected, b"", 64).is_err());

        let key: Vec<u8> = (0..32).collect();
        let plaintext: Vec<u8> = (0..24).collect();
        let expected = hex::decode(
            "1db34eebd3aa707f6f299d97a23b7e47520da63f38c4e0ffb39fa36e3610990e262697b44b5d4408",
        )
        .unwrap();
        assert_eq!(decrypt(&key, &iv, &expected, b"", 128).unwrap(), plaintext);
    }

    #[test]
    fn test_roundtrip_all_key_sizes() {
        let iv = [0x42u8; 16];
        for key_len in [16usize, 24, 32] {
            let key = vec![0x5Au8; key_len];
            let sealed = encrypt(&key, &iv, b"legacy payload", b"", 64).unwrap();
            assert_eq!(sealed.len(), 14 + 8);
            let opened = decrypt(&key, &iv, &sealed, b"", 64).unwrap();
            assert_eq!(opened, b"legacy payload");
        }
    }

    #[test]
    fn test_roundtrip_tag_sizes() {
        let key = [9u8; 32];
        let iv = [1u8; 16];
        for tag_bits in [32u32, 48, 64, 80, 96, 112, 128] {
            let sealed = encrypt(&key, &iv, b"tags", b"", tag_bits).unwrap();
            assert_eq!(decrypt(&key, &iv, &sealed, b"", tag_bits).unwrap(), b"tags");
        }
    }

    #[test]
    fn test_medium_message_uses_shorter_nonce() {
        let key = [9u8; 16];
        let iv = [2u8; 16];
        let big = vec![0xEEu8; 70_000];
        let sealed = encrypt(&key, &iv, &big, b"", 64).unwrap();
        assert_eq!(decrypt(&key, &iv, &sealed, b"", 64).unwrap(), big);
    }

    #[test]
    fn test_wrong_key_fails() {
        let iv = [3u8; 16];
        let sealed = encrypt(&[1u8; 32], &iv, b"secret", b"", 64).unwrap();
        assert!(matches!(
            decrypt(&[2u8; 32], &iv, &sealed, b"", 64),
            Err(KeybearerError::Authentication)
        ));
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        assert!(decrypt(&[1u8; 32], &[0u8; 16], &[0u8; 4], b"", 64).is_err());
    }

    #[test]
    fn test_unsupported_tag_size() {
        assert!(!supports_tag_bits(24));
        assert!(!supports_tag_bits(72));
        assert!(decrypt(&[1u8; 32], &[0u8; 16], &[0u8; 32], b"", 24).is_err());
    }
}
