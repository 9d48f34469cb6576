//! Bit arrays: the legacy writer's representation of binary fields.
//!
//! Data is held as big-endian 32-bit words plus an exact bit length; the last
//! word may be partial, with unused low bits zero. Fields travel as standard
//! base64 of the packed bytes, padding optional.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

use crate::error::KeybearerResult;

/// Lenient decoder: padding optional, stray trailing bits tolerated.
const LEGACY_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitArray {
    words: Vec<u32>,
    bits: usize,
}

impl BitArray {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let words = bytes
            .chunks(4)
            .map(|chunk| {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                u32::from_be_bytes(word)
            })
            .collect();
        Self {
            words,
            bits: bytes.len() * 8,
        }
    }

    /// Packed bytes; a trailing partial byte keeps its high bits.
    pub fn to_bytes(&self) -> Vec<u8> {
        let len = self.bits.div_ceil(8);
        let mut out: Vec<u8> = self.words.iter().flat_map(|w| w.to_be_bytes()).collect();
        out.truncate(len);
        out
    }

    /// Decode a base64 field, ignoring embedded whitespace.
    pub fn from_base64(encoded: &str) -> KeybearerResult<Self> {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = LEGACY_B64.decode(compact.trim_end_matches('='))?;
        Ok(Self::from_bytes(&bytes))
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.to_bytes())
    }

    pub fn bit_len(&self) -> usize {
        self.bits
    }

    /// Keep only the first `bits` bits.
    pub fn clamp(&self, bits: usize) -> Self {
        if bits >= self.bits {
            return self.clone();
        }
        let mut words: Vec<u32> = self.words[..bits.div_ceil(32)].to_vec();
        let rem = bits % 32;
        if rem != 0 {
            if let Some(last) = words.last_mut() {
                *last &= u32::MAX << (32 - rem);
            }
        }
        Self { words, bits }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_roundtrip_unaligned() {
        for len in [0usize, 1, 3, 4, 5, 16, 17] {
            let bytes: Vec<u8> = (0..len as u8).collect();
            let bits = BitArray::from_bytes(&bytes);
            assert_eq!(bits.bit_len(), len * 8);
            assert_eq!(bits.to_bytes(), bytes);
        }
    }

    #[test]
    fn test_words_are_big_endian() {
        let bits = BitArray::from_bytes(&[0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(bits.words, vec![0x0102_0304, 0x0500_0000]);
    }

    #[test]
    fn test_base64_without_padding() {
        let bits = BitArray::from_base64("SGVsbG8").unwrap();
        assert_eq!(bits.to_bytes(), b"Hello");
    }

    #[test]
    fn test_base64_with_padding_and_whitespace() {
        let bits = BitArray::from_base64("SGVs\nbG8=").unwrap();
        assert_eq!(bits.to_bytes(), b"Hello");
        assert_eq!(bits.to_base64(), "SGVsbG8=");
    }

    #[test]
    fn test_invalid_base64_rejected() {
        assert!(BitArray::from_base64("not*base64").is_err());
    }

    #[test]
    fn test_clamp_to_nonce() {
        let iv = BitArray::from_bytes(&[0xAB; 16]);
        let nonce = iv.clamp(8 * 13);
        assert_eq!(nonce.bit_len(), 104);
        assert_eq!(nonce.to_bytes(), vec![0xAB; 13]);
    }

    #[test]
    fn test_clamp_masks_partial_word() {
        let bits = BitArray::from_bytes(&[0xFF; 4]).clamp(12);
        assert_eq!(bits.words, vec![0xFFF0_0000]);
        assert_eq!(bits.to_bytes(), vec![0xFF, 0xF0]);
    }
}
