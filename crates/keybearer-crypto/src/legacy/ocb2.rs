//! AES-OCB2 decryption, for envelopes written before CCM became the default.
//!
//! Layout: `[ciphertext][tag]`, tag length `ts` bits (64 unless stated).
//! Offsets are successive doublings in GF(2^128) of `E(iv)`; the final
//! (possibly partial, possibly empty) block is encrypted by XOR with a pad.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use subtle::ConstantTimeEq;

use super::bits::BitArray;
use crate::error::{KeybearerError, KeybearerResult};

type Block = [u8; 16];

/// AES keyed by the legacy key size.
enum Prp {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl Prp {
    fn new(key: &[u8]) -> Option<Self> {
        match key.len() {
            16 => Aes128::new_from_slice(key).ok().map(Prp::Aes128),
            24 => Aes192::new_from_slice(key).ok().map(Prp::Aes192),
            32 => Aes256::new_from_slice(key).ok().map(Prp::Aes256),
            _ => None,
        }
    }

    fn encrypt(&self, block: &Block) -> Block {
        let mut b = GenericArray::clone_from_slice(block);
        match self {
            Prp::Aes128(c) => c.encrypt_block(&mut b),
            Prp::Aes192(c) => c.encrypt_block(&mut b),
            Prp::Aes256(c) => c.encrypt_block(&mut b),
        }
        let mut out = [0u8; 16];
        out.copy_from_slice(&b);
        out
    }

    fn decrypt(&self, block: &Block) -> Block {
        let mut b = GenericArray::clone_from_slice(block);
        match self {
            Prp::Aes128(c) => c.decrypt_block(&mut b),
            Prp::Aes192(c) => c.decrypt_block(&mut b),
            Prp::Aes256(c) => c.decrypt_block(&mut b),
        }
        let mut out = [0u8; 16];
        out.copy_from_slice(&b);
        out
    }
}

fn xor(a: &Block, b: &Block) -> Block {
    let mut out = [0u8; 16];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b)) {
        *o = x ^ y;
    }
    out
}

/// Multiply by x in GF(2^128), big-endian, reduction polynomial 0x87.
fn times2(x: &Block) -> Block {
    let mut out = [0u8; 16];
    for i in 0..15 {
        out[i] = (x[i] << 1) | (x[i + 1] >> 7);
    }
    out[15] = x[15] << 1;
    if x[0] & 0x80 != 0 {
        out[15] ^= 0x87;
    }
    out
}

fn times3(x: &Block) -> Block {
    xor(x, &times2(x))
}

/// Zero block carrying a bit length in its last word.
fn length_block(bits: usize) -> Block {
    let mut out = [0u8; 16];
    out[12..].copy_from_slice(&(bits as u32).to_be_bytes());
    out
}

/// Right-pad `bytes` (at most 16) with zeros.
fn zero_pad(bytes: &[u8]) -> Block {
    let mut out = [0u8; 16];
    out[..bytes.len()].copy_from_slice(bytes);
    out
}

/// PMAC over associated data.
fn pmac(prp: &Prp, aad: &[u8]) -> Block {
    let mut checksum = [0u8; 16];
    let mut delta = prp.encrypt(&[0u8; 16]);
    delta = xor(&delta, &times2(&times2(&delta)));

    let mut offset = 0;
    while offset + 16 < aad.len() {
        delta = times2(&delta);
        let block: Block = zero_pad(&aad[offset..offset + 16]);
        checksum = xor(&checksum, &prp.encrypt(&xor(&delta, &block)));
        offset += 16;
    }

    let rest = &aad[offset..];
    let carry = if rest.len() < 16 {
        delta = times3(&delta);
        let mut padded = zero_pad(rest);
        padded[rest.len()] = 0x80;
        padded
    } else {
        zero_pad(rest)
    };
    checksum = xor(&checksum, &carry);
    prp.encrypt(&xor(&times2(&times3(&delta)), &checksum))
}

/// Full-length tag and the plaintext, before any comparison.
fn process(prp: &Prp, iv: &Block, body: &[u8], decrypting: bool) -> (Vec<u8>, Block) {
    let mut delta = times2(&prp.encrypt(iv));
    let mut checksum = [0u8; 16];
    let mut out = Vec::with_capacity(body.len());

    let mut offset = 0;
    while offset + 16 < body.len() {
        let block: Block = zero_pad(&body[offset..offset + 16]);
        let processed = if decrypting {
            xor(&delta, &prp.decrypt(&xor(&delta, &block)))
        } else {
            xor(&delta, &prp.encrypt(&xor(&delta, &block)))
        };
        let plain = if decrypting { processed } else { block };
        checksum = xor(&checksum, &plain);
        out.extend_from_slice(&processed);
        delta = times2(&delta);
        offset += 16;
    }

    let rest = &body[offset..];
    let pad = prp.encrypt(&xor(&delta, &length_block(rest.len() * 8)));
    // Final block: XOR with the pad either way; the checksum takes the
    // full 128 bits (message bytes followed by the pad's tail).
    let last = xor(&zero_pad(rest), &pad);
    let checksum_input = if decrypting {
        last
    } else {
        xor(&zero_pad(&last[..rest.len()]), &pad)
    };
    checksum = xor(&checksum, &checksum_input);
    out.extend_from_slice(&last[..rest.len()]);

    let tag = prp.encrypt(&xor(&checksum, &times3(&delta)));
    (out, tag)
}

fn check_iv(iv: &[u8]) -> KeybearerResult<Block> {
    let bits = BitArray::from_bytes(iv);
    if bits.bit_len() != 128 {
        return Err(KeybearerError::MalformedEnvelope(format!(
            "OCB2 IV must be 128 bits, got {}",
            bits.bit_len()
        )));
    }
    let mut block = [0u8; 16];
    block.copy_from_slice(iv);
    Ok(block)
}

/// Decrypt `ciphertext || tag`. Nothing is returned unless the tag verifies.
pub fn decrypt(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
    tag_bits: u32,
) -> KeybearerResult<Vec<u8>> {
    let iv = check_iv(iv)?;
    let prp = Prp::new(key).ok_or(KeybearerError::Authentication)?;
    let tag_len = (tag_bits / 8) as usize;
    if tag_len == 0 || tag_len > 16 || ciphertext.len() < tag_len {
        return Err(KeybearerError::Authentication);
    }

    let (body, tag) = ciphertext.split_at(ciphertext.len() - tag_len);
    let (plaintext, mut full_tag) = process(&prp, &iv, body, true);
    if !aad.is_empty() {
        full_tag = xor(&full_tag, &pmac(&prp, aad));
    }

    if !bool::from(full_tag[..tag_len].ct_eq(tag)) {
        return Err(KeybearerError::Authentication);
    }
    Ok(plaintext)
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
    let iv = check_iv(iv)?;
    let prp = Prp::new(key).ok_or_else(|| KeybearerError::Crypto("bad OCB2 key".into()))?;
    let (mut out, mut full_tag) = process(&prp, &iv, plaintext, false);
    if !aad.is_empty() {
        full_tag = xor(&full_tag, &pmac(&prp, aad));
    }
    out.extend_from_slice(&full_tag[..(tag_bits / 8) as usize]);
    Ok(out)
}

/// Tag sizes this reader can verify.
pub fn supports_tag_bits(tag_bits: u32) -> bool {
    tag_bits > 0 && tag_bits <= 128 && tag_bits % 8 == 0
}
