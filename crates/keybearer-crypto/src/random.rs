//! Random source: salts, nonces, master keys and unbiased indices.
//!
//! Everything draws from `rand::thread_rng()`, a per-thread CSPRNG reseeded
//! from the OS. There is no global seed to manage.

use rand::{Rng, RngCore};

use crate::{KEY_SIZE, NONCE_SIZE, SALT_SIZE};

/// Fill `buf` with cryptographically secure random bytes.
pub fn fill(buf: &mut [u8]) {
    rand::thread_rng().fill_bytes(buf);
}

/// A fresh 16-byte KDF salt.
pub fn salt() -> [u8; SALT_SIZE] {
    let mut out = [0u8; SALT_SIZE];
    fill(&mut out);
    out
}

/// A fresh 96-bit AEAD nonce.
pub fn nonce() -> [u8; NONCE_SIZE] {
    let mut out = [0u8; NONCE_SIZE];
    fill(&mut out);
    out
}

/// Raw material for a 256-bit master key.
pub(crate) fn key_bytes() -> [u8; KEY_SIZE] {
    let mut out = [0u8; KEY_SIZE];
    fill(&mut out);
    out
}

/// Uniform index in `0..bound`.
///
/// Draws 64-bit words and rejects the tail of the range that would make
/// `word % bound` favour small values.
///
/// # Panics
///
/// Panics if `bound` is zero.
pub fn index(bound: usize) -> usize {
    assert!(bound > 0, "random index bound must be positive");
    let bound = bound as u64;
    // Largest multiple of `bound` representable; draws at or above it are biased.
    let zone = u64::MAX - (u64::MAX % bound);
    let mut rng = rand::thread_rng();
    loop {
        let word: u64 = rng.gen();
        if word < zone {
            return (word % bound) as usize;
        }
    }
}

/// Uniform in-place permutation (Fisher–Yates).
pub fn shuffle<T>(items: &mut [T]) {
    for i in (1..items.len()).rev() {
        let j = index(i + 1);
        items.swap(i, j);
    }
}
