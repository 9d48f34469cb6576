//! Key derivation: PBKDF2-HMAC-SHA256 combination → wrapping key

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::combination::Combination;
use crate::error::{KeybearerError, KeybearerResult};

/// Callback receiving the completed fraction (0.0..=1.0) after each derivation.
pub type ProgressFn<'a> = dyn Fn(f64) + Send + Sync + 'a;

/// Key material derived from one combination. Never persisted.
///
/// Zeroized on drop. Length follows the envelope's declared key size, so the
/// legacy reader can derive 128- and 192-bit keys with the same type.
pub struct DerivedKey {
    bytes: Vec<u8>,
}

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive a `key_len`-byte key from one combination.
pub fn derive_key(
    combination: &Combination,
    salt: &[u8],
    iterations: u32,
    key_len: usize,
) -> KeybearerResult<DerivedKey> {
    if iterations == 0 {
        return Err(KeybearerError::InvalidIterations);
    }
    let mut bytes = vec![0u8; key_len];
    pbkdf2_hmac::<Sha256>(combination.as_str().as_bytes(), salt, iterations, &mut bytes);
    Ok(DerivedKey { bytes })
}

/// Derive one key per combination, in order.
///
/// `progress`, when given, is called after every derivation with the
/// fraction completed so far; the final call reports exactly `1.0`.
pub fn derive_keys(
    combinations: &[Combination],
    salt: &[u8],
    iterations: u32,
    key_len: usize,
    progress: Option<&ProgressFn<'_>>,
) -> KeybearerResult<Vec<DerivedKey>> {
    let total = combinations.len();
    let mut keys = Vec::with_capacity(total);
    for (i, combination) in combinations.iter().enumerate() {
        keys.push(derive_key(combination, salt, iterations, key_len)?);
        if let Some(report) = progress {
            report((i + 1) as f64 / total as f64);
        }
    }
    tracing::debug!(count = total, iterations, "derived combination keys");
    Ok(keys)
}
