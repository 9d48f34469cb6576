//! Master key generation and per-combination key wrapping

use zeroize::Zeroize;

use crate::error::KeybearerResult;
use crate::kdf::DerivedKey;
use crate::{aead, random, KEY_SIZE, NONCE_SIZE};

/// The random key that seals the payload. Zeroized on drop.
///
/// Generated once per envelope, independent of every passcode; it leaves
/// memory only wrapped under a combination key.
#[derive(Clone)]
pub struct MasterKey {
    bytes: Vec<u8>,
}

impl MasterKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit master key.
pub fn generate_master_key() -> MasterKey {
    let mut bytes = random::key_bytes();
    let key = MasterKey::from_bytes(bytes.to_vec());
    bytes.zeroize();
    key
}

/// The master key sealed under one combination key.
#[derive(Clone, PartialEq, Eq)]
pub struct WrappedKey {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl std::fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedKey")
            .field("nonce_len", &self.nonce.len())
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// Wrap (encrypt) the master key under a derived key with a fresh nonce.
pub fn wrap_key(derived: &DerivedKey, master: &MasterKey) -> KeybearerResult<WrappedKey> {
    let nonce: [u8; NONCE_SIZE] = random::nonce();
    let ciphertext = aead::seal(derived.as_bytes(), &nonce, master.as_bytes(), b"")?;
    Ok(WrappedKey {
        nonce: nonce.to_vec(),
        ciphertext,
    })
}

/// Try to unwrap one entry. `None` means "not this key", which is the
/// expected outcome for all but one entry.
pub fn unwrap_key(derived: &DerivedKey, wrapped: &WrappedKey) -> Option<MasterKey> {
    let mut plaintext = aead::open(derived.as_bytes(), &wrapped.nonce, &wrapped.ciphertext, b"").ok()?;
    if plaintext.len() != KEY_SIZE {
        plaintext.zeroize();
        return None;
    }
    Some(MasterKey::from_bytes(plaintext))
}

/// Try every entry in turn and return the first master key that opens.
///
/// Trial decryption is the normal control flow here: with a correct
/// combination exactly one entry authenticates, and the rest fail.
pub fn first_unwrap<F>(entries: &[WrappedKey], mut try_entry: F) -> Option<MasterKey>
where
    F: FnMut(&WrappedKey) -> Option<MasterKey>,
{
    let found = entries.iter().enumerate().find_map(|(i, entry)| {
        try_entry(entry).map(|key| (i, key))
    });
    match found {
        Some((index, key)) => {
            tracing::debug!(index, total = entries.len(), "wrapped key opened");
            Some(key)
        }
        None => {
            tracing::debug!(total = entries.len(), "no wrapped key opened");
            None
        }
    }
}
