//! Passcode normalization.
//!
//! A passcode is compared and fed to key derivation only in its normalized
//! form: outer whitespace trimmed, interior whitespace runs collapsed to one
//! ASCII space. `" foo  bar "` and `"foo\tbar"` are the same passcode.

use secrecy::{ExposeSecret, SecretString};
use std::cmp::Ordering;

use crate::error::{KeybearerError, KeybearerResult};

/// Collapse whitespace the way every passcode is compared. Idempotent.
pub fn normalize(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A normalized, non-blank passcode. Redacted in `Debug`, zeroized on drop.
pub struct Password(SecretString);

impl Password {
    /// Normalize `raw` and reject it if nothing but whitespace remains.
    pub fn new(raw: &str) -> KeybearerResult<Self> {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return Err(KeybearerError::BlankPassword);
        }
        Ok(Self(SecretString::from(normalized)))
    }

    pub fn as_str(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for Password {
    fn clone(&self) -> Self {
        Self(SecretString::from(self.as_str().to_string()))
    }
}

impl PartialEq for Password {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Password {}

impl PartialOrd for Password {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Password {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

/// Normalize a batch of passcodes, failing on the first blank one.
pub fn parse_all<S: AsRef<str>>(raw: &[S]) -> KeybearerResult<Vec<Password>> {
    raw.iter().map(|p| Password::new(p.as_ref())).collect()
}

/// Sort and reject duplicates (after normalization).
///
/// Used for the password set chosen at encryption time, where a repeated
/// passcode would make two "different" combinations identical.
pub fn sorted_unique(mut passwords: Vec<Password>) -> KeybearerResult<Vec<Password>> {
    passwords.sort();
    if passwords.windows(2).any(|w| w[0] == w[1]) {
        return Err(KeybearerError::DuplicatePassword);
    }
    Ok(passwords)
}

/// Sort and silently drop repeats.
///
/// Used at decryption time: typing the same passcode twice should not count
/// towards the threshold, nor should it be an error.
pub fn sorted_dedup(mut passwords: Vec<Password>) -> Vec<Password> {
    passwords.sort();
    passwords.dedup();
    passwords
}
