//! Named failures for envelope construction and opening.
//!
//! Authentication failures inside trial loops never surface here; they are
//! turned into "try the next entry" by the key-unwrapping combinator.

use thiserror::Error;

pub type KeybearerResult<T> = Result<T, KeybearerError>;

#[derive(Debug, Error)]
pub enum KeybearerError {
    // ── Input errors ──────────────────────────────────────────────────────
    #[error("{required} passcodes are required to unlock this file, but only {provided} were supplied")]
    InsufficientPasswords { required: usize, provided: usize },

    #[error("passcodes must not be blank")]
    BlankPassword,

    #[error("the same passcode was entered more than once")]
    DuplicatePassword,

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u32),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("no plaintext has been loaded")]
    NoPlaintext,

    #[error("no envelope has been loaded")]
    NoEnvelope,

    // ── Decryption outcomes ───────────────────────────────────────────────
    #[error("wrong passcodes: no wrapped key opened with the supplied combination")]
    DecryptionExhausted,

    #[error("envelope is corrupted: master key recovered but the payload failed authentication")]
    EnvelopeCorruption,

    #[error("authentication failed: wrong key or tampered ciphertext")]
    Authentication,

    // ── Configuration errors ──────────────────────────────────────────────
    #[error("invalid threshold: need 1 <= M <= N, got N={n}, M={m}")]
    InvalidThreshold { n: usize, m: usize },

    #[error("iteration count must be at least 1")]
    InvalidIterations,

    #[error("too many combinations: C({n}, {m}) does not fit in memory")]
    CombinationOverflow { n: usize, m: usize },

    #[error("cryptographic failure: {0}")]
    Crypto(String),
}

impl KeybearerError {
    /// True for failures the user can fix by re-entering passcodes.
    pub fn is_wrong_passwords(&self) -> bool {
        matches!(
            self,
            KeybearerError::DecryptionExhausted | KeybearerError::InsufficientPasswords { .. }
        )
    }
}

impl From<serde_json::Error> for KeybearerError {
    fn from(e: serde_json::Error) -> Self {
        KeybearerError::MalformedEnvelope(e.to_string())
    }
}

impl From<base64::DecodeError> for KeybearerError {
    fn from(e: base64::DecodeError) -> Self {
        KeybearerError::MalformedEnvelope(format!("base64: {e}"))
    }
}
