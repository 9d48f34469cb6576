//! keybearer-crypto: M-of-N passcode file encryption
//!
//! A file is sealed once under a random master key. The master key is then
//! sealed again under a key derived from every M-sized combination of the N
//! passcodes, so any M of them open the file.
//!
//! ```text
//! Passcodes (N, normalized, sorted)
//!   └── Combination "p1 p2 .. pM"  (one per M-subset, C(N, M) total)
//!       └── PBKDF2-HMAC-SHA256(combination, salt, iter) → 256-bit key
//!           └── AES-256-GCM(master key)  → keys[i]   (shuffled)
//! Master Key (256-bit random)
//!   └── AES-256-GCM(file bytes)          → ct
//! ```
//!
//! Envelopes written by the older AES-CCM / AES-OCB2 suite can be opened
//! (see [`legacy`]) but are never produced.

pub mod aead;
pub mod combination;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod legacy;
pub mod password;
pub mod random;
pub mod session;
pub mod unlock;

pub use combination::{binomial, check_threshold, combinations, Combination};
pub use envelope::{build_envelope, BuildOptions, CurrentEnvelope, Envelope, EnvelopeDoc, Metadata};
pub use error::{KeybearerError, KeybearerResult};
pub use kdf::{derive_key, derive_keys, DerivedKey, ProgressFn};
pub use keys::{first_unwrap, generate_master_key, unwrap_key, wrap_key, MasterKey, WrappedKey};
pub use legacy::{is_legacy_format, LegacyEnvelope, LegacyMode};
pub use password::{normalize, Password};
pub use session::Session;
pub use unlock::TrimPolicy;

/// Size of a master key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of an AES-GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the per-envelope PBKDF2 salt
pub const SALT_SIZE: usize = 16;

/// Envelope format version written by this crate
pub const FORMAT_VERSION: u32 = envelope::CURRENT_VERSION;

/// PBKDF2 iteration count used unless configured otherwise
pub const DEFAULT_ITERATIONS: u32 = 100_000;
