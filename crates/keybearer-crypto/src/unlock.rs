//! Turning the passcodes a user typed into a recovered master key.
//!
//! Shared by the current and legacy readers: both pick target combinations
//! the same way and both run the same trial loop, differing only in how a
//! single wrapped-key entry is opened.

use std::str::FromStr;

use crate::combination::{combinations, Combination};
use crate::error::{KeybearerError, KeybearerResult};
use crate::kdf::{derive_key, DerivedKey};
use crate::keys::{first_unwrap, MasterKey, WrappedKey};
use crate::password::{parse_all, sorted_dedup};
use crate::random;

/// What to do when more than M passcodes are supplied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrimPolicy {
    /// Keep a uniformly random M-subset and try only that. If a wrong
    /// passcode is among the extras, this can fail even though a working
    /// subset was supplied.
    #[default]
    Random,
    /// Try every M-subset of the supplied passcodes until one unlocks.
    /// Costs one key derivation per subset.
    Exhaustive,
}

impl FromStr for TrimPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(TrimPolicy::Random),
            "exhaustive" => Ok(TrimPolicy::Exhaustive),
            other => Err(format!("unknown trim policy: {other} (expected random or exhaustive)")),
        }
    }
}

impl std::fmt::Display for TrimPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrimPolicy::Random => f.write_str("random"),
            TrimPolicy::Exhaustive => f.write_str("exhaustive"),
        }
    }
}

/// The combination string(s) to derive keys for, in the order to try them.
///
/// Passcodes are normalized and de-duplicated first; fewer than `m`
/// distinct passcodes is reported before any derivation happens.
pub(crate) fn target_combinations<S: AsRef<str>>(
    provided: &[S],
    m: usize,
    policy: TrimPolicy,
) -> KeybearerResult<Vec<Combination>> {
    let mut chosen = sorted_dedup(parse_all(provided)?);
    if chosen.len() < m {
        return Err(KeybearerError::InsufficientPasswords {
            required: m,
            provided: chosen.len(),
        });
    }

    match policy {
        TrimPolicy::Random => {
            if chosen.len() > m {
                tracing::debug!(supplied = chosen.len(), m, "trimming extra passcodes at random");
                random::shuffle(&mut chosen);
                chosen.truncate(m);
            }
            // Exactly m passcodes: a single combination, sorted inside.
            combinations(&chosen, m)
        }
        TrimPolicy::Exhaustive => combinations(&chosen, m),
    }
}

/// Derive a key per target and run the trial loop until a master key opens.
pub(crate) fn recover_master_key<F>(
    targets: &[Combination],
    salt: &[u8],
    iterations: u32,
    key_len: usize,
    entries: &[WrappedKey],
    try_entry: F,
) -> KeybearerResult<MasterKey>
where
    F: Fn(&DerivedKey, &WrappedKey) -> Option<MasterKey>,
{
    for (attempt, target) in targets.iter().enumerate() {
        let derived = derive_key(target, salt, iterations, key_len)?;
        if let Some(master) = first_unwrap(entries, |entry| try_entry(&derived, entry)) {
            tracing::debug!(attempt, "master key recovered");
            return Ok(master);
        }
    }
    Err(KeybearerError::DecryptionExhausted)
}
