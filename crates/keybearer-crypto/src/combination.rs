//! Combinatorial engine: every M-subset of the passcode set, canonically joined.
//!
//! The combination string for a subset depends only on the subset, never on
//! the order the passcodes were typed in: inputs are sorted first and subsets
//! are emitted in strictly increasing index order.

use secrecy::{ExposeSecret, SecretString};

use crate::error::{KeybearerError, KeybearerResult};
use crate::password::Password;

/// One M-subset of the passcodes, sorted and space-joined. Key-derivation input.
pub struct Combination(SecretString);

impl Combination {
    fn join(members: &[&Password]) -> Self {
        let joined = members
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Self(SecretString::from(joined))
    }

    pub fn as_str(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for Combination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Combination([REDACTED])")
    }
}

/// `C(n, k)`, or `None` on overflow.
pub fn binomial(n: usize, k: usize) -> Option<usize> {
    if k > n {
        return Some(0);
    }
    let k = k.min(n - k);
    let mut acc: usize = 1;
    for i in 0..k {
        // acc * (n - i) / (i + 1) stays integral at every step.
        acc = acc.checked_mul(n - i)? / (i + 1);
    }
    Some(acc)
}

/// Check `1 <= m <= n` and that `C(n, m)` is representable.
pub fn check_threshold(n: usize, m: usize) -> KeybearerResult<usize> {
    if m < 1 || m > n {
        return Err(KeybearerError::InvalidThreshold { n, m });
    }
    binomial(n, m).ok_or(KeybearerError::CombinationOverflow { n, m })
}

/// Enumerate all `C(len(passwords), m)` combinations.
///
/// `passwords` must already be normalized; they are sorted here so callers
/// may pass them in any order.
pub fn combinations(passwords: &[Password], m: usize) -> KeybearerResult<Vec<Combination>> {
    let count = check_threshold(passwords.len(), m)?;

    let mut sorted: Vec<&Password> = passwords.iter().collect();
    sorted.sort();

    let mut out = Vec::with_capacity(count);
    let mut chosen = Vec::with_capacity(m);
    choose(&sorted, m, 0, &mut chosen, &mut out);
    debug_assert_eq!(out.len(), count);
    Ok(out)
}

fn choose<'a>(
    sorted: &[&'a Password],
    m: usize,
    start: usize,
    chosen: &mut Vec<&'a Password>,
    out: &mut Vec<Combination>,
) {
    if chosen.len() == m {
        out.push(Combination::join(chosen));
        return;
    }
    let remaining = m - chosen.len();
    // Stop early once too few elements are left to complete the subset.
    for i in start..=sorted.len() - remaining {
        chosen.push(sorted[i]);
        choose(sorted, m, i + 1, chosen, out);
        chosen.pop();
    }
}
