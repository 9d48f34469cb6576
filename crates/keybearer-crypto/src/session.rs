//! Stateful boundary used by collaborators (CLI, worker).
//!
//! A `Session` holds whatever the caller has loaded so far: a plaintext
//! waiting to be encrypted, an envelope waiting to be opened, the iteration
//! count and the trim policy. Each caller owns its own session; there is no
//! process-wide instance.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use zeroize::Zeroizing;

use crate::envelope::{build_envelope, BuildOptions, Envelope};
use crate::error::{KeybearerError, KeybearerResult};
use crate::kdf::ProgressFn;
use crate::unlock::TrimPolicy;
use crate::{random, DEFAULT_ITERATIONS, SALT_SIZE};

struct Plaintext {
    data: Zeroizing<Vec<u8>>,
    filename: String,
    mime: String,
}

pub struct Session {
    iterations: u32,
    trim: TrimPolicy,
    salt: Option<[u8; SALT_SIZE]>,
    plaintext: Option<Plaintext>,
    envelope: Option<Envelope>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("iterations", &self.iterations)
            .field("trim", &self.trim)
            .field("salt_pending", &self.salt.is_some())
            .field("plaintext_len", &self.plaintext.as_ref().map(|p| p.data.len()))
            .field("envelope_loaded", &self.envelope.is_some())
            .finish()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            trim: TrimPolicy::default(),
            salt: None,
            plaintext: None,
            envelope: None,
        }
    }

    /// Draw a fresh salt for the next encryption and return it base64-encoded.
    pub fn make_salt(&mut self) -> String {
        let salt = random::salt();
        self.salt = Some(salt);
        STANDARD.encode(salt)
    }

    pub fn set_plaintext(&mut self, data: Vec<u8>, filename: impl Into<String>, mime: impl Into<String>) {
        self.plaintext = Some(Plaintext {
            data: Zeroizing::new(data),
            filename: filename.into(),
            mime: mime.into(),
        });
    }

    pub fn set_iterations(&mut self, iterations: u32) -> KeybearerResult<()> {
        if iterations == 0 {
            return Err(KeybearerError::InvalidIterations);
        }
        self.iterations = iterations;
        Ok(())
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn set_trim_policy(&mut self, policy: TrimPolicy) {
        self.trim = policy;
    }

    pub fn trim_policy(&self) -> TrimPolicy {
        self.trim
    }

    /// Encrypt the loaded plaintext; returns the envelope JSON.
    pub fn encrypt_with_passwords<S: AsRef<str>>(&mut self, passwords: &[S], m: usize) -> KeybearerResult<String> {
        self.encrypt_inner(passwords, m, None)
    }

    /// As [`Session::encrypt_with_passwords`], reporting derivation progress.
    pub fn encrypt_with_progress<S: AsRef<str>>(
        &mut self,
        passwords: &[S],
        m: usize,
        progress: &ProgressFn<'_>,
    ) -> KeybearerResult<String> {
        self.encrypt_inner(passwords, m, Some(progress))
    }

    fn encrypt_inner<S: AsRef<str>>(
        &mut self,
        passwords: &[S],
        m: usize,
        progress: Option<&ProgressFn<'_>>,
    ) -> KeybearerResult<String> {
        let plaintext = self.plaintext.as_ref().ok_or(KeybearerError::NoPlaintext)?;
        let options = BuildOptions {
            iterations: self.iterations,
            filename: plaintext.filename.clone(),
            mime: plaintext.mime.clone(),
            salt: self.salt,
        };
        let json = build_envelope(&plaintext.data, passwords, m, &options, progress)?.to_json()?;
        // A salt from make_salt serves one envelope only.
        self.salt = None;
        Ok(json)
    }

    /// Parse and keep an envelope for [`Session::open`]; returns `(n, m)`.
    pub fn set_cipher_envelope(&mut self, json: &str) -> KeybearerResult<(usize, usize)> {
        let envelope = Envelope::parse(json)?;
        let nm = (envelope.n(), envelope.m());
        tracing::debug!(n = nm.0, m = nm.1, legacy = envelope.is_legacy(), "envelope loaded");
        self.envelope = Some(envelope);
        Ok(nm)
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    /// Open the loaded envelope with the supplied passcodes.
    pub fn open<S: AsRef<str>>(&self, provided: &[S]) -> KeybearerResult<Vec<u8>> {
        self.envelope
            .as_ref()
            .ok_or(KeybearerError::NoEnvelope)?
            .open(provided, self.trim)
    }
}
