//! Read-only support for envelopes written by the previous cipher suite.
//!
//! Legacy envelopes carry no `v` (or `v: 1`), use AES in CCM or OCB2 mode,
//! and encode binary fields as bit arrays. Keys are PBKDF2-SHA256 with an
//! output length of `ks` bits; each wrapped-key entry seals the raw master
//! key. Nothing in this crate writes this format.

pub mod bits;
pub mod ccm;
pub mod ocb2;

use bits::BitArray;

use crate::envelope::{EnvelopeDoc, Metadata};
use crate::error::{KeybearerError, KeybearerResult};
use crate::kdf::DerivedKey;
use crate::keys::{MasterKey, WrappedKey};
use crate::unlock::{recover_master_key, target_combinations, TrimPolicy};

pub const MODE_CCM: &str = "ccm";
pub const MODE_OCB2: &str = "ocb2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyMode {
    Ccm,
    Ocb2,
}

impl LegacyMode {
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            MODE_CCM => Some(LegacyMode::Ccm),
            MODE_OCB2 => Some(LegacyMode::Ocb2),
            _ => None,
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            LegacyMode::Ccm => MODE_CCM,
            LegacyMode::Ocb2 => MODE_OCB2,
        }
    }

    fn supports_tag_bits(self, tag_bits: u32) -> bool {
        match self {
            LegacyMode::Ccm => ccm::supports_tag_bits(tag_bits),
            LegacyMode::Ocb2 => ocb2::supports_tag_bits(tag_bits),
        }
    }

    fn decrypt(
        self,
        key: &[u8],
        iv: &[u8],
        ciphertext: &[u8],
        aad: &[u8],
        tag_bits: u32,
    ) -> KeybearerResult<Vec<u8>> {
        match self {
            LegacyMode::Ccm => ccm::decrypt(key, iv, ciphertext, aad, tag_bits),
            LegacyMode::Ocb2 => ocb2::decrypt(key, iv, ciphertext, aad, tag_bits),
        }
    }
}

/// Whether `doc` must be read through the legacy path.
pub fn is_legacy_format(doc: &EnvelopeDoc) -> bool {
    matches!(doc.v, None | Some(1)) || LegacyMode::from_id(&doc.mode).is_some()
}

/// A parsed legacy envelope, fields already converted from bit arrays.
#[derive(Debug, Clone)]
pub struct LegacyEnvelope {
    meta: Metadata,
    mode: LegacyMode,
    salt: Vec<u8>,
    iv: Vec<u8>,
    ct: Vec<u8>,
    adata: Vec<u8>,
    keys: Vec<WrappedKey>,
}

fn decode_field(name: &str, value: &str) -> KeybearerResult<Vec<u8>> {
    BitArray::from_base64(value)
        .map(|bits| bits.to_bytes())
        .map_err(|e| KeybearerError::MalformedEnvelope(format!("legacy field `{name}`: {e}")))
}

impl LegacyEnvelope {
    pub fn from_doc(doc: &EnvelopeDoc) -> KeybearerResult<Self> {
        let mode = LegacyMode::from_id(&doc.mode).ok_or_else(|| {
            KeybearerError::UnsupportedAlgorithm(format!("legacy mode `{}`", doc.mode))
        })?;
        if doc.cipher != "aes" {
            return Err(KeybearerError::UnsupportedAlgorithm(format!(
                "legacy cipher `{}`",
                doc.cipher
            )));
        }
        if !matches!(doc.ks, 128 | 192 | 256) {
            return Err(KeybearerError::UnsupportedAlgorithm(format!(
                "legacy key size {} bits",
                doc.ks
            )));
        }
        if !mode.supports_tag_bits(doc.ts) {
            return Err(KeybearerError::UnsupportedAlgorithm(format!(
                "{} tag of {} bits",
                mode.id(),
                doc.ts
            )));
        }
        let meta = Metadata::from_doc(doc)?;

        let keys = doc
            .keys
            .iter()
            .enumerate()
            .map(|(i, k)| {
                Ok(WrappedKey {
                    nonce: decode_field(&format!("keys[{i}].iv"), &k.iv)?,
                    ciphertext: decode_field(&format!("keys[{i}].key"), &k.key)?,
                })
            })
            .collect::<KeybearerResult<Vec<_>>>()?;

        let adata = if doc.adata.is_empty() {
            Vec::new()
        } else {
            decode_field("adata", &doc.adata)?
        };

        Ok(Self {
            meta,
            mode,
            salt: decode_field("salt", &doc.salt)?,
            iv: decode_field("iv", &doc.iv)?,
            ct: decode_field("ct", &doc.ct)?,
            adata,
            keys,
        })
    }

    pub fn meta(&self) -> &Metadata {
        &self.meta
    }

    pub fn mode(&self) -> LegacyMode {
        self.mode
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    fn key_len(&self) -> usize {
        (self.meta.key_bits / 8) as usize
    }

    /// One trial: any failure, whatever its kind, means "not this entry".
    fn try_entry(&self, derived: &DerivedKey, entry: &WrappedKey) -> Option<MasterKey> {
        let raw = self
            .mode
            .decrypt(derived.as_bytes(), &entry.nonce, &entry.ciphertext, b"", self.meta.tag_bits)
            .ok()?;
        (raw.len() == self.key_len()).then(|| MasterKey::from_bytes(raw))
    }

    pub fn open<S: AsRef<str>>(&self, provided: &[S], policy: TrimPolicy) -> KeybearerResult<Vec<u8>> {
        let targets = target_combinations(provided, self.meta.m, policy)?;
        let master = recover_master_key(
            &targets,
            &self.salt,
            self.meta.iterations,
            self.key_len(),
            &self.keys,
            |derived, entry| self.try_entry(derived, entry),
        )?;

        let plaintext = self
            .mode
            .decrypt(master.as_bytes(), &self.iv, &self.ct, &self.adata, self.meta.tag_bits)
            .map_err(|_| {
                tracing::warn!(mode = self.mode.id(), "legacy payload failed authentication");
                KeybearerError::EnvelopeCorruption
            })?;

        tracing::info!(
            n = self.meta.n,
            m = self.meta.m,
            legacy = true,
            mode = self.mode.id(),
            "envelope opened"
        );
        Ok(plaintext)
    }
}

/// Produce a legacy document the way the old writer did. Tests only.
#[cfg(test)]
pub(crate) fn write_fixture(
    plaintext: &[u8],
    passwords: &[&str],
    m: usize,
    mode: LegacyMode,
    ks: u32,
    ts: u32,
) -> EnvelopeDoc {
    write_fixture_with_adata(plaintext, passwords, m, mode, ks, ts, b"")
}

/// As [`write_fixture`], authenticating `adata` alongside the payload.
#[cfg(test)]
pub(crate) fn write_fixture_with_adata(
    plaintext: &[u8],
    passwords: &[&str],
    m: usize,
    mode: LegacyMode,
    ks: u32,
    ts: u32,
    adata: &[u8],
) -> EnvelopeDoc {
    use crate::combination::combinations;
    use crate::envelope::KeyEntryDoc;
    use crate::kdf::derive_keys;
    use crate::password::{parse_all, sorted_unique};
    use crate::random;

    let encrypt = |key: &[u8], iv: &[u8], msg: &[u8], aad: &[u8]| match mode {
        LegacyMode::Ccm => ccm::encrypt(key, iv, msg, aad, ts).unwrap(),
        LegacyMode::Ocb2 => ocb2::encrypt(key, iv, msg, aad, ts).unwrap(),
    };
    let b64 = |bytes: &[u8]| BitArray::from_bytes(bytes).to_base64();
    let iter = 10;
    let key_len = (ks / 8) as usize;

    let pw = sorted_unique(parse_all(passwords).unwrap()).unwrap();
    let salt: Vec<u8> = {
        let mut s = vec![0u8; 8];
        random::fill(&mut s);
        s
    };
    let mut master = vec![0u8; key_len];
    random::fill(&mut master);

    let combos = combinations(&pw, m).unwrap();
    let derived = derive_keys(&combos, &salt, iter, key_len, None).unwrap();
    let keys = derived
        .iter()
        .map(|dk| {
            let mut iv = [0u8; 16];
            random::fill(&mut iv);
            KeyEntryDoc {
                iv: b64(&iv),
                key: b64(&encrypt(dk.as_bytes(), &iv, &master, b"")),
            }
        })
        .collect();

    let mut iv = [0u8; 16];
    random::fill(&mut iv);
    EnvelopeDoc {
        v: None,
        mode: mode.id().into(),
        cipher: "aes".into(),
        ts,
        ks,
        iter,
        adata: if adata.is_empty() { String::new() } else { b64(adata) },
        salt: b64(&salt),
        iv: b64(&iv),
        ct: b64(&encrypt(&master, &iv, plaintext, adata)),
        nkeys: pw.len(),
        nunlock: m,
        filename: "old.txt".into(),
        ft: "text/plain".into(),
        keys,
    }
}
