use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "KEYBEARER_CONFIG";

/// Top-level configuration (loaded from keybearer.toml)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeybearerConfig {
    pub crypto: CryptoConfig,
    pub decrypt: DecryptConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2 iteration count written into new envelopes (default: 100000)
    pub iterations: u32,
    /// Upper bound on C(N, M) * iterations accepted without --force
    pub max_derivation_work: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecryptConfig {
    /// What to do with more than M passcodes: "random" or "exhaustive"
    pub trim: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            iterations: 100_000,
            max_derivation_work: 50_000_000,
        }
    }
}

impl Default for DecryptConfig {
    fn default() -> Self {
        Self {
            trim: "random".into(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl KeybearerConfig {
    /// Parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.crypto.iterations == 0 {
            return Err(Error::Config("crypto.iterations must be at least 1".into()));
        }
        if !matches!(self.decrypt.trim.as_str(), "random" | "exhaustive") {
            return Err(Error::Config(format!(
                "decrypt.trim must be \"random\" or \"exhaustive\", got {:?}",
                self.decrypt.trim
            )));
        }
        if !matches!(self.log.format.as_str(), "text" | "json") {
            return Err(Error::Config(format!(
                "log.format must be \"text\" or \"json\", got {:?}",
                self.log.format
            )));
        }
        Ok(())
    }

    /// Render as TOML, for `config show`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

/// `$KEYBEARER_CONFIG`, falling back to `keybearer.toml` in the working directory.
pub fn default_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("keybearer.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[crypto]
iterations = 250000
max_derivation_work = 1000000000

[decrypt]
trim = "exhaustive"

[log]
level = "debug"
format = "json"
"#;
        let config: KeybearerConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.crypto.iterations, 250_000);
        assert_eq!(config.crypto.max_derivation_work, 1_000_000_000);
        assert_eq!(config.decrypt.trim, "exhaustive");
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_defaults() {
        let config: KeybearerConfig = toml::from_str("").unwrap();

        assert_eq!(config.crypto.iterations, 100_000);
        assert_eq!(config.crypto.max_derivation_work, 50_000_000);
        assert_eq!(config.decrypt.trim, "random");
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, "text");
        assert_eq!(config, KeybearerConfig::default());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[crypto]
iterations = 5000
"#;
        let config: KeybearerConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.crypto.iterations, 5000);
        // Defaults
        assert_eq!(config.crypto.max_derivation_work, 50_000_000);
        assert_eq!(config.decrypt.trim, "random");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = KeybearerConfig::default();
        config.crypto.iterations = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = KeybearerConfig::default();
        config.decrypt.trim = "sometimes".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = KeybearerConfig::default();
        config.log.format = "xml".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keybearer.toml");
        std::fs::write(&path, "[decrypt]\ntrim = \"exhaustive\"\n").unwrap();

        let config = KeybearerConfig::load(&path).unwrap();
        assert_eq!(config.decrypt.trim, "exhaustive");

        std::fs::write(&path, "[crypto\n").unwrap();
        assert!(matches!(
            KeybearerConfig::from_toml_str("[crypto\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(KeybearerConfig::load(&path), Err(Error::Config(_))));

        assert!(matches!(
            KeybearerConfig::load(&dir.path().join("missing.toml")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_default_path_follows_env() {
        std::env::set_var(CONFIG_ENV, "/etc/keybearer/site.toml");
        assert_eq!(default_path(), PathBuf::from("/etc/keybearer/site.toml"));
        std::env::remove_var(CONFIG_ENV);
        assert_eq!(default_path(), PathBuf::from("keybearer.toml"));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = KeybearerConfig::default();
        let toml_str = config.to_toml().unwrap();
        let parsed: KeybearerConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }
}
