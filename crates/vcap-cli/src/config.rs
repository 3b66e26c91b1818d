//! CLI configuration file (`vcap.toml`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use vcap_common::DecoderConfig;
use vcap_decoder::ModelConfig;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "vcap.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// `pretty`, `compact` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "warn".to_string(), format: "compact".to_string() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub decoder: DecoderConfig,
    pub model: ModelConfig,
    pub logging: LoggingConfig,
}

impl CliConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse configuration")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Explicit path, else `vcap.toml` if present, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
        if fallback.is_file() {
            Self::from_file(&fallback)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `VCAP_*` decoder overrides from the environment.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        self.decoder = self.decoder.apply_env_overrides().context("Invalid VCAP_* override")?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.decoder.validate().context("Invalid [decoder] section")?;
        self.model.validate().context("Invalid [model] section")?;
        self.decoder
            .validate_vocab(self.model.vocab_size)
            .context("[decoder] sentinels do not fit the [model] vocabulary")?;
        match self.logging.format.as_str() {
            "pretty" | "compact" | "json" => Ok(()),
            other => anyhow::bail!("Unknown logging format {other:?} (expected pretty, compact or json)"),
        }
    }
}
