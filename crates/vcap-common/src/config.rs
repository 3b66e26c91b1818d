//! Decoder configuration.
//!
//! [`DecoderConfig`] carries the four options recognised by a decode call.
//! It can be built in code, parsed from TOML, and adjusted through `VCAP_*`
//! environment variables.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DecodeError, Result};
use crate::TokenId;

/// Environment variable overriding [`DecoderConfig::beamsize`].
pub const ENV_BEAMSIZE: &str = "VCAP_BEAMSIZE";
/// Environment variable overriding [`DecoderConfig::eos_index`].
pub const ENV_EOS_INDEX: &str = "VCAP_EOS_INDEX";
/// Environment variable overriding [`DecoderConfig::bos_index`].
pub const ENV_BOS_INDEX: &str = "VCAP_BOS_INDEX";
/// Environment variable overriding [`DecoderConfig::max_steps`].
pub const ENV_MAX_STEPS: &str = "VCAP_MAX_STEPS";

/// Options recognised by the beam-search engine and the decoding loop.
///
/// # Examples
///
/// ```
/// use vcap_common::DecoderConfig;
///
/// let config = DecoderConfig::default();
/// assert_eq!(config.beamsize, 2);
/// assert_eq!(config.max_steps, 15);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecoderConfig {
    /// Number of hypotheses kept alive at every step.
    pub beamsize: usize,
    /// Vocabulary index that ends a sequence.
    pub eos_index: TokenId,
    /// Vocabulary index every hypothesis starts from.
    pub bos_index: TokenId,
    /// Maximum number of decoding steps.
    pub max_steps: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self { beamsize: 2, eos_index: 0, bos_index: 1, max_steps: 15 }
    }
}

impl DecoderConfig {
    /// Create a validated configuration.
    pub fn new(
        beamsize: usize,
        eos_index: TokenId,
        bos_index: TokenId,
        max_steps: usize,
    ) -> Result<Self> {
        let config = Self { beamsize, eos_index, bos_index, max_steps };
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration from TOML text. Missing keys take their defaults.
    ///
    /// ```
    /// use vcap_common::DecoderConfig;
    ///
    /// let config = DecoderConfig::from_toml_str("beamsize = 5\nmax_steps = 20").unwrap();
    /// assert_eq!(config.beamsize, 5);
    /// assert_eq!(config.eos_index, 0);
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading decoder config");
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Apply `VCAP_*` overrides from the process environment.
    pub fn apply_env_overrides(self) -> Result<Self> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Empty values are ignored; unparsable values are a configuration error.
    pub fn apply_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = read_override(&lookup, ENV_BEAMSIZE)? {
            self.beamsize = v;
        }
        if let Some(v) = read_override(&lookup, ENV_EOS_INDEX)? {
            self.eos_index = v;
        }
        if let Some(v) = read_override(&lookup, ENV_BOS_INDEX)? {
            self.bos_index = v;
        }
        if let Some(v) = read_override(&lookup, ENV_MAX_STEPS)? {
            self.max_steps = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check the vocabulary-independent invariants.
    pub fn validate(&self) -> Result<()> {
        if self.beamsize == 0 {
            return Err(DecodeError::InvalidConfig("beamsize must be at least 1".into()));
        }
        if self.max_steps == 0 {
            return Err(DecodeError::InvalidConfig("max_steps must be at least 1".into()));
        }
        if self.eos_index == self.bos_index {
            return Err(DecodeError::InvalidConfig(format!(
                "eos_index and bos_index must differ (both are {})",
                self.eos_index
            )));
        }
        Ok(())
    }

    /// Check that both sentinel indices fit inside a vocabulary of `vocab_size`.
    pub fn validate_vocab(&self, vocab_size: usize) -> Result<()> {
        for (name, index) in [("eos_index", self.eos_index), ("bos_index", self.bos_index)] {
            if index as usize >= vocab_size {
                return Err(DecodeError::InvalidConfig(format!(
                    "{name} {index} is outside the vocabulary of size {vocab_size}"
                )));
            }
        }
        Ok(())
    }
}

fn read_override<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| DecodeError::InvalidConfig(format!("{key}: cannot parse {raw:?}"))),
        _ => Ok(None),
    }
}
