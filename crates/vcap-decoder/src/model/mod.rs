//! Seeded reference recurrent language model.
//!
//! Embedding table, recurrent cell and output projection, randomly
//! initialised from a [`ModelConfig`]. Useful for exercising the decoding
//! loop end to end without trained weights.

mod cell;
mod embedding;
mod linear;

use std::fmt;
use std::str::FromStr;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vcap_common::{DecodeError, Matrix, Result};

pub use cell::{random_cell, GruCell, LstmCell, RecurrentCell, RnnCell};
pub use embedding::EmbeddingTable;
pub use linear::{log_softmax, log_softmax_rows, Linear};

use crate::state::RecurrentState;
use crate::step::{StepFunction, StepOutput};

// ---------------------------------------------------------------------------
// Cell kind
// ---------------------------------------------------------------------------

/// Recurrent cell variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    #[default]
    Lstm,
    Gru,
    Rnn,
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lstm => "lstm",
            Self::Gru => "gru",
            Self::Rnn => "rnn",
        })
    }
}

impl FromStr for CellKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lstm" => Ok(Self::Lstm),
            "gru" => Ok(Self::Gru),
            "rnn" => Ok(Self::Rnn),
            other => Err(format!("unknown cell kind {other:?} (expected lstm, gru or rnn)")),
        }
    }
}

// ---------------------------------------------------------------------------
// Model configuration
// ---------------------------------------------------------------------------

/// Shape and seed of the reference model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub cell: CellKind,
    pub vocab_size: usize,
    /// Embedding width.
    pub input_dim: usize,
    /// Recurrent state width; the visual feature must have this length.
    pub hidden_dim: usize,
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { cell: CellKind::Lstm, vocab_size: 32, input_dim: 16, hidden_dim: 16, seed: 42 }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.vocab_size < 2 {
            return Err(DecodeError::InvalidConfig(
                "vocab_size must hold at least the start and end tokens".into(),
            ));
        }
        if self.input_dim == 0 || self.hidden_dim == 0 {
            return Err(DecodeError::InvalidConfig(
                "input_dim and hidden_dim must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Build the model and its embedding table from one seeded stream.
    pub fn build(&self) -> Result<(RecurrentLanguageModel, EmbeddingTable)> {
        self.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let embeddings = EmbeddingTable::random(self.vocab_size, self.input_dim, &mut rng);
        let cell = random_cell(self.cell, self.input_dim, self.hidden_dim, &mut rng);
        #[allow(clippy::cast_precision_loss)]
        let bound = 1.0 / (self.hidden_dim as f32).sqrt();
        let output = Linear::random(self.vocab_size, self.hidden_dim, bound, &mut rng);
        debug!(
            cell = %self.cell,
            vocab_size = self.vocab_size,
            input_dim = self.input_dim,
            hidden_dim = self.hidden_dim,
            seed = self.seed,
            "built reference model"
        );
        Ok((RecurrentLanguageModel::new(cell, output)?, embeddings))
    }
}

// ---------------------------------------------------------------------------
// Language model
// ---------------------------------------------------------------------------

/// Recurrent cell followed by a vocabulary projection and log-softmax.
#[derive(Debug)]
pub struct RecurrentLanguageModel {
    cell: Box<dyn RecurrentCell>,
    output: Linear,
}

impl RecurrentLanguageModel {
    pub fn new(cell: Box<dyn RecurrentCell>, output: Linear) -> Result<Self> {
        if output.in_dim() != cell.hidden_dim() {
            return Err(DecodeError::DimensionMismatch {
                what: "output projection inputs",
                expected: cell.hidden_dim(),
                got: output.in_dim(),
            });
        }
        Ok(Self { cell, output })
    }

    pub fn cell(&self) -> &dyn RecurrentCell {
        self.cell.as_ref()
    }

    pub fn hidden_dim(&self) -> usize {
        self.cell.hidden_dim()
    }

    /// Single-row starting state with the visual feature as hidden state.
    pub fn init_state(&self, feature: &[f32]) -> Result<RecurrentState> {
        if feature.len() != self.hidden_dim() {
            return Err(DecodeError::DimensionMismatch {
                what: "visual feature",
                expected: self.hidden_dim(),
                got: feature.len(),
            });
        }
        self.cell.initial_state(Matrix::from_vec(1, feature.len(), feature.to_vec())?)
    }
}

impl StepFunction for RecurrentLanguageModel {
    fn vocab_size(&self) -> usize {
        self.output.out_dim()
    }

    fn step(&self, inputs: &Matrix, state: &RecurrentState) -> Result<StepOutput> {
        let state = self.cell.forward(inputs, state)?;
        let mut log_probs = self.output.forward(state.hidden())?;
        log_softmax_rows(&mut log_probs);
        Ok(StepOutput { log_probs, state })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::EmbeddingLookup;

    fn small(cell: CellKind) -> ModelConfig {
        ModelConfig { cell, vocab_size: 6, input_dim: 3, hidden_dim: 4, seed: 11 }
    }

    #[test]
    fn cell_kind_parses_case_insensitively() {
        assert_eq!("GRU".parse::<CellKind>().unwrap(), CellKind::Gru);
        assert_eq!("rnn".parse::<CellKind>().unwrap(), CellKind::Rnn);
        assert!("transformer".parse::<CellKind>().is_err());
        assert_eq!(CellKind::Lstm.to_string(), "lstm");
    }

    #[test]
    fn model_config_toml_uses_lowercase_cell_names() {
        let config: ModelConfig = toml::from_str("cell = \"gru\"\nvocab_size = 10").unwrap();
        assert_eq!(config.cell, CellKind::Gru);
        assert_eq!(config.vocab_size, 10);
        assert_eq!(config.hidden_dim, ModelConfig::default().hidden_dim);
    }

    #[test]
    fn tiny_vocab_is_rejected() {
        let config = ModelConfig { vocab_size: 1, ..ModelConfig::default() };
        assert!(matches!(config.validate(), Err(DecodeError::InvalidConfig(_))));
    }

    #[test]
    fn build_is_deterministic_per_seed() {
        let (_, a) = small(CellKind::Lstm).build().unwrap();
        let (_, b) = small(CellKind::Lstm).build().unwrap();
        let (_, c) = ModelConfig { seed: 12, ..small(CellKind::Lstm) }.build().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn step_returns_normalized_rows_for_every_cell() {
        for kind in [CellKind::Lstm, CellKind::Gru, CellKind::Rnn] {
            let (model, embeddings) = small(kind).build().unwrap();
            let state = model.init_state(&[0.1, -0.2, 0.3, 0.0]).unwrap().broadcast(2).unwrap();
            let inputs = embeddings.lookup_batch(&[1, 1]).unwrap();
            let out = model.step(&inputs, &state).unwrap();
            assert_eq!(out.log_probs.shape(), (2, 6));
            assert_eq!(out.state.rows(), 2);
            for row in out.log_probs.iter_rows() {
                let total: f32 = row.iter().map(|v| v.exp()).sum();
                assert!((total - 1.0).abs() < 1e-5, "{kind}: row sums to {total}");
                assert!(row.iter().all(|&v| v <= 0.0));
            }
        }
    }

    #[test]
    fn lstm_initial_state_has_zero_cell() {
        let (model, _) = small(CellKind::Lstm).build().unwrap();
        let state = model.init_state(&[0.5; 4]).unwrap();
        assert_eq!(state.hidden().row(0), &[0.5; 4]);
        assert_eq!(state.cell().unwrap().as_slice(), &[0.0; 4]);
    }

    #[test]
    fn feature_must_match_hidden_width() {
        let (model, _) = small(CellKind::Gru).build().unwrap();
        let err = model.init_state(&[0.0; 3]).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::DimensionMismatch { what: "visual feature", expected: 4, got: 3 }
        ));
    }
}
