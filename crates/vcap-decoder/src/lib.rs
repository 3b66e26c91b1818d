//! Step-by-step caption decoding.
//!
//! [`DecodingLoop`] drives a [`BeamSearchEngine`](vcap_beam::BeamSearchEngine)
//! with an injected [`StepFunction`] and [`EmbeddingLookup`]. It owns the
//! per-slot [`RecurrentState`] and reindexes it after every step using the
//! parent slots the engine reports.
//!
//! The [`model`] module provides a small seeded recurrent language model
//! (LSTM, GRU or Elman cell plus a linear projection) that implements both
//! traits, used by the CLI and the tests.

pub mod decoding;
pub mod model;
pub mod state;
pub mod step;

pub use decoding::{DecodeOutput, DecodingLoop, StepEvent};
pub use model::{
    CellKind, EmbeddingTable, GruCell, Linear, LstmCell, ModelConfig, RecurrentCell,
    RecurrentLanguageModel, RnnCell,
};
pub use state::RecurrentState;
pub use step::{EmbeddingLookup, StepFunction, StepOutput};
pub use vcap_beam::StopReason;
