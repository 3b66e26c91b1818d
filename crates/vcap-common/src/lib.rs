//! Common types shared across the vcap decoder crates.
//!
//! This crate provides the foundational pieces used by the beam-search engine
//! and the decoding loop: the [`DecodeError`] taxonomy, the
//! [`DecoderConfig`] recognised by every decode call, and the row-major
//! [`Matrix`] arena used for log-probabilities, embeddings and recurrent
//! state.

pub mod config;
pub mod error;
pub mod matrix;

pub use config::DecoderConfig;
pub use error::{DecodeError, ErrorKind, Result};
pub use matrix::Matrix;

/// Vocabulary index of a token.
pub type TokenId = u32;
