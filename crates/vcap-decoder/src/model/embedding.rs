//! Dense token embedding table.

use rand::Rng;
use vcap_common::{DecodeError, Matrix, Result, TokenId};

use crate::step::EmbeddingLookup;

/// `vocab_size × embedding_dim` lookup table.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingTable {
    weights: Matrix,
}

impl EmbeddingTable {
    pub fn new(weights: Matrix) -> Self {
        Self { weights }
    }

    /// Entries drawn uniformly from `[-1, 1)`.
    pub fn random<R: Rng>(vocab_size: usize, dim: usize, rng: &mut R) -> Self {
        let mut weights = Matrix::zeros(vocab_size, dim);
        for r in 0..vocab_size {
            for w in weights.row_mut(r) {
                *w = rng.random_range(-1.0..1.0);
            }
        }
        Self { weights }
    }

    pub fn vocab_size(&self) -> usize {
        self.weights.rows()
    }

    pub fn weights(&self) -> &Matrix {
        &self.weights
    }
}

impl EmbeddingLookup for EmbeddingTable {
    fn embedding_dim(&self) -> usize {
        self.weights.cols()
    }

    fn lookup(&self, token: TokenId) -> Result<&[f32]> {
        let index = token as usize;
        if index >= self.weights.rows() {
            return Err(DecodeError::UnknownToken { token, vocab_size: self.weights.rows() });
        }
        Ok(self.weights.row(index))
    }
}
