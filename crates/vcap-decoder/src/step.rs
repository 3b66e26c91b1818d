//! Seams between the decoding loop and the model.

use vcap_common::{DecodeError, Matrix, Result, TokenId};

use crate::state::RecurrentState;

/// Result of one recurrent step over every beam slot.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    /// `beamsize × vocab_size`, one log-softmax normalized row per slot.
    pub log_probs: Matrix,
    /// Updated state, one row per slot.
    pub state: RecurrentState,
}

/// One step of a recurrent language model over a batch of slots.
///
/// Implementations receive `beamsize × input_dim` embedded inputs and the
/// state rows gathered for the current beam, and must not retain either.
/// The cell type is an implementation detail; the loop never inspects it.
pub trait StepFunction {
    /// Width of every log-probability row.
    fn vocab_size(&self) -> usize;

    fn step(&self, inputs: &Matrix, state: &RecurrentState) -> Result<StepOutput>;
}

/// Token-to-vector lookup for decoder inputs.
pub trait EmbeddingLookup {
    fn embedding_dim(&self) -> usize;

    /// Embedding row for `token`.
    ///
    /// # Errors
    ///
    /// [`DecodeError::UnknownToken`] when `token` is outside the table.
    fn lookup(&self, token: TokenId) -> Result<&[f32]>;

    /// Stack the embeddings of `tokens` into a `tokens.len() × embedding_dim`
    /// matrix.
    fn lookup_batch(&self, tokens: &[TokenId]) -> Result<Matrix> {
        let dim = self.embedding_dim();
        let mut data = Vec::with_capacity(tokens.len() * dim);
        for &token in tokens {
            let row = self.lookup(token)?;
            if row.len() != dim {
                return Err(DecodeError::DimensionMismatch {
                    what: "embedding row",
                    expected: dim,
                    got: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Matrix::from_vec(tokens.len(), dim, data)
    }
}

impl<T: StepFunction + ?Sized> StepFunction for &T {
    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }

    fn step(&self, inputs: &Matrix, state: &RecurrentState) -> Result<StepOutput> {
        (**self).step(inputs, state)
    }
}

impl<T: EmbeddingLookup + ?Sized> EmbeddingLookup for &T {
    fn embedding_dim(&self) -> usize {
        (**self).embedding_dim()
    }

    fn lookup(&self, token: TokenId) -> Result<&[f32]> {
        (**self).lookup(token)
    }
}
