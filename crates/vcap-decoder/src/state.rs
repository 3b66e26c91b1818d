//! Per-slot recurrent state.

use vcap_common::{DecodeError, Matrix, Result};

/// Hidden state rows plus an optional cell-state matrix of the same shape.
///
/// Row `k` belongs to beam slot `k`. Reindexing with [`gather`] always
/// produces fresh buffers, so slots that share a parent can be updated
/// independently.
///
/// [`gather`]: RecurrentState::gather
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentState {
    hidden: Matrix,
    cell: Option<Matrix>,
}

impl RecurrentState {
    pub fn new(hidden: Matrix, cell: Option<Matrix>) -> Result<Self> {
        if let Some(cell) = &cell {
            if cell.rows() != hidden.rows() {
                return Err(DecodeError::DimensionMismatch {
                    what: "cell state rows",
                    expected: hidden.rows(),
                    got: cell.rows(),
                });
            }
            if cell.cols() != hidden.cols() {
                return Err(DecodeError::DimensionMismatch {
                    what: "cell state cols",
                    expected: hidden.cols(),
                    got: cell.cols(),
                });
            }
        }
        Ok(Self { hidden, cell })
    }

    /// State with no cell component (GRU, Elman).
    pub fn hidden_only(hidden: Matrix) -> Self {
        Self { hidden, cell: None }
    }

    pub fn hidden(&self) -> &Matrix {
        &self.hidden
    }

    pub fn cell(&self) -> Option<&Matrix> {
        self.cell.as_ref()
    }

    pub fn into_parts(self) -> (Matrix, Option<Matrix>) {
        (self.hidden, self.cell)
    }

    /// Number of slots.
    pub fn rows(&self) -> usize {
        self.hidden.rows()
    }

    /// Width of the hidden state.
    pub fn dim(&self) -> usize {
        self.hidden.cols()
    }

    /// Copy a single-row state into `beamsize` independent rows.
    pub fn broadcast(&self, beamsize: usize) -> Result<Self> {
        if self.rows() != 1 {
            return Err(DecodeError::DimensionMismatch {
                what: "initial state rows",
                expected: 1,
                got: self.rows(),
            });
        }
        Ok(Self {
            hidden: Matrix::broadcast_row(self.hidden.row(0), beamsize),
            cell: self.cell.as_ref().map(|c| Matrix::broadcast_row(c.row(0), beamsize)),
        })
    }

    /// New state whose row `k` is a copy of row `parents[k]`.
    pub fn gather(&self, parents: &[usize]) -> Result<Self> {
        Ok(Self {
            hidden: self.hidden.gather(parents)?,
            cell: self.cell.as_ref().map(|c| c.gather(parents)).transpose()?,
        })
    }
}
