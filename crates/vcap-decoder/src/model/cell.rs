//! Recurrent cells.
//!
//! Gate layouts follow the usual stacked convention: the input-to-hidden and
//! hidden-to-hidden projections produce `G × hidden_dim` pre-activations per
//! row, split in gate order (`i, f, g, o` for LSTM, `r, z, n` for GRU).

use std::fmt;

use rand::Rng;
use vcap_common::{DecodeError, Matrix, Result};

use super::linear::Linear;
use super::CellKind;
use crate::state::RecurrentState;

/// A batched recurrent update over every beam slot.
pub trait RecurrentCell: fmt::Debug + Send + Sync {
    fn kind(&self) -> CellKind;

    fn input_dim(&self) -> usize;

    fn hidden_dim(&self) -> usize;

    /// Build a state from initial hidden rows, adding any extra components
    /// the cell carries.
    fn initial_state(&self, hidden: Matrix) -> Result<RecurrentState> {
        check_width("initial hidden state", self.hidden_dim(), hidden.cols())?;
        Ok(RecurrentState::hidden_only(hidden))
    }

    /// One step: `inputs` is `rows × input_dim`, `state` has `rows` slots.
    fn forward(&self, inputs: &Matrix, state: &RecurrentState) -> Result<RecurrentState>;
}

// ── Shared plumbing ───────────────────────────────────────────────────────

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn check_width(what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(DecodeError::DimensionMismatch { what, expected, got })
    }
}

/// Both projections of a gated cell.
#[derive(Debug, Clone, PartialEq)]
struct Projections {
    w_ih: Linear,
    w_hh: Linear,
    hidden_dim: usize,
}

impl Projections {
    fn new(w_ih: Linear, w_hh: Linear, gates: usize) -> Result<Self> {
        let hidden_dim = w_hh.in_dim();
        check_width("input projection outputs", gates * hidden_dim, w_ih.out_dim())?;
        check_width("hidden projection outputs", gates * hidden_dim, w_hh.out_dim())?;
        Ok(Self { w_ih, w_hh, hidden_dim })
    }

    fn random<R: Rng>(input_dim: usize, hidden_dim: usize, gates: usize, rng: &mut R) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let bound = 1.0 / (hidden_dim.max(1) as f32).sqrt();
        Self {
            w_ih: Linear::random(gates * hidden_dim, input_dim, bound, rng),
            w_hh: Linear::random(gates * hidden_dim, hidden_dim, bound, rng),
            hidden_dim,
        }
    }

    /// Input and hidden pre-activations, each `rows × gates·hidden_dim`.
    fn project(&self, inputs: &Matrix, state: &RecurrentState) -> Result<(Matrix, Matrix)> {
        check_width("input rows", state.rows(), inputs.rows())?;
        Ok((self.w_ih.forward(inputs)?, self.w_hh.forward(state.hidden())?))
    }
}

// ── LSTM ──────────────────────────────────────────────────────────────────

/// Long short-term memory cell; carries a cell state alongside the hidden
/// state.
#[derive(Debug, Clone, PartialEq)]
pub struct LstmCell {
    proj: Projections,
}

impl LstmCell {
    pub fn new(w_ih: Linear, w_hh: Linear) -> Result<Self> {
        Ok(Self { proj: Projections::new(w_ih, w_hh, 4)? })
    }

    pub fn random<R: Rng>(input_dim: usize, hidden_dim: usize, rng: &mut R) -> Self {
        Self { proj: Projections::random(input_dim, hidden_dim, 4, rng) }
    }
}

impl RecurrentCell for LstmCell {
    fn kind(&self) -> CellKind {
        CellKind::Lstm
    }

    fn input_dim(&self) -> usize {
        self.proj.w_ih.in_dim()
    }

    fn hidden_dim(&self) -> usize {
        self.proj.hidden_dim
    }

    /// The cell state starts at zero.
    fn initial_state(&self, hidden: Matrix) -> Result<RecurrentState> {
        check_width("initial hidden state", self.hidden_dim(), hidden.cols())?;
        let cell = Matrix::zeros(hidden.rows(), hidden.cols());
        RecurrentState::new(hidden, Some(cell))
    }

    fn forward(&self, inputs: &Matrix, state: &RecurrentState) -> Result<RecurrentState> {
        let h = self.hidden_dim();
        let c_prev = state.cell().ok_or(DecodeError::DimensionMismatch {
            what: "lstm cell state",
            expected: h,
            got: 0,
        })?;
        let (gi, gh) = self.proj.project(inputs, state)?;

        let mut hidden = Matrix::zeros(state.rows(), h);
        let mut cell = Matrix::zeros(state.rows(), h);
        for r in 0..state.rows() {
            let (a, b, c0) = (gi.row(r), gh.row(r), c_prev.row(r));
            for j in 0..h {
                let i = sigmoid(a[j] + b[j]);
                let f = sigmoid(a[h + j] + b[h + j]);
                let g = (a[2 * h + j] + b[2 * h + j]).tanh();
                let o = sigmoid(a[3 * h + j] + b[3 * h + j]);
                let c = f * c0[j] + i * g;
                cell.row_mut(r)[j] = c;
                hidden.row_mut(r)[j] = o * c.tanh();
            }
        }
        RecurrentState::new(hidden, Some(cell))
    }
}

// ── GRU ───────────────────────────────────────────────────────────────────

/// Gated recurrent unit.
#[derive(Debug, Clone, PartialEq)]
pub struct GruCell {
    proj: Projections,
}

impl GruCell {
    pub fn new(w_ih: Linear, w_hh: Linear) -> Result<Self> {
        Ok(Self { proj: Projections::new(w_ih, w_hh, 3)? })
    }

    pub fn random<R: Rng>(input_dim: usize, hidden_dim: usize, rng: &mut R) -> Self {
        Self { proj: Projections::random(input_dim, hidden_dim, 3, rng) }
    }
}

impl RecurrentCell for GruCell {
    fn kind(&self) -> CellKind {
        CellKind::Gru
    }

    fn input_dim(&self) -> usize {
        self.proj.w_ih.in_dim()
    }

    fn hidden_dim(&self) -> usize {
        self.proj.hidden_dim
    }

    fn forward(&self, inputs: &Matrix, state: &RecurrentState) -> Result<RecurrentState> {
        let h = self.hidden_dim();
        let (gi, gh) = self.proj.project(inputs, state)?;

        let mut hidden = Matrix::zeros(state.rows(), h);
        for r in 0..state.rows() {
            let (a, b, h0) = (gi.row(r), gh.row(r), state.hidden().row(r));
            for j in 0..h {
                let reset = sigmoid(a[j] + b[j]);
                let update = sigmoid(a[h + j] + b[h + j]);
                let n = (a[2 * h + j] + reset * b[2 * h + j]).tanh();
                hidden.row_mut(r)[j] = (1.0 - update) * n + update * h0[j];
            }
        }
        Ok(RecurrentState::hidden_only(hidden))
    }
}

// ── Elman ─────────────────────────────────────────────────────────────────

/// Plain tanh recurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct RnnCell {
    proj: Projections,
}

impl RnnCell {
    pub fn new(w_ih: Linear, w_hh: Linear) -> Result<Self> {
        Ok(Self { proj: Projections::new(w_ih, w_hh, 1)? })
    }

    pub fn random<R: Rng>(input_dim: usize, hidden_dim: usize, rng: &mut R) -> Self {
        Self { proj: Projections::random(input_dim, hidden_dim, 1, rng) }
    }
}

impl RecurrentCell for RnnCell {
    fn kind(&self) -> CellKind {
        CellKind::Rnn
    }

    fn input_dim(&self) -> usize {
        self.proj.w_ih.in_dim()
    }

    fn hidden_dim(&self) -> usize {
        self.proj.hidden_dim
    }

    fn forward(&self, inputs: &Matrix, state: &RecurrentState) -> Result<RecurrentState> {
        let (mut hidden, gh) = self.proj.project(inputs, state)?;
        for r in 0..hidden.rows() {
            for (v, b) in hidden.row_mut(r).iter_mut().zip(gh.row(r)) {
                *v = (*v + b).tanh();
            }
        }
        Ok(RecurrentState::hidden_only(hidden))
    }
}

/// Construct a randomly initialised cell of the given kind.
pub fn random_cell<R: Rng>(
    kind: CellKind,
    input_dim: usize,
    hidden_dim: usize,
    rng: &mut R,
) -> Box<dyn RecurrentCell> {
    match kind {
        CellKind::Lstm => Box::new(LstmCell::random(input_dim, hidden_dim, rng)),
        CellKind::Gru => Box::new(GruCell::random(input_dim, hidden_dim, rng)),
        CellKind::Rnn => Box::new(RnnCell::random(input_dim, hidden_dim, rng)),
    }
}
