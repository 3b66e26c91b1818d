//! Dense projection and row-wise log-softmax.

use rand::Rng;
use vcap_common::{DecodeError, Matrix, Result};

/// `y = x · Wᵀ + b` with `W` stored as `out_dim × in_dim`.
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    weight: Matrix,
    bias: Vec<f32>,
}

impl Linear {
    pub fn new(weight: Matrix, bias: Vec<f32>) -> Result<Self> {
        if bias.len() != weight.rows() {
            return Err(DecodeError::DimensionMismatch {
                what: "linear bias",
                expected: weight.rows(),
                got: bias.len(),
            });
        }
        Ok(Self { weight, bias })
    }

    /// Weights and bias drawn uniformly from `[-bound, bound)`.
    pub fn random<R: Rng>(out_dim: usize, in_dim: usize, bound: f32, rng: &mut R) -> Self {
        let mut weight = Matrix::zeros(out_dim, in_dim);
        for r in 0..out_dim {
            for w in weight.row_mut(r) {
                *w = rng.random_range(-bound..bound);
            }
        }
        let bias = (0..out_dim).map(|_| rng.random_range(-bound..bound)).collect();
        Self { weight, bias }
    }

    pub fn in_dim(&self) -> usize {
        self.weight.cols()
    }

    pub fn out_dim(&self) -> usize {
        self.weight.rows()
    }

    pub fn weight(&self) -> &Matrix {
        &self.weight
    }

    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    /// Apply to every row of `input`.
    pub fn forward(&self, input: &Matrix) -> Result<Matrix> {
        if input.cols() != self.in_dim() {
            return Err(DecodeError::DimensionMismatch {
                what: "linear input",
                expected: self.in_dim(),
                got: input.cols(),
            });
        }
        let mut out = Matrix::zeros(input.rows(), self.out_dim());
        for (r, x) in input.iter_rows().enumerate() {
            let y = out.row_mut(r);
            for ((y, w), b) in y.iter_mut().zip(self.weight.iter_rows()).zip(&self.bias) {
                *y = b + dot(w, x);
            }
        }
        Ok(out)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// In-place numerically stable log-softmax.
///
/// A row with no finite entry is left untouched.
pub fn log_softmax(row: &mut [f32]) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return;
    }
    let sum_exp: f32 = row.iter().map(|&v| (v - max).exp()).sum();
    let log_sum_exp = max + sum_exp.ln();
    for v in row.iter_mut() {
        *v -= log_sum_exp;
    }
}

/// [`log_softmax`] over every row.
pub fn log_softmax_rows(m: &mut Matrix) {
    for r in 0..m.rows() {
        log_softmax(m.row_mut(r));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn forward_applies_weight_and_bias() {
        let weight = Matrix::from_rows(&[[1.0, 2.0], [0.0, -1.0], [0.5, 0.5]]).unwrap();
        let layer = Linear::new(weight, vec![0.0, 1.0, -1.0]).unwrap();
        let y = layer.forward(&Matrix::from_rows(&[[1.0, 1.0], [2.0, 0.0]]).unwrap()).unwrap();
        assert_eq!(y.shape(), (2, 3));
        assert_eq!(y.row(0), &[3.0, 0.0, 0.0]);
        assert_eq!(y.row(1), &[2.0, 1.0, 0.0]);
    }

    #[test]
    fn forward_rejects_wrong_input_width() {
        let layer = Linear::new(Matrix::zeros(2, 3), vec![0.0; 2]).unwrap();
        let err = layer.forward(&Matrix::zeros(1, 4)).unwrap_err();
        assert!(matches!(err, DecodeError::DimensionMismatch { what: "linear input", .. }));
    }

    #[test]
    fn bias_length_must_match_outputs() {
        let err = Linear::new(Matrix::zeros(2, 3), vec![0.0; 3]).unwrap_err();
        assert!(matches!(err, DecodeError::DimensionMismatch { what: "linear bias", .. }));
    }

    #[test]
    fn random_weights_respect_bound_and_seed() {
        let a = Linear::random(4, 3, 0.25, &mut ChaCha8Rng::seed_from_u64(7));
        let b = Linear::random(4, 3, 0.25, &mut ChaCha8Rng::seed_from_u64(7));
        assert_eq!(a, b);
        assert!(a.weight().as_slice().iter().chain(a.bias()).all(|v| (-0.25..0.25).contains(v)));
    }

    #[test]
    fn log_softmax_normalizes() {
        let mut row = vec![1.0f32, 2.0, 3.0];
        log_softmax(&mut row);
        let total: f32 = row.iter().map(|v| v.exp()).sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(row.iter().all(|&v| v <= 0.0));
        assert!(row[2] > row[1] && row[1] > row[0]);
    }

    #[test]
    fn log_softmax_keeps_masked_entries() {
        let mut row = vec![0.0f32, f32::NEG_INFINITY];
        log_softmax(&mut row);
        assert_eq!(row, vec![0.0, f32::NEG_INFINITY]);

        let mut dead = vec![f32::NEG_INFINITY; 3];
        log_softmax(&mut dead);
        assert!(dead.iter().all(|v| *v == f32::NEG_INFINITY));
    }
}
