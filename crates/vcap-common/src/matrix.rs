//! Row-major `f32` arena.
//!
//! Log-probabilities (`beamsize × vocab`), embedded inputs
//! (`beamsize × input_dim`) and recurrent state (`beamsize × hidden_dim`)
//! all share this representation. Rows are the unit of ownership: a
//! [`Matrix::gather`] always copies into a fresh buffer, so two slots that
//! descend from the same parent never alias each other's state.

use crate::error::{DecodeError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// All-zero matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![0.0; rows * cols] }
    }

    /// Wrap a flat row-major buffer.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(DecodeError::DimensionMismatch {
                what: "matrix buffer length",
                expected: rows * cols,
                got: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from nested rows; every row must have the same length.
    ///
    /// ```
    /// use vcap_common::Matrix;
    ///
    /// let m = Matrix::from_rows(&[vec![-0.1, -0.2], vec![-0.3, -0.4]]).unwrap();
    /// assert_eq!(m.shape(), (2, 2));
    /// assert_eq!(m.row(1), &[-0.3, -0.4]);
    /// ```
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self> {
        let cols = rows.first().map_or(0, |r| r.as_ref().len());
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(DecodeError::DimensionMismatch {
                    what: "matrix row length",
                    expected: cols,
                    got: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self { rows: rows.len(), cols, data })
    }

    /// Copy one row into `rows` independent rows.
    pub fn broadcast_row(row: &[f32], rows: usize) -> Self {
        let mut data = Vec::with_capacity(rows * row.len());
        for _ in 0..rows {
            data.extend_from_slice(row);
        }
        Self { rows, cols: row.len(), data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Borrow row `i`. Panics if `i >= rows`.
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Mutably borrow row `i`. Panics if `i >= rows`.
    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        (0..self.rows).map(move |i| self.row(i))
    }

    /// Build a new matrix whose row `k` is a copy of row `indices[k]`.
    ///
    /// ```
    /// use vcap_common::Matrix;
    ///
    /// let state = Matrix::from_rows(&[vec![1.0, 1.0], vec![2.0, 2.0]]).unwrap();
    /// let next = state.gather(&[1, 1]).unwrap();
    /// assert_eq!(next.row(0), &[2.0, 2.0]);
    /// assert_eq!(next.row(1), &[2.0, 2.0]);
    /// ```
    pub fn gather(&self, indices: &[usize]) -> Result<Self> {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &i in indices {
            if i >= self.rows {
                return Err(DecodeError::OutOfRange { index: i, len: self.rows });
            }
            data.extend_from_slice(self.row(i));
        }
        Ok(Self { rows: indices.len(), cols: self.cols, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_vec_checks_length() {
        assert!(Matrix::from_vec(2, 3, vec![0.0; 6]).is_ok());
        let err = Matrix::from_vec(2, 3, vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, DecodeError::DimensionMismatch { expected: 6, got: 5, .. }));
    }

    #[test]
    fn from_rows_rejects_ragged_input() {
        let err = Matrix::from_rows(&[vec![0.0, 1.0], vec![2.0]]).unwrap_err();
        assert!(matches!(err, DecodeError::DimensionMismatch { expected: 2, got: 1, .. }));
    }

    #[test]
    fn broadcast_copies_rows() {
        let mut m = Matrix::broadcast_row(&[0.5, -0.5], 3);
        assert_eq!(m.shape(), (3, 2));
        m.row_mut(0)[0] = 9.0;
        assert_eq!(m.row(1), &[0.5, -0.5]);
        assert_eq!(m.row(2), &[0.5, -0.5]);
    }

    #[test]
    fn gather_owns_its_rows() {
        let src = Matrix::from_rows(&[vec![1.0], vec![2.0], vec![3.0]]).unwrap();
        let mut out = src.gather(&[2, 0, 2]).unwrap();
        assert_eq!(out.as_slice(), &[3.0, 1.0, 3.0]);
        out.row_mut(0)[0] = -1.0;
        assert_eq!(out.row(2), &[3.0]);
        assert_eq!(src.row(2), &[3.0]);
    }

    #[test]
    fn gather_rejects_out_of_range_rows() {
        let src = Matrix::zeros(2, 4);
        let err = src.gather(&[0, 2]).unwrap_err();
        assert!(matches!(err, DecodeError::OutOfRange { index: 2, len: 2 }));
    }

    #[test]
    fn iter_rows_handles_zero_width() {
        let m = Matrix::zeros(3, 0);
        assert_eq!(m.iter_rows().count(), 3);
        assert!(m.iter_rows().all(<[f32]>::is_empty));
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Gathered row k always equals source row indices[k].
        #[test]
        fn gather_matches_source_rows(
            rows in 1usize..8,
            cols in 1usize..6,
            picks in proptest::collection::vec(0usize..64, 0..12),
        ) {
            let data: Vec<f32> = (0..rows * cols).map(|i| i as f32).collect();
            let src = Matrix::from_vec(rows, cols, data).unwrap();
            let indices: Vec<usize> = picks.iter().map(|p| p % rows).collect();
            let out = src.gather(&indices).unwrap();
            prop_assert_eq!(out.rows(), indices.len());
            for (k, &i) in indices.iter().enumerate() {
                prop_assert_eq!(out.row(k), src.row(i));
            }
        }
    }
}
