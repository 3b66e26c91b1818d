//! Per-step parent/token records used to rebuild sequences.

use serde::Serialize;
use vcap_common::{DecodeError, Result, TokenId};

/// Which parent slot and emitted token produced a survivor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Backpointer {
    pub parent: usize,
    pub token: TokenId,
}

impl Backpointer {
    pub const fn new(parent: usize, token: TokenId) -> Self {
        Self { parent, token }
    }
}

/// One row of [`Backpointer`]s per decoding step, `beamsize` entries each.
///
/// ```
/// use vcap_beam::{Backpointer, BackpointerTable};
///
/// let mut table = BackpointerTable::new(2);
/// table.push_step(vec![Backpointer::new(0, 5), Backpointer::new(0, 6)]).unwrap();
/// table.push_step(vec![Backpointer::new(1, 7), Backpointer::new(0, 8)]).unwrap();
/// assert_eq!(table.tokens(0).unwrap(), vec![6, 7]);
/// assert_eq!(table.tokens(1).unwrap(), vec![5, 8]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackpointerTable {
    beamsize: usize,
    steps: Vec<Vec<Backpointer>>,
}

impl BackpointerTable {
    pub fn new(beamsize: usize) -> Self {
        Self { beamsize, steps: Vec::new() }
    }

    pub fn beamsize(&self) -> usize {
        self.beamsize
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Row recorded for `step`.
    pub fn step(&self, step: usize) -> Option<&[Backpointer]> {
        self.steps.get(step).map(Vec::as_slice)
    }

    /// Most recent row.
    pub fn last(&self) -> Option<&[Backpointer]> {
        self.steps.last().map(Vec::as_slice)
    }

    /// Append a row. It must hold exactly `beamsize` entries whose parents
    /// are valid slots.
    pub fn push_step(&mut self, row: Vec<Backpointer>) -> Result<()> {
        if row.len() != self.beamsize {
            return Err(DecodeError::DimensionMismatch {
                what: "backpointer row length",
                expected: self.beamsize,
                got: row.len(),
            });
        }
        if let Some(bad) = row.iter().find(|bp| bp.parent >= self.beamsize) {
            return Err(DecodeError::OutOfRange { index: bad.parent, len: self.beamsize });
        }
        self.steps.push(row);
        Ok(())
    }

    /// Walk backward from the final step and return the path of
    /// [`Backpointer`]s leading to `slot`, oldest first.
    pub fn path(&self, slot: usize) -> Result<Vec<Backpointer>> {
        if slot >= self.beamsize {
            return Err(DecodeError::OutOfRange { index: slot, len: self.beamsize });
        }
        let mut path = Vec::with_capacity(self.steps.len());
        let mut cursor = slot;
        for row in self.steps.iter().rev() {
            let bp = row[cursor];
            path.push(bp);
            cursor = bp.parent;
        }
        path.reverse();
        Ok(path)
    }

    /// Tokens emitted along the path to `slot`, oldest first.
    pub fn tokens(&self, slot: usize) -> Result<Vec<TokenId>> {
        Ok(self.path(slot)?.into_iter().map(|bp| bp.token).collect())
    }
}
