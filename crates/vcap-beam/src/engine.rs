//! Beam-search engine.
//!
//! Selection is a global top-`beamsize` over every `(slot, token)` expansion,
//! ranked by cumulative log-probability with ties going to the lower
//! flattened index `slot * vocab_size + token`. A single strong slot may
//! therefore supply several survivors while a weak slot supplies none.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;
use tracing::{debug, trace};
use vcap_common::{DecodeError, DecoderConfig, Matrix, Result, TokenId};

use crate::backpointer::{Backpointer, BackpointerTable};
use crate::hypothesis::{Beam, Scoreboard};

/// Positive log-probabilities up to this magnitude are treated as rounding
/// noise from log-softmax and clamped to zero.
pub const LOG_PROB_TOLERANCE: f32 = 1e-5;

// ── Stop reason ───────────────────────────────────────────────────────────

/// Why a decode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every slot has emitted end-of-sequence.
    EndOfSequence,
    /// The step budget ran out; the best sequence may be unterminated.
    MaxSteps,
    /// The caller abandoned the decode at a step boundary.
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EndOfSequence => "end_of_sequence",
            Self::MaxSteps => "max_steps",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

// ── Candidates ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Candidate {
    /// Cumulative score if this expansion is kept.
    score: f32,
    /// Log-probability added by this expansion.
    log_prob: f32,
    /// `slot * vocab_size + token`.
    flat: usize,
}

/// Best first; ties go to the lower flattened index.
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal).then_with(|| a.flat.cmp(&b.flat))
}

/// Keep the top `k` candidates in rank order, padding with copies of the
/// last survivor when fewer than `k` exist.
fn select_top(mut candidates: Vec<Candidate>, k: usize) -> Vec<Candidate> {
    if candidates.len() > k {
        candidates.select_nth_unstable_by(k - 1, rank);
        candidates.truncate(k);
    }
    candidates.sort_by(rank);
    if let Some(&last) = candidates.last() {
        candidates.resize(k, last);
    }
    candidates
}

// ── Engine ────────────────────────────────────────────────────────────────

/// Hypothesis manager for a single decode call.
///
/// The engine never touches recurrent state; after each [`step`] the caller
/// reads [`get_inputs`] to learn which state row each new slot descends from.
///
/// [`step`]: BeamSearchEngine::step
/// [`get_inputs`]: BeamSearchEngine::get_inputs
#[derive(Debug, Clone)]
pub struct BeamSearchEngine {
    beamsize: usize,
    eos: TokenId,
    bos: TokenId,
    max_steps: usize,
    vocab_size: Option<usize>,
    beam: Beam,
    scoreboard: Scoreboard,
    backpointers: BackpointerTable,
    steps_taken: usize,
    stop_reason: Option<StopReason>,
}

impl BeamSearchEngine {
    /// Create an engine with `beamsize` copies of the start hypothesis.
    pub fn new(config: &DecoderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            beamsize: config.beamsize,
            eos: config.eos_index,
            bos: config.bos_index,
            max_steps: config.max_steps,
            vocab_size: None,
            beam: Beam::start(config.bos_index, config.beamsize),
            scoreboard: Scoreboard::zeros(config.beamsize),
            backpointers: BackpointerTable::new(config.beamsize),
            steps_taken: 0,
            stop_reason: None,
        })
    }

    /// Advance the beam by one step.
    ///
    /// `log_probs` must be `beamsize × vocab_size`, one log-softmax row per
    /// slot. Returns `true` when decoding should stop, either because every
    /// slot has emitted end-of-sequence or because `step_index` was the last
    /// step of the budget.
    ///
    /// # Errors
    ///
    /// - shape, value or step-order problems in the input (`InvalidInput`);
    /// - a call after `true` was already returned (`InvalidState`).
    pub fn step(&mut self, log_probs: &Matrix, step_index: usize) -> Result<bool> {
        if self.stop_reason.is_some() {
            return Err(DecodeError::AlreadyTerminated { steps: self.steps_taken });
        }
        if step_index != self.steps_taken {
            return Err(DecodeError::StepIndexMismatch {
                expected: self.steps_taken,
                got: step_index,
            });
        }
        let vocab = self.check_shape(log_probs)?;
        validate_rows(log_probs)?;

        let candidates = self.expand(log_probs, vocab, step_index);
        let survivors = select_top(candidates, self.beamsize);

        let mut row = Vec::with_capacity(self.beamsize);
        let mut hypotheses = Vec::with_capacity(self.beamsize);
        for c in &survivors {
            let parent = c.flat / vocab;
            #[allow(clippy::cast_possible_truncation)]
            let token = (c.flat % vocab) as TokenId;
            let next = self.beam[parent].extend(token, c.log_prob, parent, self.eos);
            trace!(step = step_index, parent, token, score = next.score, "survivor");
            row.push(Backpointer::new(parent, token));
            hypotheses.push(next);
        }
        self.backpointers.push_step(row)?;
        self.beam = Beam::from_hypotheses(hypotheses);
        self.scoreboard = Scoreboard::from_beam(&self.beam);
        self.steps_taken += 1;

        if self.beam.all_finished() {
            self.stop_reason = Some(StopReason::EndOfSequence);
        } else if self.steps_taken >= self.max_steps {
            self.stop_reason = Some(StopReason::MaxSteps);
        }

        debug!(
            step = step_index,
            best_score = self.scoreboard.best().unwrap_or(f32::NEG_INFINITY),
            finished = self.beam.finished_count(),
            stop = ?self.stop_reason,
            "beam step"
        );
        Ok(self.stop_reason.is_some())
    }

    /// Last emitted token and owning parent slot of every live hypothesis.
    ///
    /// Before the first step every slot holds the start token and owns its
    /// own (identical) state row.
    pub fn get_inputs(&self) -> (Vec<TokenId>, Vec<usize>) {
        match self.backpointers.last() {
            Some(row) => row.iter().map(|bp| (bp.token, bp.parent)).unzip(),
            None => (vec![self.bos; self.beamsize], (0..self.beamsize).collect()),
        }
    }

    /// Rebuild the sequence held by `index` (0 is the best) from the
    /// backpointers. The sequence starts with the start token and ends at
    /// the first end-of-sequence token if one was emitted.
    pub fn get_output(&self, index: usize) -> Result<Vec<TokenId>> {
        if index >= self.beamsize {
            return Err(DecodeError::OutOfRange { index, len: self.beamsize });
        }
        let mut tokens = Vec::with_capacity(self.backpointers.len() + 1);
        tokens.push(self.bos);
        for token in self.backpointers.tokens(index)? {
            tokens.push(token);
            if token == self.eos {
                break;
            }
        }
        Ok(tokens)
    }

    /// The `k` best sequences with their scores, best first.
    pub fn n_best(&self, k: usize) -> Result<Vec<(Vec<TokenId>, f32)>> {
        (0..k.min(self.beamsize))
            .map(|slot| {
                let score = self.scoreboard.get(slot).unwrap_or(f32::NEG_INFINITY);
                Ok((self.get_output(slot)?, score))
            })
            .collect()
    }

    pub fn beamsize(&self) -> usize {
        self.beamsize
    }

    /// Vocabulary size fixed by the first step.
    pub fn vocab_size(&self) -> Option<usize> {
        self.vocab_size
    }

    pub fn beam(&self) -> &Beam {
        &self.beam
    }

    pub fn scores(&self) -> &Scoreboard {
        &self.scoreboard
    }

    pub fn backpointers(&self) -> &BackpointerTable {
        &self.backpointers
    }

    pub fn steps_taken(&self) -> usize {
        self.steps_taken
    }

    pub fn is_done(&self) -> bool {
        self.stop_reason.is_some()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    fn check_shape(&mut self, log_probs: &Matrix) -> Result<usize> {
        let (rows, cols) = log_probs.shape();
        let expected_cols = self.vocab_size.unwrap_or(cols).max(1);
        if rows != self.beamsize || cols != expected_cols {
            return Err(DecodeError::ShapeMismatch {
                expected_rows: self.beamsize,
                expected_cols,
                rows,
                cols,
            });
        }
        if self.vocab_size.is_none() {
            for (what, index) in [("eos_index", self.eos), ("bos_index", self.bos)] {
                if index as usize >= cols {
                    return Err(DecodeError::DimensionMismatch {
                        what,
                        expected: index as usize + 1,
                        got: cols,
                    });
                }
            }
            self.vocab_size = Some(cols);
        }
        Ok(cols)
    }

    fn expand(&self, log_probs: &Matrix, vocab: usize, step_index: usize) -> Vec<Candidate> {
        // Every slot holds the identical start hypothesis at step 0.
        let live_slots = if step_index == 0 { 1 } else { self.beamsize };
        let mut candidates = Vec::with_capacity(live_slots * vocab);
        for (slot, hyp) in self.beam.iter().enumerate().take(live_slots) {
            if hyp.finished {
                candidates.push(Candidate {
                    score: hyp.score,
                    log_prob: 0.0,
                    flat: slot * vocab + self.eos as usize,
                });
                continue;
            }
            for (token, &lp) in log_probs.row(slot).iter().enumerate() {
                let lp = lp.min(0.0);
                candidates.push(Candidate {
                    score: hyp.score + lp,
                    log_prob: lp,
                    flat: slot * vocab + token,
                });
            }
        }
        candidates
    }
}

fn validate_rows(log_probs: &Matrix) -> Result<()> {
    for (slot, row) in log_probs.iter_rows().enumerate() {
        for (token, &value) in row.iter().enumerate() {
            let valid = value == f32::NEG_INFINITY
                || (value.is_finite() && value <= LOG_PROB_TOLERANCE);
            if !valid {
                return Err(DecodeError::InvalidLogProb { slot, token, value });
            }
        }
    }
    Ok(())
}
