//! Hypotheses, the fixed-width beam and its scoreboard.

use serde::Serialize;
use vcap_common::TokenId;

/// One candidate sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hypothesis {
    /// Tokens emitted so far, starting with the start-of-sequence token.
    /// A finished hypothesis ends with exactly one end-of-sequence token.
    pub tokens: Vec<TokenId>,
    /// Cumulative natural-log probability.
    pub score: f32,
    /// Slot of the previous step whose recurrent state this hypothesis owns.
    pub state_slot: usize,
    /// Whether end-of-sequence has been emitted.
    pub finished: bool,
}

impl Hypothesis {
    /// The shared start hypothesis every slot begins from.
    pub fn start(bos: TokenId, slot: usize) -> Self {
        Self { tokens: vec![bos], score: 0.0, state_slot: slot, finished: false }
    }

    /// Extend with `token`, adding `log_prob` to the score.
    ///
    /// Finished hypotheses are returned unchanged apart from `state_slot`:
    /// their sequence is frozen and their only expansion costs nothing.
    #[must_use]
    pub fn extend(&self, token: TokenId, log_prob: f32, parent: usize, eos: TokenId) -> Self {
        if self.finished {
            return Self { state_slot: parent, ..self.clone() };
        }
        let mut tokens = Vec::with_capacity(self.tokens.len() + 1);
        tokens.extend_from_slice(&self.tokens);
        tokens.push(token);
        Self { tokens, score: self.score + log_prob, state_slot: parent, finished: token == eos }
    }

    /// Last emitted token.
    pub fn last_token(&self) -> Option<TokenId> {
        self.tokens.last().copied()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Fixed-capacity set of hypotheses, ordered best first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Beam {
    hypotheses: Vec<Hypothesis>,
}

impl Beam {
    /// `beamsize` copies of the start hypothesis.
    pub fn start(bos: TokenId, beamsize: usize) -> Self {
        Self { hypotheses: (0..beamsize).map(|slot| Hypothesis::start(bos, slot)).collect() }
    }

    pub(crate) fn from_hypotheses(hypotheses: Vec<Hypothesis>) -> Self {
        Self { hypotheses }
    }

    pub fn len(&self) -> usize {
        self.hypotheses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hypotheses.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&Hypothesis> {
        self.hypotheses.get(slot)
    }

    /// Top-ranked hypothesis (slot 0).
    pub fn best(&self) -> Option<&Hypothesis> {
        self.hypotheses.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Hypothesis> {
        self.hypotheses.iter()
    }

    pub fn all_finished(&self) -> bool {
        !self.hypotheses.is_empty() && self.hypotheses.iter().all(|h| h.finished)
    }

    pub fn finished_count(&self) -> usize {
        self.hypotheses.iter().filter(|h| h.finished).count()
    }
}

impl std::ops::Index<usize> for Beam {
    type Output = Hypothesis;

    fn index(&self, slot: usize) -> &Hypothesis {
        &self.hypotheses[slot]
    }
}

impl<'a> IntoIterator for &'a Beam {
    type Item = &'a Hypothesis;
    type IntoIter = std::slice::Iter<'a, Hypothesis>;

    fn into_iter(self) -> Self::IntoIter {
        self.hypotheses.iter()
    }
}

/// Cumulative score per slot, the sole ranking key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scoreboard {
    scores: Vec<f32>,
}

impl Scoreboard {
    pub fn zeros(beamsize: usize) -> Self {
        Self { scores: vec![0.0; beamsize] }
    }

    pub(crate) fn from_beam(beam: &Beam) -> Self {
        Self { scores: beam.iter().map(|h| h.score).collect() }
    }

    pub fn get(&self, slot: usize) -> Option<f32> {
        self.scores.get(slot).copied()
    }

    /// Score of the top-ranked slot.
    pub fn best(&self) -> Option<f32> {
        self.scores.first().copied()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.scores
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}
