//! The step-by-step decoding loop.

use std::ops::ControlFlow;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument};
use vcap_beam::{BeamSearchEngine, StopReason};
use vcap_common::{DecodeError, DecoderConfig, Result, TokenId};

use crate::state::RecurrentState;
use crate::step::{EmbeddingLookup, StepFunction};

/// Progress report handed to an observer after every engine step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepEvent {
    /// Index of the step that just completed.
    pub step: usize,
    /// Cumulative score of the best live hypothesis.
    pub best_score: f32,
    /// Slots that have emitted end-of-sequence.
    pub finished: usize,
}

/// Best sequence of a decode and how the decode ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodeOutput {
    /// Start token first; ends with end-of-sequence when `terminated`.
    pub tokens: Vec<TokenId>,
    /// Cumulative natural-log probability of `tokens`.
    pub score: f32,
    /// Whether the best sequence emitted end-of-sequence.
    pub terminated: bool,
    /// Engine steps taken.
    pub steps: usize,
    pub stop_reason: StopReason,
    pub elapsed_ms: f64,
}

impl DecodeOutput {
    /// Tokens after the start token.
    pub fn generated(&self) -> &[TokenId] {
        self.tokens.get(1..).unwrap_or_default()
    }
}

/// Drives a [`BeamSearchEngine`] with a model and an embedding table.
///
/// The loop owns the beam's recurrent state. After every step it gathers
/// the state rows each surviving slot descends from into new buffers, so
/// sibling slots never share state. The model and the embeddings are only
/// borrowed and may be shared across concurrent decodes.
#[derive(Debug, Clone)]
pub struct DecodingLoop<S, E> {
    step_fn: S,
    embeddings: E,
    config: DecoderConfig,
}

impl<S: StepFunction, E: EmbeddingLookup> DecodingLoop<S, E> {
    /// Checks the configuration against the model's vocabulary.
    pub fn new(step_fn: S, embeddings: E, config: DecoderConfig) -> Result<Self> {
        config.validate()?;
        config.validate_vocab(step_fn.vocab_size())?;
        Ok(Self { step_fn, embeddings, config })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode with a fresh engine built from this loop's configuration.
    pub fn decode(&self, initial: &RecurrentState) -> Result<DecodeOutput> {
        let mut engine = BeamSearchEngine::new(&self.config)?;
        self.run(&mut engine, initial)
    }

    /// Decode into a caller-owned engine, which is left holding the final
    /// beam for inspection (`n_best`, backpointers).
    pub fn run(
        &self,
        engine: &mut BeamSearchEngine,
        initial: &RecurrentState,
    ) -> Result<DecodeOutput> {
        self.run_with_observer(engine, initial, |_| ControlFlow::Continue(()))
    }

    /// Like [`run`](Self::run), calling `observer` after every step.
    ///
    /// Returning [`ControlFlow::Break`] abandons the decode at that step
    /// boundary; the output then holds the best partial sequence with
    /// [`StopReason::Cancelled`]. The observer's answer is ignored once
    /// the engine has already stopped.
    #[instrument(skip_all, fields(beamsize = engine.beamsize(), max_steps = self.config.max_steps))]
    pub fn run_with_observer<F>(
        &self,
        engine: &mut BeamSearchEngine,
        initial: &RecurrentState,
        mut observer: F,
    ) -> Result<DecodeOutput>
    where
        F: FnMut(&StepEvent) -> ControlFlow<()>,
    {
        if engine.is_done() {
            return Err(DecodeError::AlreadyTerminated { steps: engine.steps_taken() });
        }
        if engine.steps_taken() != 0 {
            return Err(DecodeError::StepIndexMismatch { expected: 0, got: engine.steps_taken() });
        }

        let started = Instant::now();
        let beamsize = engine.beamsize();
        let mut state = initial.broadcast(beamsize)?;
        let mut cancelled = false;

        for step in 0.. {
            let (tokens, parents) = engine.get_inputs();
            if step > 0 {
                state = state.gather(&parents)?;
            }
            let inputs = self.embeddings.lookup_batch(&tokens)?;
            let output = self.step_fn.step(&inputs, &state)?;
            if output.state.rows() != beamsize {
                return Err(DecodeError::DimensionMismatch {
                    what: "step state rows",
                    expected: beamsize,
                    got: output.state.rows(),
                });
            }

            let stop = engine.step(&output.log_probs, step)?;
            state = output.state;

            let event = StepEvent {
                step,
                best_score: engine.scores().best().unwrap_or(f32::NEG_INFINITY),
                finished: engine.beam().finished_count(),
            };
            let flow = observer(&event);
            if stop {
                break;
            }
            if flow.is_break() {
                debug!(step, "decode cancelled by observer");
                cancelled = true;
                break;
            }
        }

        let stop_reason = match engine.stop_reason() {
            Some(reason) => reason,
            None if cancelled => StopReason::Cancelled,
            None => StopReason::MaxSteps,
        };
        let best = &engine.beam()[0];
        let output = DecodeOutput {
            tokens: engine.get_output(0)?,
            score: best.score,
            terminated: best.finished,
            steps: engine.steps_taken(),
            stop_reason,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        };
        info!(
            steps = output.steps,
            score = output.score,
            stop_reason = %output.stop_reason,
            elapsed_ms = output.elapsed_ms,
            "decode finished"
        );
        Ok(output)
    }
}
