//! Integration tests for `DecodingLoop`.
//!
//! A scripted step function replays fixed log-probabilities and records the
//! inputs and state rows it receives, so state reindexing can be checked
//! exactly. The reference model covers determinism and concurrent decodes.

use std::cell::RefCell;
use std::ops::ControlFlow;

use vcap_beam::{BeamSearchEngine, StopReason};
use vcap_common::{DecodeError, DecoderConfig, Matrix, Result};
use vcap_decoder::{
    CellKind, DecodingLoop, EmbeddingTable, ModelConfig, RecurrentState, StepFunction, StepOutput,
};

// ── Helpers ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct Call {
    inputs: Vec<f32>,
    hidden: Vec<f32>,
}

/// Replays `script[i]` on call `i`. Each slot's one-wide hidden state
/// becomes `h * 8 + input + 1`, a unique encoding of everything fed to it.
struct Scripted {
    script: Vec<Matrix>,
    calls: RefCell<Vec<Call>>,
    state_rows: Option<usize>,
}

impl Scripted {
    fn new(script: Vec<Matrix>) -> Self {
        Self { script, calls: RefCell::new(Vec::new()), state_rows: None }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }
}

impl StepFunction for Scripted {
    fn vocab_size(&self) -> usize {
        self.script[0].cols()
    }

    fn step(&self, inputs: &Matrix, state: &RecurrentState) -> Result<StepOutput> {
        let mut calls = self.calls.borrow_mut();
        let log_probs = self
            .script
            .get(calls.len())
            .cloned()
            .ok_or(DecodeError::OutOfRange { index: calls.len(), len: self.script.len() })?;
        let x = inputs.as_slice().to_vec();
        let h = state.hidden().as_slice().to_vec();
        let next: Vec<f32> = h.iter().zip(&x).map(|(h, x)| h * 8.0 + x + 1.0).collect();
        calls.push(Call { inputs: x, hidden: h });

        let rows = self.state_rows.unwrap_or(next.len());
        let hidden = Matrix::from_vec(rows, 1, next[..rows].to_vec())?;
        Ok(StepOutput { log_probs, state: RecurrentState::hidden_only(hidden) })
    }
}

/// Embedding of token `t` is the single value `t`.
fn ordinal_embeddings(vocab: usize) -> EmbeddingTable {
    #[allow(clippy::cast_precision_loss)]
    let values = (0..vocab).map(|t| t as f32).collect();
    EmbeddingTable::new(Matrix::from_vec(vocab, 1, values).unwrap())
}

fn zero_state() -> RecurrentState {
    RecurrentState::hidden_only(Matrix::zeros(1, 1))
}

fn rows<R: AsRef<[f32]>>(r: &[R]) -> Matrix {
    Matrix::from_rows(r).unwrap()
}

/// vocab = [eos, bos, a, b, c], beamsize 2. Both survivors of step 1
/// descend from slot 1, then both terminate.
fn shared_parent_script() -> Vec<Matrix> {
    vec![
        Matrix::broadcast_row(&[-9.0, -9.0, -0.5, -0.7, -9.0], 2),
        rows(&[[-9.0, -9.0, -3.0, -3.0, -3.0], [-9.0, -9.0, -0.1, -0.2, -9.0]]),
        rows(&[[-0.1, -9.0, -9.0, -9.0, -9.0], [-0.3, -9.0, -9.0, -9.0, -9.0]]),
    ]
}

// ── State reindexing ──────────────────────────────────────────────────────

#[test]
fn state_rows_follow_parent_slots() {
    let model = Scripted::new(shared_parent_script());
    let embeddings = ordinal_embeddings(5);
    let config = DecoderConfig::new(2, 0, 1, 10).unwrap();
    let decoder = DecodingLoop::new(&model, &embeddings, config).unwrap();

    let out = decoder.decode(&zero_state()).unwrap();

    let calls = model.calls();
    assert_eq!(calls.len(), 3);
    // Step 0: start token everywhere, broadcast initial state.
    assert_eq!(calls[0], Call { inputs: vec![1.0, 1.0], hidden: vec![0.0, 0.0] });
    // Step 1: "a" and "b" both extend slot 0.
    assert_eq!(calls[1], Call { inputs: vec![2.0, 3.0], hidden: vec![2.0, 2.0] });
    // Step 2: both survivors descend from slot 1 ("b"), whose state is 2*8+3+1.
    assert_eq!(calls[2], Call { inputs: vec![2.0, 3.0], hidden: vec![20.0, 20.0] });

    assert_eq!(out.tokens, vec![1, 3, 2, 0]);
    assert_eq!(out.generated(), &[3, 2, 0]);
    assert!((out.score + 0.9).abs() < 1e-5);
    assert!(out.terminated);
    assert_eq!(out.steps, 3);
    assert_eq!(out.stop_reason, StopReason::EndOfSequence);
}

#[test]
fn caller_owned_engine_keeps_the_final_beam() {
    let model = Scripted::new(shared_parent_script());
    let embeddings = ordinal_embeddings(5);
    let config = DecoderConfig::new(2, 0, 1, 10).unwrap();
    let decoder = DecodingLoop::new(&model, &embeddings, config.clone()).unwrap();
    let mut engine = BeamSearchEngine::new(&config).unwrap();

    let out = decoder.run(&mut engine, &zero_state()).unwrap();

    let n_best = engine.n_best(2).unwrap();
    assert_eq!(n_best[0].0, out.tokens);
    assert_eq!(n_best[1].0, vec![1, 3, 3, 0]);
    assert!(engine.is_done());
}

// ── Termination ───────────────────────────────────────────────────────────

#[test]
fn step_budget_truncates_unterminated_output() {
    let step = Matrix::broadcast_row(&[-20.0, -20.0, -0.1, -0.4, -2.0], 2);
    let model = Scripted::new(vec![step.clone(), step.clone(), step]);
    let embeddings = ordinal_embeddings(5);
    let decoder =
        DecodingLoop::new(&model, &embeddings, DecoderConfig::new(2, 0, 1, 3).unwrap()).unwrap();

    let out = decoder.decode(&zero_state()).unwrap();

    assert_eq!(out.tokens, vec![1, 2, 2, 2]);
    assert!(!out.terminated);
    assert_eq!(out.steps, 3);
    assert_eq!(out.stop_reason, StopReason::MaxSteps);
    assert_eq!(model.calls().len(), 3);
}

#[test]
fn single_step_budget_emits_exactly_one_token() {
    let model = Scripted::new(vec![Matrix::broadcast_row(&[-2.0, -9.0, -0.3, -1.0], 3)]);
    let embeddings = ordinal_embeddings(4);
    let decoder =
        DecodingLoop::new(&model, &embeddings, DecoderConfig::new(3, 0, 1, 1).unwrap()).unwrap();

    let out = decoder.decode(&zero_state()).unwrap();

    assert_eq!(out.tokens, vec![1, 2]);
    assert_eq!(out.steps, 1);
    assert_eq!(out.stop_reason, StopReason::MaxSteps);
}

#[test]
fn observer_break_cancels_at_step_boundary() {
    let step = Matrix::broadcast_row(&[-20.0, -20.0, -0.1, -0.4, -2.0], 2);
    let model = Scripted::new(vec![step.clone(), step.clone(), step]);
    let embeddings = ordinal_embeddings(5);
    let config = DecoderConfig::new(2, 0, 1, 3).unwrap();
    let decoder = DecodingLoop::new(&model, &embeddings, config.clone()).unwrap();
    let mut engine = BeamSearchEngine::new(&config).unwrap();

    let out = decoder
        .run_with_observer(&mut engine, &zero_state(), |event| {
            if event.step == 1 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();

    assert_eq!(out.stop_reason, StopReason::Cancelled);
    assert_eq!(out.steps, 2);
    assert_eq!(out.tokens, vec![1, 2, 2]);
    assert_eq!(engine.stop_reason(), None);
    assert_eq!(model.calls().len(), 2);
}

// ── Contract violations ───────────────────────────────────────────────────

#[test]
fn step_function_must_keep_one_state_row_per_slot() {
    let mut model = Scripted::new(shared_parent_script());
    model.state_rows = Some(1);
    let embeddings = ordinal_embeddings(5);
    let decoder =
        DecodingLoop::new(&model, &embeddings, DecoderConfig::new(2, 0, 1, 10).unwrap()).unwrap();

    let err = decoder.decode(&zero_state()).unwrap_err();
    assert!(matches!(
        err,
        DecodeError::DimensionMismatch { what: "step state rows", expected: 2, got: 1 }
    ));
}

#[test]
fn changing_vocab_width_mid_decode_is_rejected() {
    let model = Scripted::new(vec![
        Matrix::broadcast_row(&[-9.0, -9.0, -0.5, -0.7, -9.0], 2),
        Matrix::broadcast_row(&[-9.0, -9.0, -0.5, -0.7], 2),
    ]);
    let embeddings = ordinal_embeddings(5);
    let decoder =
        DecodingLoop::new(&model, &embeddings, DecoderConfig::new(2, 0, 1, 10).unwrap()).unwrap();

    let err = decoder.decode(&zero_state()).unwrap_err();
    assert!(matches!(err, DecodeError::ShapeMismatch { expected_cols: 5, cols: 4, .. }));
}

#[test]
fn multi_row_initial_state_is_rejected() {
    let model = Scripted::new(shared_parent_script());
    let embeddings = ordinal_embeddings(5);
    let decoder =
        DecodingLoop::new(&model, &embeddings, DecoderConfig::new(2, 0, 1, 10).unwrap()).unwrap();

    let err = decoder.decode(&RecurrentState::hidden_only(Matrix::zeros(2, 1))).unwrap_err();
    assert!(matches!(err, DecodeError::DimensionMismatch { what: "initial state rows", .. }));
    assert!(model.calls().is_empty());
}

// ── Reference model ───────────────────────────────────────────────────────

fn reference(cell: CellKind) -> ModelConfig {
    ModelConfig { cell, vocab_size: 12, input_dim: 6, hidden_dim: 8, seed: 5 }
}

fn feature() -> Vec<f32> {
    vec![0.4, -0.1, 0.25, 0.0, -0.6, 0.3, 0.05, -0.2]
}

#[test]
fn reference_model_decodes_deterministically() {
    for cell in [CellKind::Lstm, CellKind::Gru, CellKind::Rnn] {
        let (model, embeddings) = reference(cell).build().unwrap();
        let config = DecoderConfig::new(3, 0, 1, 8).unwrap();
        let decoder = DecodingLoop::new(&model, &embeddings, config).unwrap();
        let initial = model.init_state(&feature()).unwrap();

        let a = decoder.decode(&initial).unwrap();
        let b = decoder.decode(&initial).unwrap();

        assert_eq!(a.tokens, b.tokens, "{cell}");
        assert_eq!(a.score.to_bits(), b.score.to_bits(), "{cell}");
        assert_eq!(a.stop_reason, b.stop_reason, "{cell}");

        assert_eq!(a.tokens[0], 1);
        assert!(a.tokens.len() <= 9);
        assert!(a.score <= 0.0);
        let eos_at = a.tokens.iter().position(|&t| t == 0);
        assert!(eos_at.map_or(true, |i| i == a.tokens.len() - 1), "{cell}: {:?}", a.tokens);
        assert_eq!(a.terminated, eos_at.is_some());
    }
}

#[test]
fn independent_decodes_share_the_model_across_threads() {
    let (model, embeddings) = reference(CellKind::Lstm).build().unwrap();
    let config = DecoderConfig::new(2, 0, 1, 6).unwrap();
    let decoder = DecodingLoop::new(&model, &embeddings, config).unwrap();
    let initial = model.init_state(&feature()).unwrap();
    let serial = decoder.decode(&initial).unwrap();

    let outputs: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4).map(|_| s.spawn(|| decoder.decode(&initial))).collect();
        handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect()
    });

    for out in outputs {
        assert_eq!(out.tokens, serial.tokens);
        assert_eq!(out.score.to_bits(), serial.score.to_bits());
    }
}
