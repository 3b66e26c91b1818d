//! Beam-search hypothesis management.
//!
//! [`BeamSearchEngine`] owns the live [`Beam`], its [`Scoreboard`] and the
//! [`BackpointerTable`] for exactly one decode call. Each call to
//! [`BeamSearchEngine::step`] consumes a `beamsize × vocab_size` matrix of
//! log-probabilities, keeps the global top-`beamsize` expansions and tells
//! the caller which recurrent-state rows to carry forward.
//!
//! ```
//! use vcap_beam::BeamSearchEngine;
//! use vcap_common::{DecoderConfig, Matrix};
//!
//! let config = DecoderConfig::new(2, 0, 1, 4).unwrap();
//! let mut engine = BeamSearchEngine::new(&config).unwrap();
//!
//! // vocab = [eos, bos, "a", "b"]
//! let step0 = Matrix::broadcast_row(&[-3.0, -9.0, -0.2, -1.8], 2);
//! assert!(!engine.step(&step0, 0).unwrap());
//!
//! let (tokens, parents) = engine.get_inputs();
//! assert_eq!(tokens, vec![2, 3]);
//! assert_eq!(parents, vec![0, 0]);
//!
//! let step1 = Matrix::from_rows(&[[-0.1, -9.0, -2.5, -3.0], [-0.3, -9.0, -4.0, -1.5]]).unwrap();
//! assert!(engine.step(&step1, 1).unwrap());
//! assert_eq!(engine.get_output(0).unwrap(), vec![1, 2, 0]);
//! ```

mod backpointer;
mod engine;
mod hypothesis;

pub use backpointer::{Backpointer, BackpointerTable};
pub use engine::{BeamSearchEngine, StopReason, LOG_PROB_TOLERANCE};
pub use hypothesis::{Beam, Hypothesis, Scoreboard};
