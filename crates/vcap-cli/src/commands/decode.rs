//! `vcap decode`: caption a visual feature with the seeded reference model.

use anyhow::{Context, Result};
use clap::Args;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info};
use vcap_beam::BeamSearchEngine;
use vcap_decoder::{CellKind, DecodeOutput, DecodingLoop};

use crate::config::CliConfig;
use crate::output::{join_tokens, OutputFormat};

/// Decode a caption for one visual feature vector.
#[derive(Args, Debug, Default)]
pub struct DecodeCommand {
    /// Hypotheses kept per step
    #[arg(short, long, value_name = "N")]
    pub beamsize: Option<usize>,

    /// Step budget
    #[arg(long, value_name = "N")]
    pub max_steps: Option<usize>,

    /// Recurrent cell (lstm, gru, rnn)
    #[arg(long, value_name = "KIND")]
    pub cell: Option<CellKind>,

    /// Vocabulary size of the reference model
    #[arg(long, value_name = "N")]
    pub vocab_size: Option<usize>,

    /// Hidden width; the feature must have this many values
    #[arg(long, value_name = "N")]
    pub hidden_dim: Option<usize>,

    /// Seed for model weights and the synthetic feature
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Comma-separated feature values (default: synthetic, from the seed)
    #[arg(long, value_name = "VALUES", allow_hyphen_values = true)]
    pub feature: Option<String>,

    /// Output format (text, json)
    #[arg(long, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Also report the K best beam slots
    #[arg(long, value_name = "K")]
    pub n_best: Option<usize>,
}

#[derive(Debug, Serialize)]
struct Ranked {
    tokens: Vec<u32>,
    score: f32,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    #[serde(flatten)]
    best: &'a DecodeOutput,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    n_best: Vec<Ranked>,
}

impl DecodeCommand {
    /// Fold flag values over the file/env configuration.
    pub fn resolve(&self, base: &CliConfig) -> Result<CliConfig> {
        let mut config = base.clone();
        if let Some(n) = self.beamsize {
            config.decoder.beamsize = n;
        }
        if let Some(n) = self.max_steps {
            config.decoder.max_steps = n;
        }
        if let Some(cell) = self.cell {
            config.model.cell = cell;
        }
        if let Some(n) = self.vocab_size {
            config.model.vocab_size = n;
        }
        if let Some(n) = self.hidden_dim {
            config.model.hidden_dim = n;
        }
        if let Some(seed) = self.seed {
            config.model.seed = seed;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn execute(&self, base: &CliConfig) -> Result<()> {
        let config = self.resolve(base)?;
        let (model, embeddings) = config.model.build().context("Failed to build reference model")?;
        let feature = match &self.feature {
            Some(raw) => parse_feature(raw)?,
            None => synthetic_feature(config.model.hidden_dim, config.model.seed),
        };
        debug!(len = feature.len(), "visual feature ready");
        let initial = model.init_state(&feature).context("Feature does not fit the model")?;

        let decoder = DecodingLoop::new(&model, &embeddings, config.decoder.clone())?;
        let mut engine = BeamSearchEngine::new(decoder.config())?;
        let output = decoder.run(&mut engine, &initial).context("Decoding failed")?;
        info!(tokens = output.tokens.len(), stop_reason = %output.stop_reason, "decoded");

        let n_best = match self.n_best {
            Some(k) => engine
                .n_best(k)?
                .into_iter()
                .map(|(tokens, score)| Ranked { tokens, score })
                .collect(),
            None => Vec::new(),
        };
        let report = Report { best: &output, n_best };

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(&report).context("Failed to encode result")?);
            }
            OutputFormat::Text => print_text(&report),
        }
        Ok(())
    }
}

fn print_text(report: &Report<'_>) {
    let best = report.best;
    println!("tokens: {}", join_tokens(&best.tokens));
    println!("score: {:.4}", best.score);
    println!("steps: {}", best.steps);
    println!("stop_reason: {}", best.stop_reason);
    for (rank, hyp) in report.n_best.iter().enumerate() {
        println!("#{rank} {:.4}: {}", hyp.score, join_tokens(&hyp.tokens));
    }
}

/// Parse `"0.1, -0.2,0.3"`.
pub fn parse_feature(raw: &str) -> Result<Vec<f32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.parse::<f32>().with_context(|| format!("Invalid feature value {v:?}")))
        .collect()
}

/// Uniform `[-1, 1)` feature derived from the model seed.
pub fn synthetic_feature(dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));
    (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect()
}
