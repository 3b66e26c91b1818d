//! vcap CLI
//!
//! Beam-search caption decoding from the command line, driven by a seeded
//! reference recurrent language model.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{debug, error};

mod commands;
mod config;
mod output;

use commands::DecodeCommand;
use config::CliConfig;

const EXIT_GENERIC_FAIL: i32 = 1;

/// vcap - beam-search decoding for recurrent caption models
#[derive(Parser)]
#[command(name = "vcap")]
#[command(about = "Beam-search decoding for recurrent caption models")]
#[command(long_about = r#"
vcap decodes a caption for a visual feature vector with beam search over a
recurrent language model (LSTM, GRU or Elman cell). The bundled model is
randomly initialised from a seed, which makes every run reproducible.

Examples:
  # Decode with the default configuration
  vcap decode

  # Wider beam, GRU cell, JSON output
  vcap decode --beamsize 5 --cell gru --format json

  # Supply the feature explicitly (length must equal hidden_dim)
  vcap decode --hidden-dim 4 --feature "0.1,-0.3,0.7,0.0"

  # Inspect the effective configuration
  vcap config show --config vcap.toml
"#)]
#[command(version)]
#[command(author = "vcap Contributors")]
struct Cli {
    /// Configuration file path (default: ./vcap.toml if present)
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a caption
    Decode(DecodeCommand),

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Check the configuration and exit
    Validate,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            // Logging is not configured yet.
            eprintln!("Error: {e:#}");
            std::process::exit(EXIT_GENERIC_FAIL);
        }
    };

    setup_logging(&config, cli.log_level.as_deref())?;
    debug!(?config, "configuration loaded");

    let result = match cli.command {
        Some(Commands::Decode(cmd)) => cmd.execute(&config),
        Some(Commands::Config { action }) => handle_config_command(&action, &config),
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);

        let mut source = e.source();
        while let Some(err) = source {
            error!("  Caused by: {}", err);
            source = err.source();
        }
        eprintln!("Error: {e:#}");

        std::process::exit(EXIT_GENERIC_FAIL);
    }

    Ok(())
}

/// File, then `VCAP_*` environment.
fn load_configuration(cli: &Cli) -> Result<CliConfig> {
    CliConfig::load(cli.config.as_deref())?.with_env_overrides()
}

fn setup_logging(config: &CliConfig, log_level_override: Option<&str>) -> Result<()> {
    let level = log_level_override.unwrap_or(&config.logging.level);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level {level:?}"))?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match config.logging.format.as_str() {
        "json" => {
            subscriber.json().with_timer(tracing_subscriber::fmt::time::uptime()).init();
        }
        "pretty" => {
            subscriber.pretty().init();
        }
        _ => {
            subscriber.compact().init();
        }
    }

    Ok(())
}

fn handle_config_command(action: &ConfigAction, config: &CliConfig) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let text =
                toml::to_string_pretty(config).context("Failed to serialize configuration")?;
            println!("{text}");
        }
        ConfigAction::Validate => {
            config.validate()?;
            println!("configuration is valid");
        }
    }
    Ok(())
}
