pub mod commands;

use clap::{Parser, Subcommand};
use reliant_core::config::{AppConfig, LoadOptions, LogFormat};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "reliant",
    about = "Reliant pricing engine operator CLI",
    long_about = "Inspect pricing configuration and artifacts, price ad-hoc requests, and build or evaluate residual artifacts from historical quotes.",
    after_help = "Examples:\n  reliant doctor --json\n  reliant predict --request quote.json\n  reliant build-artifacts --observations history.json --out-dir models"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Validate config and check that each pricing artifact loads")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Derive features for a pricing request and print the residual breakdown")]
    Predict {
        #[arg(long, help = "Path to a pricing request JSON file")]
        request: PathBuf,
    },
    #[command(about = "Build bucket statistics and the similarity index from historical quotes")]
    BuildArtifacts {
        #[arg(long, help = "Path to a JSON array of historical observations")]
        observations: PathBuf,
        #[arg(long, default_value = "models", help = "Directory to write artifacts into")]
        out_dir: PathBuf,
    },
    #[command(about = "Score the blended residual against historical quotes")]
    Evaluate {
        #[arg(long, help = "Path to a JSON array of historical observations")]
        observations: PathBuf,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Predict { request } => commands::predict::run(&request),
        Command::BuildArtifacts { observations, out_dir } => {
            commands::build_artifacts::run(&observations, &out_dir)
        }
        Command::Evaluate { observations } => commands::evaluate::run(&observations),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging() {
    use tracing::Level;

    let (level, format) = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            (config.logging.level.parse::<Level>().unwrap_or(Level::WARN), config.logging.format)
        }
        Err(_) => (Level::WARN, LogFormat::Compact),
    };

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_max_level(level);
    let _ = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
