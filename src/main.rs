//! Pcmscope CLI - Audio Capture and Analysis
//!
//! Command-line interface for the pcmscope engine.

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::info;

use pcmscope::cli::commands::{self, Printer};
use pcmscope::cli::{Cli, Commands};
use pcmscope::engine::SweptTone;
use pcmscope::EngineConfig;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    info!("Pcmscope v{}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let printer = Printer::new(cli.json, &config);

    match cli.command {
        Some(cmd) => handle_command(cmd, config, printer, cli.json),
        None => {
            println!("Pcmscope v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(
    cmd: Commands,
    config: EngineConfig,
    printer: Printer,
    json: bool,
) -> anyhow::Result<()> {
    match cmd {
        Commands::Negotiate {
            input_rates,
            input_channels,
            output_rates,
            output_channels,
            tone,
        } => commands::negotiate(
            input_rates,
            input_channels,
            output_rates,
            output_channels,
            tone,
            json,
        )?,
        Commands::Tone {
            start,
            end,
            amplitude,
            seconds,
            export,
        } => commands::tone(
            config,
            printer,
            SweptTone::new(start, end, amplitude),
            seconds,
            export.as_deref(),
        )?,
        Commands::Analyze { file, seconds } => {
            commands::analyze(config, printer, &file, seconds)
                .with_context(|| format!("analyzing {}", file.display()))?
        }
        Commands::Record {
            seconds,
            signal,
            export,
        } => commands::record(config, printer, seconds, signal.as_deref(), export)?,
    }
    Ok(())
}
