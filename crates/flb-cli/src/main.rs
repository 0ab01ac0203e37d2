//! flb CLI binary entrypoint.
//!
//! This is the main entry point for the `flb` command-line tool.

use std::io;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use flb_cli::cli::{Cli, Commands};
use flb_cli::commands::{EnvoyImageCommand, SynthCommand, ValidateCommand};
use flb_cli::output::OutputFormat;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine readable
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(io::stderr)
            .init();
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();

    match &cli.command {
        Commands::Synth(args) => SynthCommand::new(args)
            .execute(&mut stdout, &format)
            .with_context(|| format!("synthesizing {}", args.config.display()))?,
        Commands::Validate(args) => ValidateCommand::new(args)
            .execute(&mut stdout, &format)
            .with_context(|| format!("validating {}", args.config.display()))?,
        Commands::EnvoyImage(args) => EnvoyImageCommand::new(args).execute(&mut stdout, &format)?,
    }

    Ok(())
}
