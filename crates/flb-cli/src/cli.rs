//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// flb - mesh topology synthesizer.
#[derive(Parser, Debug, Clone)]
#[command(name = "flb")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(short, long, global = true, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[derive(Default)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Validate a topology and print every declaration.
    Synth(SynthArgs),

    /// Validate a topology without declaring anything.
    Validate(ValidateArgs),

    /// Show the sidecar image for a region.
    EnvoyImage(EnvoyImageArgs),
}

/// Arguments for `flb synth`.
#[derive(Args, Debug, Clone)]
pub struct SynthArgs {
    /// Topology configuration file (JSON).
    #[arg(short, long)]
    pub config: PathBuf,

    /// Deployment region, overrides the configuration file.
    #[arg(long, env = "CDK_DEFAULT_REGION")]
    pub region: Option<String>,

    /// Deployment account, overrides the configuration file.
    #[arg(long, env = "CDK_DEFAULT_ACCOUNT")]
    pub account: Option<String>,
}

/// Arguments for `flb validate`.
#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// Topology configuration file (JSON).
    #[arg(short, long)]
    pub config: PathBuf,
}

/// Arguments for `flb envoy-image`.
#[derive(Args, Debug, Clone)]
pub struct EnvoyImageArgs {
    /// Deployment region.
    #[arg(long, env = "CDK_DEFAULT_REGION", default_value = "ap-east-1")]
    pub region: String,
}
