//! # flb-cli
//!
//! Command-line interface for the mesh topology synthesizer.
//!
//! Provides commands for:
//! - Synthesizing a topology into its full declaration set
//! - Validating a topology configuration
//! - Looking up the regional sidecar image
//!
//! Configuration files are JSON documents deserialized into
//! [`flb_topology::TopologyConfig`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{Cli, Commands, EnvoyImageArgs, Format, SynthArgs, ValidateArgs};
pub use error::CliError;
pub use output::OutputFormat;
