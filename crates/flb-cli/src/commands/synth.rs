//! Topology synthesis command.

use std::io::Write;

use flb_topology::{TopologyConfig, synthesize};
use tracing::info;

use crate::cli::SynthArgs;
use crate::error::CliError;
use crate::output::OutputFormat;

/// Synth command executor.
pub struct SynthCommand<'a> {
    args: &'a SynthArgs,
}

impl<'a> SynthCommand<'a> {
    /// Create a new synth command.
    #[must_use]
    pub const fn new(args: &'a SynthArgs) -> Self {
        Self { args }
    }

    /// Loads the configuration, applies overrides and writes the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if loading, validation, synthesis or output fails.
    pub fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let config = self.load()?;
        let (graph, topology) = synthesize(&config)?;
        info!(
            declarations = graph.len(),
            services = topology.services.len(),
            "synthesis complete"
        );
        format.write(writer, &graph)
    }

    /// Reads the configuration file with region and account overrides applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(&self) -> Result<TopologyConfig, CliError> {
        let mut config = TopologyConfig::from_file(&self.args.config)?;
        if let Some(region) = &self.args.region {
            config.stack = config.stack.with_region(region.clone());
        }
        if let Some(account) = &self.args.account {
            config.stack = config.stack.with_account(account.clone());
        }
        Ok(config)
    }
}
