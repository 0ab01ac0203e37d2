//! Configuration validation command.

use std::io::Write;

use flb_topology::TopologyConfig;

use crate::cli::ValidateArgs;
use crate::error::CliError;
use crate::output::{OutputFormat, ValidationReport};

/// Validate command executor.
pub struct ValidateCommand<'a> {
    args: &'a ValidateArgs,
}

impl<'a> ValidateCommand<'a> {
    /// Create a new validate command.
    #[must_use]
    pub const fn new(args: &'a ValidateArgs) -> Self {
        Self { args }
    }

    /// Validates the configuration and writes a summary.
    ///
    /// # Errors
    ///
    /// Returns the first validation problem, or an output error.
    pub fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let config = TopologyConfig::from_file(&self.args.config)?;
        config.validate()?;
        format.write(writer, &ValidationReport::from_config(&config))
    }
}
