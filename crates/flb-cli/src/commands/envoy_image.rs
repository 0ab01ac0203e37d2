//! Sidecar image lookup command.

use std::io::Write;

use flb_topology::EnvoyImage;

use crate::cli::EnvoyImageArgs;
use crate::error::CliError;
use crate::output::OutputFormat;

/// Envoy image command executor.
pub struct EnvoyImageCommand<'a> {
    args: &'a EnvoyImageArgs,
}

impl<'a> EnvoyImageCommand<'a> {
    /// Create a new envoy image command.
    #[must_use]
    pub const fn new(args: &'a EnvoyImageArgs) -> Self {
        Self { args }
    }

    /// Writes the repository and image URI for the region.
    ///
    /// # Errors
    ///
    /// Returns an error if output fails.
    pub fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        format.write(writer, &EnvoyImage::for_region(&self.args.region))
    }
}
