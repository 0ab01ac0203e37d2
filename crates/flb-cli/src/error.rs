//! CLI error types.

use flb_topology::TopologyError;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Loading, validation or synthesis failed.
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
