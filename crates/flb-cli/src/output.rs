//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;

use flb_topology::{DeclarationGraph, EnvoyImage, TopologyConfig};
use serde::Serialize;

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Get the current format.
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }

    /// Write a serializable value to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

impl TableDisplay for DeclarationGraph {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "{:<20}  {:<40}", "KIND", "NAME")?;
        writeln!(writer, "{}", "─".repeat(62))?;
        for decl in self.declarations() {
            writeln!(writer, "{:<20}  {:<40}", decl.kind.to_string(), decl.name)?;
        }

        if !self.exports().is_empty() {
            writeln!(writer)?;
            writeln!(writer, "Exports")?;
            for (name, value) in self.exports() {
                let value = value.as_str().map_or_else(|| value.to_string(), ToString::to_string);
                writeln!(writer, "  {name}: {value}")?;
            }
        }

        writeln!(writer)?;
        writeln!(writer, "Total: {} declaration(s)", self.len())?;
        Ok(())
    }
}

impl TableDisplay for EnvoyImage {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Repository:  {}", self.repository_arn)?;
        writeln!(writer, "Image:       {}", self.uri)?;
        Ok(())
    }
}

/// One gateway route in a validation report.
#[derive(Debug, Clone, Serialize)]
pub struct RouteSummary {
    /// Path prefix.
    pub prefix: String,
    /// Target service.
    pub service: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    /// Deployment region.
    pub region: String,
    /// Number of services.
    pub services: usize,
    /// Routes the gateway will carry.
    pub routes: Vec<RouteSummary>,
    /// Explicit service-to-service connections.
    pub connections: usize,
}

impl ValidationReport {
    /// Summarizes a configuration that passed validation.
    #[must_use]
    pub fn from_config(config: &TopologyConfig) -> Self {
        Self {
            region: config.stack.region.clone(),
            services: config.services.len(),
            routes: config
                .services
                .iter()
                .filter(|s| s.public)
                .map(|s| RouteSummary {
                    prefix: s.route_prefix(),
                    service: s.name.clone(),
                })
                .collect(),
            connections: config.services.iter().map(|s| s.backends.len()).sum(),
        }
    }
}

impl TableDisplay for ValidationReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Configuration valid")?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Region:       {}", self.region)?;
        writeln!(writer, "Services:     {}", self.services)?;
        writeln!(writer, "Connections:  {}", self.connections)?;
        if !self.routes.is_empty() {
            writeln!(writer)?;
            writeln!(writer, "Routes")?;
            for route in &self.routes {
                writeln!(writer, "  {:<24} -> {}", route.prefix, route.service)?;
            }
        }
        Ok(())
    }
}
