//! CLI command implementations.
//!
//! Each submodule implements a specific CLI command:
//! - [`synth`] - Full topology synthesis
//! - [`validate`] - Configuration validation only
//! - [`envoy_image`] - Sidecar image lookup

pub mod envoy_image;
pub mod synth;
pub mod validate;

pub use envoy_image::EnvoyImageCommand;
pub use synth::SynthCommand;
pub use validate::ValidateCommand;
