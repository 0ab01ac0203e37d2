//! Error types for topology synthesis.
//!
//! Two layers of failure exist: [`EngineError`] is raised by a
//! [`ProvisioningEngine`](crate::engine::ProvisioningEngine) when a
//! declaration is rejected, and [`TopologyError`] covers everything the
//! synthesizer itself rejects (mostly input validation).

use thiserror::Error;

use crate::engine::ResourceKind;

/// Result type alias for topology operations.
pub type TopologyResult<T> = Result<T, TopologyError>;

/// Errors raised by a provisioning engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A resource with the same kind and name was already declared.
    #[error("{kind} '{name}' is already declared")]
    NameCollision {
        /// Kind of the colliding resource.
        kind: ResourceKind,
        /// Colliding name.
        name: String,
    },

    /// The referenced resource has not been declared.
    #[error("resource {handle} has not been declared")]
    UnknownResource {
        /// Logical id of the missing resource.
        handle: String,
    },

    /// The resource kind does not expose the requested attribute.
    #[error("{kind} does not expose attribute '{attribute}'")]
    UnsupportedAttribute {
        /// Kind of the referenced resource.
        kind: ResourceKind,
        /// Requested attribute.
        attribute: String,
    },

    /// A declaration references a resource that does not exist yet.
    #[error("{kind} '{name}' references undeclared resource via {token}")]
    DanglingReference {
        /// Kind of the declaring resource.
        kind: ResourceKind,
        /// Name of the declaring resource.
        name: String,
        /// The offending token.
        token: String,
    },

    /// An export with the same name was already published.
    #[error("export '{name}' is already published")]
    ExportCollision {
        /// Colliding export name.
        name: String,
    },

    /// A resource specification could not be serialized.
    #[error("failed to serialize spec for {kind} '{name}': {message}")]
    Serialization {
        /// Kind of the resource.
        kind: ResourceKind,
        /// Name of the resource.
        name: String,
        /// Serializer message.
        message: String,
    },
}

/// Errors that can occur while synthesizing a topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    /// The provisioning engine rejected a declaration.
    #[error("provisioning engine error: {0}")]
    Engine(#[from] EngineError),

    /// Two service definitions share the same name.
    #[error("duplicate service name: {name}")]
    DuplicateService {
        /// The duplicated name.
        name: String,
    },

    /// A service name is already taken by a shared component.
    #[error("service name '{name}' is reserved")]
    ReservedName {
        /// The reserved name.
        name: String,
    },

    /// A service name is not a valid DNS label.
    #[error("invalid service name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A listening port is outside the allowed range.
    #[error("invalid port {port} for service '{service}': {reason}")]
    InvalidPort {
        /// Service owning the port.
        service: String,
        /// The rejected port.
        port: u16,
        /// Why it was rejected.
        reason: String,
    },

    /// Two gateway routes would match overlapping paths.
    #[error("route prefix '{first}' overlaps '{second}'")]
    OverlappingRoutes {
        /// First prefix.
        first: String,
        /// Second prefix.
        second: String,
    },

    /// A service definition is otherwise malformed.
    #[error("invalid definition for service '{service}': {reason}")]
    InvalidDefinition {
        /// Offending service.
        service: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A service lists a backend that is not defined.
    #[error("service '{service}' depends on unknown backend '{backend}'")]
    UnknownBackend {
        /// Calling service.
        service: String,
        /// Missing backend.
        backend: String,
    },

    /// A service lists itself as a backend.
    #[error("service '{service}' cannot be its own backend")]
    SelfBackend {
        /// Offending service.
        service: String,
    },

    /// Two different connections would declare resources under one name.
    #[error("{kind} name '{name}' would be derived twice from the service names")]
    AmbiguousName {
        /// Kind of the derived resource.
        kind: ResourceKind,
        /// The derived name.
        name: String,
    },

    /// Stack-level settings are invalid or could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TopologyError {
    /// Creates an invalid definition error.
    #[must_use]
    pub fn invalid_definition(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the failure came from the provisioning engine.
    #[must_use]
    pub const fn is_engine_error(&self) -> bool {
        matches!(self, Self::Engine(_))
    }
}
