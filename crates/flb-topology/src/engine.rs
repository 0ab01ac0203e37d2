//! Provisioning engine contract.
//!
//! The synthesizer never talks to a cloud API. It declares resources through a
//! [`ProvisioningEngine`], references attributes of resources it declared
//! earlier, and exports values for external consumers. The engine owns
//! everything after that: diffing, convergence, rollback.
//!
//! Cross references are carried as [`Token`]s. A token renders as
//! `${Kind:name.Attribute}` so it can be interpolated into any string field of
//! a later declaration (for example a load balancer DNS name inside a URI).

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;

/// Resource kinds the synthesizer declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Isolated network.
    Vpc,
    /// Address range inside the network.
    Subnet,
    /// NAT egress path.
    NatGateway,
    /// Shared compute cluster.
    Cluster,
    /// Private DNS discovery namespace.
    DiscoveryNamespace,
    /// Execution identity.
    Role,
    /// Service mesh.
    Mesh,
    /// Mesh-level ingress record.
    VirtualGateway,
    /// Container task definition.
    TaskDefinition,
    /// Per-task firewall.
    SecurityGroup,
    /// Inbound rule attached to a security group.
    SecurityRule,
    /// DNS discovery record for a compute service.
    DiscoveryService,
    /// Long-running compute service.
    ComputeService,
    /// CPU target-tracking scaling policy.
    ScalingPolicy,
    /// Network load balancer.
    LoadBalancer,
    /// Load balancer listener.
    Listener,
    /// Load balancer target group.
    TargetGroup,
    /// Mesh virtual node.
    VirtualNode,
    /// Backend binding on a virtual node.
    VirtualNodeBackend,
    /// Mesh virtual service.
    VirtualService,
    /// Path-prefix route on the virtual gateway.
    GatewayRoute,
    /// Public REST API.
    RestApi,
    /// Private link from the REST API into the network.
    VpcLink,
    /// REST API path resource.
    ApiResource,
    /// REST API method and integration.
    ApiMethod,
}

impl ResourceKind {
    /// Attributes that may be referenced on a resource of this kind.
    #[must_use]
    pub const fn attributes(self) -> &'static [&'static str] {
        match self {
            Self::Vpc => &["VpcId", "CidrBlock"],
            Self::Subnet => &["SubnetId", "CidrBlock"],
            Self::NatGateway => &["NatGatewayId"],
            Self::DiscoveryNamespace => &["Id", "Name"],
            Self::Role | Self::TaskDefinition | Self::ScalingPolicy | Self::TargetGroup => {
                &["Arn"]
            }
            Self::Listener => &["Arn"],
            Self::SecurityGroup => &["GroupId"],
            Self::SecurityRule | Self::VirtualNodeBackend | Self::ApiResource | Self::ApiMethod => {
                &["Id"]
            }
            Self::VpcLink => &["Id"],
            Self::LoadBalancer => &["Arn", "DnsName"],
            Self::RestApi => &["Id", "RootResourceId", "Url"],
            Self::Cluster
            | Self::Mesh
            | Self::VirtualGateway
            | Self::DiscoveryService
            | Self::ComputeService
            | Self::VirtualNode
            | Self::VirtualService
            | Self::GatewayRoute => &["Arn", "Name"],
        }
    }

    /// Returns true if `attribute` can be referenced on this kind.
    #[must_use]
    pub fn supports(self, attribute: &str) -> bool {
        self.attributes().contains(&attribute)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Handle to a declared resource.
///
/// Handles are plain values; holding one does not keep anything alive and
/// the engine remains the owner of the declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceHandle {
    kind: ResourceKind,
    name: String,
}

impl ResourceHandle {
    /// Creates a handle. Engines call this from `declare`.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Kind of the declared resource.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Name of the declared resource.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable logical id, `Kind:name`.
    #[must_use]
    pub fn logical_id(&self) -> String {
        format!("{}:{}", self.kind, self.name)
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Matches `${Kind:name.Attr}` anywhere in a string.
pub(crate) static TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z]+):([^}]+)\.([A-Za-z]+)\}").unwrap_or_else(|_| unreachable!())
});

/// Late-bound attribute of a declared resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Builds the token for `attribute` of `handle`.
    ///
    /// This does not validate anything; use [`ProvisioningEngine::reference`].
    #[must_use]
    pub fn for_attribute(handle: &ResourceHandle, attribute: &str) -> Self {
        Self(format!("${{{}.{attribute}}}", handle.logical_id()))
    }

    /// Token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `text` contains something an engine would read as a token.
    #[must_use]
    pub fn is_embedded_in(text: &str) -> bool {
        TOKEN_PATTERN.is_match(text)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Token> for Value {
    fn from(token: Token) -> Self {
        Value::String(token.0)
    }
}

/// The external collaborator that records declarations.
pub trait ProvisioningEngine {
    /// Registers a resource. Fails if `(kind, name)` was already declared.
    fn declare(
        &mut self,
        kind: ResourceKind,
        name: &str,
        spec: Value,
    ) -> Result<ResourceHandle, EngineError>;

    /// Yields an attribute of an already-declared resource.
    fn reference(&self, handle: &ResourceHandle, attribute: &str) -> Result<Token, EngineError>;

    /// Publishes a value for external consumption.
    fn export(&mut self, name: &str, value: Value) -> Result<(), EngineError>;

    /// Serializes a typed spec and declares it.
    fn declare_spec<S>(
        &mut self,
        kind: ResourceKind,
        name: &str,
        spec: &S,
    ) -> Result<ResourceHandle, EngineError>
    where
        S: Serialize + ?Sized,
        Self: Sized,
    {
        let value = serde_json::to_value(spec).map_err(|e| EngineError::Serialization {
            kind,
            name: name.to_string(),
            message: e.to_string(),
        })?;
        self.declare(kind, name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_renders_logical_id_and_attribute() {
        let handle = ResourceHandle::new(ResourceKind::LoadBalancer, "flb-gateway-ingress");
        let token = Token::for_attribute(&handle, "DnsName");
        assert_eq!(token.as_str(), "${LoadBalancer:flb-gateway-ingress.DnsName}");
    }

    #[test]
    fn token_text_detected_inside_strings() {
        let handle = ResourceHandle::new(ResourceKind::Role, "task-role");
        let token = Token::for_attribute(&handle, "Arn");
        assert!(Token::is_embedded_in(&format!("arn={token}")));
        assert!(!Token::is_embedded_in("${HOME}/bin"));
        assert!(!Token::is_embedded_in("postgres://db:5432"));
    }

    #[test]
    fn token_serializes_as_plain_string() {
        let handle = ResourceHandle::new(ResourceKind::Role, "task-role");
        let token = Token::for_attribute(&handle, "Arn");
        let value = serde_json::to_value(&token).expect("serialize");
        assert_eq!(value, Value::String("${Role:task-role.Arn}".into()));
    }

    #[test]
    fn every_kind_exposes_at_least_one_attribute() {
        let kinds = [
            ResourceKind::Vpc,
            ResourceKind::Subnet,
            ResourceKind::NatGateway,
            ResourceKind::Cluster,
            ResourceKind::DiscoveryNamespace,
            ResourceKind::Role,
            ResourceKind::Mesh,
            ResourceKind::VirtualGateway,
            ResourceKind::TaskDefinition,
            ResourceKind::SecurityGroup,
            ResourceKind::SecurityRule,
            ResourceKind::DiscoveryService,
            ResourceKind::ComputeService,
            ResourceKind::ScalingPolicy,
            ResourceKind::LoadBalancer,
            ResourceKind::Listener,
            ResourceKind::TargetGroup,
            ResourceKind::VirtualNode,
            ResourceKind::VirtualNodeBackend,
            ResourceKind::VirtualService,
            ResourceKind::GatewayRoute,
            ResourceKind::RestApi,
            ResourceKind::VpcLink,
            ResourceKind::ApiResource,
            ResourceKind::ApiMethod,
        ];
        for kind in kinds {
            assert!(!kind.attributes().is_empty(), "{kind} has no attributes");
        }
    }

    #[test]
    fn load_balancer_exposes_dns_name() {
        assert!(ResourceKind::LoadBalancer.supports("DnsName"));
        assert!(!ResourceKind::VirtualNode.supports("DnsName"));
    }
}
