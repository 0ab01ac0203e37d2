//! Task definitions and the sidecar proxy.
//!
//! A mesh task is an ordered pair: the application container followed by the
//! Envoy sidecar. The application declares a startup dependency on the
//! sidecar becoming HEALTHY so it never accepts traffic that bypasses the
//! proxy. The gateway task runs the sidecar alone.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::engine::Token;
use crate::region::EnvoyImage;
use crate::types::{HealthCheck, LogConfig};

/// Port the sidecar accepts redirected inbound traffic on.
pub const SIDECAR_INGRESS_PORT: u16 = 15000;
/// Port the sidecar accepts redirected outbound traffic on.
pub const SIDECAR_EGRESS_PORT: u16 = 15001;
/// Envoy admin port, used by the health check.
pub const SIDECAR_ADMIN_PORT: u16 = 9901;
/// User id the sidecar runs as; its own traffic is never intercepted.
pub const SIDECAR_UID: u32 = 1337;
/// Memory limit of every sidecar container.
pub const SIDECAR_MEMORY_MIB: u32 = 128;
/// Container name of the sidecar.
pub const SIDECAR_CONTAINER: &str = "envoy";
/// Container name of the application.
pub const APP_CONTAINER: &str = "app";
/// Environment variable carrying the mesh resource identifier.
pub const MESH_RESOURCE_ENV: &str = "APPMESH_RESOURCE_ARN";

/// Task metadata and credential endpoints the sidecar must not intercept.
pub const EGRESS_IGNORED_IPS: [Ipv4Addr; 2] = [
    Ipv4Addr::new(169, 254, 170, 2),
    Ipv4Addr::new(169, 254, 169, 254),
];

/// Task-level CPU units.
pub const TASK_CPU_UNITS: u32 = 256;
/// Task-level memory.
pub const TASK_MEMORY_MIB: u32 = 512;

/// Health check against the sidecar admin endpoint.
#[must_use]
pub fn sidecar_health_check() -> HealthCheck {
    HealthCheck::shell(format!(
        "curl -s http://localhost:{SIDECAR_ADMIN_PORT}/server_info | grep state | grep -q LIVE"
    ))
}

// ─────────────────────────────────────────────────────────────
// Mesh resource identity
// ─────────────────────────────────────────────────────────────

/// The mesh object a sidecar represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshMember<'a> {
    /// A virtual gateway.
    VirtualGateway(&'a str),
    /// A virtual node.
    VirtualNode(&'a str),
}

impl fmt::Display for MeshMember<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VirtualGateway(name) => write!(f, "virtualGateway/{name}"),
            Self::VirtualNode(name) => write!(f, "virtualNode/{name}"),
        }
    }
}

/// Fully qualified mesh resource identifier handed to the sidecar.
#[must_use]
pub fn mesh_resource_arn(region: &str, account: &str, mesh: &str, member: &MeshMember<'_>) -> String {
    format!("arn:aws:appmesh:{region}:{account}:mesh/{mesh}/{member}")
}

// ─────────────────────────────────────────────────────────────
// Containers
// ─────────────────────────────────────────────────────────────

/// Exposed container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// Container port.
    pub container_port: u16,
    /// Transport protocol.
    pub protocol: crate::types::Protocol,
}

impl PortMapping {
    /// TCP port mapping.
    #[must_use]
    pub const fn tcp(container_port: u16) -> Self {
        Self {
            container_port,
            protocol: crate::types::Protocol::Tcp,
        }
    }
}

/// Condition a container dependency waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyCondition {
    /// Dependency has started.
    Start,
    /// Dependency passes its health check.
    Healthy,
}

/// Startup dependency on another container in the same task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDependency {
    /// Container waited on.
    pub container_name: String,
    /// Condition waited for.
    pub condition: DependencyCondition,
}

/// One container of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    /// Container name, unique within the task.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Whether the task stops when this container stops.
    pub essential: bool,
    /// Hard memory limit.
    pub memory_limit_mib: u32,
    /// Reserved CPU units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    /// User the process runs as.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Environment variables.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Container health check.
    pub health_check: HealthCheck,
    /// Log routing.
    pub logging: LogConfig,
    /// Exposed ports.
    pub port_mappings: Vec<PortMapping>,
    /// Startup dependencies.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ContainerDependency>,
}

impl ContainerDefinition {
    /// Envoy sidecar for the given mesh resource.
    #[must_use]
    pub fn sidecar(image: &EnvoyImage, resource_arn: String, log_prefix: &str) -> Self {
        Self {
            name: SIDECAR_CONTAINER.to_string(),
            image: image.uri.clone(),
            essential: true,
            memory_limit_mib: SIDECAR_MEMORY_MIB,
            cpu: None,
            user: Some(SIDECAR_UID.to_string()),
            environment: BTreeMap::from([(MESH_RESOURCE_ENV.to_string(), resource_arn)]),
            health_check: sidecar_health_check(),
            logging: LogConfig::aws_logs(format!("{log_prefix}-envoy")),
            port_mappings: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    /// Adds an exposed TCP port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port_mappings.push(PortMapping::tcp(port));
        self
    }

    /// Makes this container wait until `other` reports healthy.
    #[must_use]
    pub fn after_healthy(mut self, other: &str) -> Self {
        self.depends_on.push(ContainerDependency {
            container_name: other.to_string(),
            condition: DependencyCondition::Healthy,
        });
        self
    }

    /// Returns true if the container waits for `other` to be healthy.
    #[must_use]
    pub fn waits_for_healthy(&self, other: &str) -> bool {
        self.depends_on
            .iter()
            .any(|d| d.container_name == other && d.condition == DependencyCondition::Healthy)
    }
}

// ─────────────────────────────────────────────────────────────
// Proxy configuration
// ─────────────────────────────────────────────────────────────

/// Traffic interception settings of one task. Never shared between tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarProxyConfig {
    /// Container that acts as the proxy.
    pub container_name: String,
    /// Application ports whose inbound traffic is redirected.
    pub app_ports: Vec<u16>,
    /// Redirect target for inbound traffic.
    pub proxy_ingress_port: u16,
    /// Redirect target for outbound traffic.
    pub proxy_egress_port: u16,
    /// Traffic from this uid bypasses the proxy.
    #[serde(rename = "ignoredUID")]
    pub ignored_uid: u32,
    /// Destinations that bypass the proxy.
    #[serde(rename = "egressIgnoredIPs")]
    pub egress_ignored_ips: Vec<Ipv4Addr>,
}

impl SidecarProxyConfig {
    /// Proxy settings intercepting `app_ports`.
    #[must_use]
    pub fn for_ports(app_ports: Vec<u16>) -> Self {
        Self {
            container_name: SIDECAR_CONTAINER.to_string(),
            app_ports,
            proxy_ingress_port: SIDECAR_INGRESS_PORT,
            proxy_egress_port: SIDECAR_EGRESS_PORT,
            ignored_uid: SIDECAR_UID,
            egress_ignored_ips: EGRESS_IGNORED_IPS.to_vec(),
        }
    }
}

// ─────────────────────────────────────────────────────────────
// Task definition
// ─────────────────────────────────────────────────────────────

/// Serverless task definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinitionSpec {
    /// Task family.
    pub family: String,
    /// Task-level CPU units.
    pub cpu: u32,
    /// Task-level memory.
    pub memory_mib: u32,
    /// Network mode.
    pub network_mode: String,
    /// Identity assumed by the task.
    pub task_role: Token,
    /// Interception settings, absent for sidecar-only tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_configuration: Option<SidecarProxyConfig>,
    /// Containers in launch order.
    pub containers: Vec<ContainerDefinition>,
}

impl TaskDefinitionSpec {
    /// Task running only the sidecar.
    #[must_use]
    pub fn sidecar_only(family: impl Into<String>, task_role: Token, sidecar: ContainerDefinition) -> Self {
        Self {
            family: family.into(),
            cpu: TASK_CPU_UNITS,
            memory_mib: TASK_MEMORY_MIB,
            network_mode: "awsvpc".to_string(),
            task_role,
            proxy_configuration: None,
            containers: vec![sidecar],
        }
    }

    /// Application plus sidecar. The application is made to wait for the
    /// sidecar to be healthy and its port is exposed.
    #[must_use]
    pub fn with_sidecar(
        family: impl Into<String>,
        task_role: Token,
        app: ContainerDefinition,
        sidecar: ContainerDefinition,
        proxy: SidecarProxyConfig,
    ) -> Self {
        let app = app.after_healthy(&sidecar.name);
        Self {
            family: family.into(),
            cpu: TASK_CPU_UNITS,
            memory_mib: TASK_MEMORY_MIB,
            network_mode: "awsvpc".to_string(),
            task_role,
            proxy_configuration: Some(proxy),
            containers: vec![app, sidecar],
        }
    }

    /// Looks up a container by name.
    #[must_use]
    pub fn container(&self, name: &str) -> Option<&ContainerDefinition> {
        self.containers.iter().find(|c| c.name == name)
    }
}
