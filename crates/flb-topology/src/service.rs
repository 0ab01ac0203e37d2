//! Mesh services: one per service definition.
//!
//! Each service is an application container paired with an Envoy sidecar,
//! registered in discovery, represented in the mesh by a virtual node and
//! addressed through a virtual service named `<service>.<namespace>`.

use serde::Serialize;
use tracing::{debug, info};

use crate::compute::{DeclaredCompute, SharedInfra, declare_compute, declare_rule};
use crate::engine::{ProvisioningEngine, ResourceHandle, ResourceKind, Token};
use crate::error::TopologyResult;
use crate::gateway::VirtualGatewayService;
use crate::mesh::ACCESS_LOG_PATH;
use crate::region::EnvoyImage;
use crate::routing::rule_name;
use crate::task::{
    APP_CONTAINER, ContainerDefinition, MeshMember, PortMapping, SidecarProxyConfig, TaskDefinitionSpec,
    mesh_resource_arn,
};
use crate::types::{HealthCheck, RuleSource, SecurityRule, ServiceDefinition};

/// Virtual node health check path.
pub const NODE_HEALTH_PATH: &str = "/";
/// Virtual node health check interval.
pub const NODE_HEALTH_INTERVAL_SECS: u32 = 5;
/// Virtual node health check timeout.
pub const NODE_HEALTH_TIMEOUT_SECS: u32 = 2;
/// Consecutive successes before a node is healthy.
pub const NODE_HEALTHY_THRESHOLD: u32 = 2;
/// Consecutive failures before a node is unhealthy.
pub const NODE_UNHEALTHY_THRESHOLD: u32 = 2;
/// Description on the rule admitting gateway traffic.
pub const GATEWAY_RULE_DESCRIPTION: &str = "Inbound from Gateway";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeHealthCheck {
    protocol: &'static str,
    path: &'static str,
    port: u16,
    interval_secs: u32,
    timeout_secs: u32,
    healthy_threshold: u32,
    unhealthy_threshold: u32,
}

impl NodeHealthCheck {
    const fn http(port: u16) -> Self {
        Self {
            protocol: "http",
            path: NODE_HEALTH_PATH,
            port,
            interval_secs: NODE_HEALTH_INTERVAL_SECS,
            timeout_secs: NODE_HEALTH_TIMEOUT_SECS,
            healthy_threshold: NODE_HEALTHY_THRESHOLD,
            unhealthy_threshold: NODE_UNHEALTHY_THRESHOLD,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeListener {
    protocol: &'static str,
    port: u16,
    health_check: NodeHealthCheck,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DiscoveryBinding {
    service_name: Token,
    namespace_name: Token,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VirtualNodeSpec<'a> {
    mesh_name: Token,
    virtual_node_name: &'a str,
    service_discovery: DiscoveryBinding,
    listeners: [NodeListener; 1],
    access_log: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VirtualServiceSpec<'a> {
    mesh_name: Token,
    virtual_service_name: &'a str,
    provider: Token,
}

/// A declared mesh service.
#[derive(Debug, Clone)]
pub struct MeshService {
    name: String,
    port: u16,
    public: bool,
    route_prefix: String,
    compute: DeclaredCompute,
    virtual_node: ResourceHandle,
    virtual_service: ResourceHandle,
    virtual_service_name: String,
    virtual_service_ref: Token,
    gateway_rule: Option<ResourceHandle>,
}

impl MeshService {
    /// Declares everything one service needs, in dependency order.
    ///
    /// Public services get exactly one rule admitting the gateway on the
    /// application port. Routes and peer connections are bound later.
    ///
    /// # Errors
    ///
    /// Propagates engine failures. The definition is expected to be valid.
    pub fn build<E: ProvisioningEngine>(
        engine: &mut E,
        infra: SharedInfra<'_>,
        gateway: &VirtualGatewayService,
        def: &ServiceDefinition,
    ) -> TopologyResult<Self> {
        let stack = infra.stack;
        let name = def.name.as_str();

        let proxy = SidecarProxyConfig::for_ports(vec![def.port]);

        let image = EnvoyImage::for_region(&stack.region);
        let resource_arn = mesh_resource_arn(
            &stack.region,
            &stack.account,
            infra.mesh.mesh_name(),
            &MeshMember::VirtualNode(name),
        );
        let sidecar = ContainerDefinition::sidecar(&image, resource_arn, name);
        let task = TaskDefinitionSpec::with_sidecar(
            format!("{name}-task-definition"),
            infra.cluster.shared_identity().arn().clone(),
            app_container(infra, def),
            sidecar,
            proxy,
        );

        let scaling = def.scaling.unwrap_or(stack.autoscaling);
        let compute = declare_compute(engine, infra, name, &task, scaling)?;

        let virtual_node = engine.declare_spec(
            ResourceKind::VirtualNode,
            name,
            &VirtualNodeSpec {
                mesh_name: infra.mesh.mesh_name_ref().clone(),
                virtual_node_name: name,
                service_discovery: DiscoveryBinding {
                    service_name: engine.reference(&compute.discovery, "Name")?,
                    namespace_name: engine.reference(infra.cluster.namespace(), "Name")?,
                },
                listeners: [NodeListener {
                    protocol: "http",
                    port: def.port,
                    health_check: NodeHealthCheck::http(def.port),
                }],
                access_log: ACCESS_LOG_PATH,
            },
        )?;

        let virtual_service_name = format!("{name}.{}", infra.cluster.namespace_name());
        let virtual_service = engine.declare_spec(
            ResourceKind::VirtualService,
            &virtual_service_name,
            &VirtualServiceSpec {
                mesh_name: infra.mesh.mesh_name_ref().clone(),
                virtual_service_name: &virtual_service_name,
                provider: engine.reference(&virtual_node, "Name")?,
            },
        )?;
        let virtual_service_ref = engine.reference(&virtual_service, "Name")?;

        let gateway_rule = if def.public {
            let rule = declare_rule(
                engine,
                &rule_name(name, gateway.name()),
                &SecurityRule::tcp(
                    compute.group_id.clone(),
                    def.port,
                    RuleSource::SecurityGroup(gateway.group_id().clone()),
                    GATEWAY_RULE_DESCRIPTION,
                ),
            )?;
            Some(rule)
        } else {
            debug!(service = %name, "private service, no gateway rule");
            None
        };

        info!(
            service = %name,
            port = def.port,
            public = def.public,
            virtual_service = %virtual_service_name,
            "declared mesh service"
        );

        Ok(Self {
            name: name.to_string(),
            port: def.port,
            public: def.public,
            route_prefix: def.route_prefix(),
            compute,
            virtual_node,
            virtual_service,
            virtual_service_name,
            virtual_service_ref,
            gateway_rule,
        })
    }

    /// Service name.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.name
    }

    /// Application port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Whether the service is reachable through the gateway.
    #[must_use]
    pub const fn is_public(&self) -> bool {
        self.public
    }

    /// Gateway route prefix.
    #[must_use]
    pub fn route_prefix(&self) -> &str {
        &self.route_prefix
    }

    /// Virtual service handle.
    #[must_use]
    pub fn virtual_service(&self) -> &ResourceHandle {
        &self.virtual_service
    }

    /// `<service>.<namespace>`.
    #[must_use]
    pub fn virtual_service_name(&self) -> &str {
        &self.virtual_service_name
    }

    /// Virtual service name token, for routes and backends.
    #[must_use]
    pub fn virtual_service_ref(&self) -> &Token {
        &self.virtual_service_ref
    }

    /// Virtual node handle.
    #[must_use]
    pub fn virtual_node(&self) -> &ResourceHandle {
        &self.virtual_node
    }

    /// Security group of the service tasks.
    #[must_use]
    pub fn security_group(&self) -> &ResourceHandle {
        &self.compute.security_group
    }

    /// Security group id token.
    #[must_use]
    pub fn group_id(&self) -> &Token {
        &self.compute.group_id
    }

    /// Rule admitting the gateway, present only for public services.
    #[must_use]
    pub fn gateway_rule(&self) -> Option<&ResourceHandle> {
        self.gateway_rule.as_ref()
    }

    /// Everything declared for the service's compute service.
    #[must_use]
    pub fn compute(&self) -> &DeclaredCompute {
        &self.compute
    }
}

fn app_container(infra: SharedInfra<'_>, def: &ServiceDefinition) -> ContainerDefinition {
    let health_check = def.health_check.clone().unwrap_or_else(|| default_health_check(infra, def.port));
    ContainerDefinition {
        name: APP_CONTAINER.to_string(),
        image: def.image.clone(),
        essential: true,
        memory_limit_mib: def.limits.memory_mib,
        cpu: def.limits.cpu_units,
        user: None,
        environment: def.environment.clone(),
        health_check,
        logging: infra.cluster.default_logger(),
        port_mappings: vec![PortMapping::tcp(def.port)],
        depends_on: Vec::new(),
    }
}

/// Cluster template, pointed at the service's own port.
fn default_health_check(infra: SharedInfra<'_>, port: u16) -> HealthCheck {
    infra
        .cluster
        .new_health_check()
        .with_command(format!("curl localhost:{port}"))
}
