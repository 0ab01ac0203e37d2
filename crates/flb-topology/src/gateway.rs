//! Virtual gateway service: the single entry point into the mesh.
//!
//! The gateway task runs only the Envoy sidecar. An internal network load
//! balancer passes TCP traffic on port 80 through to the sidecar listener.

use serde::Serialize;
use tracing::info;

use crate::compute::{DeclaredCompute, SharedInfra, declare_compute, declare_rule};
use crate::engine::{ProvisioningEngine, ResourceHandle, ResourceKind, Token};
use crate::error::TopologyResult;
use crate::mesh::GATEWAY_LISTENER_PORT;
use crate::region::EnvoyImage;
use crate::routing::rule_name;
use crate::task::{ContainerDefinition, MeshMember, SIDECAR_CONTAINER, TaskDefinitionSpec, mesh_resource_arn};
use crate::types::{RuleSource, SecurityRule};

/// Port the load balancer listens on.
pub const INGRESS_PORT: u16 = 80;
/// Source label of the rule opening the listener port to the fabric.
pub const FABRIC_RULE_SOURCE: &str = "vpc";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadBalancerSpec {
    scheme: &'static str,
    load_balancer_type: &'static str,
    subnets: Vec<Token>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TargetGroupSpec {
    vpc_id: Token,
    protocol: &'static str,
    port: u16,
    target_type: &'static str,
    targets: [LoadBalancerTarget; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadBalancerTarget {
    service: Token,
    container_name: &'static str,
    container_port: u16,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListenerSpec {
    load_balancer: Token,
    protocol: &'static str,
    port: u16,
    default_target_group: Token,
}

/// The declared gateway service and its private load balancer.
#[derive(Debug, Clone)]
pub struct VirtualGatewayService {
    name: String,
    image: EnvoyImage,
    compute: DeclaredCompute,
    load_balancer: ResourceHandle,
    dns_name: Token,
}

impl VirtualGatewayService {
    /// Declares the gateway task, service, scaling and load balancer, then
    /// exports the load balancer DNS name as `<gateway>-ingress-dns`.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn build<E: ProvisioningEngine>(engine: &mut E, infra: SharedInfra<'_>) -> TopologyResult<Self> {
        let stack = infra.stack;
        let name = infra.mesh.gateway_name();
        let image = EnvoyImage::for_region(&stack.region);

        let resource_arn = mesh_resource_arn(
            &stack.region,
            &stack.account,
            infra.mesh.mesh_name(),
            &MeshMember::VirtualGateway(name),
        );
        let sidecar =
            ContainerDefinition::sidecar(&image, resource_arn, name).with_port(GATEWAY_LISTENER_PORT);
        let task = TaskDefinitionSpec::sidecar_only(
            format!("{name}-task-definition"),
            infra.cluster.shared_identity().arn().clone(),
            sidecar,
        );

        let compute = declare_compute(engine, infra, name, &task, stack.gateway_autoscaling())?;

        // Network load balancers do not carry a security group, so the
        // listener port is opened to the whole fabric.
        declare_rule(
            engine,
            &rule_name(name, FABRIC_RULE_SOURCE),
            &SecurityRule::tcp(
                compute.group_id.clone(),
                GATEWAY_LISTENER_PORT,
                RuleSource::Cidr(infra.fabric.cidr()),
                "Load balancer passthrough",
            ),
        )?;

        let load_balancer = engine.declare_spec(
            ResourceKind::LoadBalancer,
            &format!("{name}-ingress"),
            &LoadBalancerSpec {
                scheme: "internal",
                load_balancer_type: "network",
                subnets: infra.fabric.application_subnets().to_vec(),
            },
        )?;
        let dns_name = engine.reference(&load_balancer, "DnsName")?;

        let targets = engine.declare_spec(
            ResourceKind::TargetGroup,
            &format!("{name}-targets"),
            &TargetGroupSpec {
                vpc_id: engine.reference(infra.fabric.vpc(), "VpcId")?,
                protocol: "TCP",
                port: GATEWAY_LISTENER_PORT,
                target_type: "ip",
                targets: [LoadBalancerTarget {
                    service: engine.reference(&compute.service, "Name")?,
                    container_name: SIDECAR_CONTAINER,
                    container_port: GATEWAY_LISTENER_PORT,
                }],
            },
        )?;

        engine.declare_spec(
            ResourceKind::Listener,
            &format!("{name}-listener"),
            &ListenerSpec {
                load_balancer: engine.reference(&load_balancer, "Arn")?,
                protocol: "TCP",
                port: INGRESS_PORT,
                default_target_group: engine.reference(&targets, "Arn")?,
            },
        )?;

        engine.export(&format!("{name}-ingress-dns"), dns_name.clone().into())?;

        info!(
            gateway = %name,
            image = %image.uri,
            max_capacity = compute.scaling_policy.max_capacity,
            "declared virtual gateway service"
        );

        Ok(Self {
            name: name.to_string(),
            image,
            compute,
            load_balancer,
            dns_name,
        })
    }

    /// Gateway name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compute service handle.
    #[must_use]
    pub fn service(&self) -> &ResourceHandle {
        &self.compute.service
    }

    /// Security group of the gateway tasks.
    #[must_use]
    pub fn security_group(&self) -> &ResourceHandle {
        &self.compute.security_group
    }

    /// Security group id, the source of every gateway-facing rule.
    #[must_use]
    pub fn group_id(&self) -> &Token {
        &self.compute.group_id
    }

    /// Private load balancer handle.
    #[must_use]
    pub fn load_balancer(&self) -> &ResourceHandle {
        &self.load_balancer
    }

    /// Load balancer DNS name token.
    #[must_use]
    pub fn dns_name(&self) -> &Token {
        &self.dns_name
    }

    /// Resolved sidecar image.
    #[must_use]
    pub fn image(&self) -> &EnvoyImage {
        &self.image
    }

    /// Everything declared for the gateway's compute service.
    #[must_use]
    pub fn compute(&self) -> &DeclaredCompute {
        &self.compute
    }
}
