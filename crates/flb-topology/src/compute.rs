//! Compute service plumbing shared by the gateway and every mesh service.
//!
//! Each long-running task gets the same set of declarations: a task
//! definition, its own security group (inbound denied until a rule is
//! added), a DNS discovery record, the service itself and a CPU
//! target-tracking policy.

use serde::Serialize;

use crate::cluster::ComputeCluster;
use crate::config::StackSettings;
use crate::engine::{ProvisioningEngine, ResourceHandle, ResourceKind, Token};
use crate::error::TopologyResult;
use crate::mesh::MeshControlPlane;
use crate::network::NetworkFabric;
use crate::task::TaskDefinitionSpec;
use crate::types::{AutoscalingPolicy, SecurityRule};

/// Discovery record time to live.
pub const DISCOVERY_TTL_SECS: u32 = 10;
/// Failed health checks before a discovery record is withdrawn.
pub const DISCOVERY_FAILURE_THRESHOLD: u32 = 2;
/// Serverless platform version.
pub const PLATFORM_VERSION: &str = "1.4.0";
/// Tasks every service starts with.
pub const DESIRED_COUNT: u32 = 1;
/// Metric the scaling policy tracks.
pub const CPU_METRIC: &str = "ECSServiceAverageCPUUtilization";

/// Shared, already-declared infrastructure every compute service is placed in.
#[derive(Debug, Clone, Copy)]
pub struct SharedInfra<'a> {
    /// Stack settings.
    pub stack: &'a StackSettings,
    /// Network.
    pub fabric: &'a NetworkFabric,
    /// Cluster and templates.
    pub cluster: &'a ComputeCluster,
    /// Mesh control plane.
    pub mesh: &'a MeshControlPlane,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SecurityGroupSpec {
    vpc_id: Token,
    description: String,
    allow_all_outbound: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DiscoveryServiceSpec<'a> {
    name: &'a str,
    namespace_id: Token,
    dns_record_type: &'static str,
    dns_ttl_secs: u32,
    failure_threshold: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ComputeServiceSpec {
    cluster: Token,
    task_definition: Token,
    desired_count: u32,
    launch_type: &'static str,
    platform_version: &'static str,
    subnets: Vec<Token>,
    security_groups: [Token; 1],
    assign_public_ip: bool,
    service_registry: Token,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScalingPolicySpec {
    service: Token,
    min_capacity: u32,
    metric: &'static str,
    #[serde(flatten)]
    policy: AutoscalingPolicy,
}

/// Handles of one declared compute service.
#[derive(Debug, Clone)]
pub struct DeclaredCompute {
    /// Task definition.
    pub task_definition: ResourceHandle,
    /// The compute service.
    pub service: ResourceHandle,
    /// Security group attached to the service's tasks.
    pub security_group: ResourceHandle,
    /// Security group id, for rules that name this service as source.
    pub group_id: Token,
    /// Discovery record.
    pub discovery: ResourceHandle,
    /// Scaling policy.
    pub scaling: ResourceHandle,
    /// Effective scaling parameters.
    pub scaling_policy: AutoscalingPolicy,
}

/// Declares a compute service for `task`, registered as `name` in discovery.
///
/// # Errors
///
/// Propagates engine failures.
pub fn declare_compute<E: ProvisioningEngine>(
    engine: &mut E,
    infra: SharedInfra<'_>,
    name: &str,
    task: &TaskDefinitionSpec,
    scaling_policy: AutoscalingPolicy,
) -> TopologyResult<DeclaredCompute> {
    let task_definition = engine.declare_spec(ResourceKind::TaskDefinition, &task.family, task)?;
    let task_arn = engine.reference(&task_definition, "Arn")?;

    let security_group = engine.declare_spec(
        ResourceKind::SecurityGroup,
        &format!("{name}-sg"),
        &SecurityGroupSpec {
            vpc_id: engine.reference(infra.fabric.vpc(), "VpcId")?,
            description: format!("Tasks of {name}"),
            allow_all_outbound: true,
        },
    )?;
    let group_id = engine.reference(&security_group, "GroupId")?;

    let discovery = engine.declare_spec(
        ResourceKind::DiscoveryService,
        name,
        &DiscoveryServiceSpec {
            name,
            namespace_id: infra.cluster.namespace_id().clone(),
            dns_record_type: "A",
            dns_ttl_secs: DISCOVERY_TTL_SECS,
            failure_threshold: DISCOVERY_FAILURE_THRESHOLD,
        },
    )?;

    let service = engine.declare_spec(
        ResourceKind::ComputeService,
        &format!("{name}-service"),
        &ComputeServiceSpec {
            cluster: infra.cluster.arn().clone(),
            task_definition: task_arn,
            desired_count: DESIRED_COUNT,
            launch_type: "FARGATE",
            platform_version: PLATFORM_VERSION,
            subnets: infra.fabric.application_subnets().to_vec(),
            security_groups: [group_id.clone()],
            assign_public_ip: false,
            service_registry: engine.reference(&discovery, "Arn")?,
        },
    )?;

    let scaling = engine.declare_spec(
        ResourceKind::ScalingPolicy,
        &format!("{name}-scaling"),
        &ScalingPolicySpec {
            service: engine.reference(&service, "Name")?,
            min_capacity: AutoscalingPolicy::MIN_CAPACITY,
            metric: CPU_METRIC,
            policy: scaling_policy,
        },
    )?;

    Ok(DeclaredCompute {
        task_definition,
        service,
        security_group,
        group_id,
        discovery,
        scaling,
        scaling_policy,
    })
}

/// Declares an inbound rule under `name`.
///
/// # Errors
///
/// Propagates engine failures, including a name collision when the same
/// permission is declared twice.
pub fn declare_rule<E: ProvisioningEngine>(
    engine: &mut E,
    name: &str,
    rule: &SecurityRule,
) -> TopologyResult<ResourceHandle> {
    Ok(engine.declare_spec(ResourceKind::SecurityRule, name, rule)?)
}
