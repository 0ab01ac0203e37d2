//! Shared compute cluster and the templates every task reuses.

use serde::Serialize;
use tracing::info;

use crate::config::StackSettings;
use crate::engine::{ProvisioningEngine, ResourceHandle, ResourceKind, Token};
use crate::error::TopologyResult;
use crate::network::NetworkFabric;
use crate::types::{HealthCheck, LogConfig};

/// Name of the cluster resource.
pub const CLUSTER_NAME: &str = "cluster";
/// Name of the shared task role.
pub const TASK_ROLE_NAME: &str = "flbECSTaskIamRole";
/// Managed policy granting sidecar permissions.
pub const ENVOY_ACCESS_POLICY: &str = "AWSAppMeshEnvoyAccess";
/// Principal allowed to assume the task role.
pub const TASK_PRINCIPAL: &str = "ecs-tasks.amazonaws.com";
/// Default application health check command.
pub const APP_HEALTH_COMMAND: &str = "curl localhost:5000";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterSpec {
    vpc_id: Token,
    container_insights: bool,
    default_namespace: Token,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceSpec<'a> {
    name: &'a str,
    namespace_type: &'static str,
    vpc_id: Token,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoleSpec {
    assumed_by: &'static str,
    managed_policies: [&'static str; 1],
}

/// Execution identity shared by every task definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedIdentity {
    handle: ResourceHandle,
    arn: Token,
}

impl SharedIdentity {
    /// Role handle.
    #[must_use]
    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    /// Role ARN token for task definitions.
    #[must_use]
    pub fn arn(&self) -> &Token {
        &self.arn
    }
}

/// The shared cluster.
#[derive(Debug, Clone)]
pub struct ComputeCluster {
    cluster: ResourceHandle,
    cluster_arn: Token,
    namespace: ResourceHandle,
    namespace_id: Token,
    namespace_name: String,
    identity: SharedIdentity,
    health_check: HealthCheck,
    log_prefix: String,
}

impl ComputeCluster {
    /// Declares the cluster, its discovery namespace and the shared role.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn build<E: ProvisioningEngine>(
        engine: &mut E,
        stack: &StackSettings,
        fabric: &NetworkFabric,
    ) -> TopologyResult<Self> {
        let vpc_id = engine.reference(fabric.vpc(), "VpcId")?;

        let namespace = engine.declare_spec(
            ResourceKind::DiscoveryNamespace,
            &stack.namespace,
            &NamespaceSpec {
                name: &stack.namespace,
                namespace_type: "DNS_PRIVATE",
                vpc_id: vpc_id.clone(),
            },
        )?;
        let namespace_id = engine.reference(&namespace, "Id")?;

        let cluster = engine.declare_spec(
            ResourceKind::Cluster,
            CLUSTER_NAME,
            &ClusterSpec {
                vpc_id,
                container_insights: true,
                default_namespace: namespace_id.clone(),
            },
        )?;
        let cluster_arn = engine.reference(&cluster, "Arn")?;

        let role = engine.declare_spec(
            ResourceKind::Role,
            TASK_ROLE_NAME,
            &RoleSpec {
                assumed_by: TASK_PRINCIPAL,
                managed_policies: [ENVOY_ACCESS_POLICY],
            },
        )?;
        let identity = SharedIdentity {
            arn: engine.reference(&role, "Arn")?,
            handle: role,
        };

        info!(namespace = %stack.namespace, "declared compute cluster");

        Ok(Self {
            cluster,
            cluster_arn,
            namespace,
            namespace_id,
            namespace_name: stack.namespace.clone(),
            identity,
            health_check: HealthCheck::shell(APP_HEALTH_COMMAND),
            log_prefix: stack.mesh_name.clone(),
        })
    }

    /// Application health check template.
    #[must_use]
    pub fn new_health_check(&self) -> HealthCheck {
        self.health_check.clone()
    }

    /// Log configuration with the given stream prefix.
    #[must_use]
    pub fn new_logger(&self, prefix: &str) -> LogConfig {
        LogConfig::aws_logs(prefix)
    }

    /// Log configuration for application containers, prefixed by the mesh name.
    #[must_use]
    pub fn default_logger(&self) -> LogConfig {
        self.new_logger(&self.log_prefix)
    }

    /// The single execution identity reused by every task.
    #[must_use]
    pub fn shared_identity(&self) -> &SharedIdentity {
        &self.identity
    }

    /// Cluster handle.
    #[must_use]
    pub fn handle(&self) -> &ResourceHandle {
        &self.cluster
    }

    /// Cluster ARN token.
    #[must_use]
    pub fn arn(&self) -> &Token {
        &self.cluster_arn
    }

    /// Discovery namespace handle.
    #[must_use]
    pub fn namespace(&self) -> &ResourceHandle {
        &self.namespace
    }

    /// Discovery namespace id token.
    #[must_use]
    pub fn namespace_id(&self) -> &Token {
        &self.namespace_id
    }

    /// Discovery namespace name, e.g. `default.flb`.
    #[must_use]
    pub fn namespace_name(&self) -> &str {
        &self.namespace_name
    }
}
