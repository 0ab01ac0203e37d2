//! Mesh control plane.
//!
//! Declares the mesh and its virtual gateway record. Every virtual node,
//! virtual service and gateway route is registered inside this mesh; the
//! control plane only hands out references to them.

use serde::Serialize;
use tracing::info;

use crate::config::StackSettings;
use crate::engine::{ProvisioningEngine, ResourceHandle, ResourceKind, Token};
use crate::error::TopologyResult;

/// Port the gateway sidecar listens on.
pub const GATEWAY_LISTENER_PORT: u16 = 8080;
/// Access log destination for mesh components.
pub const ACCESS_LOG_PATH: &str = "/dev/stdout";
/// Health check interval of the gateway listener.
pub const GATEWAY_HEALTH_INTERVAL_SECS: u32 = 10;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MeshSpec<'a> {
    mesh_name: &'a str,
    egress_filter: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct GatewayListener {
    protocol: &'static str,
    port: u16,
    health_check_interval_secs: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VirtualGatewaySpec<'a> {
    mesh_name: Token,
    virtual_gateway_name: &'a str,
    listeners: [GatewayListener; 1],
    access_log: &'static str,
}

/// The declared mesh and its gateway record.
#[derive(Debug, Clone)]
pub struct MeshControlPlane {
    mesh: ResourceHandle,
    mesh_name: String,
    mesh_name_ref: Token,
    gateway: ResourceHandle,
    gateway_name: String,
    gateway_name_ref: Token,
}

impl MeshControlPlane {
    /// Declares the mesh and the virtual gateway record.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn build<E: ProvisioningEngine>(engine: &mut E, stack: &StackSettings) -> TopologyResult<Self> {
        let mesh = engine.declare_spec(
            ResourceKind::Mesh,
            &stack.mesh_name,
            &MeshSpec {
                mesh_name: &stack.mesh_name,
                egress_filter: "DROP_ALL",
            },
        )?;
        let mesh_name_ref = engine.reference(&mesh, "Name")?;

        let gateway = engine.declare_spec(
            ResourceKind::VirtualGateway,
            &stack.gateway_name,
            &VirtualGatewaySpec {
                mesh_name: mesh_name_ref.clone(),
                virtual_gateway_name: &stack.gateway_name,
                listeners: [GatewayListener {
                    protocol: "http",
                    port: GATEWAY_LISTENER_PORT,
                    health_check_interval_secs: GATEWAY_HEALTH_INTERVAL_SECS,
                }],
                access_log: ACCESS_LOG_PATH,
            },
        )?;
        let gateway_name_ref = engine.reference(&gateway, "Name")?;

        info!(mesh = %stack.mesh_name, gateway = %stack.gateway_name, "declared mesh control plane");

        Ok(Self {
            mesh,
            mesh_name: stack.mesh_name.clone(),
            mesh_name_ref,
            gateway,
            gateway_name: stack.gateway_name.clone(),
            gateway_name_ref,
        })
    }

    /// Mesh handle.
    #[must_use]
    pub fn mesh(&self) -> &ResourceHandle {
        &self.mesh
    }

    /// Mesh name, literal.
    #[must_use]
    pub fn mesh_name(&self) -> &str {
        &self.mesh_name
    }

    /// Mesh name, as a reference for declarations that live in the mesh.
    #[must_use]
    pub fn mesh_name_ref(&self) -> &Token {
        &self.mesh_name_ref
    }

    /// Virtual gateway record handle.
    #[must_use]
    pub fn virtual_gateway(&self) -> &ResourceHandle {
        &self.gateway
    }

    /// Virtual gateway name, literal.
    #[must_use]
    pub fn gateway_name(&self) -> &str {
        &self.gateway_name
    }

    /// Virtual gateway name, as a reference for gateway routes.
    #[must_use]
    pub fn gateway_name_ref(&self) -> &Token {
        &self.gateway_name_ref
    }
}
