//! Binding phase: gateway routes and explicit service-to-service wiring.
//!
//! Runs after every target exists. Routes are append-only; a second route
//! with the same name is rejected by the engine.

use serde::Serialize;
use tracing::{debug, info};

use crate::compute::declare_rule;
use crate::engine::{ProvisioningEngine, ResourceHandle, ResourceKind, Token};
use crate::error::TopologyResult;
use crate::mesh::MeshControlPlane;
use crate::service::MeshService;
use crate::types::{RuleSource, SecurityRule};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrefixMatch<'a> {
    prefix: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GatewayRouteSpec<'a> {
    mesh_name: Token,
    virtual_gateway_name: Token,
    gateway_route_name: &'a str,
    protocol: &'static str,
    #[serde(rename = "match")]
    route_match: PrefixMatch<'a>,
    target: Token,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BackendSpec {
    mesh_name: Token,
    virtual_node: Token,
    virtual_service: Token,
}

/// Name of the rule on `target` admitting `source`.
#[must_use]
pub fn rule_name(target: &str, source: &str) -> String {
    format!("{target}-from-{source}")
}

/// Name of the record making `target` a backend of `source`.
#[must_use]
pub fn backend_name(source: &str, target: &str) -> String {
    format!("{source}-backend-{target}")
}

/// Declares routes and peer connections against an existing control plane.
#[derive(Debug, Clone, Copy)]
pub struct RoutingBinder<'a> {
    mesh: &'a MeshControlPlane,
}

impl<'a> RoutingBinder<'a> {
    /// Binder for the given control plane.
    #[must_use]
    pub const fn new(mesh: &'a MeshControlPlane) -> Self {
        Self { mesh }
    }

    /// Routes `service`'s prefix on the virtual gateway to its virtual service.
    ///
    /// # Errors
    ///
    /// Fails if a route with the same name already exists.
    pub fn bind_route<E: ProvisioningEngine>(
        &self,
        engine: &mut E,
        service: &MeshService,
    ) -> TopologyResult<ResourceHandle> {
        let name = format!("{}-route", service.service_name());
        let route = engine.declare_spec(
            ResourceKind::GatewayRoute,
            &name,
            &GatewayRouteSpec {
                mesh_name: self.mesh.mesh_name_ref().clone(),
                virtual_gateway_name: self.mesh.gateway_name_ref().clone(),
                gateway_route_name: &name,
                protocol: "http",
                route_match: PrefixMatch {
                    prefix: service.route_prefix(),
                },
                target: service.virtual_service_ref().clone(),
            },
        )?;
        info!(
            route = %name,
            prefix = %service.route_prefix(),
            target = %service.virtual_service_name(),
            "bound gateway route"
        );
        Ok(route)
    }

    /// Lets `source` call `target`: a rule on the target admitting the
    /// source on the target's port, and a backend on the source's node.
    ///
    /// # Errors
    ///
    /// Fails if the connection was already declared.
    pub fn connect<E: ProvisioningEngine>(
        &self,
        engine: &mut E,
        source: &MeshService,
        target: &MeshService,
    ) -> TopologyResult<()> {
        self.allow(engine, source, target)?;
        self.add_backend(engine, source, target)?;
        debug!(
            source = %source.service_name(),
            target = %target.service_name(),
            "connected services"
        );
        Ok(())
    }

    /// Admits `source` on `target`'s port.
    ///
    /// # Errors
    ///
    /// Fails if the same rule was already declared.
    pub fn allow<E: ProvisioningEngine>(
        &self,
        engine: &mut E,
        source: &MeshService,
        target: &MeshService,
    ) -> TopologyResult<ResourceHandle> {
        declare_rule(
            engine,
            &rule_name(target.service_name(), source.service_name()),
            &SecurityRule::tcp(
                target.group_id().clone(),
                target.port(),
                RuleSource::SecurityGroup(source.group_id().clone()),
                format!("Inbound from {}", source.service_name()),
            ),
        )
    }

    /// Records `target`'s virtual service as a backend of `source`'s node.
    ///
    /// # Errors
    ///
    /// Fails if the backend was already recorded.
    pub fn add_backend<E: ProvisioningEngine>(
        &self,
        engine: &mut E,
        source: &MeshService,
        target: &MeshService,
    ) -> TopologyResult<ResourceHandle> {
        Ok(engine.declare_spec(
            ResourceKind::VirtualNodeBackend,
            &backend_name(source.service_name(), target.service_name()),
            &BackendSpec {
                mesh_name: self.mesh.mesh_name_ref().clone(),
                virtual_node: engine.reference(source.virtual_node(), "Name")?,
                virtual_service: target.virtual_service_ref().clone(),
            },
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ComputeCluster;
    use crate::compute::SharedInfra;
    use crate::config::StackSettings;
    use crate::gateway::VirtualGatewayService;
    use crate::graph::DeclarationGraph;
    use crate::network::NetworkFabric;
    use crate::types::ServiceDefinition;
    use serde_json::json;

    fn setup(defs: &[ServiceDefinition]) -> (DeclarationGraph, MeshControlPlane, Vec<MeshService>) {
        let mut graph = DeclarationGraph::new();
        let stack = StackSettings::default();
        let fabric = NetworkFabric::build(&mut graph, &stack).expect("fabric");
        let cluster = ComputeCluster::build(&mut graph, &stack, &fabric).expect("cluster");
        let mesh = MeshControlPlane::build(&mut graph, &stack).expect("mesh");
        let infra = SharedInfra {
            stack: &stack,
            fabric: &fabric,
            cluster: &cluster,
            mesh: &mesh,
        };
        let gateway = VirtualGatewayService::build(&mut graph, infra).expect("gateway");
        let services = defs
            .iter()
            .map(|d| MeshService::build(&mut graph, infra, &gateway, d).expect("service"))
            .collect();
        (graph, mesh, services)
    }

    #[test]
    fn route_targets_virtual_service() {
        let (mut graph, mesh, services) =
            setup(&[ServiceDefinition::new("booking", "booking:latest", 5000).public()]);
        let binder = RoutingBinder::new(&mesh);
        binder.bind_route(&mut graph, &services[0]).expect("route");

        let route = graph.get(ResourceKind::GatewayRoute, "booking-route").expect("route");
        assert_eq!(route.field("/match/prefix"), Some(&json!("/booking")));
        assert_eq!(
            route.field("/target"),
            Some(&json!("${VirtualService:booking.default.flb.Name}"))
        );
        assert_eq!(
            route.field("/virtualGatewayName"),
            Some(&json!("${VirtualGateway:flb-gateway.Name}"))
        );
    }

    #[test]
    fn duplicate_route_rejected() {
        let (mut graph, mesh, services) =
            setup(&[ServiceDefinition::new("booking", "booking:latest", 5000).public()]);
        let binder = RoutingBinder::new(&mesh);
        binder.bind_route(&mut graph, &services[0]).expect("first");
        let second = binder.bind_route(&mut graph, &services[0]);
        assert!(matches!(second, Err(e) if e.is_engine_error()));
    }

    #[test]
    fn connect_declares_rule_and_backend() {
        let (mut graph, mesh, services) = setup(&[
            ServiceDefinition::new("booking", "booking:latest", 5000).public(),
            ServiceDefinition::new("payments", "payments:latest", 6000),
        ]);
        let binder = RoutingBinder::new(&mesh);
        binder.connect(&mut graph, &services[0], &services[1]).expect("connect");

        let rule = graph
            .get(ResourceKind::SecurityRule, "payments-from-booking")
            .expect("rule");
        assert_eq!(rule.field("/port"), Some(&json!(6000)));
        assert_eq!(
            rule.field("/source/securityGroup"),
            Some(&json!("${SecurityGroup:booking-sg.GroupId}"))
        );

        let backend = graph
            .get(ResourceKind::VirtualNodeBackend, "booking-backend-payments")
            .expect("backend");
        assert_eq!(backend.field("/virtualNode"), Some(&json!("${VirtualNode:booking.Name}")));
        assert_eq!(
            backend.field("/virtualService"),
            Some(&json!("${VirtualService:payments.default.flb.Name}"))
        );
    }
}
