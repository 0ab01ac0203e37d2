//! Synthesis: validated input in, complete declaration set out.
//!
//! 1. Validate the whole configuration; nothing is declared on failure.
//! 2. Declare the fabric, cluster, control plane, gateway and every service.
//! 3. Bind gateway routes for public services, then explicit connections.
//! 4. Declare the edge API once the gateway load balancer exists.

use tracing::{info, warn};

use crate::cluster::ComputeCluster;
use crate::compute::SharedInfra;
use crate::config::TopologyConfig;
use crate::edge::EdgeGateway;
use crate::engine::{ProvisioningEngine, ResourceHandle};
use crate::error::{TopologyError, TopologyResult};
use crate::gateway::VirtualGatewayService;
use crate::graph::DeclarationGraph;
use crate::mesh::MeshControlPlane;
use crate::network::NetworkFabric;
use crate::routing::RoutingBinder;
use crate::service::MeshService;

/// Everything declared for one configuration.
#[derive(Debug, Clone)]
pub struct Topology {
    /// Network.
    pub fabric: NetworkFabric,
    /// Cluster and shared templates.
    pub cluster: ComputeCluster,
    /// Mesh control plane.
    pub mesh: MeshControlPlane,
    /// Gateway service.
    pub gateway: VirtualGatewayService,
    /// Services, in input order.
    pub services: Vec<MeshService>,
    /// Gateway routes, in input order of their services.
    pub routes: Vec<ResourceHandle>,
    /// Edge API.
    pub edge: EdgeGateway,
}

impl Topology {
    /// Looks up a service by name.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&MeshService> {
        find(&self.services, name)
    }

    /// Services reachable through the gateway.
    pub fn public_services(&self) -> impl Iterator<Item = &MeshService> {
        self.services.iter().filter(|s| s.is_public())
    }
}

/// Runs the build against any engine.
#[derive(Debug, Clone, Copy)]
pub struct Synthesizer<'a> {
    config: &'a TopologyConfig,
}

impl<'a> Synthesizer<'a> {
    /// Synthesizer for `config`.
    #[must_use]
    pub const fn new(config: &'a TopologyConfig) -> Self {
        Self { config }
    }

    /// Validates and declares the full topology into `engine`.
    ///
    /// # Errors
    ///
    /// Returns the validation error before touching the engine, or the first
    /// engine failure.
    pub fn run<E: ProvisioningEngine>(&self, engine: &mut E) -> TopologyResult<Topology> {
        self.config.validate()?;

        let stack = &self.config.stack;
        info!(
            region = %stack.region,
            services = self.config.services.len(),
            "synthesizing topology"
        );

        let fabric = NetworkFabric::build(engine, stack)?;
        let cluster = ComputeCluster::build(engine, stack, &fabric)?;
        let mesh = MeshControlPlane::build(engine, stack)?;
        let infra = SharedInfra {
            stack,
            fabric: &fabric,
            cluster: &cluster,
            mesh: &mesh,
        };
        let gateway = VirtualGatewayService::build(engine, infra)?;
        let services = self
            .config
            .services
            .iter()
            .map(|def| MeshService::build(engine, infra, &gateway, def))
            .collect::<TopologyResult<Vec<_>>>()?;

        let binder = RoutingBinder::new(&mesh);
        let routes = services
            .iter()
            .filter(|s| s.is_public())
            .map(|s| binder.bind_route(engine, s))
            .collect::<TopologyResult<Vec<_>>>()?;
        if routes.is_empty() {
            warn!(gateway = %gateway.name(), "gateway has no routes");
        }

        let mut connections = 0_usize;
        for (def, source) in self.config.services.iter().zip(&services) {
            for backend in &def.backends {
                let target = find(&services, backend).ok_or_else(|| TopologyError::UnknownBackend {
                    service: def.name.clone(),
                    backend: backend.clone(),
                })?;
                binder.connect(engine, source, target)?;
                connections += 1;
            }
        }

        let edge = EdgeGateway::build(engine, stack, &gateway)?;

        info!(
            services = services.len(),
            routes = routes.len(),
            connections,
            "topology synthesized"
        );

        Ok(Topology {
            fabric,
            cluster,
            mesh,
            gateway,
            services,
            routes,
            edge,
        })
    }
}

/// Synthesizes `config` into a fresh in-memory graph.
///
/// # Errors
///
/// See [`Synthesizer::run`].
pub fn synthesize(config: &TopologyConfig) -> TopologyResult<(DeclarationGraph, Topology)> {
    let mut graph = DeclarationGraph::new();
    let topology = Synthesizer::new(config).run(&mut graph)?;
    Ok((graph, topology))
}

fn find<'s>(services: &'s [MeshService], name: &str) -> Option<&'s MeshService> {
    services.iter().find(|s| s.service_name() == name)
}
