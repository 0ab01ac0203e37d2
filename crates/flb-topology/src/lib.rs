//! # flb-topology
//!
//! Synthesizes a service mesh deployment from a list of service definitions.
//!
//! Given the services to run, the crate declares the network, a shared
//! compute cluster, the mesh control plane, a single virtual gateway behind
//! a private load balancer, one sidecar-fronted mesh service per definition,
//! gateway routes, security rules, autoscaling and a public REST edge.
//! Declarations go to a [`ProvisioningEngine`]; [`DeclarationGraph`] is the
//! in-memory implementation and the synthesis output.
//!
//! ## Example
//!
//! ```rust
//! use flb_topology::{ResourceKind, ServiceDefinition, TopologyConfig, synthesize};
//!
//! let config = TopologyConfig::new(vec![
//!     ServiceDefinition::new("booking", "booking:latest", 5000).public(),
//! ]);
//! let (graph, topology) = synthesize(&config).expect("valid topology");
//!
//! assert_eq!(graph.count(ResourceKind::GatewayRoute), 1);
//! assert_eq!(topology.services[0].virtual_service_name(), "booking.default.flb");
//! ```
//!
//! ## Modules
//!
//! - [`engine`], [`graph`]: provisioning contract and the in-memory engine
//! - [`config`], [`types`]: input configuration and value types
//! - [`network`], [`cluster`], [`mesh`]: shared infrastructure
//! - [`gateway`], [`service`], [`routing`]: the mesh itself
//! - [`edge`]: public API in front of the gateway
//! - [`synth`]: orchestration

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod compute;
pub mod config;
pub mod edge;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod mesh;
pub mod network;
pub mod region;
pub mod routing;
pub mod service;
pub mod synth;
pub mod task;
pub mod types;

// Re-export main types for convenience
pub use cluster::{ComputeCluster, SharedIdentity};
pub use compute::{DeclaredCompute, SharedInfra};
pub use config::{StackSettings, TopologyConfig, prefixes_overlap};
pub use edge::{CorsPolicy, EdgeGateway};
pub use engine::{ProvisioningEngine, ResourceHandle, ResourceKind, Token};
pub use error::{EngineError, TopologyError, TopologyResult};
pub use gateway::VirtualGatewayService;
pub use graph::{Declaration, DeclarationGraph};
pub use mesh::MeshControlPlane;
pub use network::{AddressPlan, NetworkFabric, SubnetTier};
pub use region::{EnvoyImage, envoy_repository_arn};
pub use routing::RoutingBinder;
pub use service::MeshService;
pub use synth::{Synthesizer, Topology, synthesize};
pub use task::{ContainerDefinition, SidecarProxyConfig, TaskDefinitionSpec};
pub use types::{AutoscalingPolicy, HealthCheck, LogConfig, SecurityRule, ServiceDefinition};
