//! Topology configuration.
//!
//! A configuration file is JSON with two top-level keys: `stack` (shared
//! settings, every field optional) and `services` (the service definitions).
//!
//! ```json
//! {
//!   "stack": { "region": "ap-east-1", "account": "123456789012" },
//!   "services": [
//!     { "name": "booking", "image": "booking:latest", "port": 5000, "public": true }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::ResourceKind;
use crate::error::{TopologyError, TopologyResult};
use crate::gateway::FABRIC_RULE_SOURCE;
use crate::routing::{backend_name, rule_name};
use crate::types::{AutoscalingPolicy, ServiceDefinition, validate_service_name};

/// Stack-wide settings shared by every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct StackSettings {
    /// Deployment region.
    pub region: String,
    /// Deployment account.
    pub account: String,
    /// Environment tag applied to the network.
    pub environment: String,
    /// Mesh name; also the application log stream prefix.
    pub mesh_name: String,
    /// Virtual gateway name.
    pub gateway_name: String,
    /// Private DNS discovery namespace.
    pub namespace: String,
    /// Public API name.
    pub api_name: String,
    /// Origins allowed by CORS preflight.
    pub cors_origins: Vec<String>,
    /// Network address range.
    pub vpc_cidr: Ipv4Net,
    /// Number of availability zones to spread subnets across.
    pub max_azs: u8,
    /// Default autoscaling policy for services.
    pub autoscaling: AutoscalingPolicy,
    /// Maximum task count of the gateway.
    pub gateway_max_capacity: u32,
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            region: "ap-east-1".to_string(),
            account: "000000000000".to_string(),
            environment: "dev".to_string(),
            mesh_name: "flbMesh".to_string(),
            gateway_name: "flb-gateway".to_string(),
            namespace: "default.flb".to_string(),
            api_name: "flb".to_string(),
            cors_origins: vec!["*".to_string()],
            vpc_cidr: Ipv4Net::new(std::net::Ipv4Addr::new(10, 0, 0, 0), 16)
                .unwrap_or_else(|_| unreachable!()),
            max_azs: 3,
            autoscaling: AutoscalingPolicy::default(),
            gateway_max_capacity: 3,
        }
    }
}

impl StackSettings {
    /// Overrides the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Overrides the account.
    #[must_use]
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    /// Gateway autoscaling: the service default with the gateway's own cap.
    #[must_use]
    pub const fn gateway_autoscaling(&self) -> AutoscalingPolicy {
        self.autoscaling.with_max_capacity(self.gateway_max_capacity)
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::Config`] describing the first problem found.
    pub fn validate(&self) -> TopologyResult<()> {
        for (field, value) in [
            ("region", &self.region),
            ("account", &self.account),
            ("meshName", &self.mesh_name),
            ("namespace", &self.namespace),
            ("apiName", &self.api_name),
        ] {
            if value.trim().is_empty() {
                return Err(TopologyError::Config(format!("{field} cannot be empty")));
            }
        }
        validate_service_name(&self.gateway_name)
            .map_err(|e| TopologyError::Config(format!("gatewayName: {e}")))?;
        if self.max_azs == 0 || self.max_azs > 6 {
            return Err(TopologyError::Config(format!(
                "maxAzs {} must be within 1-6",
                self.max_azs
            )));
        }
        if self.vpc_cidr.prefix_len() > 20 {
            return Err(TopologyError::Config(format!(
                "vpcCidr {} is too small, need at least a /20",
                self.vpc_cidr
            )));
        }
        self.autoscaling
            .validate()
            .map_err(|e| TopologyError::Config(format!("autoscaling: {e}")))?;
        self.gateway_autoscaling()
            .validate()
            .map_err(|e| TopologyError::Config(format!("gatewayMaxCapacity: {e}")))?;
        if self.cors_origins.is_empty() {
            warn!("no CORS origins configured, browsers will reject cross-origin calls");
        }
        Ok(())
    }
}

/// Full synthesis input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TopologyConfig {
    /// Shared settings.
    #[serde(default)]
    pub stack: StackSettings,
    /// Services to wire into the mesh.
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
}

impl TopologyConfig {
    /// Configuration with default settings and the given services.
    #[must_use]
    pub fn new(services: Vec<ServiceDefinition>) -> Self {
        Self {
            stack: StackSettings::default(),
            services,
        }
    }

    /// Replaces the stack settings.
    #[must_use]
    pub fn with_stack(mut self, stack: StackSettings) -> Self {
        self.stack = stack;
        self
    }

    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::Config`] if the document is malformed.
    pub fn from_json_str(input: &str) -> TopologyResult<Self> {
        serde_json::from_str(input).map_err(|e| TopologyError::Config(e.to_string()))
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> TopologyResult<Self> {
        let input = std::fs::read_to_string(path)
            .map_err(|e| TopologyError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_json_str(&input)?;
        debug!(
            path = %path.display(),
            services = config.services.len(),
            "loaded topology configuration"
        );
        Ok(config)
    }

    /// Looks up a service definition by name.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Validates the whole input without declaring anything.
    ///
    /// Checks the settings, every definition, name uniqueness (including
    /// against the gateway name), route prefix overlap among public services,
    /// backend references and uniqueness of the rule and backend names
    /// derived from them.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> TopologyResult<()> {
        self.stack.validate()?;

        let mut names = HashSet::new();
        for def in &self.services {
            def.validate()?;
            if def.name == self.stack.gateway_name {
                return Err(TopologyError::ReservedName {
                    name: def.name.clone(),
                });
            }
            if !names.insert(def.name.as_str()) {
                return Err(TopologyError::DuplicateService {
                    name: def.name.clone(),
                });
            }
        }

        let public: Vec<_> = self.services.iter().filter(|s| s.public).collect();
        for (i, a) in public.iter().enumerate() {
            for b in &public[i + 1..] {
                let (pa, pb) = (a.route_prefix(), b.route_prefix());
                if prefixes_overlap(&pa, &pb) {
                    return Err(TopologyError::OverlappingRoutes {
                        first: pa,
                        second: pb,
                    });
                }
            }
        }

        for def in &self.services {
            for backend in &def.backends {
                if *backend == def.name {
                    return Err(TopologyError::SelfBackend {
                        service: def.name.clone(),
                    });
                }
                if !names.contains(backend.as_str()) {
                    return Err(TopologyError::UnknownBackend {
                        service: def.name.clone(),
                        backend: backend.clone(),
                    });
                }
            }
        }

        self.check_derived_names()?;

        if !self.services.is_empty() && public.is_empty() {
            warn!("no public services, the gateway will have no routes");
        }
        Ok(())
    }

    /// Rule and backend names join two service names with a hyphenated
    /// infix that a service name may itself contain, so distinct pairs can
    /// produce the same name.
    fn check_derived_names(&self) -> TopologyResult<()> {
        let gateway = self.stack.gateway_name.as_str();
        let mut rules = vec![rule_name(gateway, FABRIC_RULE_SOURCE)];
        let mut backends = Vec::new();
        for def in &self.services {
            if def.public {
                rules.push(rule_name(&def.name, gateway));
            }
            for backend in &def.backends {
                rules.push(rule_name(backend, &def.name));
                backends.push(backend_name(&def.name, backend));
            }
        }

        for (kind, names) in [
            (ResourceKind::SecurityRule, rules),
            (ResourceKind::VirtualNodeBackend, backends),
        ] {
            let mut seen = HashSet::new();
            for name in names {
                if seen.contains(&name) {
                    return Err(TopologyError::AmbiguousName { kind, name });
                }
                seen.insert(name);
            }
        }
        Ok(())
    }
}

/// Two prefixes overlap when either one matches every path the other does.
#[must_use]
pub fn prefixes_overlap(a: &str, b: &str) -> bool {
    a.starts_with(b) || b.starts_with(a)
}
