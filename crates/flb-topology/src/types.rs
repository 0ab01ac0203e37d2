//! Core value types for topology synthesis.
//!
//! - [`ServiceDefinition`]: caller input describing one logical service
//! - [`HealthCheck`], [`LogConfig`]: container templates shared by the cluster
//! - [`AutoscalingPolicy`]: CPU target tracking with cooldowns
//! - [`SecurityRule`]: one inbound permission on a compute task
//!
//! All of these are immutable once built. Shared templates are cloned into
//! every resource that uses them.

use std::collections::BTreeMap;

use ipnet::Ipv4Net;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::engine::Token;
use crate::error::{TopologyError, TopologyResult};
use crate::task::{
    SIDECAR_ADMIN_PORT, SIDECAR_EGRESS_PORT, SIDECAR_INGRESS_PORT, SIDECAR_MEMORY_MIB,
    TASK_CPU_UNITS, TASK_MEMORY_MIB,
};

static SERVICE_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]([a-z0-9-]{0,61}[a-z0-9])?$").unwrap_or_else(|_| unreachable!()));

/// Ports owned by the sidecar that an application may not listen on.
pub const RESERVED_PORTS: [u16; 3] = [SIDECAR_INGRESS_PORT, SIDECAR_EGRESS_PORT, SIDECAR_ADMIN_PORT];

/// Default memory limit for application containers.
pub const DEFAULT_MEMORY_MIB: u32 = 128;

/// Largest application memory limit that still fits beside the sidecar.
pub const MAX_APP_MEMORY_MIB: u32 = TASK_MEMORY_MIB - SIDECAR_MEMORY_MIB;

// ─────────────────────────────────────────────────────────────
// Templates
// ─────────────────────────────────────────────────────────────

/// Container health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HealthCheck {
    /// Check command, `CMD-SHELL` form.
    pub command: Vec<String>,
    /// Grace period after start before failures count.
    pub start_period_secs: u32,
    /// Time between checks.
    pub interval_secs: u32,
    /// Time a single check may take.
    pub timeout_secs: u32,
    /// Consecutive failures before the container is unhealthy.
    pub retries: u32,
}

impl HealthCheck {
    /// Shell health check with the standard timings (10s/5s/2s/3).
    #[must_use]
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: vec!["CMD-SHELL".to_string(), command.into()],
            start_period_secs: 10,
            interval_secs: 5,
            timeout_secs: 2,
            retries: 3,
        }
    }

    /// Same timings, different shell command.
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = vec!["CMD-SHELL".to_string(), command.into()];
        self
    }

    /// The shell command being run.
    #[must_use]
    pub fn shell_command(&self) -> Option<&str> {
        match self.command.as_slice() {
            [kind, cmd] if kind == "CMD-SHELL" => Some(cmd.as_str()),
            _ => None,
        }
    }
}

/// Container log routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// Log driver.
    pub driver: String,
    /// Stream prefix in the log group.
    pub stream_prefix: String,
}

impl LogConfig {
    /// `awslogs` driver with the given stream prefix.
    #[must_use]
    pub fn aws_logs(stream_prefix: impl Into<String>) -> Self {
        Self {
            driver: "awslogs".to_string(),
            stream_prefix: stream_prefix.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────
// Autoscaling
// ─────────────────────────────────────────────────────────────

/// CPU target tracking policy. Minimum capacity is the desired count (1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct AutoscalingPolicy {
    /// Upper bound on task count.
    pub max_capacity: u32,
    /// Target average CPU utilization, percent.
    pub target_cpu_percent: u32,
    /// Minimum time between scale-in actions.
    pub scale_in_cooldown_secs: u32,
    /// Minimum time between scale-out actions.
    pub scale_out_cooldown_secs: u32,
}

impl Default for AutoscalingPolicy {
    fn default() -> Self {
        Self {
            max_capacity: 3,
            target_cpu_percent: 50,
            scale_in_cooldown_secs: 60,
            scale_out_cooldown_secs: 60,
        }
    }
}

impl AutoscalingPolicy {
    /// Task count every service starts with.
    pub const MIN_CAPACITY: u32 = 1;

    /// Sets the maximum capacity.
    #[must_use]
    pub const fn with_max_capacity(mut self, max_capacity: u32) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// Sets the CPU target.
    #[must_use]
    pub const fn with_target_cpu_percent(mut self, percent: u32) -> Self {
        self.target_cpu_percent = percent;
        self
    }

    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the policy cannot be applied.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_capacity < Self::MIN_CAPACITY {
            return Err(format!(
                "max capacity {} is below minimum {}",
                self.max_capacity,
                Self::MIN_CAPACITY
            ));
        }
        if self.target_cpu_percent == 0 || self.target_cpu_percent > 100 {
            return Err(format!(
                "target cpu {}% must be within 1-100",
                self.target_cpu_percent
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
// Security rules
// ─────────────────────────────────────────────────────────────

/// Transport protocol of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

/// Who a rule lets in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleSource {
    /// Members of another security group.
    SecurityGroup(Token),
    /// An address range.
    Cidr(Ipv4Net),
}

/// Inbound permission on a security group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRule {
    /// Group the rule is attached to.
    pub group: Token,
    /// Protocol.
    pub protocol: Protocol,
    /// Port (single port range).
    pub port: u16,
    /// Permitted source.
    pub source: RuleSource,
    /// Human readable description.
    pub description: String,
}

impl SecurityRule {
    /// TCP rule on a single port.
    #[must_use]
    pub fn tcp(group: Token, port: u16, source: RuleSource, description: impl Into<String>) -> Self {
        Self {
            group,
            protocol: Protocol::Tcp,
            port,
            source,
            description: description.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────
// Service definitions
// ─────────────────────────────────────────────────────────────

/// Resource limits for an application container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ResourceLimits {
    /// Hard memory limit.
    pub memory_mib: u32,
    /// Reserved CPU units, if any.
    pub cpu_units: Option<u32>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mib: DEFAULT_MEMORY_MIB,
            cpu_units: None,
        }
    }
}

/// One logical service to wire into the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceDefinition {
    /// Service name; becomes the virtual node and discovery name.
    pub name: String,
    /// Container image reference.
    pub image: String,
    /// Port the application listens on.
    pub port: u16,
    /// Container limits.
    #[serde(default)]
    pub limits: ResourceLimits,
    /// Whether the service is reachable through the virtual gateway.
    #[serde(default)]
    pub public: bool,
    /// Application health check; the cluster template is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    /// Autoscaling override; the cluster default is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling: Option<AutoscalingPolicy>,
    /// Gateway route prefix; defaults to `/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    /// Peer services this service calls.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backends: Vec<String>,
    /// Extra environment for the application container.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

impl ServiceDefinition {
    /// Creates a private service with default limits.
    #[must_use]
    pub fn new(name: impl Into<String>, image: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            port,
            limits: ResourceLimits::default(),
            public: false,
            health_check: None,
            scaling: None,
            path_prefix: None,
            backends: Vec::new(),
            environment: BTreeMap::new(),
        }
    }

    /// Marks the service as reachable through the gateway.
    #[must_use]
    pub const fn public(mut self) -> Self {
        self.public = true;
        self
    }

    /// Sets the memory limit.
    #[must_use]
    pub const fn with_memory_mib(mut self, memory_mib: u32) -> Self {
        self.limits.memory_mib = memory_mib;
        self
    }

    /// Overrides the application health check.
    #[must_use]
    pub fn with_health_check(mut self, health_check: HealthCheck) -> Self {
        self.health_check = Some(health_check);
        self
    }

    /// Overrides the autoscaling policy.
    #[must_use]
    pub const fn with_scaling(mut self, scaling: AutoscalingPolicy) -> Self {
        self.scaling = Some(scaling);
        self
    }

    /// Overrides the gateway route prefix.
    #[must_use]
    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    /// Adds a peer service this service calls.
    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backends.push(backend.into());
        self
    }

    /// Adds an environment variable to the application container.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Route prefix on the virtual gateway.
    #[must_use]
    pub fn route_prefix(&self) -> String {
        self.path_prefix
            .clone()
            .unwrap_or_else(|| format!("/{}", self.name))
    }

    /// Validates the definition in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed name, an empty image, an unusable
    /// port, limits the task cannot hold, a bad route prefix, an invalid
    /// scaling override, or caller text that would be read as a reference.
    pub fn validate(&self) -> TopologyResult<()> {
        validate_service_name(&self.name)?;
        if self.image.trim().is_empty() {
            return Err(TopologyError::invalid_definition(
                &self.name,
                "image cannot be empty",
            ));
        }
        if self.port == 0 {
            return Err(TopologyError::InvalidPort {
                service: self.name.clone(),
                port: self.port,
                reason: "port must be within 1-65535".to_string(),
            });
        }
        if RESERVED_PORTS.contains(&self.port) {
            return Err(TopologyError::InvalidPort {
                service: self.name.clone(),
                port: self.port,
                reason: "port is reserved by the sidecar proxy".to_string(),
            });
        }
        if self.limits.memory_mib == 0 {
            return Err(TopologyError::invalid_definition(
                &self.name,
                "memory limit must be at least 1 MiB",
            ));
        }
        if self.limits.memory_mib > MAX_APP_MEMORY_MIB {
            return Err(TopologyError::invalid_definition(
                &self.name,
                format!(
                    "memory limit {} MiB exceeds {MAX_APP_MEMORY_MIB} MiB, the task holds {TASK_MEMORY_MIB} MiB including the {SIDECAR_MEMORY_MIB} MiB sidecar",
                    self.limits.memory_mib
                ),
            ));
        }
        if let Some(cpu) = self.limits.cpu_units {
            if cpu > TASK_CPU_UNITS {
                return Err(TopologyError::invalid_definition(
                    &self.name,
                    format!("cpu units {cpu} exceed the task's {TASK_CPU_UNITS}"),
                ));
            }
        }
        self.reject_token_text()?;
        if let Some(prefix) = &self.path_prefix {
            if !prefix.starts_with('/') || prefix.len() < 2 {
                return Err(TopologyError::invalid_definition(
                    &self.name,
                    format!("path prefix '{prefix}' must start with '/' and name a path"),
                ));
            }
        }
        if let Some(scaling) = &self.scaling {
            scaling
                .validate()
                .map_err(|reason| TopologyError::invalid_definition(&self.name, reason))?;
        }
        for (i, backend) in self.backends.iter().enumerate() {
            if self.backends[..i].contains(backend) {
                return Err(TopologyError::invalid_definition(
                    &self.name,
                    format!("backend '{backend}' listed more than once"),
                ));
            }
        }
        Ok(())
    }

    fn reject_token_text(&self) -> TopologyResult<()> {
        let health_check = self.health_check.iter().flat_map(|hc| &hc.command);
        let fields = std::iter::once(("image", &self.image))
            .chain(self.path_prefix.iter().map(|p| ("path prefix", p)))
            .chain(health_check.map(|c| ("health check", c)))
            .chain(
                self.environment
                    .iter()
                    .flat_map(|(k, v)| [("environment", k), ("environment", v)]),
            );
        for (field, text) in fields {
            if Token::is_embedded_in(text) {
                return Err(TopologyError::invalid_definition(
                    &self.name,
                    format!("{field} value '{text}' looks like a resource reference"),
                ));
            }
        }
        Ok(())
    }
}

/// Checks that `name` is usable as a DNS label.
///
/// # Errors
///
/// Returns [`TopologyError::InvalidName`] otherwise.
pub fn validate_service_name(name: &str) -> TopologyResult<()> {
    if SERVICE_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(TopologyError::InvalidName {
            name: name.to_string(),
            reason: "must be 1-63 lowercase letters, digits or hyphens, start with a letter and not end with a hyphen".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn default_autoscaling_matches_cluster_defaults() {
        let policy = AutoscalingPolicy::default();
        assert_eq!(policy.max_capacity, 3);
        assert_eq!(policy.target_cpu_percent, 50);
        assert_eq!(policy.scale_in_cooldown_secs, 60);
        assert_eq!(policy.scale_out_cooldown_secs, 60);
        assert!(policy.validate().is_ok());
    }

    #[test_case(0, 50 ; "zero max capacity")]
    #[test_case(3, 0 ; "zero target")]
    #[test_case(3, 101 ; "target above 100")]
    fn autoscaling_invalid(max: u32, target: u32) {
        let policy = AutoscalingPolicy::default()
            .with_max_capacity(max)
            .with_target_cpu_percent(target);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn partial_autoscaling_json_fills_defaults() {
        let policy: AutoscalingPolicy =
            serde_json::from_str(r#"{"maxCapacity": 10}"#).expect("parse");
        assert_eq!(policy.max_capacity, 10);
        assert_eq!(policy.scale_in_cooldown_secs, 60);
    }

    #[test]
    fn shell_health_check_timings() {
        let hc = HealthCheck::shell("curl localhost:5000");
        assert_eq!(hc.command, vec!["CMD-SHELL", "curl localhost:5000"]);
        assert_eq!(hc.start_period_secs, 10);
        assert_eq!(hc.interval_secs, 5);
        assert_eq!(hc.timeout_secs, 2);
        assert_eq!(hc.retries, 3);
        assert_eq!(hc.shell_command(), Some("curl localhost:5000"));
    }

    #[test]
    fn route_prefix_defaults_to_service_name() {
        let def = ServiceDefinition::new("booking", "booking:latest", 5000);
        assert_eq!(def.route_prefix(), "/booking");

        let def = def.with_path_prefix("/api/booking");
        assert_eq!(def.route_prefix(), "/api/booking");
    }

    #[test]
    fn minimal_json_definition_parses() {
        let def: ServiceDefinition = serde_json::from_str(
            r#"{"name": "booking", "image": "booking:latest", "port": 5000, "public": true}"#,
        )
        .expect("parse");
        assert!(def.public);
        assert_eq!(def.limits.memory_mib, DEFAULT_MEMORY_MIB);
        assert!(def.backends.is_empty());
        assert!(def.validate().is_ok());
    }

    #[test_case("booking" ; "simple")]
    #[test_case("user-profile" ; "with hyphen")]
    #[test_case("svc2" ; "with digit")]
    #[test_case("a" ; "single letter")]
    fn service_name_valid(name: &str) {
        assert!(validate_service_name(name).is_ok());
    }

    #[test_case("" ; "empty")]
    #[test_case("Booking" ; "uppercase")]
    #[test_case("2fa" ; "starts with digit")]
    #[test_case("booking-" ; "ends with hyphen")]
    #[test_case("book ing" ; "contains space")]
    #[test_case("book.ing" ; "contains dot")]
    fn service_name_invalid(name: &str) {
        assert!(
            matches!(validate_service_name(name), Err(TopologyError::InvalidName { .. })),
            "expected '{name}' to be invalid"
        );
    }

    #[test]
    fn service_name_max_length() {
        assert!(validate_service_name(&"a".repeat(63)).is_ok());
        assert!(validate_service_name(&"a".repeat(64)).is_err());
    }

    #[test_case(0 ; "zero")]
    #[test_case(15000 ; "sidecar ingress")]
    #[test_case(15001 ; "sidecar egress")]
    #[test_case(9901 ; "sidecar admin")]
    fn unusable_ports_rejected(port: u16) {
        let def = ServiceDefinition::new("booking", "booking:latest", port);
        assert!(matches!(def.validate(), Err(TopologyError::InvalidPort { .. })));
    }

    #[test]
    fn empty_image_rejected() {
        let def = ServiceDefinition::new("booking", "  ", 5000);
        assert!(matches!(
            def.validate(),
            Err(TopologyError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn bad_path_prefix_rejected() {
        let def = ServiceDefinition::new("booking", "booking:latest", 5000).with_path_prefix("booking");
        assert!(def.validate().is_err());
        let def = ServiceDefinition::new("booking", "booking:latest", 5000).with_path_prefix("/");
        assert!(def.validate().is_err());
    }

    #[test]
    fn repeated_backend_rejected() {
        let def = ServiceDefinition::new("booking", "booking:latest", 5000)
            .with_backend("payments")
            .with_backend("payments");
        assert!(matches!(
            def.validate(),
            Err(TopologyError::InvalidDefinition { .. })
        ));
    }

    #[test_case(384, true ; "fills the task beside the sidecar")]
    #[test_case(385, false ; "one over the task size")]
    #[test_case(1024, false ; "far over the task size")]
    fn memory_limit_must_fit_task(memory_mib: u32, fits: bool) {
        let def = ServiceDefinition::new("booking", "booking:latest", 5000).with_memory_mib(memory_mib);
        assert_eq!(def.validate().is_ok(), fits, "memory {memory_mib} MiB");
    }

    #[test_case(Some(256), true ; "whole task")]
    #[test_case(Some(257), false ; "above task")]
    #[test_case(None, true ; "unreserved")]
    fn cpu_units_must_fit_task(cpu_units: Option<u32>, fits: bool) {
        let mut def = ServiceDefinition::new("booking", "booking:latest", 5000);
        def.limits.cpu_units = cpu_units;
        assert_eq!(def.validate().is_ok(), fits);
    }

    #[test]
    fn reference_shaped_environment_rejected() {
        let def = ServiceDefinition::new("booking", "booking:latest", 5000)
            .with_env("DSN", "${Db:primary.Host}");
        let err = def.validate().expect_err("token text in env");
        assert!(err.to_string().contains("environment"));
    }

    #[test]
    fn reference_shaped_image_and_health_check_rejected() {
        let def = ServiceDefinition::new("booking", "${Repository:booking.Uri}:latest", 5000);
        assert!(matches!(def.validate(), Err(TopologyError::InvalidDefinition { .. })));

        let def = ServiceDefinition::new("booking", "booking:latest", 5000)
            .with_health_check(HealthCheck::shell("curl ${LoadBalancer:flb-gateway-ingress.DnsName}"));
        assert!(matches!(def.validate(), Err(TopologyError::InvalidDefinition { .. })));
    }

    #[test]
    fn shell_style_environment_allowed() {
        let def = ServiceDefinition::new("booking", "booking:latest", 5000)
            .with_env("PATH", "${HOME}/bin:/usr/bin")
            .with_env("DSN", "postgres://ledger.default.flb:5432/db");
        assert!(def.validate().is_ok());
    }

    #[test]
    fn invalid_scaling_override_rejected() {
        let def = ServiceDefinition::new("booking", "booking:latest", 5000)
            .with_scaling(AutoscalingPolicy::default().with_max_capacity(0));
        assert!(matches!(
            def.validate(),
            Err(TopologyError::InvalidDefinition { .. })
        ));
    }
}
