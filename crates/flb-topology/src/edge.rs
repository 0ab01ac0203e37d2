//! Public REST edge in front of the gateway's private load balancer.
//!
//! Any path and method is accepted and forwarded over a private link to
//! `http://<load balancer dns>/{proxy}`.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::config::StackSettings;
use crate::engine::{ProvisioningEngine, ResourceHandle, ResourceKind, Token};
use crate::error::TopologyResult;
use crate::gateway::VirtualGatewayService;

/// Name of the private link.
pub const VPC_LINK_NAME: &str = "apiGatewayECSLink";
/// Greedy path resource.
pub const PROXY_RESOURCE: &str = "{proxy+}";
/// Headers allowed in preflight.
pub const CORS_ALLOW_HEADERS: [&str; 1] = ["Authorization"];
/// Methods allowed in preflight.
pub const CORS_ALLOW_METHODS: [&str; 4] = ["GET", "HEAD", "OPTIONS", "POST"];
/// Preflight cache lifetime.
pub const CORS_MAX_AGE_SECS: u32 = 86_400;

/// Preflight settings of the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsPolicy {
    /// Allowed origins.
    pub allow_origins: Vec<String>,
    /// Allowed request headers.
    pub allow_headers: Vec<String>,
    /// Allowed methods.
    pub allow_methods: Vec<String>,
    /// Preflight cache lifetime.
    pub max_age_secs: u32,
}

impl CorsPolicy {
    /// Fixed headers, methods and max-age with the configured origins.
    #[must_use]
    pub fn for_origins(origins: &[String]) -> Self {
        Self {
            allow_origins: origins.to_vec(),
            allow_headers: CORS_ALLOW_HEADERS.iter().map(ToString::to_string).collect(),
            allow_methods: CORS_ALLOW_METHODS.iter().map(ToString::to_string).collect(),
            max_age_secs: CORS_MAX_AGE_SECS,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RestApiSpec<'a> {
    name: &'a str,
    endpoint_type: &'static str,
    cors: CorsPolicy,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VpcLinkSpec {
    name: &'static str,
    targets: [Token; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiResourceSpec {
    rest_api: Token,
    parent: Token,
    path_part: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Integration {
    #[serde(rename = "type")]
    kind: &'static str,
    integration_http_method: &'static str,
    uri: String,
    connection_type: &'static str,
    connection_id: Token,
    passthrough_behavior: &'static str,
    request_parameters: BTreeMap<&'static str, &'static str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiMethodSpec {
    rest_api: Token,
    resource: Token,
    http_method: &'static str,
    request_parameters: BTreeMap<&'static str, bool>,
    integration: Integration,
    method_responses: [MethodResponse; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MethodResponse {
    status_code: &'static str,
}

/// The declared edge API.
#[derive(Debug, Clone)]
pub struct EdgeGateway {
    api: ResourceHandle,
    link: ResourceHandle,
    proxy_method: ResourceHandle,
    cors: CorsPolicy,
    url: Token,
}

impl EdgeGateway {
    /// Declares the API, the private link and the catch-all proxy method.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn build<E: ProvisioningEngine>(
        engine: &mut E,
        stack: &StackSettings,
        gateway: &VirtualGatewayService,
    ) -> TopologyResult<Self> {
        let cors = CorsPolicy::for_origins(&stack.cors_origins);
        let api = engine.declare_spec(
            ResourceKind::RestApi,
            &stack.api_name,
            &RestApiSpec {
                name: &stack.api_name,
                endpoint_type: "REGIONAL",
                cors: cors.clone(),
            },
        )?;
        let api_id = engine.reference(&api, "Id")?;

        let link = engine.declare_spec(
            ResourceKind::VpcLink,
            VPC_LINK_NAME,
            &VpcLinkSpec {
                name: VPC_LINK_NAME,
                targets: [engine.reference(gateway.load_balancer(), "Arn")?],
            },
        )?;

        let proxy = engine.declare_spec(
            ResourceKind::ApiResource,
            "proxy",
            &ApiResourceSpec {
                rest_api: api_id.clone(),
                parent: engine.reference(&api, "RootResourceId")?,
                path_part: PROXY_RESOURCE,
            },
        )?;

        let proxy_method = engine.declare_spec(
            ResourceKind::ApiMethod,
            "ANY",
            &ApiMethodSpec {
                rest_api: api_id,
                resource: engine.reference(&proxy, "Id")?,
                http_method: "ANY",
                request_parameters: BTreeMap::from([("method.request.path.proxy", true)]),
                integration: Integration {
                    kind: "HTTP_PROXY",
                    integration_http_method: "ANY",
                    uri: format!("http://{}/{{proxy}}", gateway.dns_name()),
                    connection_type: "VPC_LINK",
                    connection_id: engine.reference(&link, "Id")?,
                    passthrough_behavior: "WHEN_NO_MATCH",
                    request_parameters: BTreeMap::from([(
                        "integration.request.path.proxy",
                        "method.request.path.proxy",
                    )]),
                },
                method_responses: [MethodResponse { status_code: "200" }],
            },
        )?;

        let url = engine.reference(&api, "Url")?;
        info!(api = %stack.api_name, origins = ?cors.allow_origins, "declared edge gateway");

        Ok(Self {
            api,
            link,
            proxy_method,
            cors,
            url,
        })
    }

    /// API handle.
    #[must_use]
    pub fn api(&self) -> &ResourceHandle {
        &self.api
    }

    /// Private link handle.
    #[must_use]
    pub fn link(&self) -> &ResourceHandle {
        &self.link
    }

    /// Catch-all method handle.
    #[must_use]
    pub fn proxy_method(&self) -> &ResourceHandle {
        &self.proxy_method
    }

    /// Preflight settings.
    #[must_use]
    pub fn cors(&self) -> &CorsPolicy {
        &self.cors
    }

    /// Invocation URL token.
    #[must_use]
    pub fn url(&self) -> &Token {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ComputeCluster;
    use crate::compute::SharedInfra;
    use crate::graph::DeclarationGraph;
    use crate::mesh::MeshControlPlane;
    use crate::network::NetworkFabric;
    use serde_json::json;

    fn build(stack: &StackSettings) -> (DeclarationGraph, EdgeGateway) {
        let mut graph = DeclarationGraph::new();
        let fabric = NetworkFabric::build(&mut graph, stack).expect("fabric");
        let cluster = ComputeCluster::build(&mut graph, stack, &fabric).expect("cluster");
        let mesh = MeshControlPlane::build(&mut graph, stack).expect("mesh");
        let infra = SharedInfra {
            stack,
            fabric: &fabric,
            cluster: &cluster,
            mesh: &mesh,
        };
        let gateway = VirtualGatewayService::build(&mut graph, infra).expect("gateway");
        let edge = EdgeGateway::build(&mut graph, stack, &gateway).expect("edge");
        (graph, edge)
    }

    #[test]
    fn proxy_method_forwards_to_load_balancer() {
        let (graph, _) = build(&StackSettings::default());
        let method = graph.get(ResourceKind::ApiMethod, "ANY").expect("method");

        assert_eq!(method.field("/httpMethod"), Some(&json!("ANY")));
        assert_eq!(method.field("/integration/type"), Some(&json!("HTTP_PROXY")));
        assert_eq!(
            method.field("/integration/uri"),
            Some(&json!("http://${LoadBalancer:flb-gateway-ingress.DnsName}/{proxy}"))
        );
        assert_eq!(method.field("/integration/passthroughBehavior"), Some(&json!("WHEN_NO_MATCH")));
        assert_eq!(
            method.field("/integration/requestParameters"),
            Some(&json!({"integration.request.path.proxy": "method.request.path.proxy"}))
        );
        assert_eq!(
            method.field("/requestParameters"),
            Some(&json!({"method.request.path.proxy": true}))
        );
        assert_eq!(
            method.field("/integration/connectionId"),
            Some(&json!("${VpcLink:apiGatewayECSLink.Id}"))
        );
        assert_eq!(method.field("/methodResponses/0/statusCode"), Some(&json!("200")));
    }

    #[test]
    fn api_is_regional_with_cors() {
        let (graph, edge) = build(&StackSettings::default());
        let api = graph.get(ResourceKind::RestApi, "flb").expect("api");
        assert_eq!(api.field("/endpointType"), Some(&json!("REGIONAL")));
        assert_eq!(
            api.field("/cors"),
            Some(&json!({
                "allowOrigins": ["*"],
                "allowHeaders": ["Authorization"],
                "allowMethods": ["GET", "HEAD", "OPTIONS", "POST"],
                "maxAgeSecs": 86400
            }))
        );
        assert_eq!(edge.url().as_str(), "${RestApi:flb.Url}");
    }

    #[test]
    fn configured_origins_are_used() {
        let stack = StackSettings {
            cors_origins: vec!["https://app.example.com".to_string()],
            ..StackSettings::default()
        };
        let (_, edge) = build(&stack);
        assert_eq!(edge.cors().allow_origins, ["https://app.example.com"]);
    }

    #[test]
    fn link_targets_gateway_load_balancer() {
        let (graph, edge) = build(&StackSettings::default());
        assert_eq!(edge.link().name(), "apiGatewayECSLink");
        let link = graph.get(ResourceKind::VpcLink, VPC_LINK_NAME).expect("link");
        assert_eq!(
            link.field("/targets/0"),
            Some(&json!("${LoadBalancer:flb-gateway-ingress.Arn}"))
        );
    }
}
