//! Integration tests for end-to-end topology synthesis.

use std::collections::HashSet;

use flb_topology::{
    AutoscalingPolicy, DeclarationGraph, ProvisioningEngine, ResourceKind, ServiceDefinition,
    StackSettings, Synthesizer, TopologyConfig, TopologyError, synthesize,
};
use proptest::prelude::*;
use serde_json::json;

// ==================== Helper Functions ====================

fn svc(name: &str, port: u16) -> ServiceDefinition {
    ServiceDefinition::new(name, format!("{name}:latest"), port)
}

fn rules_on(graph: &DeclarationGraph, service: &str) -> Vec<String> {
    let group = json!(format!("${{SecurityGroup:{service}-sg.GroupId}}"));
    graph
        .of_kind(ResourceKind::SecurityRule)
        .filter(|d| d.field("/group") == Some(&group))
        .map(|d| d.name.clone())
        .collect()
}

fn routes_to(graph: &DeclarationGraph, service: &str) -> usize {
    let target = json!(format!("${{VirtualService:{service}.default.flb.Name}}"));
    graph
        .of_kind(ResourceKind::GatewayRoute)
        .filter(|d| d.field("/target") == Some(&target))
        .count()
}

fn mixed_config() -> TopologyConfig {
    TopologyConfig::new(vec![
        svc("booking", 5000).public(),
        svc("search", 8000).public().with_path_prefix("/find"),
        svc("ledger", 7000),
        svc("notify", 7100),
    ])
}

// ==================== Booking Scenario ====================

#[test]
fn booking_end_to_end() {
    let config = TopologyConfig::new(vec![svc("booking", 5000).public()]);
    let (graph, topology) = synthesize(&config).expect("synthesize booking");

    let task = graph
        .get(ResourceKind::TaskDefinition, "booking-task-definition")
        .expect("task definition");
    assert_eq!(task.field("/containers/0/name"), Some(&json!("app")));
    assert_eq!(task.field("/containers/1/name"), Some(&json!("envoy")));
    assert_eq!(
        task.field("/containers/0/dependsOn/0/condition"),
        Some(&json!("HEALTHY"))
    );
    assert_eq!(
        task.field("/containers/1/environment/APPMESH_RESOURCE_ARN"),
        Some(&json!(
            "arn:aws:appmesh:ap-east-1:000000000000:mesh/flbMesh/virtualNode/booking"
        ))
    );
    assert_eq!(
        task.field("/containers/1/image"),
        Some(&json!(
            "856666278305.dkr.ecr.ap-east-1.amazonaws.com/aws-appmesh-envoy:v1.15.1.0-prod"
        ))
    );

    assert!(graph.get(ResourceKind::VirtualNode, "booking").is_some());
    assert!(graph.get(ResourceKind::VirtualService, "booking.default.flb").is_some());

    let route = graph
        .get(ResourceKind::GatewayRoute, "booking-route")
        .expect("route");
    assert_eq!(route.field("/match/prefix"), Some(&json!("/booking")));

    let rules = rules_on(&graph, "booking");
    assert_eq!(rules, ["booking-from-flb-gateway"]);
    let rule = graph
        .get(ResourceKind::SecurityRule, "booking-from-flb-gateway")
        .expect("rule");
    assert_eq!(rule.field("/port"), Some(&json!(5000)));
    assert_eq!(
        rule.field("/source/securityGroup"),
        Some(&json!("${SecurityGroup:flb-gateway-sg.GroupId}"))
    );

    let scaling = graph
        .get(ResourceKind::ScalingPolicy, "booking-scaling")
        .expect("scaling");
    assert_eq!(scaling.field("/maxCapacity"), Some(&json!(3)));
    assert_eq!(scaling.field("/targetCpuPercent"), Some(&json!(50)));

    assert_eq!(topology.edge.api().name(), "flb");
    assert!(graph.exports().contains_key("flb-gateway-ingress-dns"));
}

// ==================== Security Rules & Routes ====================

#[test]
fn public_services_get_exactly_one_rule_and_route() {
    let (graph, topology) = synthesize(&mixed_config()).expect("synthesize");

    for service in &topology.services {
        let name = service.service_name();
        if service.is_public() {
            assert_eq!(rules_on(&graph, name).len(), 1, "rules on {name}");
            assert_eq!(routes_to(&graph, name), 1, "routes to {name}");
        } else {
            assert!(rules_on(&graph, name).is_empty(), "rules on {name}");
            assert_eq!(routes_to(&graph, name), 0, "routes to {name}");
        }
    }

    let search = graph
        .get(ResourceKind::GatewayRoute, "search-route")
        .expect("search route");
    assert_eq!(search.field("/match/prefix"), Some(&json!("/find")));
}

#[test]
fn backends_add_rules_only_where_declared() {
    let config = TopologyConfig::new(vec![
        svc("booking", 5000).public().with_backend("ledger"),
        svc("ledger", 7000),
    ]);
    let (graph, _) = synthesize(&config).expect("synthesize");

    assert_eq!(rules_on(&graph, "ledger"), ["ledger-from-booking"]);
    assert_eq!(rules_on(&graph, "booking"), ["booking-from-flb-gateway"]);
    assert_eq!(graph.count(ResourceKind::VirtualNodeBackend), 1);
}

// ==================== Names ====================

#[test]
fn virtual_service_names_are_distinct() {
    let (graph, _) = synthesize(&mixed_config()).expect("synthesize");
    let names: Vec<_> = graph
        .of_kind(ResourceKind::VirtualService)
        .map(|d| d.name.clone())
        .collect();
    let unique: HashSet<_> = names.iter().collect();
    assert_eq!(names.len(), 4);
    assert_eq!(unique.len(), names.len());
}

#[test]
fn every_task_shares_one_identity() {
    let (graph, _) = synthesize(&mixed_config()).expect("synthesize");
    assert_eq!(graph.count(ResourceKind::Role), 1);
    assert!(
        graph
            .of_kind(ResourceKind::TaskDefinition)
            .all(|d| d.field("/taskRole") == Some(&json!("${Role:flbECSTaskIamRole.Arn}")))
    );
}

// ==================== Autoscaling ====================

#[test]
fn autoscaling_defaults_apply_unless_overridden() {
    let config = TopologyConfig::new(vec![
        svc("booking", 5000).public(),
        svc("search", 8000).with_scaling(AutoscalingPolicy::default().with_max_capacity(8)),
    ]);
    let (graph, _) = synthesize(&config).expect("synthesize");

    for name in ["booking-scaling", "flb-gateway-scaling"] {
        let policy = graph.get(ResourceKind::ScalingPolicy, name).expect(name);
        assert_eq!(policy.field("/maxCapacity"), Some(&json!(3)), "{name}");
        assert_eq!(policy.field("/targetCpuPercent"), Some(&json!(50)), "{name}");
        assert_eq!(policy.field("/scaleInCooldownSecs"), Some(&json!(60)), "{name}");
        assert_eq!(policy.field("/scaleOutCooldownSecs"), Some(&json!(60)), "{name}");
    }

    let search = graph
        .get(ResourceKind::ScalingPolicy, "search-scaling")
        .expect("search scaling");
    assert_eq!(search.field("/maxCapacity"), Some(&json!(8)));
    assert_eq!(search.field("/minCapacity"), Some(&json!(1)));
}

// ==================== Idempotence ====================

#[test]
fn identical_input_gives_identical_output() {
    let config = mixed_config();
    let (first, _) = synthesize(&config).expect("first run");
    let (second, _) = synthesize(&config).expect("second run");

    assert_eq!(first, second);
    assert_eq!(
        first.to_json().expect("serialize first"),
        second.to_json().expect("serialize second")
    );
}

#[test]
fn config_file_round_trip_synthesizes_the_same_graph() {
    let config = mixed_config();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("topology.json");
    std::fs::write(&path, serde_json::to_string(&config).expect("serialize")).expect("write");

    let loaded = TopologyConfig::from_file(&path).expect("load");
    let (a, _) = synthesize(&config).expect("synthesize original");
    let (b, _) = synthesize(&loaded).expect("synthesize loaded");
    assert_eq!(a, b);
}

// ==================== Validation Before Declaration ====================

fn assert_rejected_untouched(config: &TopologyConfig) -> TopologyError {
    let mut graph = DeclarationGraph::new();
    let err = Synthesizer::new(config)
        .run(&mut graph)
        .expect_err("config should be rejected");
    assert!(graph.is_empty(), "nothing may be declared on rejection");
    assert!(graph.exports().is_empty());
    err
}

#[test]
fn duplicate_service_names_rejected_before_any_declaration() {
    let config = TopologyConfig::new(vec![svc("booking", 5000), svc("booking", 5001)]);
    let err = assert_rejected_untouched(&config);
    assert!(matches!(err, TopologyError::DuplicateService { name } if name == "booking"));
}

#[test]
fn gateway_name_is_reserved() {
    let config = TopologyConfig::new(vec![svc("flb-gateway", 5000)]);
    let err = assert_rejected_untouched(&config);
    assert!(matches!(err, TopologyError::ReservedName { .. }));
}

#[test]
fn overlapping_prefixes_rejected() {
    let config = TopologyConfig::new(vec![
        svc("booking", 5000).public().with_path_prefix("/api"),
        svc("search", 8000).public().with_path_prefix("/api/search"),
    ]);
    let err = assert_rejected_untouched(&config);
    assert!(matches!(err, TopologyError::OverlappingRoutes { .. }));
}

#[test]
fn reserved_port_rejected() {
    let config = TopologyConfig::new(vec![svc("booking", 15001).public()]);
    let err = assert_rejected_untouched(&config);
    assert!(matches!(err, TopologyError::InvalidPort { port: 15001, .. }));
}

#[test]
fn unknown_backend_rejected() {
    let config = TopologyConfig::new(vec![svc("booking", 5000).with_backend("ghost")]);
    let err = assert_rejected_untouched(&config);
    assert!(matches!(err, TopologyError::UnknownBackend { .. }));
}

#[test]
fn oversized_memory_rejected() {
    let config = TopologyConfig::new(vec![svc("booking", 5000).public().with_memory_mib(1024)]);
    let err = assert_rejected_untouched(&config);
    assert!(matches!(err, TopologyError::InvalidDefinition { service, .. } if service == "booking"));
}

#[test]
fn largest_memory_limit_fills_the_task() {
    let config = TopologyConfig::new(vec![svc("booking", 5000).public().with_memory_mib(384)]);
    let (graph, _) = synthesize(&config).expect("synth");
    let task = graph
        .get(ResourceKind::TaskDefinition, "booking-task-definition")
        .expect("task");
    let task_memory = task.field("/memoryMib").and_then(serde_json::Value::as_u64).expect("task memory");
    let containers: u64 = task
        .field("/containers")
        .and_then(serde_json::Value::as_array)
        .expect("containers")
        .iter()
        .filter_map(|c| c["memoryLimitMib"].as_u64())
        .sum();
    assert_eq!(containers, task_memory);
}

#[test]
fn reference_shaped_environment_rejected() {
    let config = TopologyConfig::new(vec![
        svc("booking", 5000).public().with_env("DSN", "${Db:primary.Host}"),
    ]);
    let err = assert_rejected_untouched(&config);
    assert!(matches!(err, TopologyError::InvalidDefinition { .. }));
}

#[test]
fn ambiguous_rule_names_rejected() {
    let config = TopologyConfig::new(vec![
        svc("a", 5000),
        svc("a-from-b", 5001),
        svc("b-from-c", 5002).with_backend("a"),
        svc("c", 5003).with_backend("a-from-b"),
    ]);
    let err = assert_rejected_untouched(&config);
    assert!(matches!(
        err,
        TopologyError::AmbiguousName { kind: ResourceKind::SecurityRule, name } if name == "a-from-b-from-c"
    ));
}

#[test]
fn engine_collision_is_fatal() {
    let config = TopologyConfig::new(vec![svc("booking", 5000).public()]);
    let mut graph = DeclarationGraph::new();
    graph
        .declare(ResourceKind::Mesh, "flbMesh", json!({}))
        .expect("pre-declare mesh");

    let err = Synthesizer::new(&config)
        .run(&mut graph)
        .expect_err("mesh collision");
    assert!(err.is_engine_error());
}

// ==================== Region ====================

#[test]
fn region_drives_sidecar_image_and_zones() {
    let config = TopologyConfig::new(vec![svc("booking", 5000).public()])
        .with_stack(StackSettings::default().with_region("us-west-2").with_account("123456789012"));
    let (graph, _) = synthesize(&config).expect("synthesize");

    let task = graph
        .get(ResourceKind::TaskDefinition, "flb-gateway-task-definition")
        .expect("gateway task");
    assert_eq!(
        task.field("/containers/0/image"),
        Some(&json!(
            "840364872350.dkr.ecr.us-west-2.amazonaws.com/aws-appmesh-envoy:v1.15.1.0-prod"
        ))
    );
    assert_eq!(
        task.field("/containers/0/environment/APPMESH_RESOURCE_ARN"),
        Some(&json!(
            "arn:aws:appmesh:us-west-2:123456789012:mesh/flbMesh/virtualGateway/flb-gateway"
        ))
    );

    let subnet = graph
        .get(ResourceKind::Subnet, "application-2")
        .expect("subnet");
    assert_eq!(subnet.field("/availabilityZone"), Some(&json!("us-west-2b")));
}

// ==================== Property Tests ====================

fn service_names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[a-z][a-z0-9]{0,10}", 1..8)
        .prop_map(|names| names.into_iter().collect())
}

fn hyphenated_names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("(a|b|c)(-(a|b|c|from|backend)){0,3}", 2..8)
        .prop_map(|names| names.into_iter().collect())
}

fn wired(names: &[String], edges: &[(usize, usize)]) -> TopologyConfig {
    let mut services: Vec<_> = names.iter().map(|name| svc(name, 5000)).collect();
    for &(from, to) in edges {
        let (from, to) = (from % names.len(), to % names.len());
        if from != to && !services[from].backends.contains(&names[to]) {
            services[from].backends.push(names[to].clone());
        }
    }
    TopologyConfig::new(services)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn validated_configs_synthesize_completely(
        names in hyphenated_names(),
        edges in prop::collection::vec((0usize..8, 0usize..8), 0..12),
    ) {
        let config = wired(&names, &edges);
        let mut graph = DeclarationGraph::new();
        let result = Synthesizer::new(&config).run(&mut graph);
        if config.validate().is_ok() {
            prop_assert!(result.is_ok(), "valid config failed: {:?}", result.err());
        } else {
            prop_assert!(result.is_err());
            prop_assert!(graph.is_empty());
        }
    }

    #[test]
    fn distinct_inputs_give_distinct_mesh_names(names in service_names()) {
        let services: Vec<_> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let def = svc(name, 5000);
                if i % 2 == 0 { def.public().with_path_prefix(format!("/{name}/")) } else { def }
            })
            .collect();
        let (graph, topology) = synthesize(&TopologyConfig::new(services)).expect("synthesize");

        let vs: HashSet<_> = graph.of_kind(ResourceKind::VirtualService).map(|d| d.name.clone()).collect();
        prop_assert_eq!(vs.len(), names.len());
        prop_assert_eq!(graph.count(ResourceKind::VirtualNode), names.len());
        prop_assert_eq!(graph.count(ResourceKind::GatewayRoute), topology.public_services().count());
    }

    #[test]
    fn synthesis_is_deterministic(names in service_names()) {
        let services: Vec<_> = names.iter().map(|name| svc(name, 6000)).collect();
        let config = TopologyConfig::new(services);
        let (a, _) = synthesize(&config).expect("first");
        let (b, _) = synthesize(&config).expect("second");
        prop_assert_eq!(a.to_json().expect("json"), b.to_json().expect("json"));
    }
}
