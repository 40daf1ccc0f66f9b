mod common;

use common::{fast_config, init_tracing, raw, registry, Journal};
use pipecore::{
    EventBus, GraphError, LockCoordinator, OutputEdge, PipelineError, Resources, SchedulerHandle,
    TransferMode,
};
use piperuntime::{GraphBuilder, PluginRegistry, Scheduler};
use serde_json::json;
use std::time::Duration;

struct Fixture {
    registry: PluginRegistry,
    locks: LockCoordinator,
    events: EventBus,
    resources: Resources,
}

impl Fixture {
    fn new() -> Self {
        Self {
            registry: PluginRegistry::new(),
            locks: LockCoordinator::in_memory(),
            events: EventBus::new(16),
            resources: Resources::new(),
        }
    }

    fn builder(&self) -> GraphBuilder<'_> {
        GraphBuilder {
            registry: &self.registry,
            worker_id: 0,
            locks: &self.locks,
            events: &self.events,
            resources: &self.resources,
            scheduler: SchedulerHandle::detached(),
            default_lock_ex: Duration::from_secs(30),
        }
    }
}

async fn build_error(pipeline: serde_json::Value) -> GraphError {
    init_tracing();
    let journal = Journal::default();
    let scheduler = Scheduler::builder(registry(&journal))
        .config(fast_config())
        .build();
    match scheduler.build(&raw(pipeline)).await {
        Err(PipelineError::Configuration(e)) => e,
        other => panic!("expected configuration error, got {:?}", other),
    }
}

#[test]
fn test_reserved_fields_are_stripped() {
    let fixture = Fixture::new();
    let spec = fixture
        .builder()
        .parse_spec(
            "orders",
            "fetch",
            &json!({
                "type": "http.request",
                "name": "Fetch orders",
                "start": true,
                "wait": true,
                "lockEx": 90,
                "canEmpty": true,
                "errHandler": ["log", "rethrow"],
                "output": "store",
                "url": "http://orders.local",
                "retries": 2
            }),
        )
        .unwrap();

    assert_eq!(spec.plugin_type, "http.request");
    assert_eq!(spec.name, "Fetch orders");
    assert!(spec.start);
    assert!(spec.wait);
    assert!(spec.can_empty);
    assert_eq!(spec.lock_ex, Duration::from_secs(90));
    assert_eq!(spec.handlers, vec!["log".to_string(), "rethrow".to_string()]);

    let keys: Vec<&str> = spec.config.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["url", "retries"]);
}

#[test]
fn test_defaults() {
    let fixture = Fixture::new();
    let spec = fixture
        .builder()
        .parse_spec("t", "s", &json!({ "type": "debug.log" }))
        .unwrap();

    assert!(!spec.start);
    assert!(!spec.wait);
    assert!(!spec.can_empty);
    assert_eq!(spec.lock_ex, Duration::from_secs(30));
    assert!(!spec.name.is_empty());
    assert!(spec.is_terminal());
    assert!(spec.config.is_empty());
}

#[test]
fn test_output_forms() {
    let fixture = Fixture::new();
    let builder = fixture.builder();

    let single = builder
        .parse_spec("t", "s", &json!({ "type": "x", "wait": true, "output": "next" }))
        .unwrap();
    assert_eq!(single.outputs, vec![OutputEdge::local("next").with_wait(true)]);

    let list = builder
        .parse_spec("t", "s", &json!({ "type": "x", "output": ["a", "b"] }))
        .unwrap();
    assert_eq!(list.outputs, vec![OutputEdge::local("a"), OutputEdge::local("b")]);

    let map = builder
        .parse_spec(
            "t",
            "s",
            &json!({
                "type": "x",
                "output": {
                    "blocking": true,
                    "second": 1,
                    "anyone": -1,
                    "named": "broadcast",
                    "here": "local",
                    "full": { "transfer": 3, "wait": true }
                }
            }),
        )
        .unwrap();
    assert_eq!(
        map.outputs,
        vec![
            OutputEdge::local("blocking").with_wait(true),
            OutputEdge::local("second").with_transfer(TransferMode::WorkerIndex(1)),
            OutputEdge::local("anyone").with_transfer(TransferMode::Broadcast),
            OutputEdge::local("named").with_transfer(TransferMode::Broadcast),
            OutputEdge::local("here"),
            OutputEdge::local("full")
                .with_transfer(TransferMode::WorkerIndex(3))
                .with_wait(true),
        ]
    );
}

#[test]
fn test_invalid_fields() {
    let fixture = Fixture::new();
    let builder = fixture.builder();

    let missing = builder.parse_spec("t", "s", &json!({ "output": "x" }));
    assert!(matches!(missing, Err(GraphError::MissingType { .. })));

    let bad_mode = builder.parse_spec("t", "s", &json!({ "type": "x", "output": { "n": "sideways" } }));
    assert!(matches!(bad_mode, Err(GraphError::InvalidField { .. })));

    let bad_ttl = builder.parse_spec("t", "s", &json!({ "type": "x", "lockEx": "soon" }));
    assert!(matches!(bad_ttl, Err(GraphError::InvalidField { .. })));
}

#[tokio::test]
async fn test_unknown_output_fails_build() {
    let error = build_error(json!({
        "t": { "a": { "type": "test.record", "start": true, "output": "ghost" } }
    }))
    .await;

    match error {
        GraphError::UnknownOutput { key, target, .. } => {
            assert_eq!(key, "a");
            assert_eq!(target, "ghost");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_plugin_type_fails_build() {
    let error = build_error(json!({ "t": { "a": { "type": "no.such" } } })).await;
    assert!(matches!(error, GraphError::UnknownPluginType { .. }));
}

#[tokio::test]
async fn test_unknown_handler_fails_build() {
    let error = build_error(json!({
        "t": { "a": { "type": "test.record", "errHandler": "page_someone" } }
    }))
    .await;
    assert!(matches!(error, GraphError::UnknownHandler { .. }));
}

#[tokio::test]
async fn test_init_failure_fails_build() {
    let error = build_error(json!({ "t": { "a": { "type": "test.bad_init" } } })).await;
    assert!(matches!(error, GraphError::Plugin { .. }));
}

#[tokio::test]
async fn test_cycles_are_allowed() {
    init_tracing();
    let journal = Journal::default();
    let scheduler = Scheduler::builder(registry(&journal))
        .config(fast_config())
        .build();

    scheduler
        .build(&raw(json!({
            "loop": {
                "a": { "type": "test.record", "start": true, "output": "b" },
                "b": { "type": "test.record", "output": "a" }
            }
        })))
        .await
        .unwrap();

    let graph = scheduler.graph().unwrap();
    let task = graph.task("loop").unwrap();
    assert_eq!(task.len(), 2);
    assert!(graph.is_last("loop", "b"));
    assert_eq!(task.start_stages().count(), 1);
}
