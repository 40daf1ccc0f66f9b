use async_trait::async_trait;
use pipecore::{Message, Params, Plugin, PluginError, StageContext, Value};
use piperuntime::{PluginRegistry, Scheduler, SchedulerConfig};
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Terminal stage that keeps whatever reaches it.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<Value>>>);

impl Capture {
    fn values(&self) -> Vec<Value> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl Plugin for Capture {
    fn plugin_type(&self) -> &str {
        "test.capture"
    }

    async fn run(&self, _ctx: &StageContext, msg: &mut Message) -> Result<(), PluginError> {
        self.0.lock().unwrap().push(msg.data.clone());
        Ok(())
    }
}

async fn scheduler(capture: &Capture, pipeline: Value) -> Scheduler {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut registry = PluginRegistry::new();
    pipeplugins::register_all(&mut registry);
    let sink = capture.clone();
    registry.register_fn("test.capture", move |_| Ok(Box::new(sink.clone())));

    let scheduler = Scheduler::builder(Arc::new(registry))
        .config(SchedulerConfig {
            ready_backoff_ms: 10,
            ..SchedulerConfig::default()
        })
        .build();
    scheduler
        .build(pipeline.as_object().unwrap())
        .await
        .unwrap();
    scheduler
}

async fn run(scheduler: &Scheduler, task: &str, params: Params) {
    scheduler.run(Some(task), params).await.unwrap().join().await;
}

#[test]
fn test_register_all() {
    let mut registry = PluginRegistry::new();
    pipeplugins::register_all(&mut registry);

    assert_eq!(
        registry.list_plugin_types(),
        vec![
            "collect.batch",
            "debug.log",
            "http.request",
            "lock.dedupe",
            "source.values",
            "time.delay",
            "transform.json_decode",
            "transform.json_encode",
        ]
    );
    assert_eq!(registry.get_metadata("time.delay").unwrap().category, "time");
}

#[tokio::test]
async fn test_source_each_emits_every_value() {
    let capture = Capture::default();
    let scheduler = scheduler(
        &capture,
        json!({
            "t": {
                "src": { "type": "source.values", "start": true, "each": true, "values": [1, 2, 3], "output": "log" },
                "log": { "type": "debug.log", "output": "out" },
                "out": { "type": "test.capture" }
            }
        }),
    )
    .await;

    run(&scheduler, "t", Params::new()).await;

    assert_eq!(capture.values(), vec![json!(1), json!(2), json!(3)]);
}

#[tokio::test]
async fn test_source_without_values_emits_params() {
    let capture = Capture::default();
    let scheduler = scheduler(
        &capture,
        json!({
            "t": {
                "src": { "type": "source.values", "start": true, "output": "out" },
                "out": { "type": "test.capture" }
            }
        }),
    )
    .await;

    let mut params = Params::new();
    params.insert("day".to_string(), json!("2024-01-01"));
    run(&scheduler, "t", params).await;

    assert_eq!(capture.values(), vec![json!({"day": "2024-01-01"})]);
}

#[tokio::test]
async fn test_json_encode_then_decode() {
    let capture = Capture::default();
    let scheduler = scheduler(
        &capture,
        json!({
            "t": {
                "src": { "type": "source.values", "start": true, "values": {"a": [1, 2]}, "output": "enc" },
                "enc": { "type": "transform.json_encode", "output": ["dec", "raw"] },
                "dec": { "type": "transform.json_decode", "output": "out" },
                "raw": { "type": "test.capture" },
                "out": { "type": "test.capture" }
            }
        }),
    )
    .await;

    run(&scheduler, "t", Params::new()).await;

    let mut values = capture.values();
    values.sort_by_key(|v| v.is_string());
    assert_eq!(values, vec![json!({"a": [1, 2]}), json!(r#"{"a":[1,2]}"#)]);
}

#[tokio::test]
async fn test_dedupe_drops_repeated_keys() {
    let capture = Capture::default();
    let scheduler = scheduler(
        &capture,
        json!({
            "t": {
                "src": {
                    "type": "source.values", "start": true, "each": true,
                    "values": [{"id": 1}, {"id": 2}, {"id": 1}],
                    "output": "gate"
                },
                "gate": { "type": "lock.dedupe", "field": "id", "lockEx": 60, "output": "out" },
                "out": { "type": "test.capture" }
            }
        }),
    )
    .await;

    run(&scheduler, "t", Params::new()).await;

    assert_eq!(capture.values(), vec![json!({"id": 1}), json!({"id": 2})]);
}

#[tokio::test]
async fn test_batch_is_shared_across_runs() {
    let capture = Capture::default();
    let scheduler = scheduler(
        &capture,
        json!({
            "t": {
                "src": { "type": "source.values", "start": true, "values": "tick", "output": "batch" },
                "batch": { "type": "collect.batch", "size": 3, "output": "out" },
                "out": { "type": "test.capture" }
            }
        }),
    )
    .await;

    for _ in 0..4 {
        run(&scheduler, "t", Params::new()).await;
    }

    assert_eq!(capture.values(), vec![json!(["tick", "tick", "tick"])]);
}

#[tokio::test]
async fn test_delay_passes_data_through() {
    let capture = Capture::default();
    let scheduler = scheduler(
        &capture,
        json!({
            "t": {
                "src": { "type": "source.values", "start": true, "values": 7, "output": "wait" },
                "wait": { "type": "time.delay", "delay_ms": 5, "output": "out" },
                "out": { "type": "test.capture" }
            }
        }),
    )
    .await;

    run(&scheduler, "t", Params::new()).await;

    assert_eq!(capture.values(), vec![json!(7)]);
}

#[tokio::test]
async fn test_invalid_plugin_config_fails_build() {
    let mut registry = PluginRegistry::new();
    pipeplugins::register_all(&mut registry);
    let scheduler = Scheduler::new(Arc::new(registry));

    let result = scheduler
        .build(
            json!({ "t": { "b": { "type": "collect.batch", "size": 0 } } })
                .as_object()
                .unwrap(),
        )
        .await;

    assert!(result.is_err());
    assert!(!scheduler.is_ready());
}
