#![allow(dead_code)]

use async_trait::async_trait;
use pipecore::{
    CorrelationId, InitContext, Lifecycle, LockError, LockStore, MemoryLockStore, Message,
    OutputEdge, Plugin, PluginError, StageContext, Value, WorkerId,
};
use piperuntime::{PluginRegistry, RawGraph, SchedulerConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub stage: String,
    pub data: Value,
    pub worker: WorkerId,
    pub correlation_id: Option<CorrelationId>,
}

/// Every stage invocation recorded by the test plugins, across workers.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Entry>>>);

impl Journal {
    pub fn entries(&self) -> Vec<Entry> {
        self.0.lock().unwrap().clone()
    }

    pub fn stages(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.stage).collect()
    }

    pub fn find(&self, stage: &str) -> Option<Entry> {
        self.entries().into_iter().find(|e| e.stage == stage)
    }

    fn push(&self, ctx: &StageContext, msg: &Message) {
        self.0.lock().unwrap().push(Entry {
            stage: ctx.key().to_string(),
            data: msg.data.clone(),
            worker: ctx.worker_id(),
            correlation_id: msg.correlation_id(),
        });
    }

    /// Poll until `stage` shows up, for fire-and-forget sends.
    pub async fn wait_for(&self, stage: &str) -> Option<Entry> {
        for _ in 0..100 {
            if let Some(entry) = self.find(stage) {
                return Some(entry);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }
}

/// Records the message, optionally replaces the data with `emit`, then
/// sinks.
#[derive(Clone)]
pub struct Record {
    journal: Journal,
    emit: Option<Value>,
}

#[async_trait]
impl Plugin for Record {
    fn plugin_type(&self) -> &str {
        "test.record"
    }

    async fn run(&self, ctx: &StageContext, msg: &mut Message) -> Result<(), PluginError> {
        self.journal.push(ctx, msg);
        if let Some(emit) = &self.emit {
            msg.data = emit.clone();
        }
        ctx.sink(msg).await;
        Ok(())
    }
}

/// Records, then takes the lock named by `lock`, then sinks.
#[derive(Clone)]
pub struct TakeLock {
    journal: Journal,
    key: String,
}

#[async_trait]
impl Plugin for TakeLock {
    fn plugin_type(&self) -> &str {
        "test.lock"
    }

    async fn run(&self, ctx: &StageContext, msg: &mut Message) -> Result<(), PluginError> {
        self.journal.push(ctx, msg);
        if ctx.get_lock(&self.key, msg).await? {
            ctx.sink(msg).await;
        }
        Ok(())
    }
}

/// Always fails.
#[derive(Clone)]
pub struct Fail;

#[async_trait]
impl Plugin for Fail {
    fn plugin_type(&self) -> &str {
        "test.fail"
    }

    async fn run(&self, _ctx: &StageContext, _msg: &mut Message) -> Result<(), PluginError> {
        Err(PluginError::ExecutionFailed("stage exploded".to_string()))
    }
}

/// Fails during init.
#[derive(Clone)]
pub struct BadInit;

#[async_trait]
impl Plugin for BadInit {
    fn plugin_type(&self) -> &str {
        "test.bad_init"
    }

    async fn init(&mut self, ctx: &InitContext<'_>) -> Result<(), PluginError> {
        ctx.require_config("dsn")?;
        Ok(())
    }

    async fn run(&self, _ctx: &StageContext, _msg: &mut Message) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Overrides its own outputs for this message to the single `pick` target.
#[derive(Clone)]
pub struct Pick {
    target: String,
}

#[async_trait]
impl Plugin for Pick {
    fn plugin_type(&self) -> &str {
        "test.pick"
    }

    async fn run(&self, ctx: &StageContext, msg: &mut Message) -> Result<(), PluginError> {
        let target = self.target.clone();
        msg.opt.set_output_override(
            ctx.key(),
            Arc::new(move |_: &Message| vec![OutputEdge::local(target.clone())]),
        );
        msg.data = Value::from("picked");
        ctx.sink(msg).await;
        Ok(())
    }
}

/// Shared per worker.
#[derive(Clone)]
pub struct Shared;

#[async_trait]
impl Plugin for Shared {
    fn plugin_type(&self) -> &str {
        "test.shared"
    }

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Singleton
    }

    async fn run(&self, _ctx: &StageContext, _msg: &mut Message) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Memory store that counts DELs per key. With `rival` set, another
/// holder takes that key right after its first DEL.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryLockStore,
    dels: Mutex<Vec<String>>,
    rival: Option<String>,
}

impl CountingStore {
    pub fn with_rival(key: &str) -> Self {
        Self {
            rival: Some(key.to_string()),
            ..Self::default()
        }
    }

    pub fn dels(&self, key: &str) -> usize {
        self.dels.lock().unwrap().iter().filter(|k| *k == key).count()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains(key)
    }
}

#[async_trait]
impl LockStore for CountingStore {
    async fn set_nx_ex(&self, key: &str, ttl: Duration) -> Result<bool, LockError> {
        self.inner.set_nx_ex(key, ttl).await
    }

    async fn del(&self, key: &str) -> Result<u64, LockError> {
        let removed = self.inner.del(key).await?;
        let first = {
            let mut dels = self.dels.lock().unwrap();
            dels.push(key.to_string());
            dels.iter().filter(|k| *k == key).count() == 1
        };
        if first && self.rival.as_deref() == Some(key) {
            self.inner.set_nx_ex(key, Duration::from_secs(30)).await?;
        }
        Ok(removed)
    }
}

pub fn registry(journal: &Journal) -> Arc<PluginRegistry> {
    let mut registry = PluginRegistry::new();

    let j = journal.clone();
    registry.register_fn("test.record", move |config| {
        Ok(Box::new(Record {
            journal: j.clone(),
            emit: config.get("emit").cloned(),
        }))
    });
    let j = journal.clone();
    registry.register_fn("test.lock", move |config| {
        let key = config
            .get("lock")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PluginError::MissingConfig("lock".to_string()))?;
        Ok(Box::new(TakeLock {
            journal: j.clone(),
            key: key.to_string(),
        }))
    });
    registry.register_fn("test.fail", |_| Ok(Box::new(Fail)));
    registry.register_fn("test.bad_init", |_| Ok(Box::new(BadInit)));
    registry.register_fn("test.pick", |config| {
        let target = config.get("pick").and_then(|v| v.as_str()).unwrap_or_default();
        Ok(Box::new(Pick {
            target: target.to_string(),
        }))
    });
    registry.register_fn("test.shared", |_| Ok(Box::new(Shared)));

    Arc::new(registry)
}

pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        ready_retries: 3,
        ready_backoff_ms: 10,
        ..SchedulerConfig::default()
    }
}

pub fn raw(value: Value) -> RawGraph {
    value.as_object().cloned().expect("pipeline must be a map")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
