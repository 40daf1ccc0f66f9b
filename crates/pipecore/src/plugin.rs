use crate::{
    EventBus, LockCoordinator, Message, PluginError, PluginSpec, StageConfig, StageContext, Value,
    WorkerId,
};
use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// How many instances of a stage a worker keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// A fresh copy of the template per invocation.
    #[default]
    Transient,
    /// One instance shared by every invocation in the worker.
    Singleton,
}

/// Core trait every stage implements.
#[async_trait]
pub trait Plugin: Instantiate + Send + Sync {
    /// Type identifier used in pipeline definitions (e.g. "debug.log").
    fn plugin_type(&self) -> &str;

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Transient
    }

    /// One-time setup, called once per template.
    async fn init(&mut self, _ctx: &InitContext<'_>) -> Result<(), PluginError> {
        Ok(())
    }

    /// The stage's work. Results go downstream through `ctx.sink`.
    async fn run(&self, ctx: &StageContext, msg: &mut Message) -> Result<(), PluginError>;
}

/// Produces the per-invocation copy of a template.
///
/// Implemented for every `Clone` plugin: state that must be shared between
/// copies (connection pools, clients) belongs behind an `Arc`, everything
/// else is copied.
pub trait Instantiate {
    fn instantiate(&self) -> Box<dyn Plugin>;
}

impl<T> Instantiate for T
where
    T: Plugin + Clone + 'static,
{
    fn instantiate(&self) -> Box<dyn Plugin> {
        Box::new(self.clone())
    }
}

/// Typed dependencies registered on the scheduler and handed to `init`.
#[derive(Clone, Default)]
pub struct Resources {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.entries.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }
}

/// Everything a stage may depend on during `init`.
pub struct InitContext<'a> {
    pub task: &'a str,
    pub key: &'a str,
    pub spec: &'a PluginSpec,
    pub worker_id: WorkerId,
    pub locks: &'a LockCoordinator,
    pub events: &'a EventBus,
    pub resources: &'a Resources,
}

impl<'a> InitContext<'a> {
    /// Stage configuration without the reserved fields.
    pub fn config(&self) -> &StageConfig {
        &self.spec.config
    }

    pub fn require_config(&self, name: &str) -> Result<&Value, PluginError> {
        self.spec
            .config
            .get(name)
            .ok_or_else(|| PluginError::MissingConfig(format!("{} in {}", name, self.key)))
    }

    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.spec.config.get(name).cloned().unwrap_or(default)
    }

    pub fn config_str(&self, name: &str) -> Option<&str> {
        self.spec.config.get(name).and_then(|v| v.as_str())
    }

    pub fn config_bool(&self, name: &str, default: bool) -> bool {
        self.spec
            .config
            .get(name)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    pub fn config_u64(&self, name: &str, default: u64) -> u64 {
        self.spec
            .config
            .get(name)
            .and_then(|v| v.as_u64())
            .unwrap_or(default)
    }
}
