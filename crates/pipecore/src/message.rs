use crate::graph::OutputEdge;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Payload carried between stages.
pub type Value = serde_json::Value;

/// Trigger parameters attached to a run.
pub type Params = serde_json::Map<String, Value>;

/// Identifier assigned when a task is triggered and carried unchanged
/// through every stage of that run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Computes the output set of a stage from the message at hand.
pub type OutputSelector = Arc<dyn Fn(&Message) -> Vec<OutputEdge> + Send + Sync>;

/// Prefix of the options key under which a per-stage output override lives.
pub const CALL_PREFIX: &str = "outputs";

/// Options bag travelling with a message.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Options {
    /// Lock keys acquired on behalf of this message.
    #[serde(default)]
    pub locks: Vec<String>,

    /// Free-form values stages pass downstream.
    #[serde(default)]
    pub values: HashMap<String, Value>,

    /// Output overrides keyed by stage call key. Function values do not
    /// cross worker boundaries.
    #[serde(skip)]
    outputs: HashMap<String, OutputSelector>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_key(stage_key: &str) -> String {
        format!("{}.{}", CALL_PREFIX, stage_key)
    }

    /// Record a lock key acquired for this message.
    pub fn push_lock(&mut self, key: impl Into<String>) {
        self.locks.push(key.into());
    }

    /// Drain every recorded lock key.
    pub fn take_locks(&mut self) -> Vec<String> {
        std::mem::take(&mut self.locks)
    }

    /// Override the outputs of `stage_key` for this message and everything
    /// derived from it on the same worker.
    pub fn set_output_override(&mut self, stage_key: &str, selector: OutputSelector) {
        self.outputs.insert(Self::call_key(stage_key), selector);
    }

    pub fn output_override(&self, stage_key: &str) -> Option<&OutputSelector> {
        self.outputs.get(&Self::call_key(stage_key))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("locks", &self.locks)
            .field("values", &self.values)
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Envelope carried along every edge of a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    correlation_id: Option<CorrelationId>,
    pub data: Value,
    pub opt: Options,
    pub request: Params,
}

impl Message {
    /// Message for a fresh run: new correlation id, no data.
    pub fn triggered(request: Params) -> Self {
        Self {
            correlation_id: Some(CorrelationId::new()),
            data: Value::Null,
            opt: Options::new(),
            request,
        }
    }

    /// Run identity. Set when the task is triggered and never changed.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = data.into();
        self
    }

    /// Same run, different payload.
    pub fn derive(&self, data: impl Into<Value>) -> Self {
        Self {
            correlation_id: self.correlation_id,
            data: data.into(),
            opt: self.opt.clone(),
            request: self.request.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        is_empty_value(&self.data)
    }
}

/// Null, empty strings, arrays and objects carry nothing worth forwarding.
///
/// Unlike a loose truthiness check, `0`, `"0"` and `false` are real data
/// here and are forwarded.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}
