use crate::Value;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration handed to a stage once the reserved fields are removed.
pub type StageConfig = serde_json::Map<String, Value>;

/// Fields consumed by the engine and never passed to a stage.
pub const RESERVED_FIELDS: &[&str] = &[
    "type",
    "output",
    "start",
    "wait",
    "lockEx",
    "name",
    "canEmpty",
    "errHandler",
];

pub const DEFAULT_LOCK_EX: Duration = Duration::from_secs(30);

/// Routing policy for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "worker")]
pub enum TransferMode {
    /// Run in the current worker.
    #[default]
    Local,
    /// Run on worker `n mod total`.
    WorkerIndex(u32),
    /// Run on a random peer, or locally when there is none.
    Broadcast,
}

impl TransferMode {
    /// Integer convention of the declarative format: negative values
    /// broadcast, everything else pins a worker index.
    pub fn from_index(index: i64) -> Self {
        if index < 0 {
            TransferMode::Broadcast
        } else {
            TransferMode::WorkerIndex(index.min(u32::MAX as i64) as u32)
        }
    }
}

/// Directed link from a stage to a downstream stage of the same task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEdge {
    pub target: String,
    pub transfer: TransferMode,
    pub wait: bool,
}

impl OutputEdge {
    pub fn local(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            transfer: TransferMode::Local,
            wait: false,
        }
    }

    pub fn with_transfer(mut self, transfer: TransferMode) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }
}

/// Normalized declaration of one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSpec {
    pub plugin_type: String,
    pub name: String,
    pub config: StageConfig,
    pub outputs: Vec<OutputEdge>,
    pub start: bool,
    pub wait: bool,
    pub lock_ex: Duration,
    pub can_empty: bool,
    pub handlers: Vec<String>,
}

impl PluginSpec {
    pub fn new(plugin_type: impl Into<String>) -> Self {
        Self {
            plugin_type: plugin_type.into(),
            name: uuid::Uuid::new_v4().simple().to_string(),
            config: StageConfig::new(),
            outputs: Vec::new(),
            start: false,
            wait: false,
            lock_ex: DEFAULT_LOCK_EX,
            can_empty: false,
            handlers: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_output(mut self, edge: OutputEdge) -> Self {
        self.outputs.push(edge);
        self
    }

    pub fn as_start(mut self) -> Self {
        self.start = true;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.outputs.is_empty()
    }
}
