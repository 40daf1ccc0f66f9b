use crate::{CorrelationId, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub type WorkerId = u32;

/// Events emitted while tasks run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    TaskStarted {
        task: String,
        stage: String,
        correlation_id: CorrelationId,
        worker: WorkerId,
        timestamp: DateTime<Utc>,
    },
    StageFailed {
        task: String,
        stage: String,
        correlation_id: Option<CorrelationId>,
        error: String,
        timestamp: DateTime<Utc>,
    },
    Dispatched {
        task: String,
        stage: String,
        from: WorkerId,
        to: WorkerId,
        timestamp: DateTime<Utc>,
    },
    TaskFinished {
        task: String,
        stage: String,
        correlation_id: Option<CorrelationId>,
        timestamp: DateTime<Utc>,
    },
    StageEvent {
        task: String,
        stage: String,
        event: StageEvent,
        timestamp: DateTime<Utc>,
    },
}

/// Events a stage reports about itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum StageEvent {
    Info { message: String },
    Warning { message: String },
    Data { value: Value },
}

/// Emitter bound to one stage.
#[derive(Clone)]
pub struct EventEmitter {
    task: String,
    stage: String,
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    pub fn emit(&self, event: StageEvent) {
        let _ = self.sender.send(PipelineEvent::StageEvent {
            task: self.task.clone(),
            stage: self.stage.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(StageEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(StageEvent::Warning {
            message: message.into(),
        });
    }

    pub fn data(&self, value: Value) {
        self.emit(StageEvent::Data { value });
    }
}

/// Worker-wide event bus. Cloning shares the channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Events without subscribers are dropped.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, task: impl Into<String>, stage: impl Into<String>) -> EventEmitter {
        EventEmitter {
            task: task.into(),
            stage: stage.into(),
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
