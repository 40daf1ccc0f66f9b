//! Core abstractions for the pipeline engine
//!
//! Messages, stage specs, the plugin contract, stage execution with its
//! error-handler chain, advisory locks and pipeline events. The scheduler
//! that owns task graphs lives in `piperuntime` and is reached from here
//! only through the `Dispatcher` trait.

mod dispatch;
mod error;
pub mod events;
mod graph;
mod handler;
pub mod locks;
mod message;
mod plugin;
mod stage;

pub use dispatch::{Dispatcher, SchedulerHandle};
pub use error::{GraphError, LockError, PipelineError, PluginError};
pub use events::{EventBus, EventEmitter, PipelineEvent, StageEvent, WorkerId};
pub use graph::{
    OutputEdge, PluginSpec, StageConfig, TransferMode, DEFAULT_LOCK_EX, RESERVED_FIELDS,
};
pub use handler::{ErrorHandler, HandlerChain, HandlerFn};
pub use locks::{LockCoordinator, LockStore, MemoryLockStore};
pub use message::{
    is_empty_value, CorrelationId, Message, Options, OutputSelector, Params, Value, CALL_PREFIX,
};
pub use plugin::{InitContext, Instantiate, Lifecycle, Plugin, Resources};
pub use stage::{PluginInstance, Stage, StageContext, StageWiring};

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
