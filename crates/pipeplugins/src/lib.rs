//! Standard plugin library
//!
//! Collection of built-in stages for common operations

mod collect;
mod debug;
mod http;
mod lock;
mod source;
mod time;
mod transform;

pub use collect::{Batch, BatchFactory};
pub use debug::{DebugLog, DebugLogFactory};
pub use http::{HttpRequest, HttpRequestFactory};
pub use lock::{Dedupe, DedupeFactory};
pub use source::{SourceValues, SourceValuesFactory};
pub use time::{Delay, DelayFactory};
pub use transform::{JsonDecode, JsonDecodeFactory, JsonEncode, JsonEncodeFactory};

use piperuntime::PluginRegistry;
use std::sync::Arc;

/// Register all standard plugins with a registry
pub fn register_all(registry: &mut PluginRegistry) {
    registry.register(Arc::new(DebugLogFactory));
    registry.register(Arc::new(SourceValuesFactory));
    registry.register(Arc::new(JsonDecodeFactory));
    registry.register(Arc::new(JsonEncodeFactory));
    registry.register(Arc::new(DelayFactory));
    registry.register(Arc::new(DedupeFactory));
    registry.register(Arc::new(BatchFactory));
    registry.register(Arc::new(HttpRequestFactory));
}
