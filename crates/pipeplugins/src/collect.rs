use async_trait::async_trait;
use pipecore::{Lifecycle, Message, Plugin, PluginError, StageConfig, StageContext, Value};
use piperuntime::{PluginFactory, PluginMetadata};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Buffers message data across runs and emits it in batches of `size`.
///
/// Singleton: every invocation in a worker feeds the same buffer.
#[derive(Clone)]
pub struct Batch {
    size: usize,
    buffer: Arc<Mutex<Vec<Value>>>,
}

impl Batch {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn pending(&self) -> usize {
        self.buffer.lock().await.len()
    }
}

#[async_trait]
impl Plugin for Batch {
    fn plugin_type(&self) -> &str {
        "collect.batch"
    }

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Singleton
    }

    async fn run(&self, ctx: &StageContext, msg: &mut Message) -> Result<(), PluginError> {
        let full = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(msg.data.clone());
            if buffer.len() >= self.size {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };

        if let Some(batch) = full {
            ctx.events().info(format!("Batch of {} ready", batch.len()));
            ctx.sink(&msg.derive(Value::Array(batch))).await;
        }
        Ok(())
    }
}

pub struct BatchFactory;

impl PluginFactory for BatchFactory {
    fn create(&self, config: &StageConfig) -> Result<Box<dyn Plugin>, PluginError> {
        let size = match config.get("size") {
            None | Some(Value::Null) => 10,
            Some(v) => v
                .as_u64()
                .filter(|n| *n > 0)
                .ok_or_else(|| PluginError::InvalidInput {
                    field: "size".to_string(),
                    expected: "positive integer".to_string(),
                })? as usize,
        };
        Ok(Box::new(Batch::new(size)))
    }

    fn plugin_type(&self) -> &str {
        "collect.batch"
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            description: "Collect data into fixed-size batches".to_string(),
            category: "collect".to_string(),
        }
    }
}
