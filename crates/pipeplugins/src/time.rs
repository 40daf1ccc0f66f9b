use async_trait::async_trait;
use pipecore::{Message, Plugin, PluginError, StageConfig, StageContext, Value};
use piperuntime::{PluginFactory, PluginMetadata};
use tokio::time::{sleep, Duration};

/// Hold the message for a fixed time, then pass it on
#[derive(Clone)]
pub struct Delay {
    delay: Duration,
}

#[async_trait]
impl Plugin for Delay {
    fn plugin_type(&self) -> &str {
        "time.delay"
    }

    async fn run(&self, ctx: &StageContext, msg: &mut Message) -> Result<(), PluginError> {
        ctx.events().info(format!("Delaying for {}ms", self.delay.as_millis()));
        sleep(self.delay).await;
        ctx.sink(msg).await;
        Ok(())
    }
}

pub struct DelayFactory;

impl PluginFactory for DelayFactory {
    fn create(&self, config: &StageConfig) -> Result<Box<dyn Plugin>, PluginError> {
        let delay_ms = match config.get("delay_ms") {
            None | Some(Value::Null) => 1000,
            Some(v) => v.as_u64().ok_or_else(|| PluginError::InvalidInput {
                field: "delay_ms".to_string(),
                expected: "non-negative integer".to_string(),
            })?,
        };
        Ok(Box::new(Delay {
            delay: Duration::from_millis(delay_ms),
        }))
    }

    fn plugin_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}
