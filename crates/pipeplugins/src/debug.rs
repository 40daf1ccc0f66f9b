use async_trait::async_trait;
use pipecore::{Message, Plugin, PluginError, StageConfig, StageContext};
use piperuntime::{PluginFactory, PluginMetadata};

/// Logs the message passing through and forwards it unchanged
#[derive(Clone, Default)]
pub struct DebugLog {
    label: Option<String>,
}

#[async_trait]
impl Plugin for DebugLog {
    fn plugin_type(&self) -> &str {
        "debug.log"
    }

    async fn run(&self, ctx: &StageContext, msg: &mut Message) -> Result<(), PluginError> {
        let label = self.label.as_deref().unwrap_or(ctx.key());
        tracing::info!("「{}」 {}: {}", ctx.task(), label, msg.data);
        ctx.events().info(format!("DEBUG {}: {}", label, msg.data));
        ctx.events().data(msg.data.clone());

        ctx.sink(msg).await;
        Ok(())
    }
}

pub struct DebugLogFactory;

impl PluginFactory for DebugLogFactory {
    fn create(&self, config: &StageConfig) -> Result<Box<dyn Plugin>, PluginError> {
        let label = config.get("label").and_then(|v| v.as_str()).map(str::to_string);
        Ok(Box::new(DebugLog { label }))
    }

    fn plugin_type(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            description: "Logs message data for debugging".to_string(),
            category: "debug".to_string(),
        }
    }
}
