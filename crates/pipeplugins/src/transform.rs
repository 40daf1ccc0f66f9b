use async_trait::async_trait;
use pipecore::{Message, Plugin, PluginError, StageConfig, StageContext, Value};
use piperuntime::{PluginFactory, PluginMetadata};

/// Parse a JSON string in the message data
#[derive(Clone)]
pub struct JsonDecode;

#[async_trait]
impl Plugin for JsonDecode {
    fn plugin_type(&self) -> &str {
        "transform.json_decode"
    }

    async fn run(&self, ctx: &StageContext, msg: &mut Message) -> Result<(), PluginError> {
        let input = msg.data.as_str().ok_or_else(|| PluginError::InvalidInput {
            field: "data".to_string(),
            expected: "string".to_string(),
        })?;

        let parsed: Value = serde_json::from_str(input)
            .map_err(|e| PluginError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        msg.data = parsed;
        ctx.sink(msg).await;
        Ok(())
    }
}

pub struct JsonDecodeFactory;

impl PluginFactory for JsonDecodeFactory {
    fn create(&self, _config: &StageConfig) -> Result<Box<dyn Plugin>, PluginError> {
        Ok(Box::new(JsonDecode))
    }

    fn plugin_type(&self) -> &str {
        "transform.json_decode"
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}

/// Serialize the message data to a JSON string
#[derive(Clone)]
pub struct JsonEncode {
    pretty: bool,
}

#[async_trait]
impl Plugin for JsonEncode {
    fn plugin_type(&self) -> &str {
        "transform.json_encode"
    }

    async fn run(&self, ctx: &StageContext, msg: &mut Message) -> Result<(), PluginError> {
        let encoded = if self.pretty {
            serde_json::to_string_pretty(&msg.data)
        } else {
            serde_json::to_string(&msg.data)
        }
        .map_err(|e| PluginError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        msg.data = Value::String(encoded);
        ctx.sink(msg).await;
        Ok(())
    }
}

pub struct JsonEncodeFactory;

impl PluginFactory for JsonEncodeFactory {
    fn create(&self, config: &StageConfig) -> Result<Box<dyn Plugin>, PluginError> {
        let pretty = config.get("pretty").and_then(|v| v.as_bool()).unwrap_or(false);
        Ok(Box::new(JsonEncode { pretty }))
    }

    fn plugin_type(&self) -> &str {
        "transform.json_encode"
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            description: "Convert data to JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}
