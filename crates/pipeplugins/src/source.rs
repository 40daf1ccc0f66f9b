use async_trait::async_trait;
use pipecore::{Message, Plugin, PluginError, StageConfig, StageContext, Value};
use piperuntime::{PluginFactory, PluginMetadata};

/// Start stage that emits configured values.
///
/// With `each` every element of `values` is sent downstream as its own
/// message; otherwise the whole value is sent once. Without `values` the
/// run parameters are emitted.
#[derive(Clone)]
pub struct SourceValues {
    values: Option<Value>,
    each: bool,
}

#[async_trait]
impl Plugin for SourceValues {
    fn plugin_type(&self) -> &str {
        "source.values"
    }

    async fn run(&self, ctx: &StageContext, msg: &mut Message) -> Result<(), PluginError> {
        let values = match &self.values {
            Some(values) => values.clone(),
            None => Value::Object(msg.request.clone()),
        };

        match values {
            Value::Array(items) if self.each => {
                ctx.events().info(format!("Emitting {} values", items.len()));
                for item in items {
                    ctx.sink(&msg.derive(item)).await;
                }
            }
            value => ctx.sink(&msg.derive(value)).await,
        }
        Ok(())
    }
}

pub struct SourceValuesFactory;

impl PluginFactory for SourceValuesFactory {
    fn create(&self, config: &StageConfig) -> Result<Box<dyn Plugin>, PluginError> {
        let each = match config.get("each") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(each)) => *each,
            Some(_) => {
                return Err(PluginError::InvalidInput {
                    field: "each".to_string(),
                    expected: "boolean".to_string(),
                })
            }
        };
        Ok(Box::new(SourceValues {
            values: config.get("values").cloned(),
            each,
        }))
    }

    fn plugin_type(&self) -> &str {
        "source.values"
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            description: "Emit configured values or the run parameters".to_string(),
            category: "source".to_string(),
        }
    }
}
