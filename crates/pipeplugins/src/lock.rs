use async_trait::async_trait;
use pipecore::{Message, Plugin, PluginError, StageConfig, StageContext, Value};
use piperuntime::{PluginFactory, PluginMetadata};

/// Idempotency gate: forwards a message only if its lock key is free.
///
/// The key is `prefix` joined with the `field` of the data (or the whole
/// data when no field is configured). The lock lives for the stage's
/// `lockEx` and is released with the run's other locks on failure; with
/// `release` it is dropped as soon as downstream returns.
#[derive(Clone)]
pub struct Dedupe {
    field: Option<String>,
    prefix: Option<String>,
    release: bool,
}

impl Dedupe {
    fn lock_key(&self, ctx: &StageContext, data: &Value) -> Result<String, PluginError> {
        let part = match &self.field {
            Some(field) => data.get(field).ok_or_else(|| PluginError::InvalidInput {
                field: field.clone(),
                expected: "present in data".to_string(),
            })?,
            None => data,
        };
        let part = match part {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let prefix = match &self.prefix {
            Some(prefix) => prefix.clone(),
            None => format!("{}:{}", ctx.task(), ctx.key()),
        };
        Ok(format!("{}:{}", prefix, part))
    }
}

#[async_trait]
impl Plugin for Dedupe {
    fn plugin_type(&self) -> &str {
        "lock.dedupe"
    }

    async fn run(&self, ctx: &StageContext, msg: &mut Message) -> Result<(), PluginError> {
        let key = self.lock_key(ctx, &msg.data)?;
        if !ctx.get_lock(&key, msg).await? {
            tracing::info!("「{}」 {} duplicate {}, skipped", ctx.task(), ctx.key(), key);
            ctx.events().info(format!("Duplicate skipped: {}", key));
            return Ok(());
        }

        ctx.sink(msg).await;
        if self.release {
            ctx.delete_all_locks(msg).await;
        }
        Ok(())
    }
}

pub struct DedupeFactory;

impl PluginFactory for DedupeFactory {
    fn create(&self, config: &StageConfig) -> Result<Box<dyn Plugin>, PluginError> {
        let text = |name: &str| config.get(name).and_then(|v| v.as_str()).map(str::to_string);
        Ok(Box::new(Dedupe {
            field: text("field"),
            prefix: text("prefix"),
            release: config.get("release").and_then(|v| v.as_bool()).unwrap_or(false),
        }))
    }

    fn plugin_type(&self) -> &str {
        "lock.dedupe"
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            description: "Drop messages whose key is already locked".to_string(),
            category: "lock".to_string(),
        }
    }
}
