use pipecore::{ErrorHandler, Plugin, PluginError, StageConfig};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating stage templates
pub trait PluginFactory: Send + Sync {
    /// Create a new, uninitialized instance from the stage configuration
    fn create(&self, config: &StageConfig) -> Result<Box<dyn Plugin>, PluginError>;

    /// Get plugin type identifier
    fn plugin_type(&self) -> &str;

    /// Optional: Get plugin metadata (description, category)
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::default()
    }
}

/// Metadata about a plugin type
#[derive(Debug, Clone)]
pub struct PluginMetadata {
    pub description: String,
    pub category: String,
}

impl Default for PluginMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Factory backed by a closure.
pub struct FnFactory<F> {
    plugin_type: String,
    create: F,
}

impl<F> FnFactory<F>
where
    F: Fn(&StageConfig) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync,
{
    pub fn new(plugin_type: impl Into<String>, create: F) -> Self {
        Self {
            plugin_type: plugin_type.into(),
            create,
        }
    }
}

impl<F> PluginFactory for FnFactory<F>
where
    F: Fn(&StageConfig) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync,
{
    fn create(&self, config: &StageConfig) -> Result<Box<dyn Plugin>, PluginError> {
        (self.create)(config)
    }

    fn plugin_type(&self) -> &str {
        &self.plugin_type
    }
}

/// Registry of plugin types and named error handlers, consulted while a
/// task graph is built.
pub struct PluginRegistry {
    factories: HashMap<String, Arc<dyn PluginFactory>>,
    handlers: HashMap<String, ErrorHandler>,
}

impl PluginRegistry {
    /// Empty registry with the built-in `log` and `rethrow` handlers.
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
            handlers: HashMap::new(),
        };
        registry.register_handler(ErrorHandler::log());
        registry.register_handler(ErrorHandler::rethrow());
        registry
    }

    /// Register a plugin factory
    pub fn register(&mut self, factory: Arc<dyn PluginFactory>) {
        let plugin_type = factory.plugin_type().to_string();
        tracing::info!("Registering plugin type: {}", plugin_type);
        self.factories.insert(plugin_type, factory);
    }

    pub fn register_fn<F>(&mut self, plugin_type: impl Into<String>, create: F)
    where
        F: Fn(&StageConfig) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnFactory::new(plugin_type, create)));
    }

    /// Register an error handler under its name. Anonymous handlers are
    /// attached to stages directly and cannot be registered.
    pub fn register_handler(&mut self, handler: ErrorHandler) -> bool {
        match &handler {
            ErrorHandler::Named { name, .. } => {
                tracing::debug!("Registering error handler: {}", name);
                self.handlers.insert(name.clone(), handler);
                true
            }
            ErrorHandler::Func(_) => false,
        }
    }

    pub fn contains(&self, plugin_type: &str) -> bool {
        self.factories.contains_key(plugin_type)
    }

    /// Create an uninitialized plugin; `None` for an unknown type.
    pub fn create_plugin(
        &self,
        plugin_type: &str,
        config: &StageConfig,
    ) -> Option<Result<Box<dyn Plugin>, PluginError>> {
        self.factories
            .get(plugin_type)
            .map(|factory| factory.create(config))
    }

    pub fn handler(&self, name: &str) -> Option<ErrorHandler> {
        self.handlers.get(name).cloned()
    }

    /// Get all registered plugin types, sorted
    pub fn list_plugin_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a plugin type
    pub fn get_metadata(&self, plugin_type: &str) -> Option<PluginMetadata> {
        self.factories.get(plugin_type).map(|f| f.metadata())
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
