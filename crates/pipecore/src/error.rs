use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] GraphError),

    #[error("Task graph for '{task}' not ready after {attempts} attempts")]
    NotReady { task: String, attempts: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Plugin '{task}.{key}' failed: {source}")]
    Plugin {
        task: String,
        key: String,
        #[source]
        source: PluginError,
    },

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Lock store error: {0}")]
    LockStore(#[from] LockError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn plugin(task: impl Into<String>, key: impl Into<String>, source: PluginError) -> Self {
        Self::Plugin {
            task: task.into(),
            key: key.into(),
            source,
        }
    }
}

/// Errors raised by a stage implementation.
#[derive(Error, Debug, Clone)]
pub enum PluginError {
    #[error("Missing required config: {0}")]
    MissingConfig(String),

    #[error("Invalid input for '{field}': expected {expected}")]
    InvalidInput { field: String, expected: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Plugin initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Handler '{handler}' failed: {message}")]
    Handler { handler: String, message: String },
}

/// Errors found while turning raw specs into a task graph.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("The type must be set in {task}.{key}")]
    MissingType { task: String, key: String },

    #[error("Unknown plugin type '{plugin_type}' in {task}.{key}")]
    UnknownPluginType {
        task: String,
        key: String,
        plugin_type: String,
    },

    #[error("Unknown error handler '{handler}' in {task}.{key}")]
    UnknownHandler {
        task: String,
        key: String,
        handler: String,
    },

    #[error("Invalid field '{field}' in {task}.{key}: {reason}")]
    InvalidField {
        task: String,
        key: String,
        field: String,
        reason: String,
    },

    #[error("Stage {task}.{key} outputs to unknown stage '{target}'")]
    UnknownOutput {
        task: String,
        key: String,
        target: String,
    },

    #[error("Failed to create {task}.{key}: {source}")]
    Plugin {
        task: String,
        key: String,
        #[source]
        source: PluginError,
    },

    #[error("Invalid pipeline definition: {0}")]
    Invalid(String),

    #[error("Task graph is already built")]
    AlreadyBuilt,
}

#[derive(Error, Debug, Clone)]
pub enum LockError {
    #[error("Lock store unavailable: {0}")]
    Unavailable(String),

    #[error("Lock store command '{command}' failed: {message}")]
    Command { command: String, message: String },
}
