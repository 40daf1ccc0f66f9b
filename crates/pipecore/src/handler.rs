use crate::{PluginError, Stage};
use std::fmt;
use std::sync::Arc;

pub type HandlerFn = dyn Fn(&Stage, &PluginError) -> Result<(), PluginError> + Send + Sync;

/// One entry of a stage's error-handler chain.
#[derive(Clone)]
pub enum ErrorHandler {
    /// Registered under a name and referenced from pipeline definitions.
    Named { name: String, func: Arc<HandlerFn> },
    /// Supplied directly by code.
    Func(Arc<HandlerFn>),
}

impl ErrorHandler {
    pub fn named<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Stage, &PluginError) -> Result<(), PluginError> + Send + Sync + 'static,
    {
        Self::Named {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn func<F>(func: F) -> Self
    where
        F: Fn(&Stage, &PluginError) -> Result<(), PluginError> + Send + Sync + 'static,
    {
        Self::Func(Arc::new(func))
    }

    /// Logs the failure and treats it as handled.
    pub fn log() -> Self {
        Self::named("log", |stage, error| {
            tracing::error!("「{}」 {} failed: {}", stage.task(), stage.key(), error);
            Ok(())
        })
    }

    /// Re-raises the failure, ending the chain.
    pub fn rethrow() -> Self {
        Self::named("rethrow", |_, error| Err(error.clone()))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Named { name, .. } => name,
            Self::Func(_) => "<fn>",
        }
    }

    pub fn call(&self, stage: &Stage, error: &PluginError) -> Result<(), PluginError> {
        match self {
            Self::Named { func, .. } | Self::Func(func) => func(stage, error),
        }
    }
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorHandler").field(&self.name()).finish()
    }
}

/// Ordered handlers run after a stage fails.
#[derive(Clone, Debug, Default)]
pub struct HandlerChain {
    handlers: Vec<ErrorHandler>,
}

impl HandlerChain {
    pub fn new(handlers: Vec<ErrorHandler>) -> Self {
        Self { handlers }
    }

    pub fn push(&mut self, handler: ErrorHandler) {
        self.handlers.push(handler);
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Run handlers in order. The first handler error stops the chain and
    /// becomes the outcome; later handlers are not attempted.
    pub fn handle(&self, stage: &Stage, error: &PluginError) -> Result<(), PluginError> {
        for handler in &self.handlers {
            if let Err(e) = handler.call(stage, error) {
                tracing::debug!(
                    "「{}」 {} handler {} raised, stopping chain",
                    stage.task(),
                    stage.key(),
                    handler.name()
                );
                return Err(e);
            }
        }
        Ok(())
    }
}
