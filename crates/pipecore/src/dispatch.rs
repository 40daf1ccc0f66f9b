use crate::{EventBus, LockCoordinator, Message, TransferMode, WorkerId};
use async_trait::async_trait;
use std::sync::{Arc, Weak};

/// The scheduler surface stages dispatch through.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    fn worker_id(&self) -> WorkerId;

    fn locks(&self) -> &LockCoordinator;

    fn events(&self) -> &EventBus;

    /// Hand `msg` to stage `key` of `task`. Failures past this point are
    /// logged and absorbed, never returned to the sender.
    async fn send(&self, task: &str, key: &str, msg: Message, transfer: TransferMode, wait: bool);
}

/// Non-owning reference from a stage back to its scheduler.
#[derive(Clone, Default)]
pub struct SchedulerHandle {
    inner: Option<Weak<dyn Dispatcher>>,
}

impl SchedulerHandle {
    pub fn new(inner: Weak<dyn Dispatcher>) -> Self {
        Self { inner: Some(inner) }
    }

    /// Handle that never resolves, for stages built outside a scheduler.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn upgrade(&self) -> Option<Arc<dyn Dispatcher>> {
        self.inner.as_ref().and_then(Weak::upgrade)
    }
}
