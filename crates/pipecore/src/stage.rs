use crate::{
    EventEmitter, HandlerChain, Lifecycle, LockCoordinator, Message, OutputEdge, PipelineError,
    Plugin, PluginError, PluginSpec, SchedulerHandle, WorkerId,
};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;

/// A built stage: its spec, its initialized template and its handlers.
pub struct Stage {
    task: String,
    key: String,
    spec: PluginSpec,
    template: Arc<dyn Plugin>,
    handlers: HandlerChain,
    worker_id: WorkerId,
    locks: LockCoordinator,
    emitter: EventEmitter,
    scheduler: SchedulerHandle,
}

/// Collaborators a stage is wired to when it is built.
pub struct StageWiring {
    pub worker_id: WorkerId,
    pub locks: LockCoordinator,
    pub emitter: EventEmitter,
    pub scheduler: SchedulerHandle,
}

impl Stage {
    pub fn new(
        task: impl Into<String>,
        key: impl Into<String>,
        spec: PluginSpec,
        template: Box<dyn Plugin>,
        handlers: HandlerChain,
        wiring: StageWiring,
    ) -> Self {
        Self {
            task: task.into(),
            key: key.into(),
            spec,
            template: Arc::from(template),
            handlers,
            worker_id: wiring.worker_id,
            locks: wiring.locks,
            emitter: wiring.emitter,
            scheduler: wiring.scheduler,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn spec(&self) -> &PluginSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn is_start(&self) -> bool {
        self.spec.start
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.template.lifecycle()
    }

    pub fn handlers(&self) -> &HandlerChain {
        &self.handlers
    }

    /// Execution instance for one invocation: the shared template for
    /// singletons, a fresh copy for transients.
    pub fn instance(self: &Arc<Self>) -> PluginInstance {
        match self.lifecycle() {
            Lifecycle::Singleton => PluginInstance::Singleton(Arc::clone(self)),
            Lifecycle::Transient => PluginInstance::Transient {
                stage: Arc::clone(self),
                plugin: self.template.instantiate(),
            },
        }
    }

    /// Failure path of `process`. Locks recorded on `msg` go first; without
    /// handlers the error then escapes as is, otherwise the chain decides
    /// the outcome.
    async fn fail(&self, msg: &mut Message, error: PluginError) -> Result<(), PipelineError> {
        self.locks.delete_all_locks(&mut msg.opt, &self.task).await;
        if self.handlers.is_empty() {
            return Err(PipelineError::plugin(&self.task, &self.key, error));
        }
        self.handlers
            .handle(self, &error)
            .map_err(|e| PipelineError::plugin(&self.task, &self.key, e))
    }
}

/// Resolved execution target for one edge.
pub enum PluginInstance {
    /// Independent copy of the stage template, owned by this invocation.
    Transient {
        stage: Arc<Stage>,
        plugin: Box<dyn Plugin>,
    },
    /// The worker-wide shared instance.
    Singleton(Arc<Stage>),
}

impl PluginInstance {
    pub fn stage(&self) -> &Arc<Stage> {
        match self {
            Self::Transient { stage, .. } | Self::Singleton(stage) => stage,
        }
    }

    pub fn plugin(&self) -> &dyn Plugin {
        match self {
            Self::Transient { plugin, .. } => plugin.as_ref(),
            Self::Singleton(stage) => stage.template.as_ref(),
        }
    }

    pub fn is_singleton(&self) -> bool {
        matches!(self, Self::Singleton(_))
    }

    /// Run the stage on `msg`, routing failures through its handler chain.
    pub async fn process(&self, mut msg: Message) -> Result<(), PipelineError> {
        let stage = self.stage();
        let ctx = StageContext::new(Arc::clone(stage));
        match self.plugin().run(&ctx, &mut msg).await {
            Ok(()) => Ok(()),
            Err(error) => stage.fail(&mut msg, error).await,
        }
    }
}

/// What a running stage can reach: its own identity, downstream dispatch
/// and the lock coordinator.
#[derive(Clone)]
pub struct StageContext {
    stage: Arc<Stage>,
}

impl StageContext {
    pub fn new(stage: Arc<Stage>) -> Self {
        Self { stage }
    }

    pub fn task(&self) -> &str {
        &self.stage.task
    }

    pub fn key(&self) -> &str {
        &self.stage.key
    }

    pub fn spec(&self) -> &PluginSpec {
        &self.stage.spec
    }

    pub fn worker_id(&self) -> WorkerId {
        self.stage.worker_id
    }

    pub fn events(&self) -> &EventEmitter {
        &self.stage.emitter
    }

    /// Forward `msg` to this stage's outputs: the per-message override when
    /// one is set for this stage, the static edges otherwise. More than one
    /// output fans out into independent tasks, each with its own copy.
    pub async fn sink(&self, msg: &Message) {
        let outputs = match msg.opt.output_override(self.key()) {
            Some(select) => select(msg),
            None => self.stage.spec.outputs.clone(),
        };

        match outputs.as_slice() {
            [] => {}
            [edge] => self.forward(edge, msg.clone()).await,
            _ => {
                let mut running = FuturesUnordered::new();
                for edge in outputs.iter().cloned() {
                    let ctx = self.clone();
                    let branch = msg.clone();
                    running.push(tokio::spawn(async move {
                        ctx.forward(&edge, branch).await;
                    }));
                }
                while let Some(joined) = running.next().await {
                    if let Err(e) = joined {
                        tracing::error!("「{}」 {} fan-out branch aborted: {}", self.task(), self.key(), e);
                    }
                }
            }
        }
    }

    /// Send `msg` to one downstream stage. A static edge to `target` keeps
    /// its transfer mode and wait flag.
    pub async fn output(&self, msg: &Message, target: &str) {
        let edge = self
            .stage
            .spec
            .outputs
            .iter()
            .find(|edge| edge.target == target)
            .cloned()
            .unwrap_or_else(|| OutputEdge::local(target));
        self.forward(&edge, msg.clone()).await;
    }

    async fn forward(&self, edge: &OutputEdge, msg: Message) {
        if msg.is_empty() {
            if !self.stage.spec.can_empty {
                tracing::info!(
                    "「{}」 {} -> {}; data is empty, canEmpty is false so not sink next",
                    self.task(),
                    self.key(),
                    edge.target
                );
                return;
            }
            tracing::info!(
                "「{}」 {} -> {}; data is empty, canEmpty is true so continue sink next",
                self.task(),
                self.key(),
                edge.target
            );
        } else {
            tracing::info!("「{}」 {} -> {};", self.task(), self.key(), edge.target);
        }

        match self.stage.scheduler.upgrade() {
            Some(scheduler) => {
                scheduler
                    .send(self.task(), &edge.target, msg, edge.transfer, edge.wait)
                    .await
            }
            None => tracing::error!(
                "「{}」 {} -> {}; scheduler is gone, message dropped",
                self.task(),
                self.key(),
                edge.target
            ),
        }
    }

    /// Take `key` for the stage's `lockEx` and record it on `msg`.
    pub async fn get_lock(&self, key: &str, msg: &mut Message) -> Result<bool, PluginError> {
        self.get_lock_with_ttl(key, self.stage.spec.lock_ex, msg).await
    }

    pub async fn get_lock_with_ttl(
        &self,
        key: &str,
        ttl: Duration,
        msg: &mut Message,
    ) -> Result<bool, PluginError> {
        Ok(self.stage.locks.get_lock(key, ttl, &mut msg.opt).await?)
    }

    pub async fn delete_lock(&self, key: &str) -> Result<bool, PluginError> {
        Ok(self.stage.locks.delete_lock(key, self.task()).await?)
    }

    /// Release every lock recorded on `msg`.
    pub async fn delete_all_locks(&self, msg: &mut Message) -> usize {
        self.stage
            .locks
            .delete_all_locks(&mut msg.opt, self.task())
            .await
    }
}
