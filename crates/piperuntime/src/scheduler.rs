use crate::builder::GraphBuilder;
use crate::config::SchedulerConfig;
use crate::graph::TaskGraph;
use crate::parser::{ConfigParser, RawGraph};
use crate::registry::PluginRegistry;
use crate::router::{RemoteSend, Route, WorkerChannel, WorkerRouter};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use pipecore::{
    Dispatcher, EventBus, GraphError, LockCoordinator, LockStore, Message, Params, PipelineError,
    PipelineEvent, PluginInstance, Resources, SchedulerHandle, TransferMode, WorkerId,
};
use std::any::Any;
use std::sync::{Arc, Weak};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

/// Top-level orchestrator of one worker: owns the task graph and runs,
/// routes and locks on its behalf. Cloning shares the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    graph: OnceCell<TaskGraph>,
    registry: Arc<PluginRegistry>,
    router: WorkerRouter,
    locks: LockCoordinator,
    events: EventBus,
    resources: Resources,
}

/// Builder for a `Scheduler`.
pub struct SchedulerBuilder {
    registry: Arc<PluginRegistry>,
    config: SchedulerConfig,
    channel: Option<Arc<dyn WorkerChannel>>,
    lock_store: Option<Arc<dyn LockStore>>,
    resources: Resources,
}

impl SchedulerBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn channel(mut self, channel: Arc<dyn WorkerChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn lock_store(mut self, store: Arc<dyn LockStore>) -> Self {
        self.lock_store = Some(store);
        self
    }

    /// Make `value` available to stages during `init`.
    pub fn resource<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.resources.insert(value);
        self
    }

    pub fn build(self) -> Scheduler {
        let router = match self.channel {
            Some(channel) => WorkerRouter::new(channel),
            None => WorkerRouter::single(),
        };
        let locks = match self.lock_store {
            Some(store) => LockCoordinator::new(store),
            None => LockCoordinator::in_memory(),
        };
        let events = EventBus::new(self.config.event_buffer_size);

        Scheduler {
            inner: Arc::new(SchedulerInner {
                config: self.config,
                graph: OnceCell::new(),
                registry: self.registry,
                router,
                locks,
                events,
                resources: self.resources,
            }),
        }
    }
}

impl Scheduler {
    pub fn builder(registry: Arc<PluginRegistry>) -> SchedulerBuilder {
        SchedulerBuilder {
            registry,
            config: SchedulerConfig::default(),
            channel: None,
            lock_store: None,
            resources: Resources::new(),
        }
    }

    /// Single-worker scheduler with default settings
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self::builder(registry).build()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.inner.registry
    }

    pub fn worker_id(&self) -> WorkerId {
        self.inner.router.self_id()
    }

    pub fn router(&self) -> &WorkerRouter {
        &self.inner.router
    }

    pub fn locks(&self) -> &LockCoordinator {
        &self.inner.locks
    }

    /// Subscribe to pipeline events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn is_ready(&self) -> bool {
        self.inner.graph.initialized()
    }

    /// The task graph, once built.
    pub fn graph(&self) -> Option<&TaskGraph> {
        self.inner.graph.get()
    }

    /// Build the task graph from raw definitions. Succeeds at most once;
    /// on failure nothing is kept and the scheduler stays not-ready.
    pub async fn build(&self, raw: &RawGraph) -> Result<(), PipelineError> {
        if self.is_ready() {
            return Err(GraphError::AlreadyBuilt.into());
        }

        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        let weak: Weak<dyn Dispatcher> = weak;
        let builder = GraphBuilder {
            registry: &self.inner.registry,
            worker_id: self.worker_id(),
            locks: &self.inner.locks,
            events: &self.inner.events,
            resources: &self.inner.resources,
            scheduler: SchedulerHandle::new(weak),
            default_lock_ex: self.inner.config.default_lock_ex(),
        };
        let graph = builder.build(raw).await.map_err(|e| {
            tracing::error!("Worker {} failed to build task graph: {}", self.worker_id(), e);
            e
        })?;

        let tasks = graph.len();
        self.inner
            .graph
            .set(graph)
            .map_err(|_| GraphError::AlreadyBuilt)?;
        tracing::info!("Worker {} ready with {} tasks", self.worker_id(), tasks);
        Ok(())
    }

    pub async fn build_from(&self, parser: &dyn ConfigParser) -> Result<(), PipelineError> {
        let raw = parser.parse()?;
        self.build(&raw).await
    }

    /// Launch `task`, or every task when `None`, each in its own unit.
    pub async fn run(&self, task: Option<&str>, params: Params) -> Result<RunHandle, PipelineError> {
        let graph = self.inner.wait_ready("targets").await?;
        let tasks: Vec<String> = match task {
            None => graph.task_names().map(str::to_string).collect(),
            Some(task) if graph.contains_task(task) => vec![task.to_string()],
            Some(task) => return Err(PipelineError::NotFound(format!("No such target {}", task))),
        };

        let units = tasks
            .into_iter()
            .map(|task| {
                let scheduler = self.clone();
                let params = params.clone();
                tokio::spawn(async move {
                    if let Err(e) = scheduler.process(&task, params).await {
                        tracing::error!("「{}」 {}", task, e);
                    }
                })
            })
            .collect();
        Ok(RunHandle { units })
    }

    /// Trigger every start stage of `task` with a fresh correlation id.
    /// Start stages run concurrently; one failing does not stop another.
    pub async fn process(&self, task: &str, params: Params) -> Result<(), PipelineError> {
        let graph = self.inner.wait_ready(task).await?;
        let stages = graph
            .task(task)
            .ok_or_else(|| PipelineError::NotFound(format!("No such target {}", task)))?;

        let mut running = FuturesUnordered::new();
        for stage in stages.start_stages() {
            let instance = stage.instance();
            let msg = Message::triggered(params.clone());
            let correlation_id = msg.correlation_id();
            if let Some(id) = correlation_id {
                self.inner.events.emit(PipelineEvent::TaskStarted {
                    task: task.to_string(),
                    stage: stage.key().to_string(),
                    correlation_id: id,
                    worker: self.worker_id(),
                    timestamp: Utc::now(),
                });
            }

            let inner = Arc::clone(&self.inner);
            running.push(tokio::spawn(async move {
                if let Err(e) = instance.process(msg).await {
                    let stage = instance.stage();
                    tracing::error!("「{}」「{}」 {}", stage.task(), stage.key(), e);
                    inner.events.emit(PipelineEvent::StageFailed {
                        task: stage.task().to_string(),
                        stage: stage.key().to_string(),
                        correlation_id,
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }));
        }

        while let Some(joined) = running.next().await {
            if let Err(e) = joined {
                tracing::error!("「{}」 start stage aborted: {}", task, e);
            }
        }
        Ok(())
    }

    /// Resolve the instance for stage `key` of `task`, waiting for the
    /// graph with bounded backoff.
    pub async fn get_target(&self, task: &str, key: &str) -> Result<PluginInstance, PipelineError> {
        self.inner.get_target(task, key).await
    }

    /// Dispatch `msg` to stage `key` of `task`. Never fails: errors are
    /// logged, and when the message never reached a stage its locks are
    /// released here.
    pub async fn send(&self, task: &str, key: &str, msg: Message, transfer: TransferMode, wait: bool) {
        self.inner.send(task, key, msg, transfer, wait).await
    }

    /// Inbound side of the worker channel.
    pub async fn receive(&self, payload: &[u8]) {
        match RemoteSend::decode(payload) {
            Ok(remote) => {
                self.inner
                    .send(&remote.task, &remote.key, remote.message, TransferMode::Local, false)
                    .await
            }
            Err(e) => tracing::error!("Worker {} dropped undecodable send: {}", self.worker_id(), e),
        }
    }
}

impl SchedulerInner {
    /// Bounded wait for the graph: attempt `n` sleeps `n * backoff`.
    async fn wait_ready(&self, what: &str) -> Result<&TaskGraph, PipelineError> {
        let retries = self.config.ready_retries;
        for attempt in 1..=retries {
            if let Some(graph) = self.graph.get() {
                return Ok(graph);
            }
            let delay = self.config.ready_backoff() * attempt;
            tracing::warn!("The {} is building, wait {}ms", what, delay.as_millis());
            tokio::time::sleep(delay).await;
        }
        self.graph.get().ok_or_else(|| PipelineError::NotReady {
            task: what.to_string(),
            attempts: retries,
        })
    }

    async fn get_target(&self, task: &str, key: &str) -> Result<PluginInstance, PipelineError> {
        let graph = self.wait_ready(task).await?;
        let stage = graph
            .stage(task, key)
            .ok_or_else(|| PipelineError::NotFound(format!("{}.{}", task, key)))?;
        Ok(stage.instance())
    }

    async fn dispatch_local(&self, task: &str, key: &str, msg: Message) -> Result<(), PipelineError> {
        tracing::debug!("「{}」 {} runs on worker {}", task, key, self.router.self_id());
        let target = self.get_target(task, key).await?;
        target.process(msg).await
    }

    async fn send(&self, task: &str, key: &str, msg: Message, transfer: TransferMode, wait: bool) {
        let mut opt = msg.opt.clone();
        let correlation_id = msg.correlation_id();

        let route = self.router.route(transfer);
        let result = match route {
            Route::Local => self.dispatch_local(task, key, msg).await,
            Route::Remote(worker) => {
                let envelope = RemoteSend {
                    task: task.to_string(),
                    key: key.to_string(),
                    message: msg,
                };
                let sent = self.router.forward(worker, &envelope, wait).await;
                if sent.is_ok() {
                    self.events.emit(PipelineEvent::Dispatched {
                        task: task.to_string(),
                        stage: key.to_string(),
                        from: self.router.self_id(),
                        to: worker,
                        timestamp: Utc::now(),
                    });
                }
                sent
            }
        };

        match result {
            Ok(()) => {
                // A remote last stage reports completion on its own worker
                let last = route == Route::Local
                    && self
                        .graph
                        .get()
                        .map(|graph| graph.is_last(task, key))
                        .unwrap_or(false);
                if last {
                    tracing::info!("「{}」 finished!", task);
                    self.events.emit(PipelineEvent::TaskFinished {
                        task: task.to_string(),
                        stage: key.to_string(),
                        correlation_id,
                        timestamp: Utc::now(),
                    });
                }
            }
            Err(e) => {
                tracing::error!("「{}」「{}」 {}", task, key, e);
                self.events.emit(PipelineEvent::StageFailed {
                    task: task.to_string(),
                    stage: key.to_string(),
                    correlation_id,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                // A stage that ran has released the message's locks itself
                if !matches!(e, PipelineError::Plugin { .. }) {
                    self.locks.delete_all_locks(&mut opt, task).await;
                }
            }
        }
    }
}

#[async_trait]
impl Dispatcher for SchedulerInner {
    fn worker_id(&self) -> WorkerId {
        self.router.self_id()
    }

    fn locks(&self) -> &LockCoordinator {
        &self.locks
    }

    fn events(&self) -> &EventBus {
        &self.events
    }

    async fn send(&self, task: &str, key: &str, msg: Message, transfer: TransferMode, wait: bool) {
        SchedulerInner::send(self, task, key, msg, transfer, wait).await
    }
}

/// Units launched by `Scheduler::run`.
pub struct RunHandle {
    units: Vec<JoinHandle<()>>,
}

impl RunHandle {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Wait until every launched unit, and everything it dispatched
    /// locally, has finished.
    pub async fn join(self) {
        for unit in self.units {
            if let Err(e) = unit.await {
                tracing::error!("Task unit aborted: {}", e);
            }
        }
    }
}
