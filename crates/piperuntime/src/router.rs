use async_trait::async_trait;
use pipecore::{Message, PipelineError, TransferMode, WorkerId};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A send handed to another worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSend {
    pub task: String,
    pub key: String,
    pub message: Message,
}

impl RemoteSend {
    pub fn encode(&self) -> Result<Vec<u8>, PipelineError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PipelineError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Transport between the workers of one deployment, provided by the host.
#[async_trait]
pub trait WorkerChannel: Send + Sync {
    fn self_id(&self) -> WorkerId;

    fn worker_ids(&self) -> Vec<WorkerId>;

    /// Deliver `payload` to `worker`. With `wait` the call returns once the
    /// remote side has finished processing it.
    async fn send(&self, payload: Vec<u8>, worker: WorkerId, wait: bool) -> Result<(), PipelineError>;
}

/// Channel of a deployment with a single worker.
pub struct SingleWorker;

#[async_trait]
impl WorkerChannel for SingleWorker {
    fn self_id(&self) -> WorkerId {
        0
    }

    fn worker_ids(&self) -> Vec<WorkerId> {
        vec![0]
    }

    async fn send(&self, _payload: Vec<u8>, worker: WorkerId, _wait: bool) -> Result<(), PipelineError> {
        Err(PipelineError::Dispatch(format!(
            "no worker {} in a single-worker deployment",
            worker
        )))
    }
}

/// Where a dispatch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Local,
    Remote(WorkerId),
}

/// Decides where a send executes and hands remote ones to the channel.
#[derive(Clone)]
pub struct WorkerRouter {
    channel: Arc<dyn WorkerChannel>,
}

impl WorkerRouter {
    pub fn new(channel: Arc<dyn WorkerChannel>) -> Self {
        Self { channel }
    }

    pub fn single() -> Self {
        Self::new(Arc::new(SingleWorker))
    }

    pub fn self_id(&self) -> WorkerId {
        self.channel.self_id()
    }

    /// Worker ids in ascending order.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        let mut ids = self.channel.worker_ids();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn route(&self, transfer: TransferMode) -> Route {
        let self_id = self.self_id();
        match transfer {
            TransferMode::Local => Route::Local,
            TransferMode::WorkerIndex(n) => {
                let ids = self.worker_ids();
                if ids.is_empty() {
                    return Route::Local;
                }
                let target = ids[n as usize % ids.len()];
                if target == self_id {
                    Route::Local
                } else {
                    Route::Remote(target)
                }
            }
            TransferMode::Broadcast => {
                let peers: Vec<WorkerId> = self
                    .worker_ids()
                    .into_iter()
                    .filter(|id| *id != self_id)
                    .collect();
                match peers.choose(&mut rand::thread_rng()) {
                    Some(peer) => Route::Remote(*peer),
                    None => Route::Local,
                }
            }
        }
    }

    pub async fn forward(
        &self,
        worker: WorkerId,
        envelope: &RemoteSend,
        wait: bool,
    ) -> Result<(), PipelineError> {
        let payload = envelope.encode()?;
        tracing::info!("Data from worker {} to {}", self.self_id(), worker);
        self.channel.send(payload, worker, wait).await
    }
}
