//! In-process worker channels.
//!
//! `LocalCluster` wires N schedulers in one process together over tokio
//! channels, which is how the CLI runs multi-worker pipelines and how
//! routing is exercised in tests.

use crate::router::WorkerChannel;
use crate::scheduler::Scheduler;
use async_trait::async_trait;
use pipecore::{PipelineError, WorkerId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// One payload in flight. `done` is signalled once the receiver has
/// finished processing it.
pub struct Delivery {
    pub payload: Vec<u8>,
    pub done: Option<oneshot::Sender<()>>,
}

/// Outbound side of one worker.
#[derive(Clone)]
pub struct LocalChannel {
    self_id: WorkerId,
    peers: Arc<HashMap<WorkerId, mpsc::UnboundedSender<Delivery>>>,
}

/// Inbound side of one worker.
pub struct Inbox {
    worker_id: WorkerId,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

pub struct LocalCluster;

impl LocalCluster {
    /// Channels for `workers` workers with ids `0..workers`.
    pub fn create(workers: u32) -> Vec<(LocalChannel, Inbox)> {
        let mut senders = HashMap::new();
        let mut inboxes = Vec::new();
        for id in 0..workers.max(1) {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(id, tx);
            inboxes.push(Inbox { worker_id: id, rx });
        }

        let peers = Arc::new(senders);
        inboxes
            .into_iter()
            .map(|inbox| {
                let channel = LocalChannel {
                    self_id: inbox.worker_id,
                    peers: Arc::clone(&peers),
                };
                (channel, inbox)
            })
            .collect()
    }
}

#[async_trait]
impl WorkerChannel for LocalChannel {
    fn self_id(&self) -> WorkerId {
        self.self_id
    }

    fn worker_ids(&self) -> Vec<WorkerId> {
        self.peers.keys().copied().collect()
    }

    async fn send(&self, payload: Vec<u8>, worker: WorkerId, wait: bool) -> Result<(), PipelineError> {
        let peer = self
            .peers
            .get(&worker)
            .ok_or_else(|| PipelineError::Dispatch(format!("unknown worker {}", worker)))?;

        let (done, finished) = if wait {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        peer.send(Delivery { payload, done })
            .map_err(|_| PipelineError::Dispatch(format!("worker {} is gone", worker)))?;

        if let Some(finished) = finished {
            finished
                .await
                .map_err(|_| PipelineError::Dispatch(format!("worker {} dropped the send", worker)))?;
        }
        Ok(())
    }
}

impl Inbox {
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Feed deliveries into `scheduler` until `shutdown` fires or every
    /// sender is dropped. Each delivery is processed in its own task.
    pub async fn serve(mut self, scheduler: Scheduler, shutdown: CancellationToken) {
        tracing::debug!("Worker {} serving", self.worker_id);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                delivery = self.rx.recv() => {
                    let Some(Delivery { payload, done }) = delivery else { break };
                    let scheduler = scheduler.clone();
                    tokio::spawn(async move {
                        scheduler.receive(&payload).await;
                        if let Some(done) = done {
                            let _ = done.send(());
                        }
                    });
                }
            }
        }
        tracing::debug!("Worker {} stopped", self.worker_id);
    }
}
