//! Bounded dispatch queue and worker pool
//!
//! The gateway enqueues without waiting; a full queue rejects the job
//! instead of growing. Closing the queue lets the workers drain what is
//! already queued and then stop.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::dispatcher::{DispatchJob, ResponseDispatcher};

/// Why a job could not be enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    Full,
    Closed,
}

impl std::fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnqueueError::Full => f.write_str("dispatch queue full"),
            EnqueueError::Closed => f.write_str("dispatch queue closed"),
        }
    }
}

/// Producer side of the dispatch queue
pub struct DispatchQueue {
    sender: RwLock<Option<mpsc::Sender<DispatchJob>>>,
}

impl DispatchQueue {
    /// Create a queue with the given capacity and the pool that drains it
    pub fn new(
        dispatcher: Arc<ResponseDispatcher>,
        capacity: usize,
        workers: usize,
    ) -> (Self, DispatchWorkerPool) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        let pool = DispatchWorkerPool {
            dispatcher,
            receiver: Arc::new(Mutex::new(receiver)),
            workers: workers.max(1),
        };

        let queue = Self {
            sender: RwLock::new(Some(sender)),
        };
        (queue, pool)
    }

    /// Enqueue a job without waiting
    pub fn try_enqueue(&self, job: DispatchJob) -> Result<(), EnqueueError> {
        let guard = self.sender.read();
        let sender = guard.as_ref().ok_or(EnqueueError::Closed)?;
        sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Stop accepting jobs. Workers finish the queued ones and exit.
    pub fn close(&self) {
        if self.sender.write().take().is_some() {
            info!("Dispatch queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Free slots left in the queue
    pub fn remaining_capacity(&self) -> usize {
        self.sender.read().as_ref().map_or(0, |s| s.capacity())
    }
}

/// Workers consuming the dispatch queue
pub struct DispatchWorkerPool {
    dispatcher: Arc<ResponseDispatcher>,
    receiver: Arc<Mutex<mpsc::Receiver<DispatchJob>>>,
    workers: usize,
}

impl DispatchWorkerPool {
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Spawn the workers. They stop once the queue is closed (or dropped)
    /// and has drained.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        info!(workers = self.workers, "Starting dispatch workers");

        (0..self.workers)
            .map(|worker| {
                let dispatcher = self.dispatcher.clone();
                let receiver = self.receiver.clone();
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        let Some(job) = job else {
                            break;
                        };
                        debug!(worker, dispatch_id = %job.id, "Dispatch picked up");
                        dispatcher.dispatch(job).await;
                    }
                    debug!(worker, "Dispatch worker stopped");
                })
            })
            .collect()
    }
}
