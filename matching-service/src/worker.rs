//! Bounded recomputation queue drained by a small worker pool.
//!
//! Posting a thought only enqueues the author's id. A user already waiting in
//! the queue is not queued twice, since the pending job reads the latest
//! vectors when it runs. Passes for the same user may still overlap once a
//! job has started; the match store resolves that with last-write-wins.

use crate::engine::MatchingEngine;
use crate::metrics::MatchingMetrics;
use std::collections::HashSet;
use std::sync::Arc;
use thoughtmates_core::{MatchingConfig, UserId};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// A job for this user was already pending
    Coalesced,
    /// Queue full or workers stopped
    Dropped,
}

#[derive(Debug, Clone)]
pub struct RecomputeQueue {
    sender: mpsc::Sender<UserId>,
    pending: Arc<Mutex<HashSet<UserId>>>,
    metrics: Arc<MatchingMetrics>,
}

impl RecomputeQueue {
    /// Never waits on the workers.
    pub async fn enqueue(&self, user_id: UserId) -> EnqueueOutcome {
        let mut pending = self.pending.lock().await;
        if !pending.insert(user_id) {
            drop(pending);
            debug!("Recomputation for user {} already pending", user_id);
            self.metrics.record_job_coalesced().await;
            return EnqueueOutcome::Coalesced;
        }

        match self.sender.try_send(user_id) {
            Ok(()) => {
                drop(pending);
                self.metrics.record_job_enqueued().await;
                EnqueueOutcome::Queued
            }
            Err(error) => {
                pending.remove(&user_id);
                drop(pending);
                match error {
                    mpsc::error::TrySendError::Full(_) => {
                        warn!("Recompute queue full, dropping job for user {}", user_id)
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        warn!("Recompute workers stopped, dropping job for user {}", user_id)
                    }
                }
                self.metrics.record_job_dropped().await;
                EnqueueOutcome::Dropped
            }
        }
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub fn metrics(&self) -> Arc<MatchingMetrics> {
        self.metrics.clone()
    }
}

pub struct RecomputeWorkers {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl RecomputeWorkers {
    /// Starts `config.workers` tasks sharing one queue of
    /// `config.queue_capacity` jobs. Cancelling `cancel` stops the workers and
    /// aborts running passes between candidates.
    pub fn spawn(
        engine: Arc<MatchingEngine>,
        config: &MatchingConfig,
        cancel: CancellationToken,
    ) -> (RecomputeQueue, Self) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let pending = Arc::new(Mutex::new(HashSet::new()));

        let handles = (0..config.workers.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    engine.clone(),
                    receiver.clone(),
                    pending.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        let queue = RecomputeQueue {
            sender,
            pending,
            metrics: engine.metrics(),
        };
        (queue, Self { handles, cancel })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels and waits for every worker to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                warn!("Recompute worker ended abnormally: {}", e);
            }
        }
        info!("Recompute workers stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    engine: Arc<MatchingEngine>,
    receiver: Arc<Mutex<mpsc::Receiver<UserId>>>,
    pending: Arc<Mutex<HashSet<UserId>>>,
    cancel: CancellationToken,
) {
    debug!("Recompute worker {} started", worker_id);

    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                job = receiver.recv() => job,
            }
        };
        let Some(user_id) = job else { break };

        // Posts arriving during this pass queue a fresh job
        pending.lock().await.remove(&user_id);

        // Errors are logged and counted by the engine
        let _ = engine.recompute_for_user(user_id, &cancel).await;
    }

    debug!("Recompute worker {} exiting", worker_id);
}
