pub mod broadcaster;
pub mod engine;
pub mod metrics;
pub mod service;
pub mod trending;
pub mod worker;

pub use broadcaster::{EventBroadcaster, Subscription};
pub use engine::{MatchingEngine, PassOutcome};
pub use metrics::{MatchingMetrics, MatchingStats};
pub use service::{ServiceStats, ThoughtService};
pub use trending::{rank_trending, window_start, TrendingRanker};
pub use worker::{EnqueueOutcome, RecomputeQueue, RecomputeWorkers};

use embedding_engine::EmbeddingEngine;
use std::sync::Arc;
use thoughtmates_core::{AppConfig, MatchStore, ThoughtStore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Service plus the background tasks it depends on.
pub struct MatchingRuntime {
    pub service: Arc<ThoughtService>,
    workers: RecomputeWorkers,
    broadcaster_task: JoinHandle<()>,
}

impl MatchingRuntime {
    /// Wires the engine, worker pool, broadcaster and service over one store.
    pub fn start<S>(
        store: Arc<S>,
        embeddings: Arc<EmbeddingEngine>,
        config: &AppConfig,
        cancel: CancellationToken,
    ) -> Self
    where
        S: ThoughtStore + MatchStore + 'static,
    {
        let (broadcaster, broadcaster_task) = EventBroadcaster::spawn(&config.broadcast);

        let engine = MatchingEngine::new(store.clone(), store.clone(), config.matching.clone())
            .with_broadcaster(broadcaster.clone());
        let (queue, workers) =
            RecomputeWorkers::spawn(Arc::new(engine), &config.matching, cancel);

        let trending = TrendingRanker::new(store.clone(), config.feed.trending_page_size);
        let service = ThoughtService::new(
            store.clone(),
            store,
            trending,
            embeddings,
            queue,
            broadcaster,
            config.feed.clone(),
        );

        info!(
            "Matching runtime started with {} workers",
            config.matching.workers
        );
        Self {
            service: Arc::new(service),
            workers,
            broadcaster_task,
        }
    }

    /// Stops the workers, then the broadcaster. Undelivered events are lost.
    pub async fn shutdown(self) {
        self.workers.shutdown().await;
        self.broadcaster_task.abort();
        info!("Matching runtime stopped");
    }
}
