use crate::engine::PassOutcome;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thoughtmates_core::CoreError;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchingStats {
    pub passes_started: u64,
    pub passes_completed: u64,
    pub passes_cancelled: u64,
    pub passes_failed: u64,
    pub pairs_compared: u64,
    pub pairs_skipped: u64,
    pub pairs_stored: u64,
    pub pairs_pruned: u64,
    pub jobs_enqueued: u64,
    pub jobs_coalesced: u64,
    pub jobs_dropped: u64,
    /// Over completed and cancelled passes
    pub average_pass_duration: Duration,
    pub last_pass_at: Option<SystemTime>,
}

#[derive(Debug, Default)]
pub struct MatchingMetrics {
    stats: Arc<RwLock<MatchingStats>>,
}

impl MatchingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_pass_started(&self) {
        self.stats.write().await.passes_started += 1;
    }

    pub async fn record_pass_finished(&self, outcome: &PassOutcome, duration: Duration) {
        let mut stats = self.stats.write().await;

        if outcome.cancelled {
            stats.passes_cancelled += 1;
        } else {
            stats.passes_completed += 1;
        }
        stats.pairs_compared += outcome.compared as u64;
        stats.pairs_skipped += outcome.skipped as u64;
        stats.pairs_stored += outcome.stored as u64;
        stats.pairs_pruned += outcome.pruned as u64;

        let finished = (stats.passes_completed + stats.passes_cancelled) as u32;
        let total = stats.average_pass_duration * (finished - 1) + duration;
        stats.average_pass_duration = total / finished;
        stats.last_pass_at = Some(SystemTime::now());
    }

    pub async fn record_pass_failed(&self) {
        self.stats.write().await.passes_failed += 1;
    }

    pub async fn record_job_enqueued(&self) {
        self.stats.write().await.jobs_enqueued += 1;
    }

    pub async fn record_job_coalesced(&self) {
        self.stats.write().await.jobs_coalesced += 1;
    }

    pub async fn record_job_dropped(&self) {
        self.stats.write().await.jobs_dropped += 1;
    }

    pub async fn get_stats(&self) -> MatchingStats {
        self.stats.read().await.clone()
    }

    pub async fn export_json(&self) -> Result<String, CoreError> {
        let stats = self.get_stats().await;
        Ok(serde_json::to_string_pretty(&stats)?)
    }

    pub async fn reset(&self) {
        *self.stats.write().await = MatchingStats::default();
    }
}
