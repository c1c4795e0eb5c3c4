//! Recomputes a user's affinity against every other user with content.

use crate::broadcaster::EventBroadcaster;
use crate::metrics::MatchingMetrics;
use chrono::Utc;
use embedding_engine::try_affinity;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thoughtmates_core::{
    BroadcastEvent, CoreError, ErrorExt, ErrorRecovery, MatchStore, MatchingConfig,
    RecoveryResult, RecoveryStrategy, ThoughtStore, UserId, Vector,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassOutcome {
    pub user_id: UserId,
    pub compared: usize,
    pub stored: usize,
    pub pruned: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PairResult {
    Stored(f32),
    Pruned(u64),
    BelowThreshold(f32),
}

pub struct MatchingEngine {
    store: Arc<dyn ThoughtStore>,
    matches: Arc<dyn MatchStore>,
    broadcaster: Option<EventBroadcaster>,
    metrics: Arc<MatchingMetrics>,
    config: MatchingConfig,
}

impl MatchingEngine {
    pub fn new(
        store: Arc<dyn ThoughtStore>,
        matches: Arc<dyn MatchStore>,
        config: MatchingConfig,
    ) -> Self {
        Self {
            store,
            matches,
            broadcaster: None,
            metrics: Arc::new(MatchingMetrics::new()),
            config,
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: EventBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MatchingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<MatchingMetrics> {
        self.metrics.clone()
    }

    /// One recomputation pass for `user_id`.
    ///
    /// Scores strictly above the threshold are written in both directions.
    /// Lower scores leave any earlier row alone unless `prune_stale` is set.
    /// A bad candidate is skipped; a failing match write aborts the pass.
    /// Cancellation is checked between candidates, never between the two
    /// directions of one pair.
    pub async fn recompute_for_user(
        &self,
        user_id: UserId,
        cancel: &CancellationToken,
    ) -> Result<PassOutcome, CoreError> {
        let started = Instant::now();
        self.metrics.record_pass_started().await;

        let result = self.run_pass(user_id, cancel).await;
        match &result {
            Ok(outcome) => {
                self.metrics
                    .record_pass_finished(outcome, started.elapsed())
                    .await;
                if outcome.cancelled {
                    info!(
                        "Recomputation for user {} cancelled after {} comparisons",
                        user_id, outcome.compared
                    );
                } else {
                    debug!(
                        "Recomputed user {}: {} compared, {} stored, {} skipped in {:?}",
                        user_id,
                        outcome.compared,
                        outcome.stored,
                        outcome.skipped,
                        started.elapsed()
                    );
                }
                if let Some(broadcaster) = &self.broadcaster {
                    broadcaster.publish(BroadcastEvent::MatchesUpdated {
                        user_id,
                        stored: outcome.stored,
                    });
                }
            }
            Err(error) => {
                self.metrics.record_pass_failed().await;
                error.log_error();
            }
        }
        result
    }

    async fn run_pass(
        &self,
        user_id: UserId,
        cancel: &CancellationToken,
    ) -> Result<PassOutcome, CoreError> {
        let mut outcome = PassOutcome {
            user_id,
            ..Default::default()
        };

        let own: Vec<Vector> = self
            .store
            .user_content(user_id)
            .await?
            .into_iter()
            .map(|item| item.vector)
            .collect();
        if own.is_empty() {
            debug!("User {} has no thoughts yet, nothing to match", user_id);
            return Ok(outcome);
        }

        let roster = self
            .store
            .users_with_content(user_id, self.config.max_candidates)
            .await?;

        for candidate in roster {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                return Ok(outcome);
            }

            let result = match self.process_pair(user_id, &own, candidate).await {
                Ok(result) => Some(result),
                Err(error) => match ErrorRecovery::determine_strategy(&error) {
                    RecoveryStrategy::Skip => {
                        warn!("Skipping candidate {} for user {}", candidate, user_id);
                        error.log_warn();
                        None
                    }
                    RecoveryStrategy::Fail => return Err(error),
                    strategy => {
                        let retried = ErrorRecovery::apply_strategy(strategy, || {
                            self.process_pair(user_id, &own, candidate)
                        })
                        .await;
                        match retried {
                            RecoveryResult::Recovered(result) => Some(result),
                            RecoveryResult::Skipped => None,
                            RecoveryResult::Failed(error) => return Err(error),
                        }
                    }
                },
            };

            match result {
                Some(PairResult::Stored(score)) => {
                    outcome.compared += 1;
                    outcome.stored += 1;
                    debug!("Stored {} <-> {} at {:.3}", user_id, candidate, score);
                }
                Some(PairResult::Pruned(rows)) => {
                    outcome.compared += 1;
                    if rows > 0 {
                        outcome.pruned += 1;
                    }
                }
                Some(PairResult::BelowThreshold(score)) => {
                    outcome.compared += 1;
                    debug!("{} <-> {} below threshold at {:.3}", user_id, candidate, score);
                }
                None => outcome.skipped += 1,
            }
        }

        Ok(outcome)
    }

    async fn process_pair(
        &self,
        user_id: UserId,
        own: &[Vector],
        candidate: UserId,
    ) -> Result<PairResult, CoreError> {
        let theirs: Vec<Vector> = self
            .store
            .user_content(candidate)
            .await?
            .into_iter()
            .map(|item| item.vector)
            .collect();
        if theirs.is_empty() {
            return Err(CoreError::not_found(format!("thoughts of user {candidate}")));
        }

        let score = try_affinity(own, &theirs, self.config.top_k)?;

        if score > self.config.meaningful_threshold {
            self.matches
                .upsert_symmetric(user_id, candidate, score, Utc::now())
                .await?;
            Ok(PairResult::Stored(score))
        } else if self.config.prune_stale {
            let removed = self.matches.remove_symmetric(user_id, candidate).await?;
            Ok(PairResult::Pruned(removed))
        } else {
            Ok(PairResult::BelowThreshold(score))
        }
    }
}
