//! Error recovery strategies for failures inside a recomputation scan.
//!
//! A scan compares one user against every other user. Bad data belonging to a
//! single candidate must not abort the whole scan, while persistence failures
//! must surface instead of silently dropping a match write.

use crate::{CoreError, DatabaseError, ErrorExt};
use std::time::Duration;
use tracing::info;

/// Recovery strategy for handling errors
#[derive(Debug, Clone)]
pub enum RecoveryStrategy {
    /// Retry the operation with exponential backoff
    RetryWithBackoff {
        max_attempts: usize,
        initial_delay: Duration,
        max_delay: Duration,
    },
    /// Skip the operation and continue
    Skip,
    /// Fail immediately
    Fail,
}

/// Result of an error recovery attempt
#[derive(Debug)]
pub enum RecoveryResult<T> {
    /// Recovery was successful, operation can continue
    Recovered(T),
    /// Recovery failed, operation should be skipped
    Skipped,
    /// Recovery failed, error should be propagated
    Failed(CoreError),
}

pub struct ErrorRecovery;

impl ErrorRecovery {
    /// Determine the appropriate recovery strategy for a given error
    pub fn determine_strategy(error: &CoreError) -> RecoveryStrategy {
        match error {
            // One candidate's stored vectors are unusable
            CoreError::Database(DatabaseError::MalformedVector { .. }) => RecoveryStrategy::Skip,
            CoreError::Embedding(crate::EmbeddingError::DimensionMismatch { .. }) => {
                RecoveryStrategy::Skip
            }

            // Candidate disappeared between roster fetch and comparison
            CoreError::NotFound { .. } => RecoveryStrategy::Skip,
            CoreError::InvalidInput { .. } => RecoveryStrategy::Skip,

            // Busy database: retry with short backoff
            CoreError::Database(db_error) if db_error.is_retryable() => {
                RecoveryStrategy::RetryWithBackoff {
                    max_attempts: 5,
                    initial_delay: Duration::from_millis(100),
                    max_delay: Duration::from_secs(2),
                }
            }

            CoreError::Timeout { .. } => RecoveryStrategy::RetryWithBackoff {
                max_attempts: 2,
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(2),
            },

            _ => RecoveryStrategy::Fail,
        }
    }

    /// Apply the recovery strategy to an operation
    pub async fn apply_strategy<F, T, Fut>(
        strategy: RecoveryStrategy,
        mut operation: F,
    ) -> RecoveryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>> + Send,
        T: Send,
    {
        match strategy {
            RecoveryStrategy::RetryWithBackoff {
                max_attempts,
                initial_delay,
                max_delay,
            } => Self::retry_with_backoff(operation, max_attempts, initial_delay, max_delay).await,
            RecoveryStrategy::Skip => RecoveryResult::Skipped,
            RecoveryStrategy::Fail => match operation().await {
                Ok(value) => RecoveryResult::Recovered(value),
                Err(error) => RecoveryResult::Failed(error),
            },
        }
    }

    async fn retry_with_backoff<F, T, Fut>(
        mut operation: F,
        max_attempts: usize,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> RecoveryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        let mut delay = initial_delay;

        loop {
            match operation().await {
                Ok(result) => return RecoveryResult::Recovered(result),
                Err(error) => {
                    attempt += 1;

                    if attempt >= max_attempts || !error.is_retryable() {
                        return RecoveryResult::Failed(error);
                    }

                    if let Some(retry_delay) = error.retry_after() {
                        delay = retry_delay;
                    }
                    if delay > max_delay {
                        delay = max_delay;
                    }

                    info!(
                        "Recovery attempt {}/{} failed. Retrying after {:?}: {}",
                        attempt, max_attempts, delay, error
                    );

                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, max_delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retry_with_backoff_failure() {
        let strategy = RecoveryStrategy::RetryWithBackoff {
            max_attempts: 2,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
        };

        let result: RecoveryResult<&str> = ErrorRecovery::apply_strategy(strategy, || async {
            Err(CoreError::Database(DatabaseError::DatabaseLocked))
        })
        .await;

        assert!(matches!(result, RecoveryResult::Failed(_)));
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() {
        let strategy = RecoveryStrategy::RetryWithBackoff {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let calls = Arc::new(AtomicUsize::new(0));

        let result = ErrorRecovery::apply_strategy(strategy, || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(CoreError::Database(DatabaseError::DatabaseLocked))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert!(matches!(result, RecoveryResult::Recovered(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_skip_strategy() {
        let result: RecoveryResult<&str> =
            ErrorRecovery::apply_strategy(RecoveryStrategy::Skip, || async {
                Err(CoreError::invalid_input("test"))
            })
            .await;

        assert!(matches!(result, RecoveryResult::Skipped));
    }

    #[test]
    fn test_determine_strategy() {
        let malformed = CoreError::Database(DatabaseError::MalformedVector {
            thought_id: 3,
            reason: "not a number".to_string(),
        });
        assert!(matches!(
            ErrorRecovery::determine_strategy(&malformed),
            RecoveryStrategy::Skip
        ));

        let locked = CoreError::Database(DatabaseError::DatabaseLocked);
        assert!(matches!(
            ErrorRecovery::determine_strategy(&locked),
            RecoveryStrategy::RetryWithBackoff {
                max_attempts: 5,
                ..
            }
        ));

        let io = CoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(matches!(
            ErrorRecovery::determine_strategy(&io),
            RecoveryStrategy::Fail
        ));
    }
}
