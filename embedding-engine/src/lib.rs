pub mod aggregate;
pub mod provider;
pub mod retry;
pub mod search;
pub mod similarity;

pub use aggregate::{affinity, check_dimensions, try_affinity};
pub use provider::{AzureOpenAiProvider, EmbeddingProvider};
pub use retry::{CircuitBreakerState, RetryConfig, RetryExecutor, RetryMetrics};
pub use search::{find_similar, merge_similar};
pub use similarity::cosine_similarity;

use std::sync::Arc;
use std::time::Duration;
use thoughtmates_core::{CoreError, EmbeddingConfig, Vector};

/// Provider calls bounded by a per-attempt timeout and retried with backoff.
pub struct EmbeddingEngine {
    provider: Arc<dyn EmbeddingProvider>,
    retry: RetryExecutor,
    timeout: Duration,
}

impl EmbeddingEngine {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            retry: RetryExecutor::new(RetryConfig::from(config)),
            timeout: config.timeout(),
        }
    }

    pub async fn generate_embedding(&self, text: &str) -> Result<Vector, CoreError> {
        self.retry
            .execute("generate_embedding", || async {
                tokio::time::timeout(self.timeout, self.provider.embed(text))
                    .await
                    .map_err(|_| CoreError::Timeout {
                        seconds: self.timeout.as_secs(),
                    })?
            })
            .await
    }

    pub fn retry_metrics(&self) -> RetryMetrics {
        self.retry.get_metrics()
    }

    pub fn circuit_state(&self) -> CircuitBreakerState {
        self.retry.get_circuit_breaker_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use thoughtmates_core::{EmbeddingError, ErrorExt};

    struct SlowThenFast {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for SlowThenFast {
        async fn embed(&self, _text: &str) -> Result<Vector, CoreError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(vec![1.0, 0.0])
        }
    }

    struct AlwaysEmpty;

    #[async_trait]
    impl EmbeddingProvider for AlwaysEmpty {
        async fn embed(&self, _text: &str) -> Result<Vector, CoreError> {
            Err(EmbeddingError::EmptyInput.into())
        }
    }

    fn fast_config() -> EmbeddingConfig {
        EmbeddingConfig {
            timeout_secs: 1,
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_timed_out_attempt_is_retried() {
        let provider = Arc::new(SlowThenFast {
            calls: AtomicUsize::new(0),
        });
        let engine = EmbeddingEngine::new(provider.clone(), &fast_config());

        let vector = engine.generate_embedding("hello").await.unwrap();
        assert_eq!(vector, vec![1.0, 0.0]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_provider_fails_as_embedding_error() {
        let config = EmbeddingConfig {
            endpoint: "http://127.0.0.1:1".to_string(),
            max_attempts: 1,
            ..fast_config()
        };
        let provider = AzureOpenAiProvider::new(&config).unwrap();
        let engine = EmbeddingEngine::new(Arc::new(provider), &config);

        let error = engine.generate_embedding("hello").await.unwrap_err();
        assert!(matches!(error, CoreError::Embedding(_)));
        assert_eq!(error.error_code(), "EMBEDDING");
        assert_eq!(engine.retry_metrics().failed_retries, 1);
    }

    #[tokio::test]
    async fn test_permanent_error_is_returned_as_is() {
        let engine = EmbeddingEngine::new(Arc::new(AlwaysEmpty), &fast_config());

        let result = engine.generate_embedding("hello").await;
        assert!(matches!(
            result,
            Err(CoreError::Embedding(EmbeddingError::EmptyInput))
        ));
    }
}
