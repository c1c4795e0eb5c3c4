use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thoughtmates_core::{CoreError, EmbeddingConfig, EmbeddingError};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base delay for exponential backoff (in milliseconds)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (in milliseconds)
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Maximum jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
    /// Consecutive failed calls before the circuit opens
    pub failure_threshold: u32,
    /// Seconds before an open circuit lets a trial request through
    pub recovery_timeout_s: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            failure_threshold: 5,
            recovery_timeout_s: 30,
        }
    }
}

impl From<&EmbeddingConfig> for RetryConfig {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Stops calling the provider after repeated failed calls
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitBreakerState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    config: RetryConfig,
}

impl CircuitBreaker {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            failure_count: 0,
            last_failure_time: None,
            config,
        }
    }

    pub fn allow_request(&mut self) -> bool {
        match self.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => {
                let recovery = Duration::from_secs(self.config.recovery_timeout_s);
                match self.last_failure_time {
                    Some(last_failure) if last_failure.elapsed() >= recovery => {
                        debug!("Embedding circuit half-open, letting a trial request through");
                        self.state = CircuitBreakerState::HalfOpen;
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state == CircuitBreakerState::HalfOpen {
            info!("Embedding provider recovered, closing circuit");
            self.state = CircuitBreakerState::Closed;
            self.last_failure_time = None;
        }
        self.failure_count = 0;
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_time = Some(Instant::now());

        match self.state {
            CircuitBreakerState::Closed => {
                if self.failure_count >= self.config.failure_threshold {
                    warn!(
                        "Opening embedding circuit after {} consecutive failures",
                        self.failure_count
                    );
                    self.state = CircuitBreakerState::Open;
                }
            }
            CircuitBreakerState::HalfOpen => {
                warn!("Embedding trial request failed, reopening circuit");
                self.state = CircuitBreakerState::Open;
            }
            CircuitBreakerState::Open => {}
        }
    }

    pub fn get_state(&self) -> CircuitBreakerState {
        self.state.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    Retry,
    /// Provider told us how long to wait
    RetryWithDelay(Duration),
    NoRetry,
}

pub fn get_retry_strategy(error: &CoreError) -> RetryStrategy {
    match error {
        CoreError::Embedding(embedding_error) => match embedding_error {
            EmbeddingError::RateLimited { retry_after } => {
                RetryStrategy::RetryWithDelay(Duration::from_secs(*retry_after))
            }
            EmbeddingError::ServiceUnavailable { .. } => RetryStrategy::Retry,
            EmbeddingError::RequestFailed { .. } => RetryStrategy::Retry,
            EmbeddingError::InvalidResponse { .. }
            | EmbeddingError::DimensionMismatch { .. }
            | EmbeddingError::EmptyInput
            | EmbeddingError::CircuitOpen => RetryStrategy::NoRetry,
        },
        CoreError::Timeout { .. } => RetryStrategy::Retry,
        CoreError::Network(reqwest_error) => {
            if reqwest_error.is_timeout() || reqwest_error.is_connect() {
                RetryStrategy::Retry
            } else {
                RetryStrategy::NoRetry
            }
        }
        _ => RetryStrategy::NoRetry,
    }
}

/// Exponential backoff with jitter, capped at `max_delay_ms`
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let max_delay = Duration::from_millis(config.max_delay_ms);

    let multiplier = config.backoff_multiplier.powi(attempt as i32);
    let delay_ms = (config.base_delay_ms as f64 * multiplier) as u64;
    let exponential_delay = Duration::from_millis(delay_ms.min(config.max_delay_ms));

    let jitter_range = (exponential_delay.as_millis() as f64 * config.jitter_factor) as u64;
    let jitter = fastrand::u64(0..=jitter_range);

    (exponential_delay + Duration::from_millis(jitter)).min(max_delay)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryMetrics {
    pub total_retries: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,
    pub circuit_breaker_trips: u64,
    pub average_retry_delay_ms: f64,
}

/// Wraps provider calls with backoff and a circuit breaker.
///
/// When every attempt fails the last error is returned unchanged, so callers
/// can still tell a rate limit from a bad response.
#[derive(Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
    circuit_breaker: Arc<Mutex<CircuitBreaker>>,
    metrics: Arc<Mutex<RetryMetrics>>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        let circuit_breaker = Arc::new(Mutex::new(CircuitBreaker::new(config.clone())));
        let metrics = Arc::new(Mutex::new(RetryMetrics::default()));

        Self {
            config,
            circuit_breaker,
            metrics,
        }
    }

    pub async fn execute<F, Fut, T>(
        &self,
        operation_name: &str,
        operation: F,
    ) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        if !lock(&self.circuit_breaker).allow_request() {
            lock(&self.metrics).circuit_breaker_trips += 1;
            warn!("Circuit open, rejecting {}", operation_name);
            return Err(EmbeddingError::CircuitOpen.into());
        }

        let mut total_delay_ms = 0u64;
        let mut attempt = 0u32;

        let last_error = loop {
            if attempt > 0 {
                debug!("Retry attempt {} for {}", attempt, operation_name);
            }

            let error = match operation().await {
                Ok(result) => {
                    lock(&self.circuit_breaker).record_success();

                    if attempt > 0 {
                        let mut metrics = lock(&self.metrics);
                        metrics.total_retries += attempt as u64;
                        metrics.successful_retries += 1;
                        metrics.average_retry_delay_ms = (metrics.average_retry_delay_ms
                            * (metrics.successful_retries - 1) as f64
                            + total_delay_ms as f64)
                            / metrics.successful_retries as f64;

                        info!(
                            "{} succeeded after {} retries ({}ms waiting)",
                            operation_name, attempt, total_delay_ms
                        );
                    }
                    return Ok(result);
                }
                Err(error) => error,
            };

            let has_attempts_left = attempt + 1 < self.config.max_attempts;
            let delay = match get_retry_strategy(&error) {
                RetryStrategy::NoRetry => {
                    debug!("Not retrying {}: {}", operation_name, error);
                    break error;
                }
                _ if !has_attempts_left => break error,
                RetryStrategy::Retry => calculate_delay(attempt, &self.config),
                RetryStrategy::RetryWithDelay(delay) => {
                    delay.min(Duration::from_millis(self.config.max_delay_ms))
                }
            };

            info!("Retrying {} in {:?} after: {}", operation_name, delay, error);
            total_delay_ms += delay.as_millis() as u64;
            sleep(delay).await;
            attempt += 1;
        };

        // Caller mistakes like empty input say nothing about provider health
        if get_retry_strategy(&last_error) != RetryStrategy::NoRetry {
            lock(&self.circuit_breaker).record_failure();
        }
        {
            let mut metrics = lock(&self.metrics);
            metrics.total_retries += attempt as u64;
            metrics.failed_retries += 1;
        }

        error!(
            "{} failed after {} attempt(s): {}",
            operation_name,
            attempt + 1,
            last_error
        );
        Err(last_error)
    }

    pub fn get_metrics(&self) -> RetryMetrics {
        lock(&self.metrics).clone()
    }

    pub fn get_circuit_breaker_state(&self) -> CircuitBreakerState {
        lock(&self.circuit_breaker).get_state()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unavailable() -> CoreError {
        CoreError::Embedding(EmbeddingError::ServiceUnavailable { status_code: 503 })
    }

    #[test]
    fn test_retry_config_from_embedding_config() {
        let embedding = EmbeddingConfig {
            max_attempts: 4,
            base_delay_ms: 10,
            max_delay_ms: 100,
            ..Default::default()
        };
        let config = RetryConfig::from(&embedding);
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.base_delay_ms, 10);
        assert_eq!(config.max_delay_ms, 100);
    }

    #[test]
    fn test_circuit_breaker_failure_threshold() {
        let config = RetryConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let mut breaker = CircuitBreaker::new(config);

        breaker.record_failure();
        assert_eq!(breaker.get_state(), CircuitBreakerState::Closed);
        assert!(breaker.allow_request());

        breaker.record_failure();
        assert_eq!(breaker.get_state(), CircuitBreakerState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_circuit_breaker_recovery() {
        let config = RetryConfig {
            failure_threshold: 1,
            recovery_timeout_s: 0,
            ..Default::default()
        };
        let mut breaker = CircuitBreaker::new(config);

        breaker.record_failure();
        assert_eq!(breaker.get_state(), CircuitBreakerState::Open);

        std::thread::sleep(Duration::from_millis(1));
        assert!(breaker.allow_request());
        assert_eq!(breaker.get_state(), CircuitBreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.get_state(), CircuitBreakerState::Closed);
    }

    #[test]
    fn test_retry_strategy_for_errors() {
        let rate_limited = CoreError::Embedding(EmbeddingError::RateLimited { retry_after: 2 });
        assert_eq!(
            get_retry_strategy(&rate_limited),
            RetryStrategy::RetryWithDelay(Duration::from_secs(2))
        );

        assert_eq!(get_retry_strategy(&unavailable()), RetryStrategy::Retry);
        assert_eq!(
            get_retry_strategy(&CoreError::Timeout { seconds: 10 }),
            RetryStrategy::Retry
        );
        assert_eq!(
            get_retry_strategy(&CoreError::Embedding(EmbeddingError::EmptyInput)),
            RetryStrategy::NoRetry
        );
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        let config = RetryConfig {
            base_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            ..Default::default()
        };

        assert_eq!(calculate_delay(0, &config), Duration::from_millis(100));
        assert_eq!(calculate_delay(1, &config), Duration::from_millis(200));
        assert_eq!(calculate_delay(3, &config), Duration::from_millis(800));
        assert_eq!(calculate_delay(10, &config), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = RetryConfig {
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.5,
            ..Default::default()
        };

        for _ in 0..20 {
            let delay = calculate_delay(1, &config);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(300));
        }
    }

    #[tokio::test]
    async fn test_success_after_retries() {
        let executor = RetryExecutor::new(RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            ..Default::default()
        });

        let attempts = Arc::new(Mutex::new(0));
        let counter = attempts.clone();

        let result = executor
            .execute("embed", move || {
                let counter = counter.clone();
                async move {
                    let mut count = counter.lock().unwrap();
                    *count += 1;
                    if *count < 3 {
                        Err(unavailable())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        let metrics = executor.get_metrics();
        assert_eq!(metrics.total_retries, 2);
        assert_eq!(metrics.successful_retries, 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_original_error() {
        let executor = RetryExecutor::new(RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
            ..Default::default()
        });

        let result = executor
            .execute("embed", || async { Err::<i32, CoreError>(unavailable()) })
            .await;

        assert!(matches!(
            result,
            Err(CoreError::Embedding(EmbeddingError::ServiceUnavailable {
                status_code: 503
            }))
        ));
        assert_eq!(executor.get_metrics().failed_retries, 1);
    }

    #[tokio::test]
    async fn test_no_retry_on_permanent_error() {
        let executor = RetryExecutor::new(RetryConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let attempts = Arc::new(Mutex::new(0));
        let counter = attempts.clone();

        let result = executor
            .execute("embed", move || {
                let counter = counter.clone();
                async move {
                    *counter.lock().unwrap() += 1;
                    Err::<i32, CoreError>(CoreError::Embedding(EmbeddingError::EmptyInput))
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(CoreError::Embedding(EmbeddingError::EmptyInput))
        ));
        assert_eq!(*attempts.lock().unwrap(), 1);
        assert_eq!(
            executor.get_circuit_breaker_state(),
            CircuitBreakerState::Closed
        );
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_calls() {
        let executor = RetryExecutor::new(RetryConfig {
            max_attempts: 1,
            failure_threshold: 2,
            ..Default::default()
        });

        for _ in 0..2 {
            let result = executor
                .execute("embed", || async { Err::<i32, CoreError>(unavailable()) })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(
            executor.get_circuit_breaker_state(),
            CircuitBreakerState::Open
        );

        let blocked = executor
            .execute("embed", || async { Ok::<i32, CoreError>(42) })
            .await;
        assert!(matches!(
            blocked,
            Err(CoreError::Embedding(EmbeddingError::CircuitOpen))
        ));
        assert_eq!(executor.get_metrics().circuit_breaker_trips, 1);
    }
}
