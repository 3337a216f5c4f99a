//! Bounded retry with exponential backoff and jitter
//!
//! The delay before attempt `k + 1` is
//! `min(base * multiplier^(k-1), max) + uniform(0, jitter)`.
//! A timed-out attempt consumes one of the attempts like any other failure.
use super::classification::{ErrorClassifier, ErrorCode, ErrorRecord, ExecutionContext};
use crate::config::ConfigError;
use crate::OperationError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry configuration, supplied by the host at construction or per call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one (>= 1)
    pub max_attempts: u32,

    pub base_delay_ms: u64,

    pub max_delay_ms: u64,

    pub backoff_multiplier: f64,

    /// Upper bound of the uniform random addition to each delay
    pub jitter_ms: u64,

    /// Codes that may be retried; a record must also be retryable by taxonomy
    pub retryable_error_codes: BTreeSet<ErrorCode>,

    /// Per-attempt timeout
    pub timeout_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_ms: 100,
            retryable_error_codes: ErrorCode::ALL
                .iter()
                .copied()
                .filter(ErrorCode::is_retryable)
                .collect(),
            timeout_ms: None,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no backoff
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(ConfigError::Invalid {
                field: "retry.backoff_multiplier",
                reason: format!("must be >= 1.0 (got {})", self.backoff_multiplier),
            });
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::Invalid {
                field: "retry.max_delay_ms",
                reason: format!(
                    "must not be below base_delay_ms ({} < {})",
                    self.max_delay_ms, self.base_delay_ms
                ),
            });
        }
        if self.timeout_ms == Some(0) {
            return Err(ConfigError::Invalid {
                field: "retry.timeout_ms",
                reason: "must be positive when set".to_string(),
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Whether a failure described by `record` earns another attempt
    pub fn allows_retry(&self, record: &ErrorRecord) -> bool {
        record.retryable() && self.retryable_error_codes.contains(&record.code())
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.backoff_multiplier,
        )
        .with_jitter(Duration::from_millis(self.jitter_ms))
    }
}

/// Exponential backoff with additive jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,

    max_delay: Duration,

    multiplier: f64,

    /// Random addition in [0, jitter]
    jitter: Duration,
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            multiplier,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Deterministic part of the delay that follows failed attempt `attempt` (1-based)
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let exponential_ms = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped_ms = exponential_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms.max(0.0).round() as u64)
    }

    /// Delay that follows failed attempt `attempt`, jitter included
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };

        self.base_delay(attempt) + Duration::from_millis(jitter)
    }
}

/// Runs an operation up to `max_attempts` times
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    classifier: ErrorClassifier,
}

impl RetryExecutor {
    pub fn new(classifier: ErrorClassifier) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Run `operation` under `config`.
    ///
    /// `on_failure` sees the record of every failed attempt, including the
    /// last one. On success returns the value and the number of attempts
    /// used; otherwise the record of the final failure.
    pub async fn run<T, E, F, Fut, H>(
        &self,
        config: &RetryConfig,
        context: &ExecutionContext,
        operation: F,
        mut on_failure: H,
    ) -> Result<(T, u32), ErrorRecord>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<OperationError>,
        H: FnMut(&ErrorRecord),
    {
        self.run_until(config, context, operation, |record| {
            on_failure(record);
            true
        })
        .await
    }

    /// Like [`run`](Self::run), except that `on_failure` returning false
    /// ends the loop with that failure even if retries remain
    pub async fn run_until<T, E, F, Fut, H>(
        &self,
        config: &RetryConfig,
        context: &ExecutionContext,
        mut operation: F,
        mut on_failure: H,
    ) -> Result<(T, u32), ErrorRecord>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<OperationError>,
        H: FnMut(&ErrorRecord) -> bool,
    {
        let max_attempts = config.max_attempts.max(1);
        let backoff = config.backoff();
        let mut attempt = 1;

        loop {
            let result = run_attempt(
                async { operation().await.map_err(Into::into) },
                config.timeout(),
                context.cancellation.as_ref(),
            )
            .await;

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(
                            operation = %context.operation_name,
                            correlation_id = %context.correlation_id,
                            attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok((value, attempt));
                }
                Err(error) => error,
            };

            let record = self.classifier.classify(&error, context, attempt);
            let keep_going = on_failure(&record);

            tracing::warn!(
                operation = %context.operation_name,
                correlation_id = %context.correlation_id,
                attempt,
                max_attempts,
                code = %record.code(),
                error = %record.message(),
                "Operation failed"
            );

            if !config.allows_retry(&record) {
                tracing::debug!(
                    operation = %context.operation_name,
                    code = %record.code(),
                    "Error is not retryable"
                );
                return Err(record);
            }

            if !keep_going {
                tracing::debug!(
                    operation = %context.operation_name,
                    attempt,
                    "Retries stopped by caller"
                );
                return Err(record);
            }

            if attempt >= max_attempts {
                tracing::error!(
                    operation = %context.operation_name,
                    correlation_id = %context.correlation_id,
                    attempts = attempt,
                    code = %record.code(),
                    "Max retry attempts reached"
                );
                return Err(record);
            }

            let delay = backoff.next_delay(attempt);
            tracing::info!(
                operation = %context.operation_name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                remaining = max_attempts - attempt,
                "Retrying after {}",
                humantime::format_duration(delay)
            );

            if !sleep_unless_cancelled(delay, context.cancellation.as_ref()).await {
                tracing::info!(
                    operation = %context.operation_name,
                    correlation_id = %context.correlation_id,
                    "Backoff interrupted by cancellation"
                );
                return Err(self
                    .classifier
                    .classify(&OperationError::Cancelled, context, attempt));
            }

            attempt += 1;
        }
    }
}

/// One attempt, raced against the per-attempt timeout and the caller's cancellation
async fn run_attempt<T, Fut>(
    attempt: Fut,
    timeout: Option<Duration>,
    cancellation: Option<&CancellationToken>,
) -> Result<T, OperationError>
where
    Fut: Future<Output = Result<T, OperationError>>,
{
    let bounded = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(OperationError::Timeout(limit)),
            },
            None => attempt.await,
        }
    };

    match cancellation {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(OperationError::Cancelled),
                result = bounded => result,
            }
        }
        None => bounded.await,
    }
}

/// Returns false if the sleep was cut short by cancellation
async fn sleep_unless_cancelled(delay: Duration, cancellation: Option<&CancellationToken>) -> bool {
    match cancellation {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            }
        }
        None => {
            tokio::time::sleep(delay).await;
            true
        }
    }
}
