/// Resilient execution layer
///
/// This module wraps outbound calls (database queries, verification
/// providers, file generation) with:
/// - Error classification onto a fixed taxonomy
/// - Retry strategies with exponential backoff and jitter
/// - A circuit breaker per operation name
/// - Severity and error-rate alerting
/// - Error statistics and audit forwarding
/// - Graceful degradation to fallback results
///
/// # Architecture
///
/// ```text
/// ┌─────────────────────────────────────────┐
/// │     Recovery Coordinator (Orchestration) │
/// └────────────────┬────────────────────────┘
///                  │
///      ┌───────────┴───────────┐
///      ↓                       ↓
/// ┌──────────────┐      ┌──────────────┐
/// │Circuit Breaker│      │Classification│
/// │   Registry    │      │   & Retry    │
/// └──────────────┘      └─────┬────────┘
///                             │ every failed attempt
///                             ↓
/// ┌─────────────────────────────────────┐
/// │  Metrics / Audit Sink / Alerts      │
/// └─────────────────────────────────────┘
///                             │ retries exhausted
///                             ↓
/// ┌─────────────────────────────────────┐
/// │     Degradation (fallback providers) │
/// └─────────────────────────────────────┘
/// ```
///
/// # Usage Example
///
/// ```rust,no_run
/// use resilient_exec::error::{ExecutionContext, RecoveryCoordinator, StaticFallback};
/// use resilient_exec::{OperationError, ResilienceConfig};
/// use std::sync::Arc;
///
/// # async fn run() -> anyhow::Result<()> {
/// let coordinator = RecoveryCoordinator::new(ResilienceConfig::load(None)?)
///     .with_fallback("verification_*", Arc::new(StaticFallback(serde_json::json!(50))))?;
///
/// let context = ExecutionContext::for_verification("batch-42").with_user("user-7");
/// let outcome = coordinator
///     .execute(&context, || async {
///         // Call the verification provider here
///         Ok::<u32, OperationError>(87)
///     })
///     .await?;
///
/// if outcome.stale {
///     println!("served fallback score {}", outcome.value);
/// }
/// # Ok(())
/// # }
/// ```

pub mod alerting;
pub mod circuit_breaker;
pub mod classification;
pub mod mechanisms;
pub mod recovery_coordinator;
pub mod retry;
pub mod statistics;

// Re-export main types for convenience
pub use alerting::{Alert, AlertChannel, AlertConfig, AlertDispatcher, LogAlertChannel};
pub use circuit_breaker::{
    BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
    Permit,
};
pub use classification::{
    ErrorCategory, ErrorClassifier, ErrorCode, ErrorRecord, ExecutionContext, Severity,
};
pub use mechanisms::{
    DegradationRegistry, DegradationStrategy, FallbackProvider, NoFallback, Outcome,
    StaticFallback,
};
pub use recovery_coordinator::{RecoveryCoordinator, Wrapped};
pub use retry::{ExponentialBackoff, RetryConfig, RetryExecutor};
pub use statistics::{
    ErrorSink, ErrorStatistics, InMemoryMetricsStore, MetricsStore, NoopMetricsStore,
    TracingErrorSink,
};
