/// Recovery coordinator - orchestrates all error recovery mechanisms
///
/// This module provides the main recovery orchestration layer that:
/// - Gates each call through the per-operation circuit breaker
/// - Executes retry logic with appropriate backoff
/// - Feeds every failure to the breaker, metrics, audit sink and alerts
/// - Falls back to a registered degradation strategy once retries run out
use super::alerting::{AlertChannel, AlertDispatcher};
use super::circuit_breaker::{BreakerStatus, CircuitBreakerRegistry, CircuitState, Permit};
use super::classification::{ErrorClassifier, ErrorCode, ErrorRecord, ExecutionContext};
use super::mechanisms::{DegradationRegistry, FallbackProvider, Outcome};
use super::retry::{RetryConfig, RetryExecutor};
use super::statistics::{
    ErrorSink, ErrorStatistics, InMemoryMetricsStore, MetricsStore, TracingErrorSink,
};
use crate::config::{ConfigError, ResilienceConfig};
use crate::OperationError;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Recovery coordinator - main orchestration
pub struct RecoveryCoordinator {
    /// Retry policy used by `execute`
    retry_config: RetryConfig,

    /// Retry loop and error classifier
    executor: RetryExecutor,

    /// One breaker per operation name
    breakers: CircuitBreakerRegistry,

    /// Severity and error-rate alerting
    alerts: AlertDispatcher,

    /// Statistics source for `get_error_statistics`
    metrics: Arc<dyn MetricsStore>,

    /// External audit store
    sink: Arc<dyn ErrorSink>,

    /// Fallbacks applied after retries are exhausted
    degradation: DegradationRegistry,
}

impl RecoveryCoordinator {
    /// Create a coordinator with in-memory statistics, the tracing audit sink
    /// and no degradation strategies
    ///
    /// The configuration is not rejected here; out-of-range values are
    /// logged and clamped where they are used.
    pub fn new(config: ResilienceConfig) -> Self {
        if let Err(e) = config.validate() {
            tracing::warn!(error = %e, "Resilience configuration out of range");
        }
        Self {
            retry_config: config.retry,
            executor: RetryExecutor::default(),
            breakers: CircuitBreakerRegistry::new(config.circuit_breaker),
            alerts: AlertDispatcher::new(config.alerting),
            metrics: Arc::new(InMemoryMetricsStore::default()),
            sink: Arc::new(TracingErrorSink),
            degradation: DegradationRegistry::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.executor = RetryExecutor::new(classifier);
        self
    }

    pub fn with_metrics_store(mut self, metrics: Arc<dyn MetricsStore>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Register an alert channel; `alerting.channels` decides whether it is used
    pub fn with_alert_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.alerts = self.alerts.with_channel(channel);
        self
    }

    /// Register a fallback for operations matching `pattern` (glob syntax)
    pub fn with_fallback(
        mut self,
        pattern: &str,
        provider: Arc<dyn FallbackProvider>,
    ) -> Result<Self, ConfigError> {
        self.degradation.register(pattern, provider)?;
        Ok(self)
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }

    pub fn degradation(&self) -> &DegradationRegistry {
        &self.degradation
    }

    /// Execute operation with recovery
    ///
    /// This wraps any fallible operation with full error recovery:
    /// - Circuit breaker gate (the operation is never invoked while open)
    /// - Retry logic under the coordinator's retry configuration
    /// - Error classification and reporting
    /// - Degradation once retries are exhausted
    ///
    /// Retries stop early once the operation's breaker is open. Dropping
    /// the returned future abandons the call; a half-open probe slot it
    /// held is handed back.
    ///
    /// The result type must be deserializable so that fallback values can
    /// stand in for it.
    pub async fn execute<T, E, F, Fut>(
        &self,
        context: &ExecutionContext,
        operation: F,
    ) -> Result<Outcome<T>, ErrorRecord>
    where
        T: DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<OperationError>,
    {
        self.execute_with_retry_config(context, &self.retry_config, operation)
            .await
    }

    /// Like [`execute`](Self::execute) with a per-call retry configuration
    pub async fn execute_with_retry_config<T, E, F, Fut>(
        &self,
        context: &ExecutionContext,
        retry_config: &RetryConfig,
        operation: F,
    ) -> Result<Outcome<T>, ErrorRecord>
    where
        T: DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<OperationError>,
    {
        let breaker = self.breakers.breaker(&context.operation_name);

        let Some(mut permit) = breaker.try_acquire() else {
            let record = self.executor.classifier().record(
                ErrorCode::CircuitBreakerOpen,
                format!(
                    "circuit breaker is open for operation {}",
                    context.operation_name
                ),
                context,
                0,
            );
            tracing::warn!(
                operation = %context.operation_name,
                correlation_id = %context.correlation_id,
                "Rejected by open circuit breaker"
            );
            self.observe(&record);
            return Err(record);
        };

        let result = self
            .executor
            .run_until(retry_config, context, operation, |record| {
                self.on_attempt_failed(&mut permit, record)
            })
            .await;

        let record = match result {
            Ok((value, attempts)) => {
                permit.record_success();
                return Ok(Outcome::fresh(value, attempts));
            }
            Err(record) => record,
        };

        if record.code() == ErrorCode::Cancelled {
            // An unsettled probe permit frees its slot here
            return Err(record);
        }

        match self.degradation.attempt::<T>(context, &record).await {
            Some(value) => {
                let attempts = record.attempt();
                Ok(Outcome::degraded(value, record, attempts))
            }
            None => Err(record),
        }
    }

    /// Bind an operation to a name for repeated execution
    pub fn wrap<F>(
        self: &Arc<Self>,
        operation_name: impl Into<String>,
        operation: F,
    ) -> Wrapped<F> {
        Wrapped {
            coordinator: Arc::clone(self),
            operation_name: operation_name.into(),
            operation,
        }
    }

    /// Statistics over the last `window`
    pub fn get_error_statistics(&self, window: Duration) -> ErrorStatistics {
        self.metrics.statistics(window)
    }

    /// Snapshot of every breaker created so far
    pub fn get_circuit_breaker_status(&self) -> BTreeMap<String, BreakerStatus> {
        self.breakers.status()
    }

    /// Returns false if no breaker exists for `operation_name`
    pub fn reset_circuit_breaker(&self, operation_name: &str) -> bool {
        self.breakers.reset(operation_name)
    }

    pub fn reset_all_circuit_breakers(&self) {
        self.breakers.reset_all();
    }

    /// Returns false once the breaker is open, ending the retry loop
    fn on_attempt_failed(&self, permit: &mut Permit, record: &ErrorRecord) -> bool {
        // The caller gave up; the dependency did not fail
        if record.code() != ErrorCode::Cancelled {
            permit.record_failure();
        }
        self.observe(record);
        permit.breaker().state() != CircuitState::Open
    }

    /// Best-effort reporting; nothing here can fail the call
    fn observe(&self, record: &ErrorRecord) {
        self.metrics.record(record);
        self.alerts.report(record);
        self.forward(record);
    }

    fn forward(&self, record: &ErrorRecord) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(
                    code = %record.code(),
                    operation = %record.operation(),
                    "No async runtime, error record not forwarded"
                );
                return;
            }
        };

        let sink = Arc::clone(&self.sink);
        let record = record.clone();
        handle.spawn(async move {
            if let Err(e) = sink.forward(&record).await {
                tracing::error!(
                    code = %record.code(),
                    operation = %record.operation(),
                    correlation_id = %record.correlation_id(),
                    error = %format!("{:#}", e),
                    "Failed to forward error record"
                );
            }
        });
    }
}

impl Default for RecoveryCoordinator {
    fn default() -> Self {
        Self::new(ResilienceConfig::default())
    }
}

impl std::fmt::Debug for RecoveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryCoordinator")
            .field("retry_config", &self.retry_config)
            .field("breakers", &self.breakers.len())
            .field("alerts", &self.alerts)
            .field("degradation", &self.degradation)
            .finish()
    }
}

/// Named operation bound to a coordinator
pub struct Wrapped<F> {
    coordinator: Arc<RecoveryCoordinator>,
    operation_name: String,
    operation: F,
}

impl<F> Wrapped<F> {
    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// Run the bound operation through the coordinator.
    ///
    /// The context's operation name is replaced with the bound name; all
    /// other fields are kept.
    pub async fn call<T, E, Fut>(
        &mut self,
        mut context: ExecutionContext,
    ) -> Result<Outcome<T>, ErrorRecord>
    where
        T: DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<OperationError>,
    {
        context.operation_name = self.operation_name.clone();
        self.coordinator
            .execute(&context, &mut self.operation)
            .await
    }
}
