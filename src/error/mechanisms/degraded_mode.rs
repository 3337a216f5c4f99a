//! Graceful degradation - substitute results once retries are exhausted
//!
//! Strategies are registered against glob patterns on the operation name
//! (`verification_*`, `database_*`). The business payload itself always
//! comes from a host-supplied [`FallbackProvider`]; this module only selects
//! the provider, converts its value and tags the result as stale.
use crate::config::ConfigError;
use crate::error::classification::{ErrorRecord, ExecutionContext};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of a resilient execution
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,

    /// True when `value` is a fallback rather than a fresh result
    pub stale: bool,

    /// Error that triggered the fallback
    pub degraded_from: Option<ErrorRecord>,

    /// Attempts made against the real operation
    pub attempts: u32,
}

impl<T> Outcome<T> {
    pub fn fresh(value: T, attempts: u32) -> Self {
        Self {
            value,
            stale: false,
            degraded_from: None,
            attempts,
        }
    }

    pub fn degraded(value: T, error: ErrorRecord, attempts: u32) -> Self {
        Self {
            value,
            stale: true,
            degraded_from: Some(error),
            attempts,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.stale
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            stale: self.stale,
            degraded_from: self.degraded_from,
            attempts: self.attempts,
        }
    }
}

/// Product-supplied source of substitute results
#[async_trait]
pub trait FallbackProvider: Send + Sync {
    /// Substitute value for a failed call, or `None` to let the error propagate
    async fn fallback(
        &self,
        context: &ExecutionContext,
        last_error: &ErrorRecord,
    ) -> Option<serde_json::Value>;
}

/// Logs the failure and never substitutes anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFallback;

#[async_trait]
impl FallbackProvider for NoFallback {
    async fn fallback(
        &self,
        context: &ExecutionContext,
        last_error: &ErrorRecord,
    ) -> Option<serde_json::Value> {
        tracing::warn!(
            operation = %context.operation_name,
            code = %last_error.code(),
            category = %last_error.category(),
            "No fallback available for degraded operation"
        );
        None
    }
}

/// Always substitutes the same value (e.g. a default risk score)
#[derive(Debug, Clone)]
pub struct StaticFallback(pub serde_json::Value);

#[async_trait]
impl FallbackProvider for StaticFallback {
    async fn fallback(
        &self,
        _context: &ExecutionContext,
        _last_error: &ErrorRecord,
    ) -> Option<serde_json::Value> {
        Some(self.0.clone())
    }
}

/// Fallback provider bound to an operation-name pattern
#[derive(Clone)]
pub struct DegradationStrategy {
    pattern: glob::Pattern,
    provider: Arc<dyn FallbackProvider>,
}

impl DegradationStrategy {
    pub fn new(pattern: &str, provider: Arc<dyn FallbackProvider>) -> Result<Self, ConfigError> {
        Ok(Self {
            pattern: glob::Pattern::new(pattern)?,
            provider,
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn matches(&self, operation_name: &str) -> bool {
        self.pattern.matches(operation_name)
    }
}

impl std::fmt::Debug for DegradationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DegradationStrategy")
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

/// Registered strategies, first match wins
#[derive(Debug, Default)]
pub struct DegradationRegistry {
    strategies: Vec<DegradationStrategy>,

    /// Fallbacks served per operation name
    served: Mutex<BTreeMap<String, u64>>,
}

impl DegradationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` for operations matching `pattern`
    pub fn register(
        &mut self,
        pattern: &str,
        provider: Arc<dyn FallbackProvider>,
    ) -> Result<(), ConfigError> {
        self.strategies
            .push(DegradationStrategy::new(pattern, provider)?);
        Ok(())
    }

    /// First strategy whose pattern matches `operation_name`
    pub fn resolve(&self, operation_name: &str) -> Option<&DegradationStrategy> {
        self.strategies.iter().find(|s| s.matches(operation_name))
    }

    /// Try to produce a substitute for a call that exhausted its retries
    pub async fn attempt<T>(&self, context: &ExecutionContext, last_error: &ErrorRecord) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let strategy = self.resolve(&context.operation_name)?;
        let value = strategy.provider.fallback(context, last_error).await?;

        match serde_json::from_value::<T>(value) {
            Ok(substitute) => {
                *self
                    .served
                    .lock()
                    .entry(context.operation_name.clone())
                    .or_default() += 1;
                tracing::warn!(
                    operation = %context.operation_name,
                    pattern = strategy.pattern(),
                    code = %last_error.code(),
                    correlation_id = %context.correlation_id,
                    "Serving degraded result"
                );
                Some(substitute)
            }
            Err(e) => {
                tracing::error!(
                    operation = %context.operation_name,
                    pattern = strategy.pattern(),
                    error = %e,
                    "Fallback value does not match the operation's result type"
                );
                None
            }
        }
    }

    /// Number of fallbacks served, per operation
    pub fn served(&self) -> BTreeMap<String, u64> {
        self.served.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
