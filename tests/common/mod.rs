//! Common test utilities and recording collaborators
//!
//! This module provides shared functionality for integration tests including:
//! - Scripted operations that log when they were invoked
//! - Recording audit sinks and alert channels
//! - Configuration fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use resilient_exec::error::{
    Alert, AlertChannel, CircuitBreakerConfig, ErrorRecord, ErrorSink, RetryConfig,
};
use resilient_exec::ResilienceConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Invocation log for a scripted operation
#[derive(Debug, Default)]
pub struct CallLog {
    calls: Mutex<Vec<Instant>>,
}

impl CallLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record an invocation, returning its 1-based number
    pub fn mark(&self) -> usize {
        let mut calls = self.calls.lock();
        calls.push(Instant::now());
        calls.len()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Time between consecutive invocations
    pub fn gaps(&self) -> Vec<Duration> {
        self.calls
            .lock()
            .windows(2)
            .map(|pair| pair[1].duration_since(pair[0]))
            .collect()
    }
}

/// Paused-clock timers fire on millisecond ticks, so allow a couple of ticks of slack
pub fn assert_delay(actual: Duration, expected_ms: u64) {
    let expected = Duration::from_millis(expected_ms);
    let slack = Duration::from_millis(2);
    assert!(
        actual >= expected && actual <= expected + slack,
        "expected ~{:?}, observed {:?}",
        expected,
        actual
    );
}

/// Retry policy without jitter for exact delay assertions
pub fn retry(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay_ms,
        max_delay_ms,
        backoff_multiplier: 2.0,
        jitter_ms: 0,
        ..RetryConfig::default()
    }
}

pub fn breaker(failure_threshold: u32, reset_timeout_ms: u64) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold,
        reset_timeout_ms,
        ..CircuitBreakerConfig::default()
    }
}

pub fn config(retry: RetryConfig, circuit_breaker: CircuitBreakerConfig) -> ResilienceConfig {
    ResilienceConfig {
        retry,
        circuit_breaker,
        ..ResilienceConfig::default()
    }
}

/// Audit sink that hands every forwarded record to the test
pub struct RecordingSink {
    tx: mpsc::UnboundedSender<ErrorRecord>,
}

impl RecordingSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ErrorRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl ErrorSink for RecordingSink {
    async fn forward(&self, record: &ErrorRecord) -> anyhow::Result<()> {
        self.tx.send(record.clone())?;
        Ok(())
    }
}

/// Alert channel registered as "recording"
pub struct RecordingChannel {
    tx: mpsc::UnboundedSender<Alert>,
}

impl RecordingChannel {
    pub const NAME: &'static str = "recording";

    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl AlertChannel for RecordingChannel {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        self.tx.send(alert.clone())?;
        Ok(())
    }
}

/// Sink whose backing store is always down
pub struct FailingSink;

#[async_trait]
impl ErrorSink for FailingSink {
    async fn forward(&self, _record: &ErrorRecord) -> anyhow::Result<()> {
        anyhow::bail!("audit store unreachable")
    }
}

/// Receive `n` items delivered by background tasks
pub async fn collect<T>(rx: &mut mpsc::UnboundedReceiver<T>, n: usize) -> Vec<T> {
    let mut items = Vec::with_capacity(n);
    for _ in 0..n {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(item)) => items.push(item),
            _ => break,
        }
    }
    items
}
