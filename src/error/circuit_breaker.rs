//! Per-operation circuit breakers
//!
//! States:
//! - Closed: normal operation, attempts pass through
//! - Open: too many failures, fail fast until the reset timeout elapses
//! - HalfOpen: a limited number of probe attempts decide whether to close
//!
//! State changes only through `can_attempt` (or `try_acquire`),
//! `record_failure`, `record_success` and `reset`. Each of those runs as one critical section
//! on the breaker's own mutex, so concurrent callers sharing an operation
//! name never lose updates, and breakers for different names never contend.
use crate::config::ConfigError;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const MAX_RESET_TIMEOUT_MS: u64 = 7 * 24 * 60 * 60 * 1_000;

/// Circuit breaker tuning, shared by every breaker in a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures in Closed state before the circuit opens
    pub failure_threshold: u32,

    /// Time the circuit stays open before allowing probes
    pub reset_timeout_ms: u64,

    /// A Closed-state failure further than this from the previous one
    /// starts a fresh count
    pub monitoring_period_ms: u64,

    /// Probe attempts granted while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            monitoring_period_ms: 300_000,
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "circuit_breaker.failure_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.reset_timeout_ms > MAX_RESET_TIMEOUT_MS {
            return Err(ConfigError::Invalid {
                field: "circuit_breaker.reset_timeout_ms",
                reason: format!("must not exceed {} (one week)", MAX_RESET_TIMEOUT_MS),
            });
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::Invalid {
                field: "circuit_breaker.half_open_max_calls",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Reset timeout, clamped to one week
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms.min(MAX_RESET_TIMEOUT_MS))
    }

    pub fn monitoring_period(&self) -> Duration {
        Duration::from_millis(self.monitoring_period_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// Too many failures, fail fast
    Open,

    /// Testing if the dependency recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
    pub half_open_attempts: u32,
}

#[derive(Debug, Clone)]
struct BreakerState {
    status: CircuitState,

    failure_count: u32,

    half_open_attempts: u32,

    /// Bumped on every Open -> HalfOpen transition
    slot_round: u64,

    last_failure: Option<Instant>,

    /// When the open circuit may next be probed
    next_attempt: Option<Instant>,

    // Wall-clock mirrors of the instants above, for status reports
    last_failure_time: Option<DateTime<Utc>>,
    next_attempt_time: Option<DateTime<Utc>>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            status: CircuitState::Closed,
            failure_count: 0,
            half_open_attempts: 0,
            slot_round: 0,
            last_failure: None,
            next_attempt: None,
            last_failure_time: None,
            next_attempt_time: None,
        }
    }

    fn open(&mut self, now: Instant, reset_timeout: Duration) {
        self.status = CircuitState::Open;
        self.next_attempt = Some(
            now.checked_add(reset_timeout)
                .unwrap_or_else(|| now + Duration::from_millis(MAX_RESET_TIMEOUT_MS)),
        );
        self.next_attempt_time = wall_deadline(reset_timeout);
    }
}

/// How a call was let through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Closed,

    /// The call that moved the circuit to HalfOpen; it takes no slot
    Transition,

    /// Counted half-open slot in the given half-open round
    Slot(u64),
}

/// Admission granted by [`CircuitBreaker::try_acquire`].
///
/// A permit holding a counted half-open slot hands it back when dropped
/// before a result was recorded through it, so a half-open call that was
/// cancelled or abandoned never leaves the breaker stuck in HalfOpen.
#[derive(Debug)]
pub struct Permit {
    breaker: Arc<CircuitBreaker>,

    admission: Admission,

    settled: bool,
}

impl Permit {
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Whether the call was admitted while half-open
    pub fn is_half_open(&self) -> bool {
        self.admission != Admission::Closed
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn record_failure(&mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if let (Admission::Slot(round), false) = (self.admission, self.settled) {
            self.breaker.release_slot(round);
        }
    }
}

/// Circuit breaker for a single operation name
#[derive(Debug)]
pub struct CircuitBreaker {
    operation_name: String,

    config: CircuitBreakerConfig,

    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(operation_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            operation_name: operation_name.into(),
            config,
            state: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// Decide whether an attempt may be made right now.
    ///
    /// An open circuit whose reset timeout has elapsed moves to half-open
    /// and grants this call; a half-open circuit grants at most
    /// `half_open_max_calls` further probes.
    ///
    /// A half-open slot taken here is only given back by a recorded result.
    /// Callers that may abandon an attempt should use
    /// [`try_acquire`](Self::try_acquire) instead.
    pub fn can_attempt(&self) -> bool {
        self.admit().is_some()
    }

    /// Like [`can_attempt`](Self::can_attempt), returning a permit that
    /// records the result and frees an unused half-open slot on drop
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        self.admit().map(|admission| Permit {
            breaker: Arc::clone(self),
            admission,
            settled: false,
        })
    }

    fn admit(&self) -> Option<Admission> {
        let now = Instant::now();
        let mut state = self.state.lock();

        match state.status {
            CircuitState::Closed => Some(Admission::Closed),
            CircuitState::Open => {
                let ready = state.next_attempt.map(|at| now >= at).unwrap_or(true);
                if !ready {
                    return None;
                }
                state.status = CircuitState::HalfOpen;
                state.half_open_attempts = 0;
                state.slot_round += 1;
                tracing::info!(
                    operation = %self.operation_name,
                    "Circuit breaker transitioning to HalfOpen"
                );
                Some(Admission::Transition)
            }
            CircuitState::HalfOpen => {
                if state.half_open_attempts < self.config.half_open_max_calls {
                    state.half_open_attempts += 1;
                    Some(Admission::Slot(state.slot_round))
                } else {
                    None
                }
            }
        }
    }

    /// Give back a half-open slot whose call ended without a result
    fn release_slot(&self, round: u64) {
        let mut state = self.state.lock();
        if state.status != CircuitState::HalfOpen || state.slot_round != round {
            return;
        }
        state.half_open_attempts = state.half_open_attempts.saturating_sub(1);
        tracing::debug!(
            operation = %self.operation_name,
            half_open_attempts = state.half_open_attempts,
            "Half-open call ended without a result, slot released"
        );
    }

    /// Record a failed attempt
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();

        match state.status {
            CircuitState::Closed => {
                let stale = state
                    .last_failure
                    .map(|last| now.duration_since(last) > self.config.monitoring_period())
                    .unwrap_or(false);
                if stale {
                    state.failure_count = 0;
                }

                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    state.open(now, self.config.reset_timeout());
                    tracing::warn!(
                        operation = %self.operation_name,
                        failures = state.failure_count,
                        reset_after = %humantime::format_duration(self.config.reset_timeout()),
                        "Circuit breaker OPENED"
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Failed probe, reopen immediately
                state.open(now, self.config.reset_timeout());
                tracing::warn!(
                    operation = %self.operation_name,
                    "Circuit breaker REOPENED after failure in HalfOpen state"
                );
            }
            CircuitState::Open => {
                // Already open, nothing to do
            }
        }

        state.last_failure = Some(now);
        state.last_failure_time = Some(Utc::now());
    }

    /// Record a successful attempt
    pub fn record_success(&self) {
        let mut state = self.state.lock();

        match state.status {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.status = CircuitState::Closed;
                state.failure_count = 0;
                state.half_open_attempts = 0;
                state.next_attempt = None;
                state.next_attempt_time = None;
                tracing::info!(
                    operation = %self.operation_name,
                    "Circuit breaker CLOSED after successful probe"
                );
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late;
                // the open circuit still waits for its probe
                tracing::debug!(
                    operation = %self.operation_name,
                    "Success recorded while circuit was OPEN - ignoring"
                );
            }
        }
    }

    /// Force the breaker back to Closed with every counter zeroed
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let slot_round = state.slot_round;
        *state = BreakerState {
            slot_round,
            ..BreakerState::closed()
        };
        tracing::info!(
            operation = %self.operation_name,
            "Circuit breaker manually reset to CLOSED"
        );
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().status
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn status(&self) -> BreakerStatus {
        let state = self.state.lock();
        BreakerStatus {
            state: state.status,
            failure_count: state.failure_count,
            last_failure_time: state.last_failure_time,
            next_attempt_time: state.next_attempt_time,
            half_open_attempts: state.half_open_attempts,
        }
    }
}

/// Registry of breakers keyed by operation name, created on first use
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,

    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Breaker for `operation_name`, created lazily
    pub fn breaker(&self, operation_name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(operation_name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write();
        let breaker = breakers
            .entry(operation_name.to_string())
            .or_insert_with(|| {
                tracing::debug!(operation = operation_name, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(operation_name, self.config.clone()))
            });
        Arc::clone(breaker)
    }

    pub fn get(&self, operation_name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(operation_name).cloned()
    }

    /// Status of every breaker created so far
    pub fn status(&self) -> BTreeMap<String, BreakerStatus> {
        self.breakers
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.status()))
            .collect()
    }

    /// Reset one breaker; false if no breaker exists under that name
    pub fn reset(&self, operation_name: &str) -> bool {
        match self.get(operation_name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        let breakers: Vec<_> = self.breakers.read().values().cloned().collect();
        for breaker in breakers {
            breaker.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn wall_deadline(after: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(after)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
}
