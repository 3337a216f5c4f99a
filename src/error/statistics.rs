//! Error statistics and audit forwarding
//!
//! Both are collaborators supplied by the host. The coordinator records every
//! classified failure into a [`MetricsStore`] (queried by
//! `get_error_statistics`) and forwards it to an [`ErrorSink`] (the external
//! audit/log store). Neither is allowed to fail the wrapped call.
use super::classification::{ErrorCategory, ErrorCode, ErrorRecord, Severity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

/// Number of codes reported in `top_errors`
const TOP_ERRORS: usize = 10;

/// Aggregate view of recent errors
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStatistics {
    pub total_errors: u64,
    pub by_category: BTreeMap<ErrorCategory, u64>,
    pub by_severity: BTreeMap<Severity, u64>,

    /// Errors per minute over the queried window
    pub error_rate: f64,

    /// Most frequent codes, most frequent first
    pub top_errors: Vec<(ErrorCode, u64)>,
}

impl ErrorStatistics {
    /// Aggregate `records` observed over `window`
    pub fn from_records<'a>(
        records: impl IntoIterator<Item = &'a ErrorRecord>,
        window: Duration,
    ) -> Self {
        let mut stats = ErrorStatistics::default();
        let mut by_code: HashMap<ErrorCode, u64> = HashMap::new();

        for record in records {
            stats.total_errors += 1;
            *stats.by_category.entry(record.category()).or_default() += 1;
            *stats.by_severity.entry(record.severity()).or_default() += 1;
            *by_code.entry(record.code()).or_default() += 1;
        }

        let minutes = window.as_secs_f64() / 60.0;
        stats.error_rate = if minutes > 0.0 {
            stats.total_errors as f64 / minutes
        } else {
            0.0
        };

        let mut top: Vec<_> = by_code.into_iter().collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        top.truncate(TOP_ERRORS);
        stats.top_errors = top;

        stats
    }
}

/// Source of error statistics
pub trait MetricsStore: Send + Sync {
    fn record(&self, record: &ErrorRecord);

    fn statistics(&self, window: Duration) -> ErrorStatistics;
}

/// Store that keeps nothing and reports zeroed statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsStore;

impl MetricsStore for NoopMetricsStore {
    fn record(&self, _record: &ErrorRecord) {}

    fn statistics(&self, _window: Duration) -> ErrorStatistics {
        ErrorStatistics::default()
    }
}

/// Bounded in-process store of recent records.
///
/// Holds at most `capacity` records and nothing older than `retention`;
/// it is a rolling view, not an error history.
#[derive(Debug)]
pub struct InMemoryMetricsStore {
    capacity: usize,
    retention: Duration,
    records: Mutex<VecDeque<ErrorRecord>>,
}

impl InMemoryMetricsStore {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            retention,
            records: Mutex::new(VecDeque::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune(records: &mut VecDeque<ErrorRecord>, cutoff: Option<DateTime<Utc>>) {
        if let Some(cutoff) = cutoff {
            while records.front().map(|r| r.timestamp() < cutoff).unwrap_or(false) {
                records.pop_front();
            }
        }
    }
}

impl Default for InMemoryMetricsStore {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(24 * 60 * 60))
    }
}

impl MetricsStore for InMemoryMetricsStore {
    fn record(&self, record: &ErrorRecord) {
        let mut records = self.records.lock();
        records.push_back(record.clone());
        while records.len() > self.capacity {
            records.pop_front();
        }
        Self::prune(&mut records, cutoff(self.retention));
    }

    fn statistics(&self, window: Duration) -> ErrorStatistics {
        let records = self.records.lock();
        let since = cutoff(window);
        ErrorStatistics::from_records(
            records
                .iter()
                .filter(|r| since.map(|since| r.timestamp() >= since).unwrap_or(true)),
            window,
        )
    }
}

fn cutoff(window: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| Utc::now().checked_sub_signed(window))
}

/// External audit/log store that persists forwarded records
#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn forward(&self, record: &ErrorRecord) -> anyhow::Result<()>;
}

/// Sink that formats records into the structured log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorSink;

#[async_trait]
impl ErrorSink for TracingErrorSink {
    async fn forward(&self, record: &ErrorRecord) -> anyhow::Result<()> {
        let payload = serde_json::to_string(record)?;
        tracing::info!(
            target: "resilient_exec::audit",
            code = %record.code(),
            category = %record.category(),
            severity = %record.severity(),
            operation = %record.operation(),
            correlation_id = %record.correlation_id(),
            record = %payload,
            "Error record"
        );
        Ok(())
    }
}
