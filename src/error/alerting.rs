//! Threshold and severity based alerting
//!
//! `report` does its bookkeeping inline and hands delivery to a spawned task,
//! so callers never wait on an alert channel. Delivery is at-least-once and
//! best-effort: channel failures are logged and dropped.
use super::classification::{ErrorRecord, Severity};
use crate::config::ConfigError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Alerting configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Errors within the window that trigger a rate alert
    pub error_rate_threshold: u32,

    /// Rolling window for the error count
    pub time_window_ms: u64,

    /// Names of the registered channels that receive alerts
    pub channels: Vec<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: 10,
            time_window_ms: 300_000,
            channels: vec![LogAlertChannel::NAME.to_string()],
        }
    }
}

impl AlertConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.error_rate_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "alerting.error_rate_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.time_window_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "alerting.time_window_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn time_window(&self) -> Duration {
        Duration::from_millis(self.time_window_ms)
    }
}

/// Alert raised by the dispatcher
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    /// A single critical-severity error
    Critical { record: ErrorRecord },

    /// Too many errors within the rolling window
    ErrorRate {
        count: u32,
        threshold: u32,
        window_ms: u64,
        last_record: ErrorRecord,
        raised_at: DateTime<Utc>,
    },
}

impl Alert {
    /// Record that caused the alert
    pub fn record(&self) -> &ErrorRecord {
        match self {
            Alert::Critical { record } => record,
            Alert::ErrorRate { last_record, .. } => last_record,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Alert::Critical { record } => format!(
                "Critical error {} in {}: {}",
                record.code(),
                record.operation(),
                record.message()
            ),
            Alert::ErrorRate {
                count,
                window_ms,
                last_record,
                ..
            } => format!(
                "{} errors within {} (latest {} in {})",
                count,
                humantime::format_duration(Duration::from_millis(*window_ms)),
                last_record.code(),
                last_record.operation()
            ),
        }
    }
}

/// Delivery channel for alerts (email, chat, webhook, ...)
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Name used to select the channel from configuration
    fn name(&self) -> &str;

    async fn send(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// Channel that writes alerts to the structured log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertChannel;

impl LogAlertChannel {
    pub const NAME: &'static str = "log";
}

#[async_trait]
impl AlertChannel for LogAlertChannel {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        let record = alert.record();
        tracing::error!(
            target: "resilient_exec::alert",
            operation = %record.operation(),
            code = %record.code(),
            correlation_id = %record.correlation_id(),
            "ALERT: {}",
            alert.summary()
        );
        Ok(())
    }
}

/// Rolling error-rate and severity alerting
pub struct AlertDispatcher {
    config: AlertConfig,

    channels: Vec<Arc<dyn AlertChannel>>,

    /// Timestamps of errors inside the current window
    window: Mutex<VecDeque<Instant>>,
}

impl AlertDispatcher {
    /// Create a dispatcher with the built-in log channel registered
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            channels: vec![Arc::new(LogAlertChannel)],
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Register a channel; it receives alerts if its name is configured
    pub fn with_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channels.retain(|c| c.name() != channel.name());
        self.channels.push(channel);
        self
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Channels that are both registered and enabled in configuration
    fn active_channels(&self) -> Vec<Arc<dyn AlertChannel>> {
        self.channels
            .iter()
            .filter(|c| self.config.channels.iter().any(|name| name == c.name()))
            .cloned()
            .collect()
    }

    /// Account for one error and dispatch any alerts it triggers.
    ///
    /// Returns the alerts raised; delivery happens in the background.
    pub fn report(&self, record: &ErrorRecord) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if record.severity() == Severity::Critical {
            alerts.push(Alert::Critical {
                record: record.clone(),
            });
        }

        if let Some(count) = self.track(Instant::now()) {
            alerts.push(Alert::ErrorRate {
                count,
                threshold: self.config.error_rate_threshold,
                window_ms: self.config.time_window_ms,
                last_record: record.clone(),
                raised_at: Utc::now(),
            });
        }

        for alert in &alerts {
            self.dispatch(alert.clone());
        }

        alerts
    }

    /// Push `now` into the window; returns the count when the threshold is hit.
    /// The window is cleared after a rate alert so the next one needs a
    /// fresh threshold of errors.
    fn track(&self, now: Instant) -> Option<u32> {
        let mut window = self.window.lock();
        let span = self.config.time_window();

        while window
            .front()
            .map(|first| now.duration_since(*first) > span)
            .unwrap_or(false)
        {
            window.pop_front();
        }
        window.push_back(now);

        let count = window.len() as u32;
        if count >= self.config.error_rate_threshold {
            window.clear();
            Some(count)
        } else {
            None
        }
    }

    /// Errors currently counted in the rolling window
    pub fn window_count(&self) -> usize {
        self.window.lock().len()
    }

    fn dispatch(&self, alert: Alert) {
        let channels = self.active_channels();
        if channels.is_empty() {
            tracing::debug!("No alert channels configured, dropping alert");
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(
                    alert = %alert.summary(),
                    "No async runtime available, alert not delivered"
                );
                return;
            }
        };

        handle.spawn(async move {
            let alert = &alert;
            let deliveries = channels.iter().map(|channel| async move {
                if let Err(e) = channel.send(alert).await {
                    tracing::error!(
                        channel = channel.name(),
                        error = %e,
                        "Alert delivery failed"
                    );
                }
            });
            futures::future::join_all(deliveries).await;
        });
    }
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("config", &self.config)
            .field(
                "channels",
                &self.channels.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
