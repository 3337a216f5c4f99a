//! Error classification: raw operation failures into canonical error records
//!
//! Every failed attempt is turned into an [`ErrorRecord`] carrying a fixed
//! code, category, severity and retryability. Matching runs over the failure's
//! status, driver code, I/O kind and lowercased display text, in a fixed
//! precedence order (first match wins):
//!
//! 1. network / connection reset  -> `NETWORK_ERROR`
//! 2. database / driver code      -> `DATABASE_ERROR`
//! 3. 401 / "unauthorized"        -> `AUTH_ERROR`
//! 4. 403 / "forbidden"           -> `AUTHZ_ERROR`
//! 5. 400 / "invalid"             -> `VALIDATION_ERROR`
//! 6. 429 / "rate limit"          -> `RATE_LIMIT_ERROR`
//! 7. 503 / "unavailable"         -> `SERVICE_UNAVAILABLE`
//! 8. "timeout"                   -> `TIMEOUT_ERROR`
//! 9. anything else               -> `UNKNOWN_ERROR`
use crate::OperationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Canonical error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NetworkError,
    DatabaseError,
    AuthError,
    AuthzError,
    ValidationError,
    RateLimitError,
    ServiceUnavailable,
    TimeoutError,
    CircuitBreakerOpen,
    Cancelled,
    UnknownError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 11] = [
        ErrorCode::NetworkError,
        ErrorCode::DatabaseError,
        ErrorCode::AuthError,
        ErrorCode::AuthzError,
        ErrorCode::ValidationError,
        ErrorCode::RateLimitError,
        ErrorCode::ServiceUnavailable,
        ErrorCode::TimeoutError,
        ErrorCode::CircuitBreakerOpen,
        ErrorCode::Cancelled,
        ErrorCode::UnknownError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::AuthError => "AUTH_ERROR",
            ErrorCode::AuthzError => "AUTHZ_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::RateLimitError => "RATE_LIMIT_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::TimeoutError => "TIMEOUT_ERROR",
            ErrorCode::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Category this code always belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::NetworkError | ErrorCode::TimeoutError => ErrorCategory::Network,
            ErrorCode::DatabaseError => ErrorCategory::Database,
            ErrorCode::AuthError => ErrorCategory::Authentication,
            ErrorCode::AuthzError => ErrorCategory::Authorization,
            ErrorCode::ValidationError => ErrorCategory::Validation,
            ErrorCode::RateLimitError | ErrorCode::ServiceUnavailable => {
                ErrorCategory::ExternalService
            }
            ErrorCode::CircuitBreakerOpen | ErrorCode::Cancelled => ErrorCategory::System,
            ErrorCode::UnknownError => ErrorCategory::Unknown,
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorCode::DatabaseError
            | ErrorCode::ServiceUnavailable
            | ErrorCode::CircuitBreakerOpen => Severity::High,
            ErrorCode::ValidationError | ErrorCode::Cancelled => Severity::Low,
            _ => Severity::Medium,
        }
    }

    /// Whether failures with this code are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkError
                | ErrorCode::DatabaseError
                | ErrorCode::RateLimitError
                | ErrorCode::ServiceUnavailable
                | ErrorCode::TimeoutError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad error category, used upstream to pick a response status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Database,
    Authentication,
    Authorization,
    Validation,
    ExternalService,
    System,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Database => "database",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::Validation => "validation",
            ErrorCategory::ExternalService => "external_service",
            ErrorCategory::System => "system",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Conventional HTTP status for this category.
    ///
    /// Provided for API layers; nothing in this crate acts on it.
    pub fn suggested_http_status(&self, code: ErrorCode) -> u16 {
        match (self, code) {
            (ErrorCategory::Validation, _) => 400,
            (ErrorCategory::Authentication, _) => 401,
            (ErrorCategory::Authorization, _) => 403,
            (_, ErrorCode::RateLimitError) => 429,
            (_, ErrorCode::ServiceUnavailable) | (_, ErrorCode::CircuitBreakerOpen) => 503,
            _ => 500,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Context for one logical call, threaded through every retry, breaker event
/// and alert it causes
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Operation name, also the circuit breaker key (e.g. "verification_submit")
    pub operation_name: String,

    /// Opaque identifier shared by every record of this logical call
    pub correlation_id: String,

    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub batch_id: Option<String>,
    pub transaction_id: Option<String>,

    /// Additional metadata copied into every error record
    pub metadata: HashMap<String, String>,

    /// Cancels the in-flight attempt and any pending backoff when fired
    pub cancellation: Option<CancellationToken>,
}

impl ExecutionContext {
    /// Create a new context with a fresh correlation ID
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            session_id: None,
            batch_id: None,
            transaction_id: None,
            metadata: HashMap::new(),
            cancellation: None,
        }
    }

    /// Context for a verification run over an uploaded batch
    pub fn for_verification(batch_id: impl Into<String>) -> Self {
        Self::new("verification_batch").with_batch(batch_id)
    }

    /// Context for generating the payment file of a batch
    pub fn for_payment_file(batch_id: impl Into<String>) -> Self {
        Self::new("payment_file_generate").with_batch(batch_id)
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn with_transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    /// Add metadata to the context
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// True once the caller has abandoned this call
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }
}

/// Canonical, immutable description of one classified failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    code: ErrorCode,
    category: ErrorCategory,
    severity: Severity,
    retryable: bool,
    message: String,
    operation: String,
    context: HashMap<String, String>,
    timestamp: DateTime<Utc>,
    correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction_id: Option<String>,
    attempt: u32,
}

impl ErrorRecord {
    /// Build a record for `code` using the taxonomy defaults
    pub fn from_code(
        code: ErrorCode,
        message: impl Into<String>,
        context: &ExecutionContext,
        attempt: u32,
    ) -> Self {
        Self {
            code,
            category: code.category(),
            severity: code.default_severity(),
            retryable: code.is_retryable(),
            message: message.into(),
            operation: context.operation_name.clone(),
            context: context.metadata.clone(),
            timestamp: Utc::now(),
            correlation_id: context.correlation_id.clone(),
            user_id: context.user_id.clone(),
            session_id: context.session_id.clone(),
            batch_id: context.batch_id.clone(),
            transaction_id: context.transaction_id.clone(),
            attempt,
        }
    }

    pub(crate) fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub(crate) fn with_context_entry(mut self, key: &str, value: impl Into<String>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn batch_id(&self) -> Option<&str> {
        self.batch_id.as_deref()
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    /// 1-based attempt that produced this record
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}/{}) in {}: {} [attempt {}, correlation {}]",
            self.code,
            self.category,
            self.severity,
            self.operation,
            self.message,
            self.attempt,
            self.correlation_id
        )
    }
}

impl std::error::Error for ErrorRecord {}

const NETWORK_MARKERS: &[&str] = &[
    "econnreset",
    "econnrefused",
    "econnaborted",
    "enotfound",
    "eai_again",
    "connection reset",
    "connection refused",
    "socket hang up",
    "network",
];

/// Error classifier - maps raw failures onto the fixed taxonomy
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    /// Driver code prefixes that identify database failures
    database_code_prefixes: Vec<String>,

    /// Host-chosen severities replacing the taxonomy default per code
    severity_overrides: HashMap<ErrorCode, Severity>,
}

impl ErrorClassifier {
    /// Create a classifier recognising PostgREST-style driver codes
    pub fn new() -> Self {
        Self {
            database_code_prefixes: vec!["PGRST".to_string()],
            severity_overrides: HashMap::new(),
        }
    }

    /// Report every failure with `code` at `severity` (e.g. escalate
    /// `DATABASE_ERROR` to critical so it pages immediately)
    pub fn set_severity(&mut self, code: ErrorCode, severity: Severity) {
        self.severity_overrides.insert(code, severity);
    }

    /// Recognise an additional driver code prefix as a database failure
    pub fn with_database_code_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.database_code_prefixes.push(prefix.into());
        self
    }

    /// Classify a failed attempt into a fresh error record
    pub fn classify(
        &self,
        error: &OperationError,
        context: &ExecutionContext,
        attempt: u32,
    ) -> ErrorRecord {
        let code = self.classify_code(error);
        let mut record = self.record(code, error.to_string(), context, attempt);

        if let Some(status) = error.status() {
            record = record.with_context_entry("status", status.to_string());
        }
        if let Some(driver_code) = error.driver_code() {
            record = record.with_context_entry("driver_code", driver_code);
        }

        record
    }

    /// Build a record for an already known code, honouring severity overrides
    pub fn record(
        &self,
        code: ErrorCode,
        message: impl Into<String>,
        context: &ExecutionContext,
        attempt: u32,
    ) -> ErrorRecord {
        let record = ErrorRecord::from_code(code, message, context, attempt);
        match self.severity_overrides.get(&code) {
            Some(severity) => record.with_severity(*severity),
            None => record,
        }
    }

    /// Determine the error code. Pure function of the failure itself.
    pub fn classify_code(&self, error: &OperationError) -> ErrorCode {
        if matches!(error, OperationError::Cancelled) {
            return ErrorCode::Cancelled;
        }

        let text = error.to_string().to_lowercase();
        let status = error.status();

        if self.is_network(error, &text) {
            ErrorCode::NetworkError
        } else if self.is_database(error, &text) {
            ErrorCode::DatabaseError
        } else if status == Some(401) || text.contains("unauthorized") {
            ErrorCode::AuthError
        } else if status == Some(403) || text.contains("forbidden") {
            ErrorCode::AuthzError
        } else if status == Some(400) || text.contains("invalid") {
            ErrorCode::ValidationError
        } else if status == Some(429) || text.contains("rate limit") {
            ErrorCode::RateLimitError
        } else if status == Some(503) || text.contains("unavailable") {
            ErrorCode::ServiceUnavailable
        } else if self.is_timeout(error, &text) {
            ErrorCode::TimeoutError
        } else {
            ErrorCode::UnknownError
        }
    }

    fn is_network(&self, error: &OperationError, text: &str) -> bool {
        use std::io::ErrorKind;

        if let OperationError::Io(io_err) = error {
            if matches!(
                io_err.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::BrokenPipe
            ) {
                return true;
            }
        }

        NETWORK_MARKERS.iter().any(|marker| text.contains(marker))
    }

    fn is_database(&self, error: &OperationError, text: &str) -> bool {
        if error.driver_code().is_some() {
            return true;
        }

        // Driver codes also surface inside plain messages ("PGRST301: JWT expired")
        let upper = text.to_uppercase();
        self.database_code_prefixes
            .iter()
            .any(|prefix| upper.contains(&prefix.to_uppercase()))
            || text.contains("database")
    }

    fn is_timeout(&self, error: &OperationError, text: &str) -> bool {
        match error {
            OperationError::Timeout(_) => true,
            OperationError::Io(io_err) if io_err.kind() == std::io::ErrorKind::TimedOut => true,
            _ => ["timeout", "timed out", "etimedout"]
                .iter()
                .any(|marker| text.contains(marker)),
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}
