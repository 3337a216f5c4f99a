// Allow complex types where needed for boxed operation futures and collaborator maps
#![allow(clippy::type_complexity)]

pub mod config;
pub mod error;

// Re-export the orchestrator and its inputs/outputs for convenience
pub use config::{ConfigError, ResilienceConfig};
pub use error::{
    ErrorCategory, ErrorCode, ErrorRecord, ExecutionContext, Outcome, RecoveryCoordinator,
    Severity, Wrapped,
};

use std::time::Duration;
use thiserror::Error;

/// Raw failure produced by a wrapped operation, before classification.
///
/// Operations may fail with anything convertible into this type; the
/// classifier only ever looks at the status, driver code, I/O kind and
/// display text.
#[derive(Error, Debug)]
pub enum OperationError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("database error {code}: {message}")]
    Database { code: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timeout after {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    #[error("operation cancelled by caller")]
    Cancelled,

    #[error("{0}")]
    Message(String),
}

impl OperationError {
    /// HTTP-style status code, if the failure carries one
    pub fn status(&self) -> Option<u16> {
        match self {
            OperationError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Driver-specific database code, if the failure carries one
    pub fn driver_code(&self) -> Option<&str> {
        match self {
            OperationError::Database { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        OperationError::Http {
            status,
            message: message.into(),
        }
    }

    pub fn database(code: impl Into<String>, message: impl Into<String>) -> Self {
        OperationError::Database {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for OperationError {
    fn from(err: anyhow::Error) -> Self {
        // Keep the whole context chain so the classifier sees every cause
        OperationError::Message(format!("{:#}", err))
    }
}

impl From<String> for OperationError {
    fn from(message: String) -> Self {
        OperationError::Message(message)
    }
}

impl From<&str> for OperationError {
    fn from(message: &str) -> Self {
        OperationError::Message(message.to_string())
    }
}

pub type OperationResult<T> = Result<T, OperationError>;
