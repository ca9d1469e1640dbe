//! Error types for collection, delivery and provisioning
//!
//! The variants follow how far an error is allowed to travel:
//!
//! - `Connection`, `Fetch` and `Submit` stay inside a single tick (the target is skipped)
//! - `Mapping` ends the tick and is handed to the worker's retry shell
//! - `Provisioning` removes one service from the run
//! - `RetriesExhausted` ends one worker
//! - `Config` ends the process before any worker exists

use std::fmt;

/// Result type alias for monitoring operations
pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Debug)]
pub enum MonitorError {
    /// Target could not be reached or authenticated against
    Connection(String),

    /// Statistics call failed on a live connection
    Fetch(String),

    /// Raw statistics did not fit the service's field table
    Mapping(String),

    /// The remote service rejected or failed to receive a sample
    Submit(String),

    /// Remote metric group or dashboard could not be established
    Provisioning(String),

    /// A poll attempt died without returning an error (panic or abort)
    WorkerCrashed(String),

    /// A worker used up its retry budget
    RetriesExhausted {
        service: String,
        last_error: Box<MonitorError>,
    },

    /// Startup was cut short by a shutdown signal, named in the payload
    Interrupted(String),

    /// Invalid or incomplete configuration
    Config(String),

    /// HTTP transport error talking to the remote API
    Http(reqwest::Error),

    /// I/O error (config file access, etc.)
    Io(std::io::Error),
}

impl MonitorError {
    /// Errors that only skip the current target instead of ending the tick.
    pub fn is_target_local(&self) -> bool {
        matches!(
            self,
            MonitorError::Connection(_) | MonitorError::Fetch(_) | MonitorError::Submit(_)
        )
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Connection(msg) => write!(f, "failed to connect to target: {}", msg),
            MonitorError::Fetch(msg) => write!(f, "failed to fetch statistics: {}", msg),
            MonitorError::Mapping(msg) => write!(f, "failed to map statistics: {}", msg),
            MonitorError::Submit(msg) => write!(f, "failed to submit sample: {}", msg),
            MonitorError::Provisioning(msg) => write!(f, "provisioning failed: {}", msg),
            MonitorError::WorkerCrashed(msg) => write!(f, "poll loop crashed: {}", msg),
            MonitorError::RetriesExhausted {
                service,
                last_error,
            } => write!(
                f,
                "retries exhausted for service {}, last error: {}",
                service, last_error
            ),
            MonitorError::Interrupted(signal) => write!(f, "interrupted by {}", signal),
            MonitorError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            MonitorError::Http(err) => write!(f, "HTTP error: {}", err),
            MonitorError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Http(err) => Some(err),
            MonitorError::Io(err) => Some(err),
            MonitorError::RetriesExhausted { last_error, .. } => Some(last_error.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        MonitorError::Io(err)
    }
}

impl From<reqwest::Error> for MonitorError {
    fn from(err: reqwest::Error) -> Self {
        MonitorError::Http(err)
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Config(err.to_string())
    }
}
