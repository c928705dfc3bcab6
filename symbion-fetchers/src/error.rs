//! Error taxonomy of the acquisition layer
//!
//! Internally every fetcher reports a [`FetchFailure`] carrying the precise
//! cause. At the fetch boundary ([`crate::get_raw_data`]) it collapses into a
//! [`FetchError`]: timeouts stay distinguishable, everything else becomes a
//! [`FetcherError`] whose message is the only thing callers see.

use std::io;
use thiserror::Error;

use crate::cache::CacheError;
use crate::process::CommandError;
use crate::protocol::{DecryptError, ParseError, PolicyRejection};
use crate::snmp::SnmpError;

/// A remote operation did not complete within its time budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct Timeout(pub String);

impl Timeout {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Any non-timeout failure, reduced to its message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FetcherError {
    message: String,
}

impl FetcherError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// What callers of the fetch boundary observe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Timeout: {0}")]
    Timeout(Timeout),
    #[error(transparent)]
    Fetcher(FetcherError),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }

    pub fn message(&self) -> &str {
        match self {
            FetchError::Timeout(t) => &t.0,
            FetchError::Fetcher(e) => e.message(),
        }
    }
}

/// Internal failure of a single fetcher operation.
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error(transparent)]
    Timeout(#[from] Timeout),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Policy(#[from] PolicyRejection),
    #[error("Failed to decrypt agent output: {0}")]
    Decrypt(#[from] DecryptError),
    #[error(transparent)]
    Snmp(SnmpError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("{0}")]
    Transport(String),
}

impl FetchFailure {
    pub fn transport(message: impl Into<String>) -> Self {
        FetchFailure::Transport(message.into())
    }

    /// Socket errors: elapsed deadlines become [`Timeout`], the rest transport failures.
    pub fn from_io(context: &str, err: io::Error) -> Self {
        if is_timeout_kind(err.kind()) {
            FetchFailure::Timeout(Timeout::new(format!("{context}: {err}")))
        } else {
            FetchFailure::Transport(format!("{context}: {err}"))
        }
    }
}

impl From<SnmpError> for FetchFailure {
    fn from(err: SnmpError) -> Self {
        match err {
            SnmpError::Timeout(message) => FetchFailure::Timeout(Timeout(message)),
            other => FetchFailure::Snmp(other),
        }
    }
}

impl From<CommandError> for FetchFailure {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::TimedOut { .. } => FetchFailure::Timeout(Timeout::new(err.to_string())),
            other => FetchFailure::Transport(other.to_string()),
        }
    }
}

impl From<FetchFailure> for FetchError {
    fn from(failure: FetchFailure) -> Self {
        match failure {
            FetchFailure::Timeout(timeout) => FetchError::Timeout(timeout),
            other => FetchError::Fetcher(FetcherError::new(other.to_string())),
        }
    }
}

pub(crate) fn is_timeout_kind(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_timeouts_stay_timeouts() {
        let failure = FetchFailure::from_io("read", io::Error::from(io::ErrorKind::WouldBlock));
        assert!(FetchError::from(failure).is_timeout());
    }

    #[test]
    fn other_failures_keep_only_their_message() {
        let failure = FetchFailure::from_io("Connecting to 1.2.3.4:6556 failed", io::Error::from(io::ErrorKind::ConnectionRefused));
        let error = FetchError::from(failure);
        assert!(!error.is_timeout());
        assert!(error.message().starts_with("Connecting to 1.2.3.4:6556 failed"));
    }

    #[test]
    fn snmp_timeouts_surface_as_timeouts() {
        let failure = FetchFailure::from(SnmpError::Timeout("no response from 10.0.0.1".into()));
        assert_eq!(
            FetchError::from(failure),
            FetchError::Timeout(Timeout::new("no response from 10.0.0.1"))
        );
    }
}
