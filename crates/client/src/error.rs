// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Input '{field}' is out of range: {detail}")]
    InputOutOfRange { field: String, detail: String },

    #[error("Encryption failed: {0}")]
    EncryptionFailure(String),

    #[error("Submission rejected: {reason}")]
    SubmissionRejected { reason: String },

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Cancelled by the user: {0}")]
    UserCancelled(String),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Execution context changed while the request was in flight")]
    Stale,

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("{0}")]
    Failed(String),
}

/// Fieldless mirror of [`Error`] for matching and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InputOutOfRange,
    EncryptionFailure,
    SubmissionRejected,
    NetworkUnavailable,
    UserCancelled,
    AuthorizationDenied,
    TimedOut,
    Stale,
    InvalidHandle,
    Failed,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InputOutOfRange { .. } => ErrorKind::InputOutOfRange,
            Error::EncryptionFailure(_) => ErrorKind::EncryptionFailure,
            Error::SubmissionRejected { .. } => ErrorKind::SubmissionRejected,
            Error::NetworkUnavailable(_) => ErrorKind::NetworkUnavailable,
            Error::UserCancelled(_) => ErrorKind::UserCancelled,
            Error::AuthorizationDenied(_) => ErrorKind::AuthorizationDenied,
            Error::TimedOut(_) => ErrorKind::TimedOut,
            Error::Stale => ErrorKind::Stale,
            Error::InvalidHandle(_) => ErrorKind::InvalidHandle,
            Error::Failed(_) => ErrorKind::Failed,
        }
    }

    /// Whether the caller may simply try the same operation again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::NetworkUnavailable(_) | Error::TimedOut(_))
    }

    pub(crate) fn out_of_range(field: &str, detail: impl Into<String>) -> Self {
        Error::InputOutOfRange {
            field: field.to_string(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(Error::NetworkUnavailable("reset".into()).is_retryable());
        assert!(Error::TimedOut(Duration::from_secs(45)).is_retryable());
        assert!(!Error::Stale.is_retryable());
        assert!(!Error::SubmissionRejected {
            reason: "nope".into()
        }
        .is_retryable());
        assert_eq!(Error::Stale.kind(), ErrorKind::Stale);
    }
}
