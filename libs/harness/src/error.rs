//! Harness error types and their failure classes.

use std::time::Duration;

use cpat_proto::{MessageKind, ProtoError};
use thiserror::Error;

/// How a failure affects the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The scenario could not start: credentials, fixtures, reachability.
    Precondition,
    /// An expected protocol message never arrived or the transport broke.
    Protocol,
    /// The service answered, but not as expected.
    Assertion,
    /// The harness itself was misused.
    Usage,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureClass::Precondition => "precondition",
            FailureClass::Protocol => "protocol",
            FailureClass::Assertion => "assertion",
            FailureClass::Usage => "usage",
        };
        write!(f, "{}", s)
    }
}

/// Every way a scenario can fail.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("no {kind} received within {waited:?}")]
    ProtocolTimeout { kind: MessageKind, waited: Duration },

    #[error("protocol failure: {0}")]
    Protocol(String),

    #[error("{method} {url}: expected status {expected}, got {actual}: {body}")]
    StatusMismatch {
        method: String,
        url: String,
        expected: u16,
        actual: u16,
        body: String,
    },

    #[error("{what} mismatch:\n{diff}")]
    Mismatch { what: String, diff: String },

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("a waiter for {0} is already registered")]
    DuplicateWaiter(MessageKind),

    #[error("failed to decode {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Admin(#[from] crate::admin::AdminError),
}

impl HarnessError {
    /// Classifies the failure.
    pub fn class(&self) -> FailureClass {
        match self {
            HarnessError::Precondition(_) => FailureClass::Precondition,
            HarnessError::ProtocolTimeout { .. } | HarnessError::Protocol(_) => {
                FailureClass::Protocol
            }
            HarnessError::StatusMismatch { .. }
            | HarnessError::Mismatch { .. }
            | HarnessError::Assertion(_)
            | HarnessError::Decode { .. }
            | HarnessError::Admin(_) => FailureClass::Assertion,
            HarnessError::DuplicateWaiter(_) => FailureClass::Usage,
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    pub fn decode(what: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            what: what.into(),
            source,
        }
    }
}

impl From<ProtoError> for HarnessError {
    fn from(err: ProtoError) -> Self {
        HarnessError::Protocol(err.to_string())
    }
}

/// Result alias used throughout the harness.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Fails with an assertion error unless the condition holds.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::HarnessError::Assertion(format!($($arg)+)));
        }
    };
}
