//! Error types for the convergence engine
//!
//! Two layers:
//! - [`ProcessError`] is produced by the process runner and travels inside
//!   provider errors (usually wrapped in `anyhow`)
//! - [`Error`] is what a run surfaces to the operator, always carrying the
//!   address of the declaration involved

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure of an external process started through [`crate::process`]
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The process could not be started at all
    #[error("failed to execute `{program}`: {source}")]
    Spawn {
        /// Program that was executed
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The process ran but exited unsuccessfully
    #[error("`{command}` exited with {}{}", exit_code_label(.code), stderr_suffix(.stderr))]
    Exit {
        /// Rendered command line
        command: String,
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
        /// Captured standard error
        stderr: String,
    },

    /// The process exceeded its time budget and was killed
    #[error("`{command}` timed out after {}s", whole_secs(.after))]
    Timeout {
        /// Rendered command line
        command: String,
        /// Budget that was exceeded
        after: Duration,
    },
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

fn whole_secs(after: &Duration) -> u64 {
    after.as_secs()
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

/// How a declaration failed, used for reporting and for picking an [`Error`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// The provider itself reported a problem
    Provider,
    /// A guard could not be evaluated and the run treats that as fatal
    Guard,
    /// An external process exited unsuccessfully
    ExternalProcess {
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
    },
    /// An external process hit the declaration timeout
    Timeout {
        /// Seconds allowed
        after_secs: u64,
    },
}

impl FailureKind {
    /// Classify a provider error by looking for a [`ProcessError`] in its chain
    pub fn classify(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(process) = cause.downcast_ref::<ProcessError>() {
                return match process {
                    ProcessError::Exit { code, .. } => Self::ExternalProcess { code: *code },
                    ProcessError::Timeout { after, .. } => Self::Timeout {
                        after_secs: after.as_secs(),
                    },
                    ProcessError::Spawn { .. } => Self::Provider,
                };
            }
        }
        Self::Provider
    }
}

/// A failed declaration, as recorded in the run log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Address of the failing declaration, e.g. `file[/etc/motd]`
    pub address: String,
    /// Action being attempted (`converge`, `restart`, ...)
    pub action: String,
    /// Provider-supplied reason
    pub reason: String,
    /// Classification of the failure
    pub kind: FailureKind,
}

impl Failure {
    /// Build a failure from a provider error
    pub fn from_error(address: impl Into<String>, action: impl Into<String>, err: &anyhow::Error) -> Self {
        Self {
            address: address.into(),
            action: action.into(),
            reason: format!("{err:#}"),
            kind: FailureKind::classify(err),
        }
    }
}

/// Errors surfaced by a run
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration, raised before any declaration executes
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A guard could not be evaluated
    #[error("{address}: guard evaluation failed: {reason}")]
    GuardEvaluation {
        /// Declaration address
        address: String,
        /// What went wrong
        reason: String,
    },

    /// A provider failed to converge or run an action
    #[error("{address}: {action} failed: {reason}")]
    Provider {
        /// Declaration address
        address: String,
        /// Attempted action
        action: String,
        /// Provider-supplied reason
        reason: String,
    },

    /// An external process exited unsuccessfully
    #[error("{address}: {action} failed: {reason}")]
    ExternalProcess {
        /// Declaration address
        address: String,
        /// Attempted action
        action: String,
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
        /// Rendered failure
        reason: String,
    },

    /// An external process hit the declaration timeout
    #[error("{address}: {action} timed out after {after_secs}s")]
    Timeout {
        /// Declaration address
        address: String,
        /// Attempted action
        action: String,
        /// Seconds allowed
        after_secs: u64,
    },
}

impl Error {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether this error is fatal under default policy
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::GuardEvaluation { .. })
    }
}

impl From<Failure> for Error {
    fn from(failure: Failure) -> Self {
        let Failure {
            address,
            action,
            reason,
            kind,
        } = failure;
        match kind {
            FailureKind::Provider => Self::Provider {
                address,
                action,
                reason,
            },
            FailureKind::Guard => Self::GuardEvaluation { address, reason },
            FailureKind::ExternalProcess { code } => Self::ExternalProcess {
                address,
                action,
                code,
                reason,
            },
            FailureKind::Timeout { after_secs } => Self::Timeout {
                address,
                action,
                after_secs,
            },
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_finds_process_error_in_chain() {
        let err = anyhow::Error::new(ProcessError::Exit {
            command: "make".to_string(),
            code: Some(2),
            stderr: "boom".to_string(),
        })
        .context("compiling server");

        assert_eq!(
            FailureKind::classify(&err),
            FailureKind::ExternalProcess { code: Some(2) }
        );
    }

    #[test]
    fn classify_timeout() {
        let err = anyhow::Error::new(ProcessError::Timeout {
            command: "sleep 10".to_string(),
            after: Duration::from_secs(3),
        });
        assert_eq!(
            FailureKind::classify(&err),
            FailureKind::Timeout { after_secs: 3 }
        );
    }

    #[test]
    fn classify_plain_error_is_provider() {
        let err = anyhow::anyhow!("disk full");
        assert_eq!(FailureKind::classify(&err), FailureKind::Provider);
    }

    #[test]
    fn failure_converts_to_matching_error() {
        let failure = Failure {
            address: "command[migrate]".to_string(),
            action: "converge".to_string(),
            reason: "`rake` timed out after 5s".to_string(),
            kind: FailureKind::Timeout { after_secs: 5 },
        };
        let err: Error = failure.into();
        assert!(matches!(err, Error::Timeout { after_secs: 5, .. }));
        assert_eq!(err.to_string(), "command[migrate]: converge timed out after 5s");
    }

    #[test]
    fn exit_error_message_includes_stderr() {
        let err = ProcessError::Exit {
            command: "false".to_string(),
            code: Some(1),
            stderr: "  nope \n".to_string(),
        };
        assert_eq!(err.to_string(), "`false` exited with status 1: nope");
    }
}
