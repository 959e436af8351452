//! Error types for package manager operations.
//!
//! Errors are categorized from the manager's output so that callers can give
//! useful feedback. Each category carries advice for the operator.

use declarative::ProcessError;
use thiserror::Error;

/// Categories of package manager errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network-related errors (mirror unreachable, DNS, TLS)
    Network,
    /// Package not found in any configured repository
    NotFound,
    /// Package database is locked by another process
    Locked,
    /// Permission denied (usually not running as root)
    Permission,
    /// The package manager itself is not installed
    ManagerNotFound,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient.
    ///
    /// Nothing is retried automatically; re-running the provisioner is the
    /// retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network | Self::Locked)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Network connectivity issue",
            Self::NotFound => "Package not found",
            Self::Locked => "Package database locked",
            Self::Permission => "Permission denied",
            Self::ManagerNotFound => "Package manager not installed",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Network => "Check the repository mirrors and your connection, then run again",
            Self::NotFound => "Verify the package name or enable the repository that provides it",
            Self::Locked => "Wait for the other package manager process to finish, then run again",
            Self::Permission => "Run the provisioner as root",
            Self::ManagerNotFound => "Set settings.package_manager to a manager available on this host",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur during package manager operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Network-related error
    #[error("network error: {message}")]
    Network {
        /// Output of the failed operation
        message: String,
    },

    /// Package not found in any repository
    #[error("package not found: {name}")]
    NotFound {
        /// Name of the package that could not be found
        name: String,
    },

    /// Package database locked by another process
    #[error("package database locked: {message}")]
    Locked {
        /// Output of the failed operation
        message: String,
    },

    /// Permission denied
    #[error("permission denied: {message}")]
    Permission {
        /// Output of the failed operation
        message: String,
    },

    /// Package manager executable not found
    #[error("package manager not found: {manager}")]
    ManagerNotFound {
        /// Executable that was looked for
        manager: String,
    },

    /// Manager ran but failed for an unrecognized reason
    #[error("{message}: {stderr}")]
    CommandFailed {
        /// What was attempted
        message: String,
        /// Standard error output from the failed command
        stderr: String,
    },

    /// The manager process could not be started or timed out
    #[error("package manager process failed")]
    Process(#[from] ProcessError),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Network { .. } => ErrorCategory::Network,
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::Locked { .. } => ErrorCategory::Locked,
            Error::Permission { .. } => ErrorCategory::Permission,
            Error::ManagerNotFound { .. } => ErrorCategory::ManagerNotFound,
            _ => ErrorCategory::Other,
        }
    }

    /// Create an error from package manager output.
    ///
    /// Analyzes stderr (apt, dnf, yum and gem phrasing) to categorize the
    /// error appropriately.
    pub fn from_output(manager: &str, stderr: &str, package_name: Option<&str>) -> Self {
        let stderr_lower = stderr.to_lowercase();
        let message = stderr.trim().to_string();

        if stderr_lower.contains("could not get lock")
            || stderr_lower.contains("unable to lock")
            || stderr_lower.contains("waiting for process")
            || stderr_lower.contains("another app is currently holding the yum lock")
        {
            return Error::Locked { message };
        }

        if stderr_lower.contains("unable to locate package")
            || stderr_lower.contains("has no installation candidate")
            || stderr_lower.contains("no match for argument")
            || (stderr_lower.contains("no package") && stderr_lower.contains("available"))
            || stderr_lower.contains("could not find a valid gem")
        {
            return Error::NotFound {
                name: package_name.unwrap_or("unknown").to_string(),
            };
        }

        if stderr_lower.contains("are you root")
            || stderr_lower.contains("permission denied")
            || stderr_lower.contains("operation not permitted")
            || stderr_lower.contains("you don't have write permissions")
            || stderr_lower.contains("this command has to be run with superuser privileges")
        {
            return Error::Permission { message };
        }

        if stderr_lower.contains("could not resolve")
            || stderr_lower.contains("temporary failure resolving")
            || stderr_lower.contains("failed to fetch")
            || stderr_lower.contains("connection refused")
            || stderr_lower.contains("cannot download")
            || stderr_lower.contains("curl error")
            || stderr_lower.contains("ssl")
        {
            return Error::Network { message };
        }

        Error::CommandFailed {
            message: format!(
                "{manager} failed{}",
                package_name
                    .map(|n| format!(" for {n}"))
                    .unwrap_or_default()
            ),
            stderr: message,
        }
    }
}

/// Result type for package manager operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::time::Duration;

    #[test]
    fn test_error_category_transient() {
        assert!(ErrorCategory::Network.is_transient());
        assert!(ErrorCategory::Locked.is_transient());
        assert!(!ErrorCategory::NotFound.is_transient());
    }

    #[test]
    fn test_from_output_apt_not_found() {
        let err = Error::from_output("apt-get", "E: Unable to locate package nginxx", Some("nginxx"));
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert_eq!(err.to_string(), "package not found: nginxx");
    }

    #[test]
    fn test_from_output_apt_locked() {
        let err = Error::from_output(
            "apt-get",
            "E: Could not get lock /var/lib/dpkg/lock-frontend. It is held by process 1234",
            Some("git"),
        );
        assert_eq!(err.category(), ErrorCategory::Locked);
    }

    #[test]
    fn test_from_output_permission() {
        let err = Error::from_output(
            "apt-get",
            "E: Could not open lock file - open (13: Permission denied)\nE: are you root?",
            Some("git"),
        );
        assert_eq!(err.category(), ErrorCategory::Permission);
    }

    #[test]
    fn test_from_output_dnf_not_found() {
        let err = Error::from_output("dnf", "Error: Unable to find a match\nNo match for argument: foo", Some("foo"));
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn test_from_output_network() {
        let err = Error::from_output(
            "apt-get",
            "W: Failed to fetch http://deb.debian.org/debian/dists/bookworm/InRelease  Temporary failure resolving 'deb.debian.org'",
            Some("git"),
        );
        assert_eq!(err.category(), ErrorCategory::Network);
    }

    #[test]
    fn test_from_output_unrecognized() {
        let err = Error::from_output("gem", "ERROR: something odd\n", Some("bundler"));
        assert_eq!(err.category(), ErrorCategory::Other);
        assert_eq!(err.to_string(), "gem failed for bundler: ERROR: something odd");
    }

    #[test]
    fn test_process_error_stays_in_source_chain() {
        let err = Error::from(ProcessError::Timeout {
            command: "apt-get install -y git".to_string(),
            after: Duration::from_secs(30),
        });
        let source = err.source().and_then(|s| s.downcast_ref::<ProcessError>());
        assert!(matches!(source, Some(ProcessError::Timeout { .. })));
    }
}
