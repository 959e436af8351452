//! Core types for package management.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported package managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Manager {
    /// Debian/Ubuntu `apt-get` + `dpkg-query`
    Apt,
    /// Fedora/RHEL `dnf` + `rpm`
    Dnf,
    /// Older RHEL/CentOS `yum` + `rpm`
    Yum,
    /// RubyGems
    Gem,
}

impl Manager {
    /// Executable that performs installs.
    pub fn program(&self) -> &'static str {
        match self {
            Manager::Apt => "apt-get",
            Manager::Dnf => "dnf",
            Manager::Yum => "yum",
            Manager::Gem => "gem",
        }
    }

    /// System managers in detection order.
    pub fn system() -> &'static [Manager] {
        &[Manager::Apt, Manager::Dnf, Manager::Yum]
    }
}

impl fmt::Display for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Manager::Apt => "apt",
            Manager::Dnf => "dnf",
            Manager::Yum => "yum",
            Manager::Gem => "gem",
        };
        write!(f, "{name}")
    }
}

/// A package to install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Package name (e.g., "nginx", "bundler")
    pub name: String,
    /// Exact version to install, if pinned
    pub version: Option<String>,
    /// Extra arguments passed to the install command
    pub options: Vec<String>,
}

impl Package {
    /// Create a new package with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            options: Vec::new(),
        }
    }

    /// Set the version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Add install options.
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.extend(options.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{} {}", self.name, v),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Installation status reported by `query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageStatus {
    /// Installed at the given version
    Installed {
        /// Installed version string as the manager reports it
        version: String,
    },
    /// Not installed
    Absent,
}

impl PackageStatus {
    /// Whether the package is installed.
    pub fn is_installed(&self) -> bool {
        matches!(self, Self::Installed { .. })
    }

    /// Installed version, if any.
    pub fn version(&self) -> Option<&str> {
        match self {
            Self::Installed { version } => Some(version),
            Self::Absent => None,
        }
    }

    /// Whether this status satisfies the package declaration.
    ///
    /// An unpinned package is satisfied by any installed version. A pinned
    /// one needs an exact match, or a match up to the distribution revision
    /// (`1.18.0` accepts `1.18.0-6`).
    pub fn satisfies(&self, package: &Package) -> bool {
        match (self, &package.version) {
            (Self::Absent, _) => false,
            (Self::Installed { .. }, None) => true,
            (Self::Installed { version }, Some(wanted)) => {
                version == wanted
                    || version
                        .strip_prefix(wanted.as_str())
                        .is_some_and(|rest| rest.starts_with('-'))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_satisfies() {
        let installed = PackageStatus::Installed {
            version: "1.18.0-6ubuntu14".to_string(),
        };
        assert!(installed.satisfies(&Package::new("nginx")));
        assert!(installed.satisfies(&Package::new("nginx").with_version("1.18.0")));
        assert!(installed.satisfies(&Package::new("nginx").with_version("1.18.0-6ubuntu14")));
        assert!(!installed.satisfies(&Package::new("nginx").with_version("1.18")));
        assert!(!PackageStatus::Absent.satisfies(&Package::new("nginx")));
    }

    #[test]
    fn test_manager_programs() {
        assert_eq!(Manager::Apt.program(), "apt-get");
        assert_eq!(Manager::Yum.to_string(), "yum");
        assert_eq!(Manager::system().len(), 3);
    }
}
