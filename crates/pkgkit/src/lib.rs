//! # pkgkit
//!
//! Package manager backends for host provisioning.
//!
//! This crate provides:
//! - A [`Backend`](backend::Backend) trait with `apt`, `dnf`/`yum` and `gem`
//!   implementations
//! - Detection of the system package manager
//! - Errors categorized from manager output, with advice
//!
//! ## Example
//!
//! ```no_run
//! use pkgkit::{Client, Package};
//! use std::time::Duration;
//!
//! let client = Client::detect().expect("no supported package manager");
//! let nginx = Package::new("nginx");
//!
//! let installed = client.ensure(&nginx, Some(Duration::from_secs(600))).unwrap();
//! println!("nginx installed now: {installed}");
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod types;

pub use error::{Error, ErrorCategory, Result};
pub use types::{Manager, Package, PackageStatus};

use backend::Backend;
use std::fmt;
use std::time::Duration;

/// High-level client for package operations.
pub struct Client {
    backend: Box<dyn Backend>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("manager", &self.backend.manager())
            .finish()
    }
}

impl Client {
    /// Create a client for a specific manager.
    ///
    /// Returns an error if the manager is not installed.
    pub fn new(manager: Manager) -> Result<Self> {
        let backend = backend::for_manager(manager);
        if !backend.is_available() {
            return Err(Error::ManagerNotFound {
                manager: manager.program().to_string(),
            });
        }
        Ok(Self { backend })
    }

    /// Create a client for the first system manager found on this host.
    pub fn detect() -> Result<Self> {
        for &manager in Manager::system() {
            let backend = backend::for_manager(manager);
            if backend.is_available() {
                log::debug!("using {manager} package manager");
                return Ok(Self { backend });
            }
        }
        Err(Error::ManagerNotFound {
            manager: "apt-get, dnf or yum".to_string(),
        })
    }

    /// Create a RubyGems client, optionally with a custom `gem` binary.
    pub fn gem(gem_binary: Option<&str>) -> Result<Self> {
        let backend = backend::gem::GemBackend::new(gem_binary);
        if !backend.is_available() {
            return Err(Error::ManagerNotFound {
                manager: gem_binary.unwrap_or("gem").to_string(),
            });
        }
        Ok(Self {
            backend: Box::new(backend),
        })
    }

    /// Create a client with a custom backend (useful for testing).
    pub fn with_backend(backend: Box<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Which manager this client drives.
    pub fn manager(&self) -> Manager {
        self.backend.manager()
    }

    /// Report whether a package is installed.
    pub fn query(&self, package: &Package, timeout: Option<Duration>) -> Result<PackageStatus> {
        self.backend.query(package, timeout)
    }

    /// Install a package unconditionally.
    pub fn install(&self, package: &Package, timeout: Option<Duration>) -> Result<()> {
        self.backend.install(package, timeout)
    }

    /// Install a package unless the installed version already satisfies it.
    ///
    /// Returns whether anything was installed.
    pub fn ensure(&self, package: &Package, timeout: Option<Duration>) -> Result<bool> {
        let status = self.backend.query(package, timeout)?;
        if status.satisfies(package) {
            log::debug!("{package} already satisfied by {:?}", status.version());
            return Ok(false);
        }
        self.backend.install(package, timeout)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeBackend {
        installed: Mutex<Vec<String>>,
    }

    impl Backend for FakeBackend {
        fn manager(&self) -> Manager {
            Manager::Apt
        }

        fn is_available(&self) -> bool {
            true
        }

        fn query(&self, package: &Package, _timeout: Option<Duration>) -> Result<PackageStatus> {
            if self.installed.lock().unwrap().contains(&package.name) {
                Ok(PackageStatus::Installed {
                    version: "1.0-1".to_string(),
                })
            } else {
                Ok(PackageStatus::Absent)
            }
        }

        fn install(&self, package: &Package, _timeout: Option<Duration>) -> Result<()> {
            if package.name == "missing" {
                return Err(Error::from_output(
                    "apt-get",
                    "E: Unable to locate package missing",
                    Some("missing"),
                ));
            }
            self.installed.lock().unwrap().push(package.name.clone());
            Ok(())
        }
    }

    fn client() -> Client {
        Client::with_backend(Box::new(FakeBackend {
            installed: Mutex::new(vec!["git".to_string()]),
        }))
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let client = client();
        let nginx = Package::new("nginx");
        assert!(client.ensure(&nginx, None).unwrap());
        assert!(!client.ensure(&nginx, None).unwrap());
        assert!(!client.ensure(&Package::new("git"), None).unwrap());
    }

    #[test]
    fn test_ensure_reinstalls_wrong_version() {
        let client = client();
        let pinned = Package::new("git").with_version("2.0");
        assert!(client.ensure(&pinned, None).unwrap());
    }

    #[test]
    fn test_ensure_propagates_category() {
        let err = client().ensure(&Package::new("missing"), None).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert!(err.category().advice().contains("package name"));
    }
}
