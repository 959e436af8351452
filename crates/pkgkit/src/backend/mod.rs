//! Backend abstraction for package managers.
//!
//! The [`Backend`] trait defines the interface the provisioner needs from a
//! package manager, allowing for different implementations (real CLI, fakes
//! for testing).

pub mod apt;
pub mod dnf;
pub mod gem;

use crate::error::{Error, Result};
use crate::types::{Manager, Package, PackageStatus};
use declarative::Invocation;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Backend trait for package manager operations.
///
/// Every call takes the time budget of the declaration it serves; `None`
/// means wait indefinitely.
pub trait Backend: Send + Sync {
    /// Which manager this backend drives.
    fn manager(&self) -> Manager;

    /// Check if the manager is available on this host.
    fn is_available(&self) -> bool;

    /// Report whether a package is installed, and at which version.
    fn query(&self, package: &Package, timeout: Option<Duration>) -> Result<PackageStatus>;

    /// Install a package.
    fn install(&self, package: &Package, timeout: Option<Duration>) -> Result<()>;
}

/// Create the backend for a manager.
pub fn for_manager(manager: Manager) -> Box<dyn Backend> {
    match manager {
        Manager::Apt => Box::new(apt::AptBackend::new()),
        Manager::Dnf | Manager::Yum => Box::new(dnf::DnfBackend::new(manager)),
        Manager::Gem => Box::new(gem::GemBackend::new(None)),
    }
}

/// Run a manager command and return stdout, categorizing failures.
pub(crate) fn run_checked(
    manager: Manager,
    invocation: &Invocation,
    package_name: Option<&str>,
) -> Result<String> {
    let output = invocation.output()?;
    if !output.success {
        return Err(Error::from_output(
            manager.program(),
            &output.stderr_str(),
            package_name,
        ));
    }
    Ok(output.stdout_str())
}

/// Locate an executable on `PATH`.
pub fn find_program(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    find_in(name, std::env::split_paths(&path))
}

fn find_in(name: &str, dirs: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    if name.contains('/') {
        let candidate = Path::new(name);
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    dirs.into_iter()
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
