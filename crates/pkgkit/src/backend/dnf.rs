//! Fedora/RHEL backend using `dnf` (or `yum`) and `rpm`.

use crate::backend::{Backend, find_program, run_checked};
use crate::error::Result;
use crate::types::{Manager, Package, PackageStatus};
use declarative::Invocation;
use std::time::Duration;

/// Backend that executes real `dnf` or `yum` commands.
pub struct DnfBackend {
    manager: Manager,
}

impl DnfBackend {
    /// `manager` is either [`Manager::Dnf`] or [`Manager::Yum`].
    pub fn new(manager: Manager) -> Self {
        Self { manager }
    }

    fn install_invocation(&self, package: &Package) -> Invocation {
        let target = match &package.version {
            Some(version) => format!("{}-{version}", package.name),
            None => package.name.clone(),
        };
        Invocation::new(self.manager.program())
            .args(["install", "-y", "-q"])
            .args(package.options.iter().map(String::as_str))
            .arg(target)
    }
}

impl Backend for DnfBackend {
    fn manager(&self) -> Manager {
        self.manager
    }

    fn is_available(&self) -> bool {
        find_program(self.manager.program()).is_some() && find_program("rpm").is_some()
    }

    fn query(&self, package: &Package, timeout: Option<Duration>) -> Result<PackageStatus> {
        let output = Invocation::new("rpm")
            .args(["-q", "--queryformat", "%{VERSION}-%{RELEASE}\n"])
            .arg(&package.name)
            .timeout(timeout)
            .output()?;

        // "package foo is not installed" comes with exit status 1
        if !output.success {
            return Ok(PackageStatus::Absent);
        }
        Ok(parse_rpm_query(&output.stdout_str()))
    }

    fn install(&self, package: &Package, timeout: Option<Duration>) -> Result<()> {
        log::info!("{} install {package}", self.manager.program());
        let invocation = self.install_invocation(package).timeout(timeout);
        run_checked(self.manager, &invocation, Some(&package.name))?;
        Ok(())
    }
}

/// First line of `rpm -q --queryformat` output; several lines mean several
/// architectures are installed.
fn parse_rpm_query(stdout: &str) -> PackageStatus {
    match stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(version) => PackageStatus::Installed {
            version: version.to_string(),
        },
        None => PackageStatus::Absent,
    }
}
