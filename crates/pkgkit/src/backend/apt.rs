//! Debian/Ubuntu backend using `apt-get` and `dpkg-query`.

use crate::backend::{Backend, find_program, run_checked};
use crate::error::Result;
use crate::types::{Manager, Package, PackageStatus};
use declarative::Invocation;
use std::time::Duration;

/// Backend that executes real `apt-get` commands.
pub struct AptBackend {
    apt_get: String,
    dpkg_query: String,
}

impl AptBackend {
    /// Create a new AptBackend.
    pub fn new() -> Self {
        Self {
            apt_get: "apt-get".to_string(),
            dpkg_query: "dpkg-query".to_string(),
        }
    }

    fn install_invocation(&self, package: &Package) -> Invocation {
        let target = match &package.version {
            Some(version) => format!("{}={version}", package.name),
            None => package.name.clone(),
        };
        Invocation::new(&self.apt_get)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .args(["install", "-y", "-q"])
            .args(package.options.iter().map(String::as_str))
            .arg(target)
    }
}

impl Default for AptBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for AptBackend {
    fn manager(&self) -> Manager {
        Manager::Apt
    }

    fn is_available(&self) -> bool {
        find_program(&self.apt_get).is_some() && find_program(&self.dpkg_query).is_some()
    }

    fn query(&self, package: &Package, timeout: Option<Duration>) -> Result<PackageStatus> {
        let output = Invocation::new(&self.dpkg_query)
            .args(["-W", "-f=${Status}\t${Version}"])
            .arg(&package.name)
            .timeout(timeout)
            .output()?;

        // dpkg-query exits 1 for packages it has never heard of
        if !output.success {
            return Ok(PackageStatus::Absent);
        }
        Ok(parse_dpkg_status(&output.stdout_str()))
    }

    fn install(&self, package: &Package, timeout: Option<Duration>) -> Result<()> {
        log::info!("apt-get install {package}");
        let invocation = self.install_invocation(package).timeout(timeout);
        run_checked(Manager::Apt, &invocation, Some(&package.name))?;
        Ok(())
    }
}

/// Parse `${Status}\t${Version}` output from dpkg-query.
fn parse_dpkg_status(stdout: &str) -> PackageStatus {
    let line = stdout.lines().next().unwrap_or_default();
    let (status, version) = line.split_once('\t').unwrap_or((line, ""));

    // Status is "want flag state", e.g. "install ok installed" or
    // "deinstall ok config-files"
    let installed = status.split_whitespace().nth(2) == Some("installed");
    if installed && !version.trim().is_empty() {
        PackageStatus::Installed {
            version: version.trim().to_string(),
        }
    } else {
        PackageStatus::Absent
    }
}
