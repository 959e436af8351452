//! RubyGems backend using `gem`.

use crate::backend::{Backend, find_program, run_checked};
use crate::error::Result;
use crate::types::{Manager, Package, PackageStatus};
use declarative::Invocation;
use std::time::Duration;

/// Backend that executes real `gem` commands.
pub struct GemBackend {
    /// Path or name of the gem executable (e.g. a Ruby under /usr/local)
    gem_binary: String,
}

impl GemBackend {
    /// Create a backend for `gem_binary`, defaulting to `gem` on PATH.
    pub fn new(gem_binary: Option<&str>) -> Self {
        Self {
            gem_binary: gem_binary.unwrap_or("gem").to_string(),
        }
    }

    fn install_invocation(&self, package: &Package) -> Invocation {
        let mut invocation = Invocation::new(&self.gem_binary)
            .args(["install", "--no-document"])
            .arg(&package.name);
        if let Some(version) = &package.version {
            invocation = invocation.args(["-v", version.as_str()]);
        }
        invocation.args(package.options.iter().map(String::as_str))
    }
}

impl Backend for GemBackend {
    fn manager(&self) -> Manager {
        Manager::Gem
    }

    fn is_available(&self) -> bool {
        find_program(&self.gem_binary).is_some()
    }

    fn query(&self, package: &Package, timeout: Option<Duration>) -> Result<PackageStatus> {
        let invocation = Invocation::new(&self.gem_binary)
            .args(["list", "--local", "--exact"])
            .arg(&package.name)
            .timeout(timeout);
        let stdout = run_checked(Manager::Gem, &invocation, Some(&package.name))?;
        Ok(parse_gem_list(&stdout, package))
    }

    fn install(&self, package: &Package, timeout: Option<Duration>) -> Result<()> {
        log::info!("gem install {package}");
        let invocation = self.install_invocation(package).timeout(timeout);
        run_checked(Manager::Gem, &invocation, Some(&package.name))?;
        Ok(())
    }
}

/// Parse `gem list --exact` output, e.g. `bundler (2.4.22, default: 2.3.5)`.
///
/// Several versions may be installed side by side; a pinned version is
/// reported when present, otherwise the newest.
fn parse_gem_list(stdout: &str, package: &Package) -> PackageStatus {
    let prefix = format!("{} (", package.name);
    let Some(versions) = stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix(prefix.as_str()))
        .and_then(|rest| rest.strip_suffix(')'))
    else {
        return PackageStatus::Absent;
    };

    let versions: Vec<&str> = versions
        .split(',')
        .map(|v| v.trim().trim_start_matches("default:").trim())
        .filter(|v| !v.is_empty())
        .collect();

    let chosen = package
        .version
        .as_deref()
        .and_then(|wanted| versions.iter().find(|v| **v == wanted))
        .or_else(|| versions.first());

    match chosen {
        Some(version) => PackageStatus::Installed {
            version: (*version).to_string(),
        },
        None => PackageStatus::Absent,
    }
}
