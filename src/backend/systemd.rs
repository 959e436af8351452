//! systemd service supervisor

use super::{ServiceStatus, ServiceSupervisor};
use anyhow::{Context, Result};
use declarative::Invocation;
use std::time::Duration;

/// Drives services through `systemctl`; `pgrep -f` answers pattern probes
#[derive(Debug, Clone)]
pub struct Systemd {
    systemctl: String,
}

impl Default for Systemd {
    fn default() -> Self {
        Self {
            systemctl: "systemctl".to_string(),
        }
    }
}

impl Systemd {
    pub fn new() -> Self {
        Self::default()
    }

    fn systemctl(&self, verb: &str, name: &str, timeout: Option<Duration>) -> Invocation {
        Invocation::new(&self.systemctl)
            .arg(verb)
            .arg(name)
            .timeout(timeout)
    }

    fn control(&self, verb: &str, name: &str, timeout: Option<Duration>) -> Result<()> {
        log::info!("systemctl {verb} {name}");
        self.systemctl(verb, name, timeout)
            .run()
            .with_context(|| format!("Failed to {verb} {name}"))?;
        Ok(())
    }
}

fn pattern_probe(pattern: &str, timeout: Option<Duration>) -> Invocation {
    Invocation::new("pgrep")
        .args(["-f", pattern])
        .timeout(timeout)
}

impl ServiceSupervisor for Systemd {
    fn enable(&self, name: &str, timeout: Option<Duration>) -> Result<()> {
        self.control("enable", name, timeout)
    }

    fn is_enabled(&self, name: &str, timeout: Option<Duration>) -> Result<bool> {
        Ok(self
            .systemctl("is-enabled", name, timeout)
            .arg("--quiet")
            .succeeds()?)
    }

    fn start(&self, name: &str, timeout: Option<Duration>) -> Result<()> {
        self.control("start", name, timeout)
    }

    fn stop(&self, name: &str, timeout: Option<Duration>) -> Result<()> {
        self.control("stop", name, timeout)
    }

    fn restart(&self, name: &str, timeout: Option<Duration>) -> Result<()> {
        self.control("restart", name, timeout)
    }

    fn reload(&self, name: &str, timeout: Option<Duration>) -> Result<()> {
        self.control("reload", name, timeout)
    }

    fn status(
        &self,
        name: &str,
        pattern: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ServiceStatus> {
        let probe = match pattern {
            Some(pattern) => pattern_probe(pattern, timeout),
            None => self
                .systemctl("is-active", name, timeout)
                .arg("--quiet"),
        };
        if probe.succeeds()? {
            Ok(ServiceStatus::Running)
        } else {
            Ok(ServiceStatus::Stopped)
        }
    }
}
