//! Service resource - enable and start services, restart on notification

use anyhow::{Result, bail};
use declarative::{ApplyContext, ChangeResult, Resource, ResourceState};
use std::sync::Arc;
use std::time::Duration;

use super::{Drift, drift_state};
use crate::backend::{ServiceStatus, ServiceSupervisor};

const ACTIONS: &[&str] = &["start", "stop", "restart", "reload", "enable"];

/// A supervised service
#[derive(Debug, Clone)]
pub struct Service {
    pub name: String,
    /// Process pattern that proves the service is running
    pub pattern: Option<String>,
    /// Ensure the service starts at boot
    pub enabled: bool,
    /// Ensure the service is running
    pub running: bool,
    supervisor: Arc<dyn ServiceSupervisor>,
    probe_timeout: Option<Duration>,
}

impl Service {
    pub fn new(name: impl Into<String>, supervisor: Arc<dyn ServiceSupervisor>) -> Self {
        Self {
            name: name.into(),
            pattern: None,
            enabled: false,
            running: false,
            supervisor,
            probe_timeout: None,
        }
    }

    pub fn pattern(mut self, pattern: Option<String>) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn running(mut self, running: bool) -> Self {
        self.running = running;
        self
    }

    pub fn probe_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.probe_timeout = timeout;
        self
    }

    fn is_running(&self, timeout: Option<Duration>) -> Result<bool> {
        let status = self
            .supervisor
            .status(&self.name, self.pattern.as_deref(), timeout)?;
        Ok(status == ServiceStatus::Running)
    }

    fn needs_enable(&self, timeout: Option<Duration>) -> Result<bool> {
        Ok(self.enabled && !self.supervisor.is_enabled(&self.name, timeout)?)
    }

    fn needs_start(&self, timeout: Option<Duration>) -> Result<bool> {
        Ok(self.running && !self.is_running(timeout)?)
    }
}

impl Resource for Service {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        match (self.enabled, self.running) {
            (true, true) => format!("Enable and start {}", self.name),
            (true, false) => format!("Enable {}", self.name),
            (false, true) => format!("Start {}", self.name),
            (false, false) => format!("Service {}", self.name),
        }
    }

    fn resource_type(&self) -> &'static str {
        "service"
    }

    fn current_state(&self) -> Result<ResourceState> {
        let mut drifts = Vec::new();
        if self.needs_enable(self.probe_timeout)? {
            drifts.push(Drift {
                attribute: "enabled",
                current: "false".to_string(),
                desired: "true".to_string(),
            });
        }
        if self.needs_start(self.probe_timeout)? {
            drifts.push(Drift {
                attribute: "running",
                current: "false".to_string(),
                desired: "true".to_string(),
            });
        }
        Ok(drift_state(&drifts))
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present { details: None }
    }

    fn converge(&self, ctx: &mut ApplyContext) -> Result<ChangeResult> {
        let mut changed = false;
        if self.needs_enable(ctx.timeout)? {
            self.supervisor.enable(&self.name, ctx.timeout)?;
            changed = true;
        }
        if self.needs_start(ctx.timeout)? {
            self.supervisor.start(&self.name, ctx.timeout)?;
            changed = true;
        }
        Ok(ChangeResult::changed_if(changed))
    }

    fn actions(&self) -> &'static [&'static str] {
        ACTIONS
    }

    fn run_action(&self, action: &str, ctx: &mut ApplyContext) -> Result<ChangeResult> {
        let timeout = ctx.timeout;
        match action {
            "start" => {
                if self.is_running(timeout)? {
                    return Ok(ChangeResult::Unchanged);
                }
                self.supervisor.start(&self.name, timeout)?;
            }
            "stop" => {
                if !self.is_running(timeout)? {
                    return Ok(ChangeResult::Unchanged);
                }
                self.supervisor.stop(&self.name, timeout)?;
            }
            "enable" => {
                if self.supervisor.is_enabled(&self.name, timeout)? {
                    return Ok(ChangeResult::Unchanged);
                }
                self.supervisor.enable(&self.name, timeout)?;
            }
            "restart" => self.supervisor.restart(&self.name, timeout)?,
            "reload" => self.supervisor.reload(&self.name, timeout)?,
            other => bail!("service does not support action '{other}'"),
        }
        Ok(ChangeResult::Changed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Supervisor that records calls and flips state
    #[derive(Debug, Default)]
    pub struct FakeSupervisor {
        pub calls: Mutex<Vec<String>>,
        pub enabled: Mutex<bool>,
        pub running: Mutex<bool>,
        /// Timeout handed to each status check
        pub status_timeouts: Mutex<Vec<Option<Duration>>>,
    }

    impl FakeSupervisor {
        fn record(&self, verb: &str, name: &str) {
            self.calls.lock().unwrap().push(format!("{verb} {name}"));
        }
    }

    impl ServiceSupervisor for FakeSupervisor {
        fn enable(&self, name: &str, _timeout: Option<Duration>) -> Result<()> {
            self.record("enable", name);
            *self.enabled.lock().unwrap() = true;
            Ok(())
        }

        fn is_enabled(&self, _name: &str, timeout: Option<Duration>) -> Result<bool> {
            self.status_timeouts.lock().unwrap().push(timeout);
            Ok(*self.enabled.lock().unwrap())
        }

        fn start(&self, name: &str, _timeout: Option<Duration>) -> Result<()> {
            self.record("start", name);
            *self.running.lock().unwrap() = true;
            Ok(())
        }

        fn stop(&self, name: &str, _timeout: Option<Duration>) -> Result<()> {
            self.record("stop", name);
            *self.running.lock().unwrap() = false;
            Ok(())
        }

        fn restart(&self, name: &str, _timeout: Option<Duration>) -> Result<()> {
            self.record("restart", name);
            *self.running.lock().unwrap() = true;
            Ok(())
        }

        fn reload(&self, name: &str, _timeout: Option<Duration>) -> Result<()> {
            self.record("reload", name);
            Ok(())
        }

        fn status(
            &self,
            _name: &str,
            _pattern: Option<&str>,
            timeout: Option<Duration>,
        ) -> Result<ServiceStatus> {
            self.status_timeouts.lock().unwrap().push(timeout);
            if *self.running.lock().unwrap() {
                Ok(ServiceStatus::Running)
            } else {
                Ok(ServiceStatus::Stopped)
            }
        }
    }

    #[test]
    fn test_enable_and_start_once() {
        let supervisor = Arc::new(FakeSupervisor::default());
        let service = Service::new("gitlab", supervisor.clone())
            .enabled(true)
            .running(true);
        let mut ctx = ApplyContext::new(false, false);

        assert!(service.needs_apply().unwrap());
        assert_eq!(service.converge(&mut ctx).unwrap(), ChangeResult::Changed);
        assert_eq!(service.converge(&mut ctx).unwrap(), ChangeResult::Unchanged);
        assert_eq!(
            *supervisor.calls.lock().unwrap(),
            vec!["enable gitlab", "start gitlab"]
        );
    }

    #[test]
    fn test_notification_only_service_is_unchanged() {
        let supervisor = Arc::new(FakeSupervisor::default());
        let service = Service::new("nginx", supervisor.clone());
        assert_eq!(
            service.converge(&mut ApplyContext::new(false, false)).unwrap(),
            ChangeResult::Unchanged
        );
        assert!(supervisor.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_actions() {
        let supervisor = Arc::new(FakeSupervisor::default());
        let service = Service::new("nginx", supervisor.clone());
        let mut ctx = ApplyContext::new(false, false);

        assert_eq!(service.run_action("restart", &mut ctx).unwrap(), ChangeResult::Changed);
        assert_eq!(service.run_action("start", &mut ctx).unwrap(), ChangeResult::Unchanged);
        assert_eq!(service.run_action("stop", &mut ctx).unwrap(), ChangeResult::Changed);
        assert!(service.run_action("explode", &mut ctx).is_err());
        assert_eq!(
            *supervisor.calls.lock().unwrap(),
            vec!["restart nginx", "stop nginx"]
        );
    }
}
