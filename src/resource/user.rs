//! User resource - system accounts

use anyhow::{Context, Result};
use declarative::{ApplyContext, ChangeResult, Resource, ResourceState};
use std::path::Path;
use std::sync::Arc;

use super::{Drift, drift_state};
use crate::backend::{AccountManager, UserSpec};
use crate::sys::{self, Account};

/// A system account
#[derive(Debug, Clone)]
pub struct User {
    pub spec: UserSpec,
    accounts: Arc<dyn AccountManager>,
}

impl User {
    pub fn new(spec: UserSpec, accounts: Arc<dyn AccountManager>) -> Self {
        Self { spec, accounts }
    }

    fn attribute_drift(&self, account: &Account) -> Vec<Drift> {
        let mut drifts = Vec::new();
        let mut compare = |attribute, current: String, desired: Option<String>| {
            if let Some(desired) = desired
                && desired != current
            {
                drifts.push(Drift {
                    attribute,
                    current,
                    desired,
                });
            }
        };
        compare(
            "home",
            account.home.to_string_lossy().to_string(),
            self.spec
                .home
                .as_ref()
                .map(|h| h.to_string_lossy().to_string()),
        );
        compare("shell", account.shell.clone(), self.spec.shell.clone());
        compare("comment", account.comment.clone(), self.spec.comment.clone());
        drifts
    }

    fn missing_home(&self) -> Option<&Path> {
        let home = self.spec.home.as_deref()?;
        (self.spec.manage_home && !home.exists()).then_some(home)
    }

    fn create_home(&self, home: &Path) -> Result<()> {
        let account = self
            .accounts
            .lookup(&self.spec.name)?
            .with_context(|| format!("user {} vanished", self.spec.name))?;
        log::info!("creating home {}", home.display());
        std::fs::create_dir_all(home)
            .with_context(|| format!("Failed to create {}", home.display()))?;
        sys::chown(home, Some(account.uid), Some(account.gid))
    }
}

impl Resource for User {
    fn id(&self) -> String {
        self.spec.name.clone()
    }

    fn description(&self) -> String {
        match &self.spec.home {
            Some(home) => format!("User {} (home {})", self.spec.name, home.display()),
            None => format!("User {}", self.spec.name),
        }
    }

    fn resource_type(&self) -> &'static str {
        "user"
    }

    fn current_state(&self) -> Result<ResourceState> {
        let Some(account) = self.accounts.lookup(&self.spec.name)? else {
            return Ok(ResourceState::Absent);
        };
        let mut drifts = self.attribute_drift(&account);
        if let Some(home) = self.missing_home() {
            drifts.push(Drift {
                attribute: "home_dir",
                current: "missing".to_string(),
                desired: home.to_string_lossy().to_string(),
            });
        }
        Ok(drift_state(&drifts))
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present { details: None }
    }

    fn converge(&self, ctx: &mut ApplyContext) -> Result<ChangeResult> {
        let Some(account) = self.accounts.lookup(&self.spec.name)? else {
            self.accounts.create(&self.spec, ctx.timeout)?;
            if let Some(home) = self.missing_home() {
                self.create_home(home)?;
            }
            return Ok(ChangeResult::Changed);
        };

        let drifts = self.attribute_drift(&account);
        let mut changed = false;
        if !drifts.is_empty() {
            for drift in &drifts {
                log::info!("user {}: {drift}", self.spec.name);
            }
            self.accounts.modify(&self.spec, ctx.timeout)?;
            changed = true;
        }
        if let Some(home) = self.missing_home() {
            self.create_home(home)?;
            changed = true;
        }
        Ok(ChangeResult::changed_if(changed))
    }
}
