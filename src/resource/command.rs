//! Command resource - run a shell command

use anyhow::{Context, Result};
use declarative::{ApplyContext, ChangeResult, Invocation, Resource, ResourceState};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::sys;

const ACTIONS: &[&str] = &["run"];

/// A shell command, run on every converge unless `creates` exists
#[derive(Debug, Clone)]
pub struct Command {
    /// Identity used in addresses, e.g. `bundle-install`
    pub name: String,
    pub command: String,
    pub cwd: Option<PathBuf>,
    pub environment: BTreeMap<String, String>,
    pub user: Option<String>,
    pub group: Option<String>,
    /// Skip when this path exists
    pub creates: Option<PathBuf>,
}

impl Command {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            cwd: None,
            environment: BTreeMap::new(),
            user: None,
            group: None,
            creates: None,
        }
    }

    fn created(&self) -> bool {
        self.creates.as_ref().is_some_and(|path| path.exists())
    }

    /// Build the invocation, dropping to `user`/`group` when set
    fn invocation(&self, ctx: &ApplyContext) -> Result<Invocation> {
        let mut invocation = ctx.shell(&self.command).envs(&self.environment);
        if let Some(cwd) = &self.cwd {
            invocation = invocation.cwd(cwd);
        }

        let account = match &self.user {
            Some(user) => Some(
                sys::lookup_user(user)?.with_context(|| format!("unknown user '{user}'"))?,
            ),
            None => None,
        };
        let gid = match &self.group {
            Some(group) => Some(sys::resolve_gid(group)?),
            None => account.as_ref().map(|a| a.gid),
        };
        if let Some(account) = &account {
            if !self.environment.contains_key("HOME") {
                invocation = invocation.env("HOME", account.home.to_string_lossy());
            }
            invocation = invocation.env("USER", &account.name);
        }
        Ok(invocation.run_as(account.as_ref().map(|a| a.uid), gid))
    }

    fn execute(&self, ctx: &ApplyContext) -> Result<ChangeResult> {
        let invocation = self.invocation(ctx)?;
        log::info!("running {}", self.name);
        let output = invocation.run()?;
        let stdout = output.stdout_str();
        if !stdout.trim().is_empty() {
            log::debug!("{}: {}", self.name, stdout.trim_end());
        }
        Ok(ChangeResult::Changed)
    }
}

impl Resource for Command {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        format!("Run `{}`", self.command)
    }

    fn resource_type(&self) -> &'static str {
        "command"
    }

    fn current_state(&self) -> Result<ResourceState> {
        if self.created() {
            Ok(ResourceState::Present { details: None })
        } else {
            Ok(ResourceState::Absent)
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present { details: None }
    }

    fn converge(&self, ctx: &mut ApplyContext) -> Result<ChangeResult> {
        if self.created() {
            return Ok(ChangeResult::Unchanged);
        }
        self.execute(ctx)
    }

    fn actions(&self) -> &'static [&'static str] {
        ACTIONS
    }

    fn run_action(&self, action: &str, ctx: &mut ApplyContext) -> Result<ChangeResult> {
        match action {
            "run" => self.converge(ctx),
            other => anyhow::bail!("command does not support action '{other}'"),
        }
    }
}
