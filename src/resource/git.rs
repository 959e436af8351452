//! Git resource - working copies at a revision

use anyhow::{Context, Result};
use declarative::{ApplyContext, ChangeResult, Resource, ResourceState};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{RunOptions, VcsClient};
use crate::sys;

const ACTIONS: &[&str] = &["checkout", "sync"];

/// How the working copy is converged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitAction {
    /// Clone when missing, otherwise leave alone
    #[default]
    Checkout,
    /// Fetch and force the working copy to the revision
    Sync,
}

/// A git working copy
#[derive(Debug, Clone)]
pub struct Git {
    pub destination: PathBuf,
    pub repository: String,
    pub revision: String,
    pub action: GitAction,
    pub user: Option<String>,
    pub group: Option<String>,
    vcs: Arc<dyn VcsClient>,
    probe_timeout: Option<Duration>,
}

impl Git {
    pub fn new(
        destination: impl Into<PathBuf>,
        repository: impl Into<String>,
        revision: impl Into<String>,
        vcs: Arc<dyn VcsClient>,
    ) -> Self {
        Self {
            destination: destination.into(),
            repository: repository.into(),
            revision: revision.into(),
            action: GitAction::Checkout,
            user: None,
            group: None,
            vcs,
            probe_timeout: None,
        }
    }

    pub fn action(mut self, action: GitAction) -> Self {
        self.action = action;
        self
    }

    pub fn run_as(mut self, user: Option<String>, group: Option<String>) -> Self {
        self.user = user;
        self.group = group;
        self
    }

    pub fn probe_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Options for the VCS client, running as the declared account
    fn options(&self, timeout: Option<Duration>) -> Result<RunOptions> {
        let opts = RunOptions::with_timeout(timeout);
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
        Ok(opts.run_as(
            account.as_ref().map(|a| a.uid),
            gid,
            account.map(|a| a.home),
        ))
    }

    fn sync_needed(&self, opts: &RunOptions) -> Result<bool> {
        let Some(head) = self.vcs.current_revision(&self.destination, opts)? else {
            return Ok(true);
        };
        if self.vcs.is_dirty(&self.destination, opts)? {
            return Ok(true);
        }
        let wanted = self
            .vcs
            .resolve_revision(&self.repository, &self.revision, opts)?;
        Ok(head != wanted)
    }

    fn checkout(&self, opts: &RunOptions) -> Result<ChangeResult> {
        if self.vcs.current_revision(&self.destination, opts)?.is_some() {
            return Ok(ChangeResult::Unchanged);
        }
        self.vcs
            .checkout(&self.repository, &self.revision, &self.destination, opts)?;
        Ok(ChangeResult::Changed)
    }

    fn sync(&self, opts: &RunOptions) -> Result<ChangeResult> {
        let before = self.vcs.current_revision(&self.destination, opts)?;
        let dirty = before.is_some() && self.vcs.is_dirty(&self.destination, opts)?;
        self.vcs
            .sync(&self.repository, &self.revision, &self.destination, opts)?;
        let after = self.vcs.current_revision(&self.destination, opts)?;
        Ok(ChangeResult::changed_if(dirty || before != after))
    }
}

impl Resource for Git {
    fn id(&self) -> String {
        self.destination.to_string_lossy().to_string()
    }

    fn description(&self) -> String {
        let verb = match self.action {
            GitAction::Checkout => "Check out",
            GitAction::Sync => "Sync",
        };
        format!(
            "{verb} {}@{} into {}",
            self.repository,
            self.revision,
            self.destination.display()
        )
    }

    fn resource_type(&self) -> &'static str {
        "git"
    }

    fn current_state(&self) -> Result<ResourceState> {
        let opts = self.options(self.probe_timeout)?;
        match self.vcs.current_revision(&self.destination, &opts)? {
            None => Ok(ResourceState::Absent),
            Some(head) => Ok(ResourceState::Present { details: Some(head) }),
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present {
            details: Some(self.revision.clone()),
        }
    }

    fn needs_apply(&self) -> Result<bool> {
        let opts = self.options(self.probe_timeout)?;
        match self.action {
            GitAction::Checkout => Ok(self
                .vcs
                .current_revision(&self.destination, &opts)?
                .is_none()),
            GitAction::Sync => self.sync_needed(&opts),
        }
    }

    fn converge(&self, ctx: &mut ApplyContext) -> Result<ChangeResult> {
        let opts = self.options(ctx.timeout)?;
        match self.action {
            GitAction::Checkout => self.checkout(&opts),
            GitAction::Sync => self.sync(&opts),
        }
    }

    fn actions(&self) -> &'static [&'static str] {
        ACTIONS
    }

    fn run_action(&self, action: &str, ctx: &mut ApplyContext) -> Result<ChangeResult> {
        let opts = self.options(ctx.timeout)?;
        match action {
            "checkout" => self.checkout(&opts),
            "sync" => self.sync(&opts),
            other => anyhow::bail!("git does not support action '{other}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    /// Upstream with a movable branch head and a local working copy
    #[derive(Debug, Default)]
    struct FakeVcs {
        upstream: Mutex<String>,
        head: Mutex<Option<String>>,
        dirty: Mutex<bool>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl VcsClient for FakeVcs {
        fn checkout(&self, _url: &str, _rev: &str, _dest: &Path, _opts: &RunOptions) -> Result<()> {
            self.calls.lock().unwrap().push("checkout");
            *self.head.lock().unwrap() = Some(self.upstream.lock().unwrap().clone());
            Ok(())
        }

        fn sync(&self, _url: &str, _rev: &str, _dest: &Path, _opts: &RunOptions) -> Result<()> {
            self.calls.lock().unwrap().push("sync");
            *self.head.lock().unwrap() = Some(self.upstream.lock().unwrap().clone());
            *self.dirty.lock().unwrap() = false;
            Ok(())
        }

        fn current_revision(&self, _dest: &Path, _opts: &RunOptions) -> Result<Option<String>> {
            Ok(self.head.lock().unwrap().clone())
        }

        fn resolve_revision(&self, _url: &str, _rev: &str, _opts: &RunOptions) -> Result<String> {
            Ok(self.upstream.lock().unwrap().clone())
        }

        fn is_dirty(&self, _dest: &Path, _opts: &RunOptions) -> Result<bool> {
            Ok(*self.dirty.lock().unwrap())
        }
    }

    fn fake(upstream: &str) -> Arc<FakeVcs> {
        let vcs = FakeVcs::default();
        *vcs.upstream.lock().unwrap() = upstream.to_string();
        Arc::new(vcs)
    }

    #[test]
    fn test_checkout_clones_once() {
        let vcs = fake("aaa");
        let git = Git::new("/srv/app", "https://example.com/app.git", "main", vcs.clone());
        let mut ctx = ApplyContext::new(false, false);

        assert!(git.needs_apply().unwrap());
        assert_eq!(git.converge(&mut ctx).unwrap(), ChangeResult::Changed);

        // upstream moves on, checkout leaves the working copy alone
        *vcs.upstream.lock().unwrap() = "bbb".to_string();
        assert!(!git.needs_apply().unwrap());
        assert_eq!(git.converge(&mut ctx).unwrap(), ChangeResult::Unchanged);
        assert_eq!(*vcs.calls.lock().unwrap(), vec!["checkout"]);
    }

    #[test]
    fn test_sync_follows_upstream() {
        let vcs = fake("aaa");
        let git = Git::new("/srv/http", "https://example.com/http.git", "main", vcs.clone())
            .action(GitAction::Sync);
        let mut ctx = ApplyContext::new(false, false);

        assert_eq!(git.converge(&mut ctx).unwrap(), ChangeResult::Changed);
        assert!(!git.needs_apply().unwrap());
        assert_eq!(git.converge(&mut ctx).unwrap(), ChangeResult::Unchanged);

        *vcs.upstream.lock().unwrap() = "bbb".to_string();
        assert!(git.needs_apply().unwrap());
        assert_eq!(git.converge(&mut ctx).unwrap(), ChangeResult::Changed);
    }

    #[test]
    fn test_sync_discards_local_changes() {
        let vcs = fake("aaa");
        let git = Git::new("/srv/http", "https://example.com/http.git", "main", vcs.clone())
            .action(GitAction::Sync);
        let mut ctx = ApplyContext::new(false, false);
        git.converge(&mut ctx).unwrap();

        *vcs.dirty.lock().unwrap() = true;
        assert!(git.needs_apply().unwrap());
        assert_eq!(git.converge(&mut ctx).unwrap(), ChangeResult::Changed);
        assert!(!*vcs.dirty.lock().unwrap());
    }

    #[test]
    fn test_sync_action_from_notification() {
        let vcs = fake("aaa");
        let git = Git::new("/srv/app", "https://example.com/app.git", "main", vcs.clone());
        let mut ctx = ApplyContext::new(false, false);
        assert_eq!(git.run_action("sync", &mut ctx).unwrap(), ChangeResult::Changed);
        assert!(git.run_action("merge", &mut ctx).is_err());
    }
}
