//! External collaborators used by resource providers
//!
//! Each collaborator sits behind a trait so providers can be exercised
//! against fakes. The real implementations shell out through
//! [`declarative::Invocation`], which applies the declaration timeout.

pub mod accounts;
pub mod git;
pub mod systemd;
pub mod template;

pub use accounts::{AccountManager, UserSpec};

use anyhow::Result;
use declarative::Invocation;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use toml::Table;

/// How a collaborator should run its external programs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// `HOME` for the child, set when running as another user
    pub home: Option<PathBuf>,
}

impl RunOptions {
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn run_as(mut self, uid: Option<u32>, gid: Option<u32>, home: Option<PathBuf>) -> Self {
        self.uid = uid;
        self.gid = gid;
        self.home = home;
        self
    }

    /// Start an invocation carrying these options
    pub fn command(&self, program: &str) -> Invocation {
        let invocation = Invocation::new(program)
            .timeout(self.timeout)
            .run_as(self.uid, self.gid);
        match &self.home {
            Some(home) => invocation.env("HOME", home.to_string_lossy()),
            None => invocation,
        }
    }
}

/// Version-control client
pub trait VcsClient: Send + Sync + fmt::Debug {
    /// Clone `url` into `dest` and check out `revision`
    fn checkout(&self, url: &str, revision: &str, dest: &Path, opts: &RunOptions) -> Result<()>;

    /// Fetch `url` and force the working copy at `dest` to `revision`,
    /// discarding local modifications to tracked files
    fn sync(&self, url: &str, revision: &str, dest: &Path, opts: &RunOptions) -> Result<()>;

    /// Commit checked out at `dest`, `None` when there is no working copy
    fn current_revision(&self, dest: &Path, opts: &RunOptions) -> Result<Option<String>>;

    /// Commit that `revision` names at `url`
    fn resolve_revision(&self, url: &str, revision: &str, opts: &RunOptions) -> Result<String>;

    /// Whether tracked files at `dest` have local modifications
    fn is_dirty(&self, dest: &Path, opts: &RunOptions) -> Result<bool>;
}

/// Template/content renderer
pub trait Renderer: Send + Sync + fmt::Debug {
    fn render(&self, template_id: &str, variables: &Table) -> Result<Vec<u8>>;
}

/// Whether a service is up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running,
    Stopped,
}

/// Service supervisor
pub trait ServiceSupervisor: Send + Sync + fmt::Debug {
    fn enable(&self, name: &str, timeout: Option<Duration>) -> Result<()>;
    fn is_enabled(&self, name: &str, timeout: Option<Duration>) -> Result<bool>;
    fn start(&self, name: &str, timeout: Option<Duration>) -> Result<()>;
    fn stop(&self, name: &str, timeout: Option<Duration>) -> Result<()>;
    fn restart(&self, name: &str, timeout: Option<Duration>) -> Result<()>;
    fn reload(&self, name: &str, timeout: Option<Duration>) -> Result<()>;

    /// Running state, probed by process `pattern` when one is given
    fn status(
        &self,
        name: &str,
        pattern: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ServiceStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_options_apply_to_invocation() {
        let opts = RunOptions::with_timeout(Some(Duration::from_secs(5))).run_as(
            Some(998),
            Some(998),
            Some(PathBuf::from("/home/git")),
        );
        assert_eq!(opts.command("git").arg("status").display(), "git status");
        assert_eq!(opts.uid, Some(998));
    }
}
