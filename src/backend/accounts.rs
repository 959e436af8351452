//! System account management through shadow-utils

use crate::sys::{self, Account};
use anyhow::{Context, Result};
use declarative::Invocation;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Desired attributes of a system account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserSpec {
    pub name: String,
    pub home: Option<PathBuf>,
    pub shell: Option<String>,
    pub comment: Option<String>,
    /// Primary group, by name or id
    pub group: Option<String>,
    /// Allocate from the system uid range
    pub system: bool,
    /// Create the home directory (and move it when `home` changes)
    pub manage_home: bool,
}

/// Creates and inspects accounts
pub trait AccountManager: Send + Sync + fmt::Debug {
    fn lookup(&self, name: &str) -> Result<Option<Account>>;
    fn create(&self, spec: &UserSpec, timeout: Option<Duration>) -> Result<()>;
    fn modify(&self, spec: &UserSpec, timeout: Option<Duration>) -> Result<()>;
}

/// `useradd` / `usermod`, with passwd lookups through libc
#[derive(Debug, Clone, Default)]
pub struct ShadowUtils;

fn useradd(spec: &UserSpec) -> Invocation {
    let mut invocation = Invocation::new("useradd");
    if spec.system {
        invocation = invocation.arg("--system");
    }
    if let Some(comment) = &spec.comment {
        invocation = invocation.arg("--comment").arg(comment);
    }
    if let Some(home) = &spec.home {
        invocation = invocation.arg("--home-dir").arg(home.to_string_lossy());
    }
    if let Some(shell) = &spec.shell {
        invocation = invocation.arg("--shell").arg(shell);
    }
    if let Some(group) = &spec.group {
        invocation = invocation.arg("--gid").arg(group);
    }
    invocation
        .arg(if spec.manage_home {
            "--create-home"
        } else {
            "--no-create-home"
        })
        .arg(&spec.name)
}

fn usermod(spec: &UserSpec) -> Invocation {
    let mut invocation = Invocation::new("usermod");
    if let Some(comment) = &spec.comment {
        invocation = invocation.arg("--comment").arg(comment);
    }
    if let Some(home) = &spec.home {
        invocation = invocation.arg("--home").arg(home.to_string_lossy());
        if spec.manage_home {
            invocation = invocation.arg("--move-home");
        }
    }
    if let Some(shell) = &spec.shell {
        invocation = invocation.arg("--shell").arg(shell);
    }
    if let Some(group) = &spec.group {
        invocation = invocation.arg("--gid").arg(group);
    }
    invocation.arg(&spec.name)
}

impl AccountManager for ShadowUtils {
    fn lookup(&self, name: &str) -> Result<Option<Account>> {
        sys::lookup_user(name)
    }

    fn create(&self, spec: &UserSpec, timeout: Option<Duration>) -> Result<()> {
        log::info!("useradd {}", spec.name);
        useradd(spec)
            .timeout(timeout)
            .run()
            .with_context(|| format!("Failed to create user {}", spec.name))?;
        Ok(())
    }

    fn modify(&self, spec: &UserSpec, timeout: Option<Duration>) -> Result<()> {
        log::info!("usermod {}", spec.name);
        usermod(spec)
            .timeout(timeout)
            .run()
            .with_context(|| format!("Failed to modify user {}", spec.name))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_user() -> UserSpec {
        UserSpec {
            name: "git".to_string(),
            home: Some(PathBuf::from("/srv/git")),
            shell: Some("/bin/bash".to_string()),
            comment: Some("Gitlab User".to_string()),
            group: None,
            system: false,
            manage_home: true,
        }
    }

    #[test]
    fn test_useradd_arguments() {
        assert_eq!(
            useradd(&git_user()).display(),
            "useradd --comment Gitlab User --home-dir /srv/git --shell /bin/bash --create-home git"
        );
    }

    #[test]
    fn test_usermod_moves_managed_home() {
        assert_eq!(
            usermod(&git_user()).display(),
            "usermod --comment Gitlab User --home /srv/git --move-home --shell /bin/bash git"
        );

        let unmanaged = UserSpec {
            manage_home: false,
            shell: None,
            comment: None,
            ..git_user()
        };
        assert_eq!(usermod(&unmanaged).display(), "usermod --home /srv/git git");
    }

    #[test]
    fn test_lookup_root() {
        assert_eq!(ShadowUtils.lookup("root").unwrap().unwrap().uid, 0);
    }
}
