//! Resource providers
//!
//! Each provider implements [`declarative::Resource`] for one kind of
//! machine state. Providers never touch the engine; the collaborators they
//! need (package manager, VCS, renderer, supervisor) are injected.

pub mod archive;
pub mod command;
pub mod directory;
pub mod file;
pub mod git;
pub mod package;
pub mod remote_file;
pub mod service;
pub mod symlink;
pub mod user;

pub use archive::Archive;
pub use command::Command;
pub use directory::Directory;
pub use file::{Content, File};
pub use git::{Git, GitAction};
pub use package::Package;
pub use remote_file::RemoteFile;
pub use service::Service;
pub use symlink::Symlink;
pub use user::User;

use crate::sys;
use anyhow::{Context, Result, bail};
use std::fmt;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

/// Largest mode accepted, including setuid/setgid/sticky bits
const MAX_MODE: u32 = 0o7777;

/// Parse an octal mode such as `0755`, `00755` or `2770`
pub fn parse_mode(mode: &str) -> Result<u32> {
    let digits = mode.trim();
    if digits.is_empty() || !digits.chars().all(|c| ('0'..='7').contains(&c)) {
        bail!("invalid mode '{mode}': expected octal digits");
    }
    let value = u32::from_str_radix(digits, 8)
        .with_context(|| format!("invalid mode '{mode}'"))?;
    if value > MAX_MODE {
        bail!("invalid mode '{mode}': larger than 7777");
    }
    Ok(value)
}

/// One attribute that differs from what was declared
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drift {
    pub attribute: &'static str,
    pub current: String,
    pub desired: String,
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.attribute, self.current, self.desired)
    }
}

/// Fold drifts into a `Modified` state
pub fn drift_state(drifts: &[Drift]) -> declarative::ResourceState {
    if drifts.is_empty() {
        return declarative::ResourceState::Present { details: None };
    }
    let side = |pick: fn(&Drift) -> &String| {
        drifts
            .iter()
            .map(|d| format!("{}={}", d.attribute, pick(d)))
            .collect::<Vec<_>>()
            .join(", ")
    };
    declarative::ResourceState::Modified {
        from: side(|d| &d.current),
        to: side(|d| &d.desired),
    }
}

/// Owner, group and mode of a filesystem object
///
/// Unset attributes are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttrs {
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u32>,
}

impl FileAttrs {
    pub fn new(owner: Option<&str>, group: Option<&str>, mode: Option<u32>) -> Self {
        Self {
            owner: owner.map(str::to_string),
            group: group.map(str::to_string),
            mode,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.owner.is_none() && self.group.is_none() && self.mode.is_none()
    }

    /// Differences between `path` and these attributes
    ///
    /// An owner or group that does not exist yet counts as drift rather
    /// than an error, so a preview can run before the account is created.
    pub fn drift(&self, path: &Path) -> Result<Vec<Drift>> {
        let meta = std::fs::symlink_metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        let mut drifts = Vec::new();

        if let Some(owner) = &self.owner {
            let wanted = match sys::resolve_uid(owner) {
                Ok(uid) => Some(uid),
                Err(err) => {
                    log::debug!("owner {owner} unresolved: {err:#}");
                    None
                }
            };
            if wanted != Some(meta.uid()) {
                drifts.push(Drift {
                    attribute: "owner",
                    current: meta.uid().to_string(),
                    desired: owner.clone(),
                });
            }
        }

        if let Some(group) = &self.group {
            let wanted = sys::resolve_gid(group).ok();
            if wanted != Some(meta.gid()) {
                drifts.push(Drift {
                    attribute: "group",
                    current: meta.gid().to_string(),
                    desired: group.clone(),
                });
            }
        }

        if let Some(mode) = self.mode {
            let current = meta.permissions().mode() & MAX_MODE;
            if current != mode {
                drifts.push(Drift {
                    attribute: "mode",
                    current: format!("{current:04o}"),
                    desired: format!("{mode:04o}"),
                });
            }
        }

        Ok(drifts)
    }

    /// Apply ownership, then mode
    ///
    /// chown clears setuid/setgid bits, so the mode always goes last.
    pub fn apply(&self, path: &Path) -> Result<()> {
        let uid = self.owner.as_deref().map(sys::resolve_uid).transpose()?;
        let gid = self.group.as_deref().map(sys::resolve_gid).transpose()?;
        sys::chown(path, uid, gid)?;

        if let Some(mode) = self.mode {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
                .with_context(|| format!("Failed to chmod {}", path.display()))?;
        }
        Ok(())
    }

    /// Short rendering for descriptions, e.g. `git:git 0644`
    pub fn summary(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut parts = Vec::new();
        match (&self.owner, &self.group) {
            (Some(owner), Some(group)) => parts.push(format!("{owner}:{group}")),
            (Some(owner), None) => parts.push(owner.clone()),
            (None, Some(group)) => parts.push(format!(":{group}")),
            (None, None) => {}
        }
        if let Some(mode) = self.mode {
            parts.push(format!("{mode:04o}"));
        }
        Some(parts.join(" "))
    }
}

/// First 12 hex digits of the blake3 digest, for state summaries
pub fn short_digest(bytes: &[u8]) -> String {
    let hex = blake3::hash(bytes).to_hex();
    hex[..12].to_string()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("0755").unwrap(), 0o755);
        assert_eq!(parse_mode("00755").unwrap(), 0o755);
        assert_eq!(parse_mode("2770").unwrap(), 0o2770);
        assert_eq!(parse_mode("600").unwrap(), 0o600);
    }

    #[test]
    fn test_parse_mode_rejects_garbage() {
        assert!(parse_mode("0789").is_err());
        assert!(parse_mode("rwxr-xr-x").is_err());
        assert!(parse_mode("17777").is_err());
        assert!(parse_mode("").is_err());
    }

    #[test]
    fn test_mode_drift_and_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.yml");
        std::fs::write(&path, "x").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let attrs = FileAttrs::new(None, None, Some(0o600));
        let drifts = attrs.drift(&path).unwrap();
        assert_eq!(drifts.len(), 1);
        assert_eq!(drifts[0].to_string(), "mode 0644 -> 0600");

        attrs.apply(&path).unwrap();
        assert!(attrs.drift(&path).unwrap().is_empty());
        assert_eq!(testing::mode_of(&path), 0o600);
    }

    #[test]
    fn test_owner_drift_for_unknown_user() {
        let dir = tempfile::tempdir().unwrap();
        let attrs = FileAttrs::new(Some("provisor-no-such-user"), None, None);
        let drifts = attrs.drift(dir.path()).unwrap();
        assert_eq!(drifts[0].attribute, "owner");
        assert!(attrs.apply(dir.path()).is_err());
    }

    #[test]
    fn test_current_owner_has_no_drift() {
        let dir = tempfile::tempdir().unwrap();
        let attrs = FileAttrs::new(Some(testing::current_user().as_str()), None, None);
        assert!(attrs.drift(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_drift_state() {
        assert_eq!(
            drift_state(&[]),
            declarative::ResourceState::Present { details: None }
        );
        let state = drift_state(&[Drift {
            attribute: "mode",
            current: "0644".to_string(),
            desired: "0600".to_string(),
        }]);
        assert_eq!(
            state,
            declarative::ResourceState::Modified {
                from: "mode=0644".to_string(),
                to: "mode=0600".to_string()
            }
        );
    }

    #[test]
    fn test_summary() {
        assert_eq!(FileAttrs::default().summary(), None);
        assert_eq!(
            FileAttrs::new(Some("git"), Some("git"), Some(0o2770))
                .summary()
                .as_deref(),
            Some("git:git 2770")
        );
    }
}
