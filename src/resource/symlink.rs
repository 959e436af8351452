//! Symlink resource

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, ChangeResult, Resource, ResourceState};
use std::fs;
use std::path::{Path, PathBuf};

/// A symlink to create
#[derive(Debug, Clone)]
pub struct Symlink {
    /// Where the link lives
    pub path: PathBuf,
    /// What the link points to
    pub to: PathBuf,
}

#[derive(Debug)]
enum SymlinkState {
    Missing,
    Correct,
    WrongTarget(PathBuf),
    Occupied(&'static str),
}

impl Symlink {
    pub fn new(path: impl AsRef<Path>, to: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            to: to.as_ref().to_path_buf(),
        }
    }

    /// Check current symlink state
    fn check_current(&self) -> Result<SymlinkState> {
        let meta = match fs::symlink_metadata(&self.path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SymlinkState::Missing);
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to stat {}", self.path.display()));
            }
        };

        if !meta.file_type().is_symlink() {
            let kind = if meta.is_dir() { "directory" } else { "regular file" };
            return Ok(SymlinkState::Occupied(kind));
        }

        let link_target = fs::read_link(&self.path).context("Failed to read symlink")?;
        if link_target == self.to {
            return Ok(SymlinkState::Correct);
        }

        // Same place spelled differently still counts
        let resolve = |p: &Path| {
            let joined = if p.is_absolute() {
                p.to_path_buf()
            } else {
                self.path
                    .parent()
                    .map_or_else(|| p.to_path_buf(), |parent| parent.join(p))
            };
            joined.canonicalize().ok()
        };
        match (resolve(&link_target), resolve(&self.to)) {
            (Some(actual), Some(expected)) if actual == expected => Ok(SymlinkState::Correct),
            _ => Ok(SymlinkState::WrongTarget(link_target)),
        }
    }

    fn create_symlink(&self) -> Result<()> {
        if fs::symlink_metadata(&self.path).is_ok_and(|m| m.file_type().is_symlink()) {
            fs::remove_file(&self.path).with_context(|| {
                format!("Failed to remove existing symlink: {}", self.path.display())
            })?;
        }

        std::os::unix::fs::symlink(&self.to, &self.path).with_context(|| {
            format!(
                "Failed to create symlink: {} -> {}",
                self.path.display(),
                self.to.display()
            )
        })
    }
}

impl Resource for Symlink {
    fn id(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    fn description(&self) -> String {
        format!("Symlink {} -> {}", self.path.display(), self.to.display())
    }

    fn resource_type(&self) -> &'static str {
        "symlink"
    }

    fn current_state(&self) -> Result<ResourceState> {
        match self.check_current()? {
            SymlinkState::Missing => Ok(ResourceState::Absent),
            SymlinkState::Correct => Ok(self.desired_state()),
            SymlinkState::WrongTarget(actual) => Ok(ResourceState::Modified {
                from: actual.to_string_lossy().to_string(),
                to: self.to.to_string_lossy().to_string(),
            }),
            SymlinkState::Occupied(kind) => Ok(ResourceState::Modified {
                from: kind.to_string(),
                to: format!("symlink -> {}", self.to.display()),
            }),
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present {
            details: Some(format!("-> {}", self.to.display())),
        }
    }

    fn converge(&self, _ctx: &mut ApplyContext) -> Result<ChangeResult> {
        match self.check_current()? {
            SymlinkState::Correct => Ok(ChangeResult::Unchanged),
            SymlinkState::Missing | SymlinkState::WrongTarget(_) => {
                self.create_symlink()?;
                Ok(ChangeResult::Changed)
            }
            SymlinkState::Occupied(kind) => {
                bail!(
                    "refusing to replace {kind} {} with a symlink",
                    self.path.display()
                )
            }
        }
    }
}
