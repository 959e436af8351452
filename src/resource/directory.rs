//! Directory resource

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, ChangeResult, Resource, ResourceState};
use std::fs;
use std::path::PathBuf;

use super::{FileAttrs, drift_state};

/// A directory with declared ownership and mode
#[derive(Debug, Clone)]
pub struct Directory {
    pub path: PathBuf,
    pub attrs: FileAttrs,
    /// Create missing parents (with default attributes)
    pub recursive: bool,
}

impl Directory {
    pub fn new(path: impl Into<PathBuf>, attrs: FileAttrs) -> Self {
        Self {
            path: path.into(),
            attrs,
            recursive: false,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    fn exists(&self) -> Result<bool> {
        match fs::symlink_metadata(&self.path) {
            Ok(meta) if meta.is_dir() => Ok(true),
            Ok(_) => bail!("{} exists and is not a directory", self.path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to stat {}", self.path.display()))
            }
        }
    }
}

impl Resource for Directory {
    fn id(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    fn description(&self) -> String {
        match self.attrs.summary() {
            Some(attrs) => format!("Directory {} ({attrs})", self.path.display()),
            None => format!("Directory {}", self.path.display()),
        }
    }

    fn resource_type(&self) -> &'static str {
        "directory"
    }

    fn current_state(&self) -> Result<ResourceState> {
        if !self.exists()? {
            return Ok(ResourceState::Absent);
        }
        Ok(drift_state(&self.attrs.drift(&self.path)?))
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present { details: None }
    }

    fn converge(&self, _ctx: &mut ApplyContext) -> Result<ChangeResult> {
        if !self.exists()? {
            log::info!("creating directory {}", self.path.display());
            let created = if self.recursive {
                fs::create_dir_all(&self.path)
            } else {
                fs::create_dir(&self.path)
            };
            created.with_context(|| format!("Failed to create {}", self.path.display()))?;
            self.attrs.apply(&self.path)?;
            return Ok(ChangeResult::Changed);
        }

        let drifts = self.attrs.drift(&self.path)?;
        if drifts.is_empty() {
            return Ok(ChangeResult::Unchanged);
        }
        for drift in &drifts {
            log::info!("{}: {drift}", self.path.display());
        }
        self.attrs.apply(&self.path)?;
        Ok(ChangeResult::Changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::testing;

    fn ctx() -> ApplyContext {
        ApplyContext::new(false, false)
    }

    #[test]
    fn test_create_with_setgid_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repositories");
        let resource = Directory::new(&path, FileAttrs::new(None, None, Some(0o2770)));

        assert_eq!(resource.current_state().unwrap(), ResourceState::Absent);
        assert_eq!(resource.converge(&mut ctx()).unwrap(), ChangeResult::Changed);
        assert!(path.is_dir());
        assert_eq!(testing::mode_of(&path), 0o2770);
        assert_eq!(resource.converge(&mut ctx()).unwrap(), ChangeResult::Unchanged);
    }

    #[test]
    fn test_recursive_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmp/pids");

        let flat = Directory::new(&path, FileAttrs::default());
        assert!(flat.converge(&mut ctx()).is_err());

        let recursive = flat.clone().recursive(true);
        assert_eq!(recursive.converge(&mut ctx()).unwrap(), ChangeResult::Changed);
        assert!(path.is_dir());
    }

    #[test]
    fn test_mode_drift_is_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let resource = Directory::new(dir.path(), FileAttrs::new(None, None, Some(0o700)));
        assert!(resource.needs_apply().unwrap());
        assert_eq!(resource.converge(&mut ctx()).unwrap(), ChangeResult::Changed);
        assert_eq!(testing::mode_of(dir.path()), 0o700);
        assert!(!resource.needs_apply().unwrap());
    }

    #[test]
    fn test_regular_file_in_the_way() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        fs::write(&path, "").unwrap();
        let err = Directory::new(&path, FileAttrs::default())
            .converge(&mut ctx())
            .unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }
}
