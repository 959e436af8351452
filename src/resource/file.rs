//! File resource - managed content, ownership and mode

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, ChangeResult, ContentChange, Resource, ResourceState};
use std::fs;
use std::io::Write;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use toml::Table;

use super::{Drift, FileAttrs, drift_state, short_digest};
use crate::backend::Renderer;

/// Mode for newly created files when none is declared
const DEFAULT_MODE: u32 = 0o644;

/// Where a file's content comes from
#[derive(Debug, Clone)]
pub enum Content {
    /// Exactly these bytes
    Literal(String),
    /// `template` rendered with `variables`
    Template {
        template: String,
        variables: Table,
        renderer: Arc<dyn Renderer>,
    },
    /// Copy of a file shipped next to the configuration
    Static(PathBuf),
    /// Only ensure the file exists; content is never touched
    Touch,
}

impl Content {
    fn describe(&self) -> String {
        match self {
            Self::Literal(text) => format!("{} bytes", text.len()),
            Self::Template { template, .. } => format!("template {template}"),
            Self::Static(source) => format!("copy of {}", source.display()),
            Self::Touch => "present".to_string(),
        }
    }

    /// Bytes the file should hold, `None` for [`Content::Touch`]
    fn bytes(&self) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Literal(text) => Ok(Some(text.clone().into_bytes())),
            Self::Template {
                template,
                variables,
                renderer,
            } => renderer.render(template, variables).map(Some),
            Self::Static(source) => fs::read(source)
                .map(Some)
                .with_context(|| format!("Failed to read {}", source.display())),
            Self::Touch => Ok(None),
        }
    }
}

/// A file with declared content and attributes
#[derive(Debug, Clone)]
pub struct File {
    pub path: PathBuf,
    pub content: Content,
    pub attrs: FileAttrs,
}

impl File {
    pub fn new(path: impl Into<PathBuf>, content: Content, attrs: FileAttrs) -> Self {
        Self {
            path: path.into(),
            content,
            attrs,
        }
    }

    /// What differs on disk, given the desired bytes
    fn drifts(&self, desired: Option<&[u8]>) -> Result<Vec<Drift>> {
        let mut drifts = Vec::new();
        if let Some(desired) = desired {
            let current = fs::read(&self.path)
                .with_context(|| format!("Failed to read {}", self.path.display()))?;
            if current != desired {
                drifts.push(Drift {
                    attribute: "content",
                    current: short_digest(&current),
                    desired: short_digest(desired),
                });
            }
        }
        drifts.extend(self.attrs.drift(&self.path)?);
        Ok(drifts)
    }

    fn check_kind(&self) -> Result<bool> {
        match fs::symlink_metadata(&self.path) {
            Ok(meta) if meta.is_file() => Ok(true),
            Ok(_) => bail!("{} exists and is not a regular file", self.path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to stat {}", self.path.display()))
            }
        }
    }
}

/// Write `bytes` next to `path`, set attributes, then rename over it
///
/// Attributes left unset keep whatever the replaced file had; new files
/// default to 0644.
pub(super) fn write_atomic(path: &Path, bytes: &[u8], declared: &FileAttrs) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if !parent.is_dir() {
        bail!("parent directory {} does not exist", parent.display());
    }

    let existing = fs::metadata(path).ok();
    let mut tmp = tempfile::Builder::new()
        .prefix(".provisor-")
        .tempfile_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .with_context(|| format!("Failed to write {}", tmp.path().display()))?;

    let attrs = FileAttrs {
        owner: declared
            .owner
            .clone()
            .or_else(|| existing.as_ref().map(|m| m.uid().to_string())),
        group: declared
            .group
            .clone()
            .or_else(|| existing.as_ref().map(|m| m.gid().to_string())),
        mode: declared.mode.or_else(|| {
            Some(
                existing
                    .as_ref()
                    .map_or(DEFAULT_MODE, |m| m.permissions().mode() & 0o7777),
            )
        }),
    };
    attrs.apply(tmp.path())?;

    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

impl Resource for File {
    fn id(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    fn description(&self) -> String {
        match self.attrs.summary() {
            Some(attrs) => format!(
                "File {} ({}, {attrs})",
                self.path.display(),
                self.content.describe()
            ),
            None => format!("File {} ({})", self.path.display(), self.content.describe()),
        }
    }

    fn resource_type(&self) -> &'static str {
        "file"
    }

    fn current_state(&self) -> Result<ResourceState> {
        if !self.check_kind()? {
            return Ok(ResourceState::Absent);
        }
        let desired = self.content.bytes()?;
        Ok(drift_state(&self.drifts(desired.as_deref())?))
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present { details: None }
    }

    fn converge(&self, _ctx: &mut ApplyContext) -> Result<ChangeResult> {
        let exists = self.check_kind()?;
        let desired = self.content.bytes()?;

        if !exists {
            log::info!("creating {}", self.path.display());
            write_atomic(&self.path, desired.as_deref().unwrap_or_default(), &self.attrs)?;
            return Ok(ChangeResult::Changed);
        }

        let drifts = self.drifts(desired.as_deref())?;
        if drifts.is_empty() {
            return Ok(ChangeResult::Unchanged);
        }

        match desired {
            Some(bytes) if drifts.iter().any(|d| d.attribute == "content") => {
                log::info!("updating content of {}", self.path.display());
                write_atomic(&self.path, &bytes, &self.attrs)?;
            }
            _ => {
                log::info!("fixing attributes of {}", self.path.display());
                self.attrs.apply(&self.path)?;
            }
        }
        Ok(ChangeResult::Changed)
    }

    fn content_change(&self) -> Result<Option<ContentChange>> {
        let Some(desired) = self.content.bytes()? else {
            return Ok(None);
        };
        let current = if self.check_kind()? {
            fs::read(&self.path)
                .with_context(|| format!("Failed to read {}", self.path.display()))?
        } else {
            Vec::new()
        };
        if current == desired {
            return Ok(None);
        }
        Ok(Some(ContentChange {
            current: String::from_utf8_lossy(&current).into_owned(),
            desired: String::from_utf8_lossy(&desired).into_owned(),
        }))
    }
}
