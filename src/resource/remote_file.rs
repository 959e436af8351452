//! Remote file resource - download a URL once

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, ChangeResult, Resource, ResourceState};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use super::file::write_atomic;
use super::{Drift, FileAttrs, drift_state};

/// Maximum download size (512 MB)
const MAX_DOWNLOAD_SIZE: u64 = 512 * 1024 * 1024;

/// A file fetched over HTTP(S)
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub path: PathBuf,
    pub source: String,
    /// Full blake3 hex digest the download must match
    pub checksum: Option<String>,
    pub attrs: FileAttrs,
}

impl RemoteFile {
    pub fn new(path: impl Into<PathBuf>, source: impl Into<String>, attrs: FileAttrs) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
            checksum: None,
            attrs,
        }
    }

    pub fn checksum(mut self, checksum: Option<String>) -> Self {
        self.checksum = checksum.map(|c| c.to_ascii_lowercase());
        self
    }

    /// Digest of the local copy when it does not match the checksum
    fn stale_digest(&self) -> Result<Option<String>> {
        let Some(wanted) = &self.checksum else {
            return Ok(None);
        };
        let bytes = fs::read(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let actual = blake3::hash(&bytes).to_hex().to_string();
        Ok((actual != *wanted).then_some(actual))
    }

    fn download(&self, timeout: Option<Duration>) -> Result<Vec<u8>> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(timeout)
            .build()
            .into();

        let mut response = agent
            .get(&self.source)
            .header("User-Agent", concat!("provisor/", env!("CARGO_PKG_VERSION")))
            .call()
            .with_context(|| format!("Failed to download {}", self.source))?;

        let bytes = response
            .body_mut()
            .with_config()
            .limit(MAX_DOWNLOAD_SIZE)
            .read_to_vec()
            .context("Failed to read response body")?;

        if let Some(wanted) = &self.checksum {
            let actual = blake3::hash(&bytes).to_hex();
            if actual.as_str() != wanted {
                bail!(
                    "checksum mismatch for {}: expected {wanted}, got {actual}",
                    self.source
                );
            }
        }
        Ok(bytes)
    }
}

impl Resource for RemoteFile {
    fn id(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    fn description(&self) -> String {
        format!("Download {} to {}", self.source, self.path.display())
    }

    fn resource_type(&self) -> &'static str {
        "remote_file"
    }

    fn current_state(&self) -> Result<ResourceState> {
        if !self.path.exists() {
            return Ok(ResourceState::Absent);
        }
        let mut drifts = Vec::new();
        if let (Some(actual), Some(wanted)) = (self.stale_digest()?, &self.checksum) {
            drifts.push(Drift {
                attribute: "checksum",
                current: actual,
                desired: wanted.clone(),
            });
        }
        drifts.extend(self.attrs.drift(&self.path)?);
        Ok(drift_state(&drifts))
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present { details: None }
    }

    fn converge(&self, ctx: &mut ApplyContext) -> Result<ChangeResult> {
        if !self.path.exists() || self.stale_digest()?.is_some() {
            log::info!("downloading {}", self.source);
            let bytes = self.download(ctx.timeout)?;
            write_atomic(&self.path, &bytes, &self.attrs)?;
            return Ok(ChangeResult::Changed);
        }

        let drifts = self.attrs.drift(&self.path)?;
        if drifts.is_empty() {
            return Ok(ChangeResult::Unchanged);
        }
        self.attrs.apply(&self.path)?;
        Ok(ChangeResult::Changed)
    }
}
