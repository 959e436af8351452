//! Archive resource - unpack tarballs and zips

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, ChangeResult, Resource, ResourceState};
use flate2::read::GzDecoder;
use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

const ACTIONS: &[&str] = &["extract"];

/// Archive formats, picked by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    Zip,
}

impl ArchiveFormat {
    pub fn detect(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(Self::TarGz)
        } else if name.ends_with(".tar") {
            Ok(Self::Tar)
        } else if name.ends_with(".zip") {
            Ok(Self::Zip)
        } else {
            bail!(
                "unsupported archive {}: expected .tar, .tar.gz, .tgz or .zip",
                path.display()
            )
        }
    }
}

/// An archive extracted into a directory
#[derive(Debug, Clone)]
pub struct Archive {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Extraction is skipped once this path exists
    pub creates: Option<PathBuf>,
    format: ArchiveFormat,
}

impl Archive {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Result<Self> {
        let source = source.into();
        let format = ArchiveFormat::detect(&source)?;
        Ok(Self {
            source,
            destination: destination.into(),
            creates: None,
            format,
        })
    }

    pub fn creates(mut self, creates: Option<PathBuf>) -> Self {
        self.creates = creates;
        self
    }

    /// Without a marker, any content in the destination counts as extracted
    fn extracted(&self) -> Result<bool> {
        if let Some(marker) = &self.creates {
            return Ok(marker.exists());
        }
        match fs::read_dir(&self.destination) {
            Ok(mut entries) => Ok(entries.next().is_some()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err)
                .with_context(|| format!("Failed to read {}", self.destination.display())),
        }
    }

    fn unpack(&self) -> Result<()> {
        let file = fs::File::open(&self.source)
            .with_context(|| format!("Failed to open {}", self.source.display()))?;
        fs::create_dir_all(&self.destination)
            .with_context(|| format!("Failed to create {}", self.destination.display()))?;

        let reader = BufReader::new(file);
        match self.format {
            ArchiveFormat::Tar => unpack_tar(reader, &self.destination),
            ArchiveFormat::TarGz => unpack_tar(GzDecoder::new(reader), &self.destination),
            ArchiveFormat::Zip => {
                let mut archive = zip::ZipArchive::new(reader)
                    .with_context(|| format!("Failed to read {}", self.source.display()))?;
                archive
                    .extract(&self.destination)
                    .with_context(|| format!("Failed to extract {}", self.source.display()))
            }
        }
    }
}

/// `tar` refuses entries that escape the destination
fn unpack_tar(reader: impl Read, destination: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive
        .unpack(destination)
        .with_context(|| format!("Failed to unpack into {}", destination.display()))
}

impl Resource for Archive {
    fn id(&self) -> String {
        self.destination.to_string_lossy().to_string()
    }

    fn description(&self) -> String {
        format!(
            "Extract {} into {}",
            self.source.display(),
            self.destination.display()
        )
    }

    fn resource_type(&self) -> &'static str {
        "archive"
    }

    fn current_state(&self) -> Result<ResourceState> {
        if self.extracted()? {
            Ok(self.desired_state())
        } else {
            Ok(ResourceState::Absent)
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present {
            details: self
                .creates
                .as_ref()
                .map(|c| format!("creates {}", c.display())),
        }
    }

    fn converge(&self, _ctx: &mut ApplyContext) -> Result<ChangeResult> {
        if self.extracted()? {
            return Ok(ChangeResult::Unchanged);
        }
        log::info!(
            "extracting {} into {}",
            self.source.display(),
            self.destination.display()
        );
        self.unpack()?;
        Ok(ChangeResult::Changed)
    }

    fn actions(&self) -> &'static [&'static str] {
        ACTIONS
    }

    fn run_action(&self, action: &str, ctx: &mut ApplyContext) -> Result<ChangeResult> {
        match action {
            "extract" => self.converge(ctx),
            other => bail!("archive does not support action '{other}'"),
        }
    }
}
