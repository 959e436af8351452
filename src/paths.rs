//! Centralized path resolution for provisor
//!
//! # Environment Variables
//!
//! - `PROVISOR_CONFIG` - Config file used when none is given on the command line
//! - `PROVISOR_CONFIG_DIR` - Override the directory searched for `provisor.toml`
//!
//! # Path Resolution Priority
//!
//! For default_config():
//! 1. `PROVISOR_CONFIG` environment variable
//! 2. `provisor.toml` in config_dir()
//!
//! For config_dir():
//! 1. `PROVISOR_CONFIG_DIR` environment variable
//! 2. `/etc/provisor` when it exists (system-wide provisioning)
//! 3. `XDG_CONFIG_HOME/provisor` (if set)
//! 4. `~/.config/provisor`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for the config file
pub const ENV_CONFIG: &str = "PROVISOR_CONFIG";

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "PROVISOR_CONFIG_DIR";

/// File name looked up inside the config directory
pub const CONFIG_FILE: &str = "provisor.toml";

const SYSTEM_CONFIG_DIR: &str = "/etc/provisor";

/// Get the provisor config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    let system = Path::new(SYSTEM_CONFIG_DIR);
    if system.is_dir() {
        log::debug!("Using system config dir: {}", system.display());
        return Ok(system.to_path_buf());
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("provisor");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join("provisor");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Config file to use when the command line names none
pub fn default_config() -> Result<PathBuf> {
    if let Ok(file) = std::env::var(ENV_CONFIG) {
        return Ok(expand(&file));
    }
    Ok(config_dir()?.join(CONFIG_FILE))
}

/// Expand ~ and environment variables in a path string.
///
/// This is the canonical path expansion function for provisor. All modules
/// should use this instead of calling shellexpand directly.
///
/// # Examples
///
/// ```ignore
/// let home_path = paths::expand("~/templates");
/// let var_path = paths::expand("$HOME/templates");
/// ```
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Expand `path`, then anchor it at `base` if it is still relative
///
/// Used for directories named in a config file, which are relative to
/// that file rather than to the working directory.
pub fn resolve(base: &Path, path: &str) -> PathBuf {
    let expanded = expand(path);
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

// ============================================================================
// Tests
// ============================================================================
