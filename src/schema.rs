use anyhow::{Context, Result, bail};
use declarative::{FailurePolicy, GuardErrorPolicy, ResourceRef, Timing};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;
use crate::recipe;
use crate::resource::archive::ArchiveFormat;
use crate::resource::parse_mode;

/// Resource kinds whose identity is a filesystem path
const PATH_KINDS: &[&str] = &[
    "file",
    "directory",
    "git",
    "symlink",
    "remote_file",
    "archive",
];

// ============================================================================
// Main Config Schema
// ============================================================================

/// A provisioning configuration file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Run-wide settings
    #[serde(default)]
    pub settings: Settings,

    /// Variables visible to every template
    #[serde(default)]
    pub vars: toml::Table,

    /// Built-in application server recipe
    #[serde(default)]
    pub app: Option<AppConfig>,

    /// Explicit resource declarations, run after the recipe's
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceSpec>,

    /// Directory of the file this was loaded from
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Config {
    /// Load, parse and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        config.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Invalid TOML format")?;
        let raw: toml::Table = toml::from_str(content).context("Invalid TOML format")?;
        config.reject_unknown_resource_keys(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// `[[resource]]` flattens two structs, so serde cannot deny unknown keys itself
    fn reject_unknown_resource_keys(&self, raw: &toml::Table) -> Result<()> {
        let Some(toml::Value::Array(entries)) = raw.get("resource") else {
            return Ok(());
        };
        for (index, (entry, spec)) in entries.iter().zip(&self.resources).enumerate() {
            let Some(entry) = entry.as_table() else {
                continue;
            };
            let unknown = unknown_keys(entry, spec)?;
            if !unknown.is_empty() {
                bail!(
                    "Invalid resource #{} {}: unknown key(s) {}",
                    index + 1,
                    spec.address(),
                    unknown.join(", ")
                );
            }
        }
        Ok(())
    }

    /// Recipe declarations followed by the explicit ones
    pub fn specs(&self) -> Result<Vec<ResourceSpec>> {
        let mut specs = match &self.app {
            Some(app) => recipe::expand(app)?,
            None => Vec::new(),
        };
        specs.extend(self.resources.iter().cloned());
        Ok(specs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.settings.validate().context("Invalid [settings]")?;

        if let Some(app) = &self.app {
            app.validate().context("Invalid [app]")?;
        }

        let mut seen = HashSet::new();
        for (index, spec) in self.specs()?.iter().enumerate() {
            let address = spec.address();
            spec.validate()
                .with_context(|| format!("Invalid resource #{} {address}", index + 1))?;
            if !seen.insert(address.clone()) {
                bail!("duplicate declaration {address}");
            }
        }
        Ok(())
    }

    /// Templates directory, relative to the config file unless absolute
    pub fn templates_dir(&self) -> PathBuf {
        paths::resolve(&self.base_dir, &self.settings.templates_dir)
    }

    /// Static files directory, relative to the config file unless absolute
    pub fn files_dir(&self) -> PathBuf {
        paths::resolve(&self.base_dir, &self.settings.files_dir)
    }
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Halt at the first failure or keep going
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// What a guard that cannot be evaluated means
    #[serde(default)]
    pub guard_errors: GuardErrorPolicy,

    /// Default per-declaration timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default = "default_templates_dir")]
    pub templates_dir: String,

    #[serde(default = "default_files_dir")]
    pub files_dir: String,

    /// System package manager; detected when unset
    #[serde(default)]
    pub package_manager: Option<pkgkit::Manager>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            guard_errors: GuardErrorPolicy::default(),
            timeout_secs: None,
            templates_dir: default_templates_dir(),
            files_dir: default_files_dir(),
            package_manager: None,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.package_manager == Some(pkgkit::Manager::Gem) {
            bail!("package_manager must be a system manager (apt, dnf or yum), not gem");
        }
        if self.timeout_secs == Some(0) {
            bail!("timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn default_templates_dir() -> String {
    "templates".to_string()
}

fn default_files_dir() -> String {
    "files".to_string()
}

// ============================================================================
// Resources
// ============================================================================

/// One `[[resource]]` entry: kind-specific fields plus the common ones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(flatten)]
    pub kind: ResourceKind,

    #[serde(flatten)]
    pub meta: Meta,
}

impl ResourceSpec {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            meta: Meta::default(),
        }
    }

    pub fn not_if(mut self, guard: GuardSpec) -> Self {
        self.meta.not_if = Some(guard);
        self
    }

    pub fn only_if(mut self, guard: GuardSpec) -> Self {
        self.meta.only_if = Some(guard);
        self
    }

    pub fn notifies(mut self, action: &str, resource: ResourceRef, timing: Timing) -> Self {
        self.meta.notifies.push(NotifySpec {
            action: action.to_string(),
            resource,
            timing,
        });
        self
    }

    pub fn subscribes(mut self, action: &str, resource: ResourceRef, timing: Timing) -> Self {
        self.meta.subscribes.push(NotifySpec {
            action: action.to_string(),
            resource,
            timing,
        });
        self
    }

    pub fn action(mut self, action: &str) -> Self {
        self.meta.action = Some(action.to_string());
        self
    }

    /// Never converge in list order, only when notified
    pub fn notify_only(self) -> Self {
        self.action(NOTHING)
    }

    /// Address of the declaration this spec becomes
    pub fn address(&self) -> ResourceRef {
        normalize(&ResourceRef::new(self.kind.name(), self.kind.identity()))
    }

    pub fn is_notify_only(&self) -> bool {
        self.meta.action.as_deref() == Some(NOTHING)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.meta.timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        self.kind.validate()?;
        self.meta.validate(&self.kind)
    }
}

/// Keys of a raw entry that no field of the parsed spec claims
fn unknown_keys(entry: &toml::Table, spec: &ResourceSpec) -> Result<Vec<String>> {
    let known = serde_json::to_value(spec).context("Failed to inspect resource fields")?;
    let known = known.as_object().cloned().unwrap_or_default();
    Ok(entry
        .keys()
        .filter(|key| !known.contains_key(key.as_str()))
        .map(|key| format!("`{key}`"))
        .collect())
}

/// Path kinds are addressed by their expanded path
pub fn normalize(address: &ResourceRef) -> ResourceRef {
    if PATH_KINDS.contains(&address.kind.as_str()) {
        let id = paths::expand(&address.id).to_string_lossy().to_string();
        ResourceRef::new(address.kind.clone(), id)
    } else {
        address.clone()
    }
}

const NOTHING: &str = "nothing";

/// Fields every resource kind accepts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub not_if: Option<GuardSpec>,

    #[serde(default)]
    pub only_if: Option<GuardSpec>,

    #[serde(default)]
    pub notifies: Vec<NotifySpec>,

    /// Sugar for a notification sent by the named resource to this one
    #[serde(default)]
    pub subscribes: Vec<NotifySpec>,

    /// Failures are recorded but never halt the run
    #[serde(default)]
    pub ignore_failure: bool,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// `nothing`, or `checkout`/`sync` for git
    #[serde(default)]
    pub action: Option<String>,
}

impl Meta {
    fn validate(&self, kind: &ResourceKind) -> Result<()> {
        if let Some(action) = &self.action {
            let allowed: &[&str] = match kind {
                ResourceKind::Git(_) => &[NOTHING, "checkout", "sync"],
                _ => &[NOTHING],
            };
            if !allowed.contains(&action.as_str()) {
                bail!(
                    "unsupported action '{action}' for {} (expected one of: {})",
                    kind.name(),
                    allowed.join(", ")
                );
            }
        }
        if let Some(guard) = &self.not_if {
            guard.validate().context("Invalid not_if")?;
        }
        if let Some(guard) = &self.only_if {
            guard.validate().context("Invalid only_if")?;
        }
        if self.timeout_secs == Some(0) {
            bail!("timeout_secs must be greater than zero");
        }
        Ok(())
    }
}

/// A guard: a shell snippet, or one probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GuardSpec {
    Command(String),
    Probe(ProbeSpec),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeSpec {
    #[serde(default)]
    pub path_exists: Option<String>,
    #[serde(default)]
    pub dir_empty: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
}

impl GuardSpec {
    pub fn path_exists(path: impl Into<String>) -> Self {
        Self::Probe(ProbeSpec {
            path_exists: Some(path.into()),
            ..ProbeSpec::default()
        })
    }

    pub fn dir_empty(path: impl Into<String>) -> Self {
        Self::Probe(ProbeSpec {
            dir_empty: Some(path.into()),
            ..ProbeSpec::default()
        })
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Command(command) if command.trim().is_empty() => bail!("empty command"),
            Self::Command(_) => Ok(()),
            Self::Probe(probe) => {
                let set = [&probe.path_exists, &probe.dir_empty, &probe.command]
                    .iter()
                    .filter(|field| field.is_some())
                    .count();
                if set != 1 {
                    bail!("expected exactly one of path_exists, dir_empty or command");
                }
                Ok(())
            }
        }
    }
}

/// `notifies` / `subscribes` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifySpec {
    pub action: String,
    /// Target for `notifies`, source for `subscribes`
    pub resource: ResourceRef,
    #[serde(default)]
    pub timing: Timing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceKind {
    File(FileSpec),
    Directory(DirectorySpec),
    Package(PackageSpec),
    GemPackage(PackageSpec),
    User(UserSpec),
    Service(ServiceSpec),
    Command(CommandSpec),
    Git(GitSpec),
    Symlink(SymlinkSpec),
    RemoteFile(RemoteFileSpec),
    Archive(ArchiveSpec),
}

impl ResourceKind {
    /// Kind name as written in addresses
    pub fn name(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Directory(_) => "directory",
            Self::Package(_) => "package",
            Self::GemPackage(_) => "gem_package",
            Self::User(_) => "user",
            Self::Service(_) => "service",
            Self::Command(_) => "command",
            Self::Git(_) => "git",
            Self::Symlink(_) => "symlink",
            Self::RemoteFile(_) => "remote_file",
            Self::Archive(_) => "archive",
        }
    }

    fn identity(&self) -> &str {
        match self {
            Self::File(spec) => &spec.path,
            Self::Directory(spec) => &spec.path,
            Self::Package(spec) | Self::GemPackage(spec) => &spec.name,
            Self::User(spec) => &spec.name,
            Self::Service(spec) => &spec.name,
            Self::Command(spec) => &spec.name,
            Self::Git(spec) => &spec.destination,
            Self::Symlink(spec) => &spec.path,
            Self::RemoteFile(spec) => &spec.path,
            Self::Archive(spec) => &spec.destination,
        }
    }

    fn validate(&self) -> Result<()> {
        let identity = self.identity();
        if identity.trim().is_empty() {
            bail!("{} needs a non-empty identity", self.name());
        }
        if PATH_KINDS.contains(&self.name()) && !paths::expand(identity).is_absolute() {
            bail!("path '{identity}' must be absolute");
        }

        match self {
            Self::File(spec) => {
                validate_mode(spec.mode.as_deref())?;
                let sources = [&spec.content, &spec.template, &spec.source]
                    .iter()
                    .filter(|s| s.is_some())
                    .count();
                if sources > 1 {
                    bail!("file takes at most one of content, template or source");
                }
                if !spec.variables.is_empty() && spec.template.is_none() {
                    bail!("variables are only used with template");
                }
            }
            Self::Directory(spec) => validate_mode(spec.mode.as_deref())?,
            Self::RemoteFile(spec) => {
                validate_mode(spec.mode.as_deref())?;
                if !spec.source.contains("://") {
                    bail!("source '{}' is not a URL", spec.source);
                }
                if let Some(checksum) = &spec.checksum
                    && (checksum.len() != 64 || !checksum.chars().all(|c| c.is_ascii_hexdigit()))
                {
                    bail!("checksum must be a 64 digit blake3 hex digest");
                }
            }
            Self::Archive(spec) => {
                ArchiveFormat::detect(&paths::expand(&spec.source))?;
            }
            Self::Git(spec) => {
                if spec.repository.trim().is_empty() {
                    bail!("git needs a repository");
                }
            }
            Self::Command(spec) => {
                if spec.command.trim().is_empty() {
                    bail!("command needs a command line");
                }
            }
            Self::Package(_)
            | Self::GemPackage(_)
            | Self::User(_)
            | Self::Service(_)
            | Self::Symlink(_) => {}
        }
        Ok(())
    }
}

fn validate_mode(mode: Option<&str>) -> Result<()> {
    if let Some(mode) = mode {
        parse_mode(mode)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileSpec {
    pub path: String,
    /// Literal content
    #[serde(default)]
    pub content: Option<String>,
    /// Template id under the templates directory
    #[serde(default)]
    pub template: Option<String>,
    /// File copied from the files directory
    #[serde(default)]
    pub source: Option<String>,
    /// Template variables, layered over `[vars]`
    #[serde(default)]
    pub variables: toml::Table,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectorySpec {
    pub path: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    /// Create missing parents
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    /// gem_package only: gem executable to use
    #[serde(default)]
    pub gem_binary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSpec {
    pub name: String,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    /// Primary group
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub manage_home: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    /// Process pattern proving the service runs
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub running: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    /// Skip when this path exists
    #[serde(default)]
    pub creates: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitSpec {
    pub destination: String,
    pub repository: String,
    #[serde(default = "default_revision")]
    pub revision: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

fn default_revision() -> String {
    "HEAD".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymlinkSpec {
    pub path: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteFileSpec {
    pub path: String,
    pub source: String,
    /// blake3 hex digest
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSpec {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub creates: Option<String>,
}

// ============================================================================
// Application server recipe
// ============================================================================

/// `[app]`: a Rails-style application server behind nginx
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Application name; names the service, site and config file
    pub name: String,

    /// Git URL of the application
    pub repository: String,

    #[serde(default = "default_branch")]
    pub revision: String,

    #[serde(default = "default_app_user")]
    pub user: String,

    #[serde(default = "default_app_user")]
    pub group: String,

    #[serde(default = "default_app_home")]
    pub home: String,

    /// Checkout location; `<home>/<name>` when unset
    #[serde(default)]
    pub app_home: Option<String>,

    /// System packages installed first
    #[serde(default)]
    pub packages: Vec<String>,

    #[serde(default = "default_gems")]
    pub gems: Vec<String>,

    /// Custom gem executable, e.g. from a compiled ruby
    #[serde(default)]
    pub gem_binary: Option<String>,

    /// Prefix holding `bin/bundle`
    #[serde(default = "default_ruby_path")]
    pub ruby_path: String,

    #[serde(default = "default_fqdn")]
    pub fqdn: String,

    #[serde(default)]
    pub https: bool,

    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    /// Derived from `https` when unset (443 or 80)
    #[serde(default)]
    pub listen_port: Option<u16>,

    /// nginx server names; the fqdn when empty
    #[serde(default)]
    pub server_names: Vec<String>,

    /// `<app_home>/tmp/backups` when unset
    #[serde(default)]
    pub backup_path: Option<String>,

    /// Seconds to keep backups; 0 keeps them forever
    #[serde(default)]
    pub backup_keep_time: u64,

    #[serde(default = "default_true")]
    pub trust_local_sshkeys: bool,

    #[serde(default = "default_unicorn_timeout")]
    pub unicorn_timeout: u64,

    #[serde(default)]
    pub secret_key_base: String,

    /// Files from the files directory copied into `config/initializers`
    #[serde(default)]
    pub initializers: Vec<String>,

    /// Rake task that seeds the database; `<name>:setup` when unset
    #[serde(default)]
    pub setup_task: Option<String>,

    /// Process pattern for the application service
    #[serde(default)]
    pub service_pattern: Option<String>,

    pub database: DatabaseConfig,

    #[serde(default)]
    pub helper: Option<HelperConfig>,

    #[serde(default)]
    pub http_server: Option<HttpServerConfig>,

    #[serde(default)]
    pub go: Option<GoConfig>,

    #[serde(default)]
    pub site: SiteConfig,

    #[serde(default)]
    pub logrotate: LogrotateConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() || self.name.contains(['/', ' ']) {
            bail!("app name '{}' must be a single path component", self.name);
        }
        if self.repository.trim().is_empty() {
            bail!("app.repository cannot be empty");
        }
        if !paths::expand(&self.home).is_absolute() {
            bail!("app.home '{}' must be absolute", self.home);
        }
        if self.listen_port == Some(0) {
            bail!("app.listen_port must be greater than zero");
        }
        self.logrotate.validate()?;
        Ok(())
    }

    pub fn app_home(&self) -> String {
        self.app_home
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.home.trim_end_matches('/'), self.name))
    }

    /// Configured port, else 443 with https and 80 without
    pub fn listen_port(&self) -> u16 {
        self.listen_port
            .unwrap_or(if self.https { 443 } else { 80 })
    }

    pub fn backup_path(&self) -> String {
        self.backup_path
            .clone()
            .unwrap_or_else(|| format!("{}/tmp/backups", self.app_home()))
    }

    pub fn server_names(&self) -> Vec<String> {
        if self.server_names.is_empty() {
            vec![self.fqdn.clone()]
        } else {
            self.server_names.clone()
        }
    }
}

/// Supported databases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Mysql,
    Postgres,
}

impl DatabaseType {
    /// Bundler group excluded for this database
    pub fn excluded_group(self) -> &'static str {
        match self {
            Self::Mysql => "postgres",
            Self::Postgres => "mysql",
        }
    }

    pub fn default_adapter(self) -> &'static str {
        match self {
            Self::Mysql => "mysql2",
            Self::Postgres => "postgresql",
        }
    }

    pub fn default_encoding(self) -> &'static str {
        match self {
            Self::Mysql => "utf8",
            Self::Postgres => "unicode",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub kind: DatabaseType,
    #[serde(default)]
    pub adapter: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub collation: Option<String>,
    #[serde(default = "default_db_host")]
    pub host: String,
    /// `<name>_production` when unset
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_pool")]
    pub pool: u32,
    /// The app user when unset
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: String,
}

/// Companion service checked out beside the app (e.g. an SSH shell)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HelperConfig {
    pub repository: String,
    #[serde(default = "default_branch")]
    pub revision: String,
    /// `<home>/<name>-shell` when unset
    #[serde(default)]
    pub home: Option<String>,
    /// Host the helper calls back; the app fqdn when unset
    #[serde(default)]
    pub api_host: Option<String>,
}

/// Git HTTP server built from source with make
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpServerConfig {
    pub repository: String,
    #[serde(default = "default_branch")]
    pub revision: String,
    /// Binary produced by `make`; the build is skipped while it exists
    #[serde(default = "default_http_binary")]
    pub binary: String,
}

/// Go toolchain tarball unpacked under a prefix
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GoConfig {
    pub url: String,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default = "default_go_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_nginx_dir")]
    pub nginx_dir: String,
    #[serde(default)]
    pub ssl_certificate: Option<String>,
    #[serde(default)]
    pub ssl_certificate_key: Option<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            nginx_dir: default_nginx_dir(),
            ssl_certificate: None,
            ssl_certificate_key: None,
        }
    }
}

/// `/etc/logrotate.d/<name>` for the app and helper logs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogrotateConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rotate_frequency")]
    pub frequency: String,
    /// Rotated files kept
    #[serde(default = "default_rotate_count")]
    pub rotate: u32,
    #[serde(default = "default_logrotate_dir")]
    pub dir: String,
}

impl LogrotateConfig {
    fn validate(&self) -> Result<()> {
        if !LOGROTATE_FREQUENCIES.contains(&self.frequency.as_str()) {
            bail!(
                "logrotate.frequency '{}' must be one of {}",
                self.frequency,
                LOGROTATE_FREQUENCIES.join(", ")
            );
        }
        Ok(())
    }
}

impl Default for LogrotateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frequency: default_rotate_frequency(),
            rotate: default_rotate_count(),
            dir: default_logrotate_dir(),
        }
    }
}

const LOGROTATE_FREQUENCIES: &[&str] = &["hourly", "daily", "weekly", "monthly", "yearly"];

fn default_rotate_frequency() -> String {
    "weekly".to_string()
}

fn default_rotate_count() -> u32 {
    52
}

fn default_logrotate_dir() -> String {
    "/etc/logrotate.d".to_string()
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_app_user() -> String {
    "git".to_string()
}

fn default_app_home() -> String {
    "/home/git".to_string()
}

fn default_gems() -> Vec<String> {
    vec!["charlock_holmes".to_string(), "bundler".to_string()]
}

fn default_ruby_path() -> String {
    "/usr/local".to_string()
}

fn default_fqdn() -> String {
    "localhost".to_string()
}

fn default_listen_ip() -> String {
    "*".to_string()
}

fn default_true() -> bool {
    true
}

fn default_unicorn_timeout() -> u64 {
    30
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_pool() -> u32 {
    10
}

fn default_http_binary() -> String {
    "git-http-server".to_string()
}

fn default_go_prefix() -> String {
    "/usr/local".to_string()
}

fn default_nginx_dir() -> String {
    "/etc/nginx".to_string()
}
