//! Planning - turn a configuration into a validated run list

use anyhow::{Context, Result};
use declarative::{
    Condition, Declaration, ExecuteOptions, FailurePolicy, Guard, Notify, Resource, RunList,
};
use pkgkit::{Client, Manager};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::accounts::ShadowUtils;
use crate::backend::git::GitCli;
use crate::backend::systemd::Systemd;
use crate::backend::template::TemplateDir;
use crate::backend::{self, AccountManager, Renderer, ServiceSupervisor, VcsClient};
use crate::paths;
use crate::resource::{
    Archive, Command, Content, Directory, File, FileAttrs, Git, GitAction, Package, RemoteFile,
    Service, Symlink, User, parse_mode,
};
use crate::schema::{Config, GuardSpec, ResourceKind, ResourceSpec, Settings, normalize};

// ============================================================================
// Collaborators
// ============================================================================

/// Hands out package manager clients
pub trait PackageSource {
    /// Client for the system manager; `None` means detect
    fn system(&self, manager: Option<Manager>) -> Result<Arc<Client>>;

    /// RubyGems client for a `gem` binary (the one on PATH when `None`)
    fn gem(&self, gem_binary: Option<&str>) -> Result<Arc<Client>>;
}

/// Package managers installed on this host, opened on first use
///
/// A configuration without packages never requires a package manager.
#[derive(Debug, Default)]
pub struct HostPackages {
    system: RefCell<Option<Arc<Client>>>,
    gems: RefCell<HashMap<Option<String>, Arc<Client>>>,
}

impl PackageSource for HostPackages {
    fn system(&self, manager: Option<Manager>) -> Result<Arc<Client>> {
        if let Some(client) = self.system.borrow().as_ref() {
            return Ok(Arc::clone(client));
        }
        let client = match manager {
            Some(manager) => Client::new(manager),
            None => Client::detect(),
        }
        .context("No system package manager")?;
        let client = Arc::new(client);
        *self.system.borrow_mut() = Some(Arc::clone(&client));
        Ok(client)
    }

    fn gem(&self, gem_binary: Option<&str>) -> Result<Arc<Client>> {
        let key = gem_binary.map(str::to_string);
        if let Some(client) = self.gems.borrow().get(&key) {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(Client::gem(gem_binary).context("No RubyGems")?);
        self.gems.borrow_mut().insert(key, Arc::clone(&client));
        Ok(client)
    }
}

/// Everything providers talk to outside the filesystem
pub struct Providers {
    pub accounts: Arc<dyn AccountManager>,
    pub vcs: Arc<dyn VcsClient>,
    pub supervisor: Arc<dyn ServiceSupervisor>,
    pub packages: Box<dyn PackageSource>,
}

impl Providers {
    /// shadow-utils, the git CLI, systemd and the host's package managers
    pub fn host() -> Self {
        Self {
            accounts: Arc::new(ShadowUtils),
            vcs: Arc::new(GitCli::new()),
            supervisor: Arc::new(Systemd::new()),
            packages: Box::new(HostPackages::default()),
        }
    }
}

// ============================================================================
// Run list
// ============================================================================

/// Build the run list for a configuration
///
/// Declarations keep configuration order: recipe first, then `[[resource]]`
/// entries. Subscriptions are folded into the notifications of their
/// source, and every notification target is checked before anything runs.
/// Probes that shell out fall back to the run's default timeout.
pub fn build_run_list(
    config: &Config,
    providers: &Providers,
    opts: &ExecuteOptions,
) -> Result<RunList> {
    let planner = Planner {
        config,
        providers,
        default_timeout: opts.default_timeout,
        renderer: Arc::new(TemplateDir::new(config.templates_dir())),
        files_dir: config.files_dir(),
    };

    let specs = config.specs()?;
    let mut run_list = RunList::new();
    for spec in &specs {
        let declaration = planner
            .declaration(spec)
            .with_context(|| format!("Invalid declaration {}", spec.address()))?;
        run_list.push(declaration)?;
    }

    for spec in &specs {
        let subscriber = spec.address();
        for subscription in &spec.meta.subscribes {
            run_list.subscribe(
                &subscriber,
                &subscription.action,
                &normalize(&subscription.resource),
                subscription.timing,
            )?;
        }
    }

    run_list.validate()?;
    log::debug!("planned {} declarations", run_list.len());
    Ok(run_list)
}

struct Planner<'a> {
    config: &'a Config,
    providers: &'a Providers,
    default_timeout: Option<Duration>,
    renderer: Arc<dyn Renderer>,
    files_dir: PathBuf,
}

impl Planner<'_> {
    fn declaration(&self, spec: &ResourceSpec) -> Result<Declaration> {
        let probe_timeout = spec.timeout().or(self.default_timeout);
        let resource = self.resource(spec, probe_timeout)?;

        let mut declaration = Declaration::new(resource)
            .ignore_failure(spec.meta.ignore_failure)
            .timeout(spec.timeout())
            .notify_only(spec.is_notify_only());

        if let Some(guard) = &spec.meta.not_if {
            declaration = declaration.guard(Guard::not_if(condition(guard)));
        }
        if let Some(guard) = &spec.meta.only_if {
            declaration = declaration.guard(Guard::only_if(condition(guard)));
        }
        for notify in &spec.meta.notifies {
            declaration = declaration.notify(Notify::new(
                normalize(&notify.resource),
                notify.action.as_str(),
                notify.timing,
            ));
        }
        Ok(declaration)
    }

    fn resource(
        &self,
        spec: &ResourceSpec,
        probe_timeout: Option<Duration>,
    ) -> Result<Box<dyn Resource>> {
        let resource: Box<dyn Resource> = match &spec.kind {
            ResourceKind::File(file) => {
                let content = if let Some(text) = &file.content {
                    Content::Literal(text.clone())
                } else if let Some(template) = &file.template {
                    let mut variables = self.config.vars.clone();
                    variables.extend(file.variables.clone());
                    Content::Template {
                        template: template.clone(),
                        variables,
                        renderer: Arc::clone(&self.renderer),
                    }
                } else if let Some(source) = &file.source {
                    Content::Static(paths::resolve(&self.files_dir, source))
                } else {
                    Content::Touch
                };
                let attrs = attrs(&file.owner, &file.group, file.mode.as_deref())?;
                Box::new(File::new(paths::expand(&file.path), content, attrs))
            }
            ResourceKind::Directory(dir) => {
                let attrs = attrs(&dir.owner, &dir.group, dir.mode.as_deref())?;
                Box::new(Directory::new(paths::expand(&dir.path), attrs).recursive(dir.recursive))
            }
            ResourceKind::Package(pkg) => {
                let client = self
                    .providers
                    .packages
                    .system(self.config.settings.package_manager)?;
                Box::new(Package::system(package(pkg), client).probe_timeout(probe_timeout))
            }
            ResourceKind::GemPackage(pkg) => {
                let client = self.providers.packages.gem(pkg.gem_binary.as_deref())?;
                Box::new(Package::gem(package(pkg), client).probe_timeout(probe_timeout))
            }
            ResourceKind::User(user) => {
                let spec = backend::UserSpec {
                    name: user.name.clone(),
                    home: user.home.as_deref().map(paths::expand),
                    shell: user.shell.clone(),
                    comment: user.comment.clone(),
                    group: user.group.clone(),
                    system: user.system,
                    manage_home: user.manage_home,
                };
                Box::new(User::new(spec, Arc::clone(&self.providers.accounts)))
            }
            ResourceKind::Service(service) => Box::new(
                Service::new(service.name.as_str(), Arc::clone(&self.providers.supervisor))
                    .pattern(service.pattern.clone())
                    .enabled(service.enabled)
                    .running(service.running)
                    .probe_timeout(probe_timeout),
            ),
            ResourceKind::Command(cmd) => {
                let mut command = Command::new(cmd.name.as_str(), cmd.command.as_str());
                command.cwd = cmd.cwd.as_deref().map(paths::expand);
                command.environment = cmd.environment.clone();
                command.user = cmd.user.clone();
                command.group = cmd.group.clone();
                command.creates = cmd.creates.as_deref().map(paths::expand);
                Box::new(command)
            }
            ResourceKind::Git(git) => {
                let action = match spec.meta.action.as_deref() {
                    Some("sync") => GitAction::Sync,
                    _ => GitAction::Checkout,
                };
                Box::new(
                    Git::new(
                        paths::expand(&git.destination),
                        git.repository.as_str(),
                        git.revision.as_str(),
                        Arc::clone(&self.providers.vcs),
                    )
                    .action(action)
                    .run_as(git.user.clone(), git.group.clone())
                    .probe_timeout(probe_timeout),
                )
            }
            ResourceKind::Symlink(link) => Box::new(Symlink::new(
                paths::expand(&link.path),
                paths::expand(&link.to),
            )),
            ResourceKind::RemoteFile(remote) => {
                let attrs = attrs(&remote.owner, &remote.group, remote.mode.as_deref())?;
                Box::new(
                    RemoteFile::new(paths::expand(&remote.path), remote.source.as_str(), attrs)
                        .checksum(remote.checksum.clone()),
                )
            }
            ResourceKind::Archive(archive) => Box::new(
                Archive::new(
                    paths::expand(&archive.source),
                    paths::expand(&archive.destination),
                )?
                .creates(archive.creates.as_deref().map(paths::expand)),
            ),
        };
        Ok(resource)
    }
}

fn attrs(owner: &Option<String>, group: &Option<String>, mode: Option<&str>) -> Result<FileAttrs> {
    let mode = mode.map(parse_mode).transpose()?;
    Ok(FileAttrs::new(owner.as_deref(), group.as_deref(), mode))
}

fn package(spec: &crate::schema::PackageSpec) -> pkgkit::Package {
    let mut package = pkgkit::Package::new(spec.name.as_str()).with_options(spec.options.clone());
    if let Some(version) = &spec.version {
        package = package.with_version(version.as_str());
    }
    package
}

/// A shell snippet guard, or one probe
fn condition(guard: &GuardSpec) -> Condition {
    match guard {
        GuardSpec::Command(script) => Condition::Command(script.clone()),
        GuardSpec::Probe(probe) => {
            if let Some(path) = &probe.path_exists {
                Condition::PathExists(paths::expand(path))
            } else if let Some(path) = &probe.dir_empty {
                Condition::DirEmpty(paths::expand(path))
            } else {
                Condition::Command(probe.command.clone().unwrap_or_default())
            }
        }
    }
}

// ============================================================================
// Options
// ============================================================================

/// Command-line adjustments to the configured settings
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub dry_run: bool,
    pub verbose: bool,
    pub continue_on_error: bool,
    pub timeout_secs: Option<u64>,
}

/// Execution options from `[settings]`, with command-line overrides applied
pub fn execute_options(settings: &Settings, overrides: &Overrides) -> ExecuteOptions {
    ExecuteOptions {
        dry_run: overrides.dry_run,
        verbose: overrides.verbose,
        failure_policy: if overrides.continue_on_error {
            FailurePolicy::Continue
        } else {
            settings.failure_policy
        },
        guard_errors: settings.guard_errors,
        default_timeout: overrides
            .timeout_secs
            .map(Duration::from_secs)
            .or_else(|| settings.timeout()),
    }
}

/// Config file to use: the explicit path, or the default location
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => paths::default_config(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::resource::service::tests::FakeSupervisor;
    use crate::resource::user::tests::FakeAccounts;
    use declarative::{GuardErrorPolicy, ResourceRef, Timing};
    use pkgkit::PackageStatus;
    use pkgkit::backend::Backend;

    /// Every package reports as installed
    struct Installed;

    impl Backend for Installed {
        fn manager(&self) -> Manager {
            Manager::Apt
        }

        fn is_available(&self) -> bool {
            true
        }

        fn query(
            &self,
            _package: &pkgkit::Package,
            _timeout: Option<Duration>,
        ) -> pkgkit::Result<PackageStatus> {
            Ok(PackageStatus::Installed {
                version: "1.0".to_string(),
            })
        }

        fn install(
            &self,
            _package: &pkgkit::Package,
            _timeout: Option<Duration>,
        ) -> pkgkit::Result<()> {
            Ok(())
        }
    }

    struct FakePackages;

    impl PackageSource for FakePackages {
        fn system(&self, _manager: Option<Manager>) -> Result<Arc<Client>> {
            Ok(Arc::new(Client::with_backend(Box::new(Installed))))
        }

        fn gem(&self, _gem_binary: Option<&str>) -> Result<Arc<Client>> {
            Ok(Arc::new(Client::with_backend(Box::new(Installed))))
        }
    }

    /// Fakes for everything but the filesystem
    pub fn fake_providers(accounts: Arc<FakeAccounts>) -> Providers {
        Providers {
            accounts,
            vcs: Arc::new(GitCli::new()),
            supervisor: Arc::new(FakeSupervisor::default()),
            packages: Box::new(FakePackages),
        }
    }

    fn plan(source: &str) -> Result<RunList> {
        let config = Config::parse(source)?;
        let opts = execute_options(&config.settings, &Overrides::default());
        build_run_list(&config, &fake_providers(Arc::default()), &opts)
    }

    #[test]
    fn test_declarations_keep_order() {
        let run_list = plan(
            r#"
[[resource]]
kind = "package"
name = "nginx"

[[resource]]
kind = "directory"
path = "/srv/app"
mode = "0755"

[[resource]]
kind = "service"
name = "nginx"
"#,
        )
        .unwrap();

        let addresses: Vec<String> = run_list.addresses().iter().map(ToString::to_string).collect();
        assert_eq!(
            addresses,
            vec!["package[nginx]", "directory[/srv/app]", "service[nginx]"]
        );
    }

    #[test]
    fn test_subscription_becomes_notification() {
        let run_list = plan(
            r#"
[[resource]]
kind = "file"
path = "/etc/app.yml"
content = "port: 80\n"

[[resource]]
kind = "service"
name = "app"
subscribes = [{ action = "restart", resource = "file[/etc/app.yml]" }]
"#,
        )
        .unwrap();

        let file = run_list
            .get(&ResourceRef::new("file", "/etc/app.yml"))
            .unwrap();
        assert_eq!(file.notifies.len(), 1);
        assert_eq!(file.notifies[0].target, ResourceRef::new("service", "app"));
        assert_eq!(file.notifies[0].action, "restart");
        assert_eq!(file.notifies[0].timing, Timing::Delayed);
    }

    #[test]
    fn test_notify_target_must_exist() {
        let err = plan(
            r#"
[[resource]]
kind = "file"
path = "/etc/app.yml"
notifies = [{ action = "restart", resource = "service[missing]" }]
"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("service[missing]"));
    }

    #[test]
    fn test_unsupported_action_is_rejected() {
        let err = plan(
            r#"
[[resource]]
kind = "file"
path = "/etc/app.yml"
notifies = [{ action = "restart", resource = "directory[/etc]" }]

[[resource]]
kind = "directory"
path = "/etc"
"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("restart"));
    }

    #[test]
    fn test_notify_only_and_guards() {
        let run_list = plan(
            r#"
[[resource]]
kind = "command"
name = "reload"
command = "systemctl daemon-reload"
action = "nothing"
only_if = { path_exists = "/run/systemd/system" }
not_if = "test -e /tmp/skip"
timeout_secs = 5
"#,
        )
        .unwrap();

        let declaration = run_list.iter().next().unwrap();
        assert!(declaration.notify_only);
        assert_eq!(declaration.guards.len(), 2);
        assert_eq!(declaration.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_notify_targets_are_normalized() {
        // SAFETY: test-only env mutation, the name is unique to this test
        unsafe { std::env::set_var("PROVISOR_TEST_PREFIX", "/opt/toolchain") };
        let run_list = plan(
            r#"
[[resource]]
kind = "remote_file"
path = "/tmp/go.tar.gz"
source = "https://example.com/go.tar.gz"
notifies = [{ action = "extract", resource = "archive[$PROVISOR_TEST_PREFIX]", timing = "immediately" }]

[[resource]]
kind = "archive"
source = "/tmp/go.tar.gz"
destination = "/opt/toolchain"
action = "nothing"
"#,
        )
        .unwrap();

        let download = run_list
            .get(&ResourceRef::new("remote_file", "/tmp/go.tar.gz"))
            .unwrap();
        assert_eq!(
            download.notifies[0].target,
            ResourceRef::new("archive", "/opt/toolchain")
        );
        assert_eq!(download.notifies[0].timing, Timing::Immediately);
    }

    #[test]
    fn test_status_checks_use_command_line_timeout() {
        let config = Config::parse(
            r#"
[settings]
timeout_secs = 60

[[resource]]
kind = "service"
name = "app"
enabled = true
running = true

[[resource]]
kind = "service"
name = "worker"
running = true
timeout_secs = 3
"#,
        )
        .unwrap();
        let supervisor = Arc::new(FakeSupervisor::default());
        let providers = Providers {
            supervisor: Arc::clone(&supervisor) as Arc<dyn ServiceSupervisor>,
            ..fake_providers(Arc::default())
        };
        let opts = execute_options(
            &config.settings,
            &Overrides {
                timeout_secs: Some(7),
                ..Overrides::default()
            },
        );
        let run_list = build_run_list(&config, &providers, &opts).unwrap();

        let app = run_list.get(&ResourceRef::new("service", "app")).unwrap();
        app.resource.current_state().unwrap();
        assert_eq!(
            *supervisor.status_timeouts.lock().unwrap(),
            vec![Some(Duration::from_secs(7)); 2]
        );

        supervisor.status_timeouts.lock().unwrap().clear();
        let worker = run_list.get(&ResourceRef::new("service", "worker")).unwrap();
        worker.resource.current_state().unwrap();
        assert_eq!(
            *supervisor.status_timeouts.lock().unwrap(),
            vec![Some(Duration::from_secs(3))]
        );
    }

    #[test]
    fn test_execute_options_overrides() {
        let settings = Settings {
            guard_errors: GuardErrorPolicy::Fail,
            timeout_secs: Some(60),
            ..Settings::default()
        };

        let opts = execute_options(&settings, &Overrides::default());
        assert_eq!(opts.failure_policy, FailurePolicy::FailFast);
        assert_eq!(opts.guard_errors, GuardErrorPolicy::Fail);
        assert_eq!(opts.default_timeout, Some(Duration::from_secs(60)));

        let opts = execute_options(
            &settings,
            &Overrides {
                dry_run: true,
                continue_on_error: true,
                timeout_secs: Some(5),
                ..Overrides::default()
            },
        );
        assert!(opts.dry_run);
        assert_eq!(opts.failure_policy, FailurePolicy::Continue);
        assert_eq!(opts.default_timeout, Some(Duration::from_secs(5)));
    }
}
