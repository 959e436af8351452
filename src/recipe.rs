//! Application server recipe
//!
//! Expands `[app]` into an ordered list of resource specs: packages, the
//! service account and its home, the application checkout and its rendered
//! config, bundler, optional companions (helper checkout, git HTTP server,
//! Go toolchain), the nginx site and finally the application service.
//! The planner treats these exactly like `[[resource]]` entries.

use anyhow::Result;
use declarative::{ResourceRef, Timing};
use std::collections::BTreeMap;
use toml::{Table, Value};

use crate::schema::{
    AppConfig, ArchiveSpec, HelperConfig, CommandSpec, DirectorySpec, FileSpec, GitSpec, GuardSpec, PackageSpec,
    RemoteFileSpec, ResourceKind, ResourceSpec, ServiceSpec, SymlinkSpec, UserSpec,
};

const DAEMON_RELOAD: &str = "systemd-daemon-reload";
const GO_TARBALL: &str = "/tmp/go.tar.gz";

/// Expand the recipe into resource specs, in execution order
pub fn expand(app: &AppConfig) -> Result<Vec<ResourceSpec>> {
    let recipe = Recipe::new(app);
    let mut specs = Vec::new();

    recipe.system(&mut specs);
    recipe.account(&mut specs);
    recipe.gems(&mut specs);
    recipe.helper(&mut specs);
    recipe.application(&mut specs);
    recipe.logrotate(&mut specs);
    recipe.bundle(&mut specs);
    recipe.go(&mut specs);
    recipe.http_server(&mut specs);
    recipe.assets_and_database(&mut specs);
    recipe.site(&mut specs);
    recipe.service(&mut specs);

    Ok(specs)
}

struct Recipe<'a> {
    app: &'a AppConfig,
    home: String,
    app_home: String,
    bundle: String,
}

impl<'a> Recipe<'a> {
    fn new(app: &'a AppConfig) -> Self {
        Self {
            app,
            home: app.home.trim_end_matches('/').to_string(),
            app_home: app.app_home().trim_end_matches('/').to_string(),
            bundle: format!("{}/bin/bundle", app.ruby_path.trim_end_matches('/')),
        }
    }

    /// File owned by the app account
    fn owned_file(&self, path: String, mode: &str) -> FileSpec {
        FileSpec {
            path,
            owner: Some(self.app.user.clone()),
            group: Some(self.app.group.clone()),
            mode: Some(mode.to_string()),
            ..FileSpec::default()
        }
    }

    fn template(&self, path: String, template: &str, mode: &str, variables: Table) -> ResourceSpec {
        ResourceSpec::new(ResourceKind::File(FileSpec {
            template: Some(template.to_string()),
            variables,
            ..self.owned_file(path, mode)
        }))
    }

    fn directory(&self, path: String, mode: &str, recursive: bool) -> ResourceSpec {
        ResourceSpec::new(ResourceKind::Directory(DirectorySpec {
            path,
            owner: Some(self.app.user.clone()),
            group: Some(self.app.group.clone()),
            mode: Some(mode.to_string()),
            recursive,
        }))
    }

    /// Command run as the app account in `cwd`
    fn command(&self, name: &str, command: String, cwd: &str) -> CommandSpec {
        CommandSpec {
            name: name.to_string(),
            command,
            cwd: Some(cwd.to_string()),
            user: Some(self.app.user.clone()),
            group: Some(self.app.group.clone()),
            ..CommandSpec::default()
        }
    }

    fn helper_home(&self, helper: &HelperConfig) -> String {
        helper
            .home
            .clone()
            .unwrap_or_else(|| format!("{}/{}-shell", self.home, self.app.name))
    }

    fn utf8_locale() -> BTreeMap<String, String> {
        ["LANG", "LC_ALL"]
            .into_iter()
            .map(|key| (key.to_string(), "en_US.UTF-8".to_string()))
            .collect()
    }

    fn system(&self, specs: &mut Vec<ResourceSpec>) {
        for name in &self.app.packages {
            specs.push(ResourceSpec::new(ResourceKind::Package(PackageSpec {
                name: name.clone(),
                ..PackageSpec::default()
            })));
        }
    }

    fn account(&self, specs: &mut Vec<ResourceSpec>) {
        let app = self.app;
        specs.push(ResourceSpec::new(ResourceKind::User(UserSpec {
            name: app.user.clone(),
            home: Some(self.home.clone()),
            shell: Some("/bin/bash".to_string()),
            comment: Some(format!("{} User", capitalize(&app.name))),
            manage_home: true,
            ..UserSpec::default()
        })));

        // nginx needs to traverse the home
        specs.push(self.directory(self.home.clone(), "0755", false));
        specs.push(self.directory(format!("{}/.ssh", self.home), "0700", false));
        specs.push(ResourceSpec::new(ResourceKind::File(
            self.owned_file(format!("{}/.ssh/authorized_keys", self.home), "0600"),
        )));

        specs.push(self.template(
            format!("{}/.gitconfig", self.home),
            "gitconfig.tmpl",
            "0644",
            vars([
                ("user", app.user.clone().into()),
                ("fqdn", app.fqdn.clone().into()),
            ]),
        ));
        specs.push(self.template(
            format!("{}/.ssh/config", self.home),
            "ssh_config.tmpl",
            "0644",
            vars([
                ("fqdn", app.fqdn.clone().into()),
                ("trust_local_sshkeys", app.trust_local_sshkeys.into()),
            ]),
        ));
    }

    fn gems(&self, specs: &mut Vec<ResourceSpec>) {
        for name in &self.app.gems {
            specs.push(ResourceSpec::new(ResourceKind::GemPackage(PackageSpec {
                name: name.clone(),
                options: vec!["--no-document".to_string()],
                gem_binary: self.app.gem_binary.clone(),
                ..PackageSpec::default()
            })));
        }
    }

    fn helper(&self, specs: &mut Vec<ResourceSpec>) {
        let Some(helper) = &self.app.helper else {
            return;
        };
        let home = self.helper_home(helper);

        specs.push(ResourceSpec::new(ResourceKind::Git(GitSpec {
            destination: home.clone(),
            repository: helper.repository.clone(),
            revision: helper.revision.clone(),
            user: Some(self.app.user.clone()),
            group: Some(self.app.group.clone()),
        })));
        specs.push(self.template(
            format!("{home}/config.yml"),
            "helper_config.yml.tmpl",
            "0644",
            vars([
                (
                    "fqdn",
                    helper
                        .api_host
                        .clone()
                        .unwrap_or_else(|| self.app.fqdn.clone())
                        .into(),
                ),
                ("listen_port", i64::from(self.app.listen_port()).into()),
                ("user", self.app.user.clone().into()),
                ("home", self.home.clone().into()),
            ]),
        ));
    }

    fn application(&self, specs: &mut Vec<ResourceSpec>) {
        let app = self.app;
        let config = format!("{}/config", self.app_home);

        specs.push(ResourceSpec::new(ResourceKind::Git(GitSpec {
            destination: self.app_home.clone(),
            repository: app.repository.clone(),
            revision: app.revision.clone(),
            user: Some(app.user.clone()),
            group: Some(app.group.clone()),
        })));

        // Unit first, so a restart triggered by the app config finds it
        let unit = ResourceSpec::new(ResourceKind::File(FileSpec {
            path: format!("/etc/systemd/system/{}.service", app.name),
            template: Some("app.service.tmpl".to_string()),
            variables: vars([
                ("name", app.name.clone().into()),
                ("user", app.user.clone().into()),
                ("group", app.group.clone().into()),
                ("home", self.home.clone().into()),
                ("app_home", self.app_home.clone().into()),
                ("bundle", self.bundle.clone().into()),
            ]),
            owner: Some("root".to_string()),
            group: Some("root".to_string()),
            mode: Some("0644".to_string()),
            ..FileSpec::default()
        }))
        .notifies(
            "run",
            ResourceRef::new("command", DAEMON_RELOAD),
            Timing::Immediately,
        );
        specs.push(unit);
        specs.push(
            ResourceSpec::new(ResourceKind::Command(CommandSpec {
                name: DAEMON_RELOAD.to_string(),
                command: "systemctl daemon-reload".to_string(),
                ..CommandSpec::default()
            }))
            .notify_only(),
        );

        let db = &app.database;
        specs.push(self.template(
            format!("{config}/database.yml"),
            "database.yml.tmpl",
            "0644",
            vars([
                (
                    "adapter",
                    db.adapter
                        .clone()
                        .unwrap_or_else(|| db.kind.default_adapter().to_string())
                        .into(),
                ),
                (
                    "encoding",
                    db.encoding
                        .clone()
                        .unwrap_or_else(|| db.kind.default_encoding().to_string())
                        .into(),
                ),
                ("collation", db.collation.clone().unwrap_or_default().into()),
                ("host", db.host.clone().into()),
                (
                    "database",
                    db.database
                        .clone()
                        .unwrap_or_else(|| format!("{}_production", app.name))
                        .into(),
                ),
                ("pool", i64::from(db.pool).into()),
                (
                    "username",
                    db.username.clone().unwrap_or_else(|| app.user.clone()).into(),
                ),
                ("password", db.password.clone().into()),
            ]),
        ));

        specs.push(self.template(
            format!("{config}/{}.yml", app.name),
            "app.yml.tmpl",
            "0644",
            vars([
                ("fqdn", app.fqdn.clone().into()),
                ("https", app.https.into()),
                ("user", app.user.clone().into()),
                ("home", self.home.clone().into()),
                ("backup_path", app.backup_path().into()),
                ("backup_keep_time", (app.backup_keep_time as i64).into()),
                ("listen_port", i64::from(app.listen_port()).into()),
            ]),
        ));
        specs.push(self.template(
            format!("{config}/secrets.yml"),
            "secrets.yml.tmpl",
            "0600",
            vars([("secret_key_base", app.secret_key_base.clone().into())]),
        ));

        for initializer in &app.initializers {
            specs.push(ResourceSpec::new(ResourceKind::File(FileSpec {
                source: Some(initializer.clone()),
                ..self.owned_file(format!("{config}/initializers/{initializer}"), "0644")
            })));
        }

        for dir in ["log", "tmp", "tmp/pids", "tmp/sockets", "public/uploads"] {
            specs.push(self.directory(format!("{}/{dir}", self.app_home), "0755", true));
        }
        specs.push(self.directory(format!("{}/{}-satellites", self.home, app.name), "0755", true));
        specs.push(self.directory(format!("{}/repositories", self.home), "2770", true));
        specs.push(self.directory(app.backup_path(), "0755", false));

        specs.push(self.template(
            format!("{config}/unicorn.rb"),
            "unicorn.rb.tmpl",
            "0644",
            vars([
                ("fqdn", app.fqdn.clone().into()),
                ("app_home", self.app_home.clone().into()),
                ("timeout", (app.unicorn_timeout as i64).into()),
            ]),
        ));
    }

    /// Weekly rotation of the app logs and the helper's log, as the app account
    fn logrotate(&self, specs: &mut Vec<ResourceSpec>) {
        let app = self.app;
        let rotation = &app.logrotate;
        if !rotation.enabled {
            return;
        }

        let mut logs = vec![format!("{}/log/*.log", self.app_home)];
        if let Some(helper) = &app.helper {
            logs.push(format!("{}/{}-shell.log", self.helper_home(helper), app.name));
        }

        specs.push(ResourceSpec::new(ResourceKind::File(FileSpec {
            path: format!("{}/{}", rotation.dir.trim_end_matches('/'), app.name),
            template: Some("logrotate.tmpl".to_string()),
            variables: vars([
                ("paths", logs.join(" ").into()),
                ("frequency", rotation.frequency.clone().into()),
                ("rotate", i64::from(rotation.rotate).into()),
                ("user", app.user.clone().into()),
                ("group", app.group.clone().into()),
            ]),
            owner: Some("root".to_string()),
            group: Some("root".to_string()),
            mode: Some("0644".to_string()),
            ..FileSpec::default()
        })));
    }

    fn bundle(&self, specs: &mut Vec<ResourceSpec>) {
        let marker = format!("{}/vendor/bundle/.success", self.app_home);
        let mut install = self.command(
            "bundle-install",
            format!(
                "{} install --deployment --binstubs --without development test {} aws && touch {marker}",
                self.bundle,
                self.app.database.kind.excluded_group()
            ),
            &self.app_home,
        );
        install.environment = Self::utf8_locale();
        install.creates = Some(marker);
        specs.push(ResourceSpec::new(ResourceKind::Command(install)));
    }

    fn go(&self, specs: &mut Vec<ResourceSpec>) {
        let Some(go) = &self.app.go else {
            return;
        };
        let prefix = go.prefix.trim_end_matches('/');
        let go_binary = format!("{prefix}/bin/go");

        specs.push(
            ResourceSpec::new(ResourceKind::RemoteFile(RemoteFileSpec {
                path: GO_TARBALL.to_string(),
                source: go.url.clone(),
                checksum: go.checksum.clone(),
                owner: Some("root".to_string()),
                group: Some("root".to_string()),
                mode: Some("0644".to_string()),
            }))
            .not_if(GuardSpec::path_exists(go_binary.clone()))
            .notifies(
                "extract",
                ResourceRef::new("archive", prefix),
                Timing::Immediately,
            ),
        );
        specs.push(
            ResourceSpec::new(ResourceKind::Archive(ArchiveSpec {
                source: GO_TARBALL.to_string(),
                destination: prefix.to_string(),
                creates: Some(format!("{prefix}/go/bin/go")),
            }))
            .notify_only(),
        );

        for tool in ["go", "godoc", "gofmt"] {
            let link = format!("{prefix}/bin/{tool}");
            let target = format!("{prefix}/go/bin/{tool}");
            specs.push(
                ResourceSpec::new(ResourceKind::Symlink(SymlinkSpec {
                    path: link.clone(),
                    to: target.clone(),
                }))
                .not_if(GuardSpec::Command(format!("test -e {link}")))
                .only_if(GuardSpec::Command(format!("test -e {target}"))),
            );
        }
    }

    fn http_server(&self, specs: &mut Vec<ResourceSpec>) {
        let Some(server) = &self.app.http_server else {
            return;
        };
        let destination = format!("{}/git-http-server", self.home);
        let build = format!("build-{}", server.binary);

        specs.push(
            ResourceSpec::new(ResourceKind::Git(GitSpec {
                destination: destination.clone(),
                repository: server.repository.clone(),
                revision: server.revision.clone(),
                user: Some(self.app.user.clone()),
                group: Some(self.app.group.clone()),
            }))
            .action("sync")
            .notifies("run", ResourceRef::new("command", build.clone()), Timing::Immediately),
        );
        specs.push(
            ResourceSpec::new(ResourceKind::Command(self.command(
                &build,
                "make".to_string(),
                &destination,
            )))
            .not_if(GuardSpec::path_exists(format!("{destination}/{}", server.binary))),
        );
    }

    fn assets_and_database(&self, specs: &mut Vec<ResourceSpec>) {
        let mut assets = self.command(
            "precompile-assets",
            format!(
                "{} exec rake assets:precompile RAILS_ENV=production",
                self.bundle
            ),
            &self.app_home,
        );
        assets.environment = Self::utf8_locale();
        specs.push(
            ResourceSpec::new(ResourceKind::Command(assets))
                .only_if(GuardSpec::dir_empty(format!("{}/public/assets", self.app_home))),
        );

        let task = self
            .app
            .setup_task
            .clone()
            .unwrap_or_else(|| format!("{}:setup", self.app.name));
        let marker = format!(".{}-setup", self.app.name);
        specs.push(
            ResourceSpec::new(ResourceKind::Command(self.command(
                "setup-database",
                format!(
                    "{} exec rake {task} RAILS_ENV=production force=yes && touch {marker}",
                    self.bundle
                ),
                &self.app_home,
            )))
            .not_if(GuardSpec::path_exists(format!("{}/{marker}", self.app_home))),
        );
    }

    fn site(&self, specs: &mut Vec<ResourceSpec>) {
        let app = self.app;
        let site = &app.site;
        if !site.enabled {
            return;
        }
        let nginx = site.nginx_dir.trim_end_matches('/');
        let available = format!("{nginx}/sites-available/{}", app.name);

        specs.push(
            ResourceSpec::new(ResourceKind::File(FileSpec {
                path: available.clone(),
                template: Some("nginx_site.tmpl".to_string()),
                variables: vars([
                    ("server_name", app.server_names().join(" ").into()),
                    ("app_home", self.app_home.clone().into()),
                    ("https", app.https.into()),
                    (
                        "ssl_certificate",
                        site.ssl_certificate
                            .clone()
                            .unwrap_or_else(|| format!("{nginx}/ssl/{}.crt", app.fqdn))
                            .into(),
                    ),
                    (
                        "ssl_certificate_key",
                        site.ssl_certificate_key
                            .clone()
                            .unwrap_or_else(|| format!("{nginx}/ssl/{}.key", app.fqdn))
                            .into(),
                    ),
                    (
                        "listen",
                        format!("{}:{}", app.listen_ip, app.listen_port()).into(),
                    ),
                ]),
                owner: Some("root".to_string()),
                group: Some("root".to_string()),
                mode: Some("0644".to_string()),
                ..FileSpec::default()
            }))
            .notifies("restart", ResourceRef::new("service", "nginx"), Timing::Delayed),
        );
        specs.push(ResourceSpec::new(ResourceKind::Symlink(SymlinkSpec {
            path: format!("{nginx}/sites-enabled/{}", app.name),
            to: available,
        })));
        specs.push(ResourceSpec::new(ResourceKind::Service(ServiceSpec {
            name: "nginx".to_string(),
            enabled: true,
            running: true,
            ..ServiceSpec::default()
        })));
    }

    fn service(&self, specs: &mut Vec<ResourceSpec>) {
        let app = self.app;
        let pattern = app.service_pattern.clone().unwrap_or_else(|| {
            format!(
                "unicorn_rails master -D -c {}/config/unicorn.rb",
                self.app_home
            )
        });
        specs.push(
            ResourceSpec::new(ResourceKind::Service(ServiceSpec {
                name: app.name.clone(),
                pattern: Some(pattern),
                enabled: true,
                running: true,
            }))
            .subscribes(
                "restart",
                ResourceRef::new(
                    "file",
                    format!("{}/config/{}.yml", self.app_home, app.name),
                ),
                Timing::Delayed,
            ),
        );
    }
}

fn vars<const N: usize>(pairs: [(&str, Value); N]) -> Table {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
