//! Package resources - system packages and Ruby gems

use anyhow::Result;
use declarative::{ApplyContext, ChangeResult, Resource, ResourceState};
use pkgkit::{Client, PackageStatus};
use std::sync::Arc;
use std::time::Duration;

/// Which manager a [`Package`] goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    System,
    Gem,
}

/// A package that should be installed
#[derive(Debug, Clone)]
pub struct Package {
    pub kind: PackageKind,
    pub package: pkgkit::Package,
    client: Arc<Client>,
    /// Budget for the query probe; installs use the apply context's
    probe_timeout: Option<Duration>,
}

impl Package {
    pub fn system(package: pkgkit::Package, client: Arc<Client>) -> Self {
        Self {
            kind: PackageKind::System,
            package,
            client,
            probe_timeout: None,
        }
    }

    pub fn gem(package: pkgkit::Package, client: Arc<Client>) -> Self {
        Self {
            kind: PackageKind::Gem,
            ..Self::system(package, client)
        }
    }

    pub fn probe_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.probe_timeout = timeout;
        self
    }

    fn wanted(&self) -> String {
        self.package
            .version
            .clone()
            .unwrap_or_else(|| "any version".to_string())
    }
}

impl Resource for Package {
    fn id(&self) -> String {
        self.package.name.clone()
    }

    fn description(&self) -> String {
        let noun = match self.kind {
            PackageKind::System => "package",
            PackageKind::Gem => "gem",
        };
        format!("Install {noun} {}", self.package)
    }

    fn resource_type(&self) -> &'static str {
        match self.kind {
            PackageKind::System => "package",
            PackageKind::Gem => "gem_package",
        }
    }

    fn current_state(&self) -> Result<ResourceState> {
        let status = self.client.query(&self.package, self.probe_timeout)?;
        Ok(match status {
            PackageStatus::Absent => ResourceState::Absent,
            ref installed if installed.satisfies(&self.package) => {
                ResourceState::Present { details: None }
            }
            PackageStatus::Installed { version } => ResourceState::Modified {
                from: version,
                to: self.wanted(),
            },
        })
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present { details: None }
    }

    fn converge(&self, ctx: &mut ApplyContext) -> Result<ChangeResult> {
        let installed = self.client.ensure(&self.package, ctx.timeout)?;
        Ok(ChangeResult::changed_if(installed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::ProcessError;
    use pkgkit::Manager;
    use pkgkit::backend::Backend;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeManager {
        installed: Mutex<Vec<(String, String)>>,
        hang: bool,
    }

    impl Backend for FakeManager {
        fn manager(&self) -> Manager {
            Manager::Apt
        }

        fn is_available(&self) -> bool {
            true
        }

        fn query(
            &self,
            package: &pkgkit::Package,
            _timeout: Option<Duration>,
        ) -> pkgkit::Result<PackageStatus> {
            let installed = self.installed.lock().unwrap();
            Ok(installed
                .iter()
                .find(|(name, _)| *name == package.name)
                .map_or(PackageStatus::Absent, |(_, version)| {
                    PackageStatus::Installed {
                        version: version.clone(),
                    }
                }))
        }

        fn install(
            &self,
            package: &pkgkit::Package,
            timeout: Option<Duration>,
        ) -> pkgkit::Result<()> {
            if self.hang {
                return Err(ProcessError::Timeout {
                    command: format!("apt-get install {}", package.name),
                    after: timeout.unwrap_or_default(),
                }
                .into());
            }
            let version = package.version.clone().unwrap_or_else(|| "1.0".to_string());
            let mut installed = self.installed.lock().unwrap();
            installed.retain(|(name, _)| *name != package.name);
            installed.push((package.name.clone(), version));
            Ok(())
        }
    }

    fn client(backend: FakeManager) -> Arc<Client> {
        Arc::new(Client::with_backend(Box::new(backend)))
    }

    #[test]
    fn test_install_then_unchanged() {
        let resource = Package::system(
            pkgkit::Package::new("nginx"),
            client(FakeManager::default()),
        );
        let mut ctx = ApplyContext::new(false, false);

        assert_eq!(resource.current_state().unwrap(), ResourceState::Absent);
        assert_eq!(resource.converge(&mut ctx).unwrap(), ChangeResult::Changed);
        assert_eq!(resource.converge(&mut ctx).unwrap(), ChangeResult::Unchanged);
        assert!(!resource.needs_apply().unwrap());
    }

    #[test]
    fn test_wrong_version_is_modified() {
        let backend = FakeManager::default();
        backend
            .installed
            .lock()
            .unwrap()
            .push(("bundler".to_string(), "2.4.22".to_string()));
        let resource = Package::gem(
            pkgkit::Package::new("bundler").with_version("1.17.3"),
            client(backend),
        );

        assert_eq!(resource.resource_type(), "gem_package");
        assert_eq!(
            resource.current_state().unwrap(),
            ResourceState::Modified {
                from: "2.4.22".to_string(),
                to: "1.17.3".to_string()
            }
        );
        assert_eq!(
            resource.converge(&mut ApplyContext::new(false, false)).unwrap(),
            ChangeResult::Changed
        );
    }

    #[test]
    fn test_install_timeout_is_classified() {
        let resource = Package::system(
            pkgkit::Package::new("gitlab-ce"),
            client(FakeManager {
                hang: true,
                ..FakeManager::default()
            }),
        );
        let mut ctx = ApplyContext::new(false, false).with_timeout(Some(Duration::from_secs(5)));
        let err = resource.converge(&mut ctx).unwrap_err();
        assert_eq!(
            declarative::FailureKind::classify(&err),
            declarative::FailureKind::Timeout { after_secs: 5 }
        );
    }
}
