//! Run list - the ordered, validated set of declarations for one run

use crate::declaration::{Declaration, Notify, ResourceRef, Timing};
use crate::error::{Error, Result};
use crate::resource::ResourceExt;
use std::collections::HashMap;

/// Declarations in execution order, indexed by address
#[derive(Debug, Default)]
pub struct RunList {
    declarations: Vec<Declaration>,
    index: HashMap<ResourceRef, usize>,
}

impl RunList {
    /// Create a new empty run list
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and validate a run list in one go
    pub fn from_declarations(declarations: impl IntoIterator<Item = Declaration>) -> Result<Self> {
        let mut list = Self::new();
        for declaration in declarations {
            list.push(declaration)?;
        }
        list.validate()?;
        Ok(list)
    }

    /// Append a declaration, rejecting duplicate addresses
    pub fn push(&mut self, declaration: Declaration) -> Result<()> {
        let address = declaration.address();
        if self.index.contains_key(&address) {
            return Err(Error::config(format!("duplicate declaration {address}")));
        }
        self.index.insert(address, self.declarations.len());
        self.declarations.push(declaration);
        Ok(())
    }

    /// Record that `subscriber` wants `action` whenever `source` changes
    ///
    /// Stored as a notification on the source.
    pub fn subscribe(
        &mut self,
        subscriber: &ResourceRef,
        action: &str,
        source: &ResourceRef,
        timing: Timing,
    ) -> Result<()> {
        let Some(&position) = self.index.get(source) else {
            return Err(Error::config(format!(
                "{subscriber} subscribes to undeclared {source}"
            )));
        };
        self.declarations[position]
            .notifies
            .push(Notify::new(subscriber.clone(), action, timing));
        Ok(())
    }

    /// Check that every notification names a declared target and an action
    /// that target supports
    pub fn validate(&self) -> Result<()> {
        for declaration in &self.declarations {
            let source = declaration.address();
            for notify in &declaration.notifies {
                let Some(target) = self.get(&notify.target) else {
                    return Err(Error::config(format!(
                        "{source} notifies undeclared {}",
                        notify.target
                    )));
                };
                if !target.resource.supports_action(&notify.action) {
                    let supported = target.resource.actions();
                    return Err(Error::config(format!(
                        "{source} notifies {} with unsupported action '{}' (supported: {})",
                        notify.target,
                        notify.action,
                        if supported.is_empty() {
                            "none".to_string()
                        } else {
                            supported.join(", ")
                        }
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up a declaration by address
    pub fn get(&self, address: &ResourceRef) -> Option<&Declaration> {
        self.index.get(address).map(|&i| &self.declarations[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Declaration> {
        self.declarations.iter()
    }

    /// Addresses in execution order
    pub fn addresses(&self) -> Vec<ResourceRef> {
        self.declarations.iter().map(Declaration::address).collect()
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ApplyContext;
    use crate::resource::Resource;
    use crate::types::{ChangeResult, ResourceState};

    #[derive(Debug)]
    struct Stub {
        kind: &'static str,
        id: &'static str,
    }

    impl Resource for Stub {
        fn id(&self) -> String {
            self.id.to_string()
        }

        fn description(&self) -> String {
            format!("stub {}", self.id)
        }

        fn resource_type(&self) -> &'static str {
            self.kind
        }

        fn current_state(&self) -> anyhow::Result<ResourceState> {
            Ok(ResourceState::Absent)
        }

        fn desired_state(&self) -> ResourceState {
            ResourceState::Absent
        }

        fn converge(&self, _ctx: &mut ApplyContext) -> anyhow::Result<ChangeResult> {
            Ok(ChangeResult::Unchanged)
        }

        fn actions(&self) -> &'static [&'static str] {
            if self.kind == "service" { &["restart"] } else { &[] }
        }
    }

    fn decl(kind: &'static str, id: &'static str) -> Declaration {
        Declaration::new(Box::new(Stub { kind, id }))
    }

    fn r(s: &str) -> ResourceRef {
        s.parse().unwrap()
    }

    #[test]
    fn keeps_declaration_order() {
        let list = RunList::from_declarations(vec![
            decl("file", "/b"),
            decl("file", "/a"),
            decl("service", "nginx"),
        ])
        .unwrap();
        let addresses: Vec<_> = list.addresses().iter().map(ToString::to_string).collect();
        assert_eq!(addresses, vec!["file[/b]", "file[/a]", "service[nginx]"]);
    }

    #[test]
    fn rejects_duplicate_address() {
        let err = RunList::from_declarations(vec![decl("file", "/a"), decl("file", "/a")])
            .unwrap_err();
        assert!(err.to_string().contains("duplicate declaration file[/a]"));
    }

    #[test]
    fn rejects_unknown_notification_target() {
        let err = RunList::from_declarations(vec![
            decl("file", "/a").notify(Notify::delayed(r("service[nginx]"), "restart")),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("undeclared service[nginx]"));
    }

    #[test]
    fn rejects_unsupported_action() {
        let err = RunList::from_declarations(vec![
            decl("service", "nginx"),
            decl("file", "/a").notify(Notify::delayed(r("service[nginx]"), "explode")),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("unsupported action 'explode'"));
    }

    #[test]
    fn subscribe_becomes_notification_on_source() {
        let mut list = RunList::new();
        list.push(decl("file", "/etc/app.yml")).unwrap();
        list.push(decl("service", "app")).unwrap();
        list.subscribe(&r("service[app]"), "restart", &r("file[/etc/app.yml]"), Timing::Delayed)
            .unwrap();
        list.validate().unwrap();

        let source = list.get(&r("file[/etc/app.yml]")).unwrap();
        assert_eq!(source.notifies, vec![Notify::delayed(r("service[app]"), "restart")]);
    }

    #[test]
    fn subscribe_to_undeclared_source_fails() {
        let mut list = RunList::new();
        list.push(decl("service", "app")).unwrap();
        assert!(
            list.subscribe(&r("service[app]"), "restart", &r("file[/nope]"), Timing::Delayed)
                .is_err()
        );
    }
}
