//! Declarations: a resource plus the rules for when and how it runs

use crate::error::Error;
use crate::guard::Guard;
use crate::resource::{BoxedResource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Address of a declaration, written `kind[identity]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceRef {
    pub kind: String,
    pub id: String,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.id)
    }
}

impl FromStr for ResourceRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, rest) = s
            .split_once('[')
            .ok_or_else(|| Error::config(format!("invalid resource address '{s}', expected kind[identity]")))?;
        let id = rest
            .strip_suffix(']')
            .ok_or_else(|| Error::config(format!("invalid resource address '{s}', missing closing ']'")))?;

        if kind.is_empty() || id.is_empty() {
            return Err(Error::config(format!(
                "invalid resource address '{s}', kind and identity must be non-empty"
            )));
        }

        Ok(Self::new(kind, id))
    }
}

impl TryFrom<String> for ResourceRef {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceRef> for String {
    fn from(value: ResourceRef) -> Self {
        value.to_string()
    }
}

/// When a notification runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timing {
    /// Right after the notifying declaration, before the next one
    Immediately,
    /// Once, at the end of the run
    #[default]
    Delayed,
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediately => write!(f, "immediately"),
            Self::Delayed => write!(f, "delayed"),
        }
    }
}

/// A notification a declaration sends when it changes state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notify {
    pub target: ResourceRef,
    pub action: String,
    #[serde(default)]
    pub timing: Timing,
}

impl Notify {
    pub fn new(target: ResourceRef, action: impl Into<String>, timing: Timing) -> Self {
        Self {
            target,
            action: action.into(),
            timing,
        }
    }

    pub fn delayed(target: ResourceRef, action: impl Into<String>) -> Self {
        Self::new(target, action, Timing::Delayed)
    }

    pub fn immediately(target: ResourceRef, action: impl Into<String>) -> Self {
        Self::new(target, action, Timing::Immediately)
    }
}

/// One unit of desired state in a run list
#[derive(Debug)]
pub struct Declaration {
    pub resource: BoxedResource,
    pub guards: Vec<Guard>,
    pub notifies: Vec<Notify>,
    /// Failure is logged but never halts the run
    pub ignore_failure: bool,
    /// Overrides the run's default timeout
    pub timeout: Option<Duration>,
    /// Skipped in list order; only runs when notified
    pub notify_only: bool,
}

impl Declaration {
    pub fn new(resource: BoxedResource) -> Self {
        Self {
            resource,
            guards: Vec::new(),
            notifies: Vec::new(),
            ignore_failure: false,
            timeout: None,
            notify_only: false,
        }
    }

    pub fn guard(mut self, guard: Guard) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn notify(mut self, notify: Notify) -> Self {
        self.notifies.push(notify);
        self
    }

    pub fn ignore_failure(mut self, ignore: bool) -> Self {
        self.ignore_failure = ignore;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn notify_only(mut self, notify_only: bool) -> Self {
        self.notify_only = notify_only;
        self
    }

    pub fn address(&self) -> ResourceRef {
        self.resource.address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_address() {
        let r: ResourceRef = "service[nginx]".parse().unwrap();
        assert_eq!(r.kind, "service");
        assert_eq!(r.id, "nginx");
        assert_eq!(r.to_string(), "service[nginx]");
    }

    #[test]
    fn parse_address_with_brackets_in_identity() {
        let r: ResourceRef = "file[/srv/app/config[1].yml]".parse().unwrap();
        assert_eq!(r.kind, "file");
        assert_eq!(r.id, "/srv/app/config[1].yml");
    }

    #[test]
    fn reject_malformed_addresses() {
        assert!("nginx".parse::<ResourceRef>().is_err());
        assert!("service[nginx".parse::<ResourceRef>().is_err());
        assert!("[nginx]".parse::<ResourceRef>().is_err());
        assert!("service[]".parse::<ResourceRef>().is_err());
    }

    #[test]
    fn timing_defaults_to_delayed() {
        assert_eq!(Timing::default(), Timing::Delayed);
    }
}
