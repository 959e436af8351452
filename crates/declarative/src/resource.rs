//! Resource trait for declarative state management
//!
//! A Resource represents something that can be in a certain state,
//! and can be changed to reach a desired state.

use crate::context::ApplyContext;
use crate::declaration::ResourceRef;
use crate::diff::ContentChange;
use crate::types::{ChangeResult, ResourceState};
use anyhow::{Result, bail};
use std::fmt;

/// Core trait for declarative resources
///
/// Every resource kind implements this trait, which provides:
/// - Identity (id, description, type)
/// - State detection (current vs desired)
/// - State convergence (converge)
/// - Named actions that notifications can trigger
///
/// # Example
///
/// ```ignore
/// use declarative::{ApplyContext, ChangeResult, Resource, ResourceState};
///
/// #[derive(Debug)]
/// struct Marker {
///     path: String,
/// }
///
/// impl Resource for Marker {
///     fn id(&self) -> String {
///         self.path.clone()
///     }
///
///     fn description(&self) -> String {
///         format!("Ensure marker exists at {}", self.path)
///     }
///
///     fn resource_type(&self) -> &'static str {
///         "marker"
///     }
///
///     fn current_state(&self) -> anyhow::Result<ResourceState> {
///         if std::path::Path::new(&self.path).exists() {
///             Ok(ResourceState::Present { details: None })
///         } else {
///             Ok(ResourceState::Absent)
///         }
///     }
///
///     fn desired_state(&self) -> ResourceState {
///         ResourceState::Present { details: None }
///     }
///
///     fn converge(&self, _ctx: &mut ApplyContext) -> anyhow::Result<ChangeResult> {
///         if !self.needs_apply()? {
///             return Ok(ChangeResult::Unchanged);
///         }
///         std::fs::write(&self.path, b"")?;
///         Ok(ChangeResult::Changed)
///     }
/// }
/// ```
pub trait Resource: Send + Sync + fmt::Debug {
    /// Identity of this resource within its type
    ///
    /// Examples:
    /// - "nginx" for a package or a service
    /// - "/etc/nginx/sites-available/app" for a file
    fn id(&self) -> String;

    /// Human-readable description of what this resource does
    fn description(&self) -> String;

    /// Resource type, the `kind` half of the address
    fn resource_type(&self) -> &'static str;

    /// Detect the current state of this resource
    ///
    /// Must be read-only.
    fn current_state(&self) -> Result<ResourceState>;

    /// Get the desired state for this resource
    fn desired_state(&self) -> ResourceState;

    /// Check if the resource needs changes to reach desired state
    ///
    /// Default implementation compares current and desired states.
    fn needs_apply(&self) -> Result<bool> {
        let current = self.current_state()?;
        let desired = self.desired_state();
        Ok(current != desired)
    }

    /// Converge to the desired state
    ///
    /// This method should:
    /// 1. Return `Unchanged` if already in the desired state
    /// 2. Apply the whole attribute set, never part of it
    /// 3. Return `Changed` if anything was modified
    fn converge(&self, ctx: &mut ApplyContext) -> Result<ChangeResult>;

    /// Old and new text when the resource manages file content
    ///
    /// Only used for previews; must be read-only.
    fn content_change(&self) -> Result<Option<ContentChange>> {
        Ok(None)
    }

    /// Actions other declarations may trigger through notifications
    fn actions(&self) -> &'static [&'static str] {
        &[]
    }

    /// Run a named action, typically because of a notification
    fn run_action(&self, action: &str, _ctx: &mut ApplyContext) -> Result<ChangeResult> {
        bail!(
            "{} does not support action '{}'",
            self.resource_type(),
            action
        )
    }
}

/// A boxed resource for type-erased storage
pub type BoxedResource = Box<dyn Resource>;

/// Extension trait for working with resources
pub trait ResourceExt {
    /// The `kind[identity]` address of this resource
    fn address(&self) -> ResourceRef;

    /// Whether `action` may be the target of a notification
    fn supports_action(&self, action: &str) -> bool;
}

impl<R: Resource + ?Sized> ResourceExt for R {
    fn address(&self) -> ResourceRef {
        ResourceRef::new(self.resource_type(), self.id())
    }

    fn supports_action(&self, action: &str) -> bool {
        self.actions().contains(&action)
    }
}
