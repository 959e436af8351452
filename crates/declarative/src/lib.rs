//! # Declarative
//!
//! A convergence engine for declarative host provisioning.
//!
//! Describe the desired end state as an ordered list of declarations; the
//! engine checks each one against the live system and changes only what
//! differs.
//!
//! ## Core Concepts
//!
//! - **Resource**: Something with state that can be managed (files, packages, services)
//! - **Declaration**: A resource plus its guards, notifications and failure handling
//! - **Guard**: `not_if` / `only_if` predicates evaluated before converging
//! - **Notification**: An action triggered on another declaration when this one changes
//! - **RunList**: Validated declarations in execution order, addressed as `kind[identity]`
//! - **Executor**: Walks the run list and produces a [`RunReport`]
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     ApplyContext, ChangeResult, Declaration, ExecuteOptions, Notify, Resource,
//!     ResourceState, RunList, execute_simple,
//! };
//!
//! #[derive(Debug)]
//! struct Marker { path: String }
//!
//! impl Resource for Marker {
//!     fn id(&self) -> String { self.path.clone() }
//!     fn description(&self) -> String { format!("Marker {}", self.path) }
//!     fn resource_type(&self) -> &'static str { "marker" }
//!
//!     fn current_state(&self) -> anyhow::Result<ResourceState> {
//!         if std::path::Path::new(&self.path).exists() {
//!             Ok(ResourceState::Present { details: None })
//!         } else {
//!             Ok(ResourceState::Absent)
//!         }
//!     }
//!
//!     fn desired_state(&self) -> ResourceState {
//!         ResourceState::Present { details: None }
//!     }
//!
//!     fn converge(&self, _ctx: &mut ApplyContext) -> anyhow::Result<ChangeResult> {
//!         if !self.needs_apply()? {
//!             return Ok(ChangeResult::Unchanged);
//!         }
//!         std::fs::write(&self.path, b"")?;
//!         Ok(ChangeResult::Changed)
//!     }
//! }
//!
//! let list = RunList::from_declarations(vec![
//!     Declaration::new(Box::new(Marker { path: "/tmp/ready".into() })),
//! ])?;
//!
//! let report = execute_simple(&list, &ExecuteOptions::default());
//! let summary = report.into_result()?;
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`GuardEvaluator`]: Evaluates guard conditions ([`SystemProbe`] for the live system)
//! - [`ProgressCallback`]: Receives progress updates
//!
//! This keeps the engine free of any terminal UI or concrete resource kinds.

pub mod context;
pub mod declaration;
pub mod diff;
pub mod error;
pub mod executor;
pub mod guard;
pub mod notify;
pub mod planner;
pub mod process;
pub mod resource;
pub mod types;

// Re-export main types at crate root
pub use context::{ApplyContext, NoProgress, ProgressCallback};
pub use declaration::{Declaration, Notify, ResourceRef, Timing};
pub use diff::{ContentChange, DiffSummary, ResourceDiff, group_by_type};
pub use error::{Error, Failure, FailureKind, ProcessError, Result};
pub use executor::{NotificationRecord, ReportEntry, RunReport, execute, execute_simple};
pub use guard::{Condition, Guard, GuardEvaluator, GuardKind, SystemProbe};
pub use notify::NotificationQueue;
pub use planner::RunList;
pub use process::Invocation;
pub use resource::{BoxedResource, Resource, ResourceExt};
pub use types::{
    ChangeResult, CommandOutput, DeclarationState, ExecuteOptions, ExecuteSummary,
    FailurePolicy, GuardErrorPolicy, ResourceState,
};
