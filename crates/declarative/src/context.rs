//! Apply context and progress reporting
//!
//! These let the engine stay independent of any terminal UI: the binary
//! plugs in its own [`ProgressCallback`].

use crate::declaration::Timing;
use crate::process::Invocation;
use crate::types::{DeclarationState, ExecuteSummary};
use std::time::Duration;

/// Progress callback for execution operations
///
/// Implement this trait to receive progress updates during execution.
pub trait ProgressCallback {
    /// Called once before the first declaration
    fn on_run_start(&mut self, total: usize);

    /// Called when the engine starts working on a declaration
    fn on_declaration_start(&mut self, index: usize, address: &str, description: &str);

    /// Called when a declaration reaches a terminal state
    fn on_declaration_complete(&mut self, address: &str, state: &DeclarationState);

    /// Called when a notification is about to run
    fn on_notification(&mut self, source: &str, target: &str, action: &str, timing: Timing);

    /// Called once after the run finishes or halts
    fn on_run_complete(&mut self, summary: &ExecuteSummary);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize) {}
    fn on_declaration_start(&mut self, _index: usize, _address: &str, _description: &str) {}
    fn on_declaration_complete(&mut self, _address: &str, _state: &DeclarationState) {}
    fn on_notification(&mut self, _source: &str, _target: &str, _action: &str, _timing: Timing) {}
    fn on_run_complete(&mut self, _summary: &ExecuteSummary) {}
}

/// Context passed to resource converge operations
#[derive(Debug, Clone, Default)]
pub struct ApplyContext {
    /// Whether this is a dry run (no actual changes)
    pub dry_run: bool,
    /// Whether to output verbose information
    pub verbose: bool,
    /// Time budget for external processes started by this declaration
    pub timeout: Option<Duration>,
}

impl ApplyContext {
    /// Create a new apply context
    pub fn new(dry_run: bool, verbose: bool) -> Self {
        Self {
            dry_run,
            verbose,
            timeout: None,
        }
    }

    /// Set the process timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Start building a process invocation that honors this context's timeout
    pub fn command(&self, program: impl Into<String>) -> Invocation {
        Invocation::new(program).timeout(self.timeout)
    }

    /// Shell script invocation that honors this context's timeout
    pub fn shell(&self, script: impl Into<String>) -> Invocation {
        Invocation::shell(script).timeout(self.timeout)
    }
}
