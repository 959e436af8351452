//! Core types for declarative resource management

use serde::{Deserialize, Serialize};
use std::process::Output;
use std::time::Duration;

/// Current or desired state of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    /// Resource exists/is configured
    Present { details: Option<String> },
    /// Resource does not exist/is not configured
    Absent,
    /// Resource exists but differs from desired
    Modified { from: String, to: String },
    /// State cannot be determined
    Unknown,
}

impl ResourceState {
    /// Check if state represents presence
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    /// Check if state represents absence
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// Result of converging a resource or running one of its actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeResult {
    /// Already in the desired state
    Unchanged,
    /// State was changed
    Changed,
    /// Convergence failed
    Failed { reason: String },
}

impl ChangeResult {
    /// Check if the result represents success (no failure)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Changed)
    }

    /// `Changed` when `changed` is true, otherwise `Unchanged`
    pub fn changed_if(changed: bool) -> Self {
        if changed { Self::Changed } else { Self::Unchanged }
    }
}

/// Lifecycle of one declaration during a run
///
/// `Pending → Evaluating → {Skipped | Converging → {Succeeded | Failed}}`.
/// Declarations never reached because the run halted stay `NotRun`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeclarationState {
    Pending,
    Evaluating,
    Skipped { reason: String },
    Converging,
    Succeeded { changed: bool },
    Failed { reason: String },
    NotRun,
}

impl DeclarationState {
    /// Whether the state machine has stopped for this declaration
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Skipped { .. } | Self::Succeeded { .. } | Self::Failed { .. } | Self::NotRun
        )
    }

    /// Whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: &DeclarationState) -> bool {
        use DeclarationState::{
            Converging, Evaluating, Failed, NotRun, Pending, Skipped, Succeeded,
        };
        matches!(
            (self, next),
            (Pending, Evaluating)
                | (Pending, NotRun)
                | (Pending, Skipped { .. })
                | (Evaluating, Skipped { .. })
                | (Evaluating, Converging)
                | (Evaluating, Failed { .. })
                | (Converging, Succeeded { .. })
                | (Converging, Failed { .. })
        )
    }

    /// Short label for console output
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Evaluating => "evaluating",
            Self::Skipped { .. } => "skipped",
            Self::Converging => "converging",
            Self::Succeeded { changed: true } => "changed",
            Self::Succeeded { changed: false } => "unchanged",
            Self::Failed { .. } => "failed",
            Self::NotRun => "not run",
        }
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub changed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub not_run: usize,
    pub notifications: usize,
}

impl ExecuteSummary {
    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of declarations accounted for
    pub fn total(&self) -> usize {
        self.changed + self.unchanged + self.skipped + self.failed + self.not_run
    }

    /// Add a terminal declaration state to the summary
    pub fn add_state(&mut self, state: &DeclarationState) {
        match state {
            DeclarationState::Succeeded { changed: true } => self.changed += 1,
            DeclarationState::Succeeded { changed: false } => self.unchanged += 1,
            DeclarationState::Skipped { .. } => self.skipped += 1,
            DeclarationState::Failed { .. } => self.failed += 1,
            DeclarationState::NotRun => self.not_run += 1,
            DeclarationState::Pending
            | DeclarationState::Evaluating
            | DeclarationState::Converging => {}
        }
    }
}

/// What to do when a declaration fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Halt the run at the first fatal failure
    #[default]
    FailFast,
    /// Record the failure and keep going
    Continue,
}

/// What to do when a guard cannot be evaluated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GuardErrorPolicy {
    /// Log it and treat the predicate as false
    #[default]
    TreatAsFalse,
    /// Fail the declaration
    Fail,
}

/// Options for execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Only check resources, never change anything
    pub dry_run: bool,
    /// Verbose output
    pub verbose: bool,
    /// Halt or continue after a failure
    pub failure_policy: FailurePolicy,
    /// How guard evaluation errors are handled
    pub guard_errors: GuardErrorPolicy,
    /// Timeout applied to declarations that don't set their own
    pub default_timeout: Option<Duration>,
}

/// Output from an external command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
    pub code: Option<i32>,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            success: output.status.success(),
            code: output.status.code(),
        }
    }
}

impl CommandOutput {
    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}
