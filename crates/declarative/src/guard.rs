//! Guards: read-only predicates that gate a declaration
//!
//! `not_if` skips the declaration when its condition holds, `only_if` skips
//! it when the condition does not hold.

use crate::process::Invocation;
use anyhow::{Context, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Which way a guard's condition is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    NotIf,
    OnlyIf,
}

impl fmt::Display for GuardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotIf => write!(f, "not_if"),
            Self::OnlyIf => write!(f, "only_if"),
        }
    }
}

/// Programmatic check, mostly for library users and tests
pub type CheckFn = Arc<dyn Fn() -> Result<bool> + Send + Sync>;

/// A predicate over the live machine
#[derive(Clone)]
pub enum Condition {
    /// Path exists (symlinks are followed)
    PathExists(PathBuf),
    /// Directory has no entries; a missing directory counts as empty
    DirEmpty(PathBuf),
    /// Shell snippet, true when it exits 0
    Command(String),
    /// Arbitrary check
    Check(CheckFn),
}

impl Condition {
    pub fn check(f: impl Fn() -> Result<bool> + Send + Sync + 'static) -> Self {
        Self::Check(Arc::new(f))
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathExists(p) => f.debug_tuple("PathExists").field(p).finish(),
            Self::DirEmpty(p) => f.debug_tuple("DirEmpty").field(p).finish(),
            Self::Command(c) => f.debug_tuple("Command").field(c).finish(),
            Self::Check(_) => f.write_str("Check(<fn>)"),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathExists(p) => write!(f, "path exists {}", p.display()),
            Self::DirEmpty(p) => write!(f, "directory empty {}", p.display()),
            Self::Command(c) => write!(f, "`{c}`"),
            Self::Check(_) => write!(f, "custom check"),
        }
    }
}

/// A condition plus the way it gates the declaration
#[derive(Debug, Clone)]
pub struct Guard {
    pub kind: GuardKind,
    pub condition: Condition,
}

impl Guard {
    pub fn not_if(condition: Condition) -> Self {
        Self {
            kind: GuardKind::NotIf,
            condition,
        }
    }

    pub fn only_if(condition: Condition) -> Self {
        Self {
            kind: GuardKind::OnlyIf,
            condition,
        }
    }

    /// Whether a condition outcome means the declaration must be skipped
    pub fn skips(&self, holds: bool) -> bool {
        match self.kind {
            GuardKind::NotIf => holds,
            GuardKind::OnlyIf => !holds,
        }
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.condition)
    }
}

/// Evaluates guard conditions against the machine
pub trait GuardEvaluator {
    /// Evaluate a condition; must not mutate anything
    fn evaluate(&self, condition: &Condition, timeout: Option<Duration>) -> Result<bool>;
}

/// Evaluator that probes the live filesystem and shell
pub struct SystemProbe;

impl GuardEvaluator for SystemProbe {
    fn evaluate(&self, condition: &Condition, timeout: Option<Duration>) -> Result<bool> {
        match condition {
            Condition::PathExists(path) => Ok(path.exists()),
            Condition::DirEmpty(path) => {
                if !path.exists() {
                    return Ok(true);
                }
                let mut entries = std::fs::read_dir(path)
                    .with_context(|| format!("Failed to read directory {}", path.display()))?;
                Ok(entries.next().is_none())
            }
            Condition::Command(script) => {
                let holds = Invocation::shell(script.as_str())
                    .timeout(timeout)
                    .succeeds()
                    .with_context(|| format!("Failed to evaluate `{script}`"))?;
                Ok(holds)
            }
            Condition::Check(check) => check(),
        }
    }
}

/// Outcome of evaluating all guards of a declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    /// Every guard allows the declaration to run
    Run,
    /// A guard requires skipping, with the reason
    Skip(String),
}

/// Evaluate guards in order, stopping at the first that skips
///
/// Errors are returned to the caller, who decides whether they count as
/// "condition false" or as a failure.
pub fn evaluate_guards(
    guards: &[Guard],
    evaluator: &dyn GuardEvaluator,
    timeout: Option<Duration>,
    mut on_error: impl FnMut(&Guard, anyhow::Error) -> Result<bool>,
) -> Result<GuardVerdict> {
    for guard in guards {
        let holds = match evaluator.evaluate(&guard.condition, timeout) {
            Ok(holds) => holds,
            Err(err) => on_error(guard, err)?,
        };
        if guard.skips(holds) {
            return Ok(GuardVerdict::Skip(format!("{guard}")));
        }
    }
    Ok(GuardVerdict::Run)
}
