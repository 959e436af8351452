//! Console output helpers

use colored::{ColoredString, Colorize};
use declarative::DeclarationState;

pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Errors go to stderr so `--json` output stays parseable
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Title with an underline as wide as the title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// `[3/12] directory[/srv/app]`
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{num}/{total}]").blue().bold(), msg);
}

/// One failed declaration, as reported at the end of a run
pub fn failure(address: &str, action: &str, reason: &str) {
    eprintln!(
        "{} {} {}: {}",
        "✗".red(),
        address.bold(),
        format!("({action})").dimmed(),
        reason
    );
}

// ============================================================================
// Declaration states
// ============================================================================

/// Mark shown in front of a finished declaration
pub fn state_mark(state: &DeclarationState) -> ColoredString {
    match state {
        DeclarationState::Succeeded { changed: true } => "✓".green(),
        DeclarationState::Succeeded { changed: false } => "○".dimmed(),
        DeclarationState::Skipped { .. } => "⊘".dimmed(),
        DeclarationState::Failed { .. } => "✗".red(),
        DeclarationState::NotRun => "·".dimmed(),
        DeclarationState::Pending
        | DeclarationState::Evaluating
        | DeclarationState::Converging => "…".dimmed(),
    }
}

// ============================================================================
// Formatting
// ============================================================================

/// Format milliseconds for the run log, e.g. `850ms`, `2.4s`, `3m 05s`
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        let secs = ms / 1_000;
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

/// Shorten a long address from the left, keeping the path tail
pub fn truncate_path(path: &str, max_len: usize) -> String {
    let len = path.chars().count();
    if len <= max_len {
        path.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let tail: String = path.chars().skip(len - max_len + 3).collect();
        format!("...{tail}")
    }
}
