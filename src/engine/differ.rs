//! Preview of what a run would change

use colored::Colorize;
use declarative::{ContentChange, DiffSummary, ResourceDiff, ResourceState, RunReport, group_by_type};
use similar::{ChangeTag, TextDiff};

/// Lines of context around each changed hunk
const CONTEXT_LINES: usize = 3;

/// Display the changes a dry run found, grouped by resource kind
pub fn display_plan(report: &RunReport) {
    let diffs: Vec<&ResourceDiff> = report.entries.iter().filter_map(|e| e.diff.as_ref()).collect();

    if diffs.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Planned Changes".bold()
    );
    println!("│");

    for (resource_type, type_diffs) in group_by_type(diffs.iter().copied()) {
        println!("│ {}", type_label(resource_type).bold());
        for diff in type_diffs {
            println!(
                "│   {} {:<40} {}",
                symbol(diff),
                diff.resource_id,
                describe(&diff.current, &diff.desired).dimmed()
            );
            if let Some(change) = &diff.content {
                let (added, removed) = line_stats(change);
                println!(
                    "│       {}",
                    format!("{added} line(s) added, {removed} removed").dimmed()
                );
                for line in unified_diff(change).lines() {
                    println!("│       {}", colorize(line));
                }
            }
        }
        println!("│");
    }

    let summary = DiffSummary::from_diffs(diffs.iter().copied());
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} changes ({} new, {} modified)",
        summary.total().to_string().bold(),
        summary.additions.to_string().green(),
        summary.modifications.to_string().yellow()
    );
    println!("└─────────────────────────────────────────────────────┘");
}

fn type_label(resource_type: &str) -> &str {
    match resource_type {
        "file" => "Files",
        "directory" => "Directories",
        "package" => "Packages",
        "gem_package" => "Gems",
        "user" => "Users",
        "service" => "Services",
        "command" => "Commands",
        "git" => "Checkouts",
        "symlink" => "Symlinks",
        "remote_file" => "Downloads",
        "archive" => "Archives",
        other => other,
    }
}

fn symbol(diff: &ResourceDiff) -> colored::ColoredString {
    if diff.is_addition() {
        "+".green()
    } else if diff.is_removal() {
        "-".red()
    } else if diff.is_modification() {
        "~".yellow()
    } else {
        "?".dimmed()
    }
}

fn describe(current: &ResourceState, desired: &ResourceState) -> String {
    match (current, desired) {
        (ResourceState::Absent, ResourceState::Present { details }) => match details {
            Some(details) => format!("(missing) → {details}"),
            None => "(missing)".to_string(),
        },
        (ResourceState::Modified { from, to }, _) => format!("{from} → {to}"),
        (ResourceState::Present { details: from }, ResourceState::Present { details: to }) => {
            format!(
                "{} → {}",
                from.as_deref().unwrap_or("current"),
                to.as_deref().unwrap_or("desired")
            )
        }
        (ResourceState::Unknown, _) => "(unknown state)".to_string(),
        _ => String::new(),
    }
}

/// Unified diff of a file's content, empty when nothing differs
pub fn unified_diff(change: &ContentChange) -> String {
    TextDiff::from_lines(&change.current, &change.desired)
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .header("current", "desired")
        .to_string()
}

/// Count of inserted and deleted lines
fn line_stats(change: &ContentChange) -> (usize, usize) {
    let diff = TextDiff::from_lines(&change.current, &change.desired);
    diff.iter_all_changes()
        .fold((0, 0), |(added, removed), c| match c.tag() {
            ChangeTag::Insert => (added + 1, removed),
            ChangeTag::Delete => (added, removed + 1),
            ChangeTag::Equal => (added, removed),
        })
}

fn colorize(line: &str) -> colored::ColoredString {
    if line.starts_with("+++") || line.starts_with("---") {
        line.bold()
    } else if line.starts_with('+') {
        line.green()
    } else if line.starts_with('-') {
        line.red()
    } else if line.starts_with("@@") {
        line.cyan()
    } else {
        line.normal()
    }
}
