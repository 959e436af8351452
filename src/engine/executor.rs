//! Console execution - progress, summaries and the JSON run log

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use declarative::{
    DeclarationState, ExecuteOptions, ExecuteSummary, GuardEvaluator, ProgressCallback, RunList,
    RunReport, Timing, execute,
};
use indicatif::ProgressBar;
use serde::Serialize;
use std::io::Write;

use crate::progress;
use crate::ui;

/// Longest address shown on one progress line
const MAX_ADDRESS_WIDTH: usize = 60;

/// Progress callback that draws a bar and logs each finished declaration
pub struct ConsoleProgress {
    pb: ProgressBar,
    total: usize,
    verbose: bool,
    quiet: bool,
}

impl ConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        Self {
            pb: progress::hidden(),
            total: 0,
            verbose,
            quiet: false,
        }
    }

    /// Progress that prints nothing, for `--json`
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::new(false)
        }
    }

    fn line(&self, text: &str) {
        if !self.quiet {
            self.pb.suspend(|| println!("{text}"));
        }
    }
}

impl ProgressCallback for ConsoleProgress {
    fn on_run_start(&mut self, total: usize) {
        self.total = total;
        if !self.quiet && !self.verbose {
            self.pb = progress::bar(total as u64, "Converging");
        }
    }

    fn on_declaration_start(&mut self, index: usize, address: &str, description: &str) {
        if self.quiet {
            return;
        }
        if self.verbose {
            ui::step(index + 1, self.total, description);
        }
        self.pb
            .set_message(ui::truncate_path(address, MAX_ADDRESS_WIDTH));
    }

    fn on_declaration_complete(&mut self, address: &str, state: &DeclarationState) {
        self.pb.inc(1);
        let address = ui::truncate_path(address, MAX_ADDRESS_WIDTH);
        let mark = ui::state_mark(state);
        let text = match state {
            DeclarationState::Succeeded { changed: true } => format!("  {mark} {address}"),
            DeclarationState::Succeeded { changed: false } if self.verbose => {
                format!("  {mark} {}", address.dimmed())
            }
            DeclarationState::Skipped { reason } if self.verbose => {
                format!("  {mark} {address} {}", format!("({reason})").dimmed())
            }
            DeclarationState::Failed { reason } => format!("  {mark} {address}: {}", reason.red()),
            _ => return,
        };
        self.line(&text);
    }

    fn on_notification(&mut self, source: &str, target: &str, action: &str, timing: Timing) {
        let text = format!(
            "    {} {action} {target} {}",
            "↳".cyan(),
            format!("(notified by {source}, {timing})").dimmed()
        );
        self.line(&text);
    }

    fn on_run_complete(&mut self, _summary: &ExecuteSummary) {
        self.pb.finish_and_clear();
    }
}

/// Run the list with console progress
pub fn run(
    run_list: &RunList,
    opts: &ExecuteOptions,
    evaluator: &dyn GuardEvaluator,
    progress: &mut ConsoleProgress,
) -> TimedReport {
    let started_at = Utc::now();
    let report = execute(run_list, opts, evaluator, progress);
    TimedReport {
        started_at,
        finished_at: Utc::now(),
        report,
    }
}

/// A run report with wall-clock bounds, as written by `--json`
#[derive(Debug, Serialize)]
pub struct TimedReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub report: RunReport,
}

impl TimedReport {
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// Pretty JSON, one document per run
    pub fn write_json(&self, mut out: impl Write) -> Result<()> {
        serde_json::to_writer_pretty(&mut out, self).context("Failed to serialize run report")?;
        writeln!(out).context("Failed to write run report")?;
        Ok(())
    }
}

/// Print the end-of-run summary
pub fn print_summary(timed: &TimedReport) {
    let report = &timed.report;
    let summary = &report.summary;

    ui::section("Summary");
    ui::kv("Changed", &summary.changed.to_string());
    ui::kv("Unchanged", &summary.unchanged.to_string());
    if summary.skipped > 0 {
        ui::kv("Skipped", &summary.skipped.to_string());
    }
    if summary.notifications > 0 {
        ui::kv("Notifications", &summary.notifications.to_string());
    }
    if summary.not_run > 0 {
        ui::kv("Not run", &summary.not_run.to_string());
    }
    if summary.failed > 0 {
        ui::kv("Failed", &summary.failed.to_string().red().to_string());
    }
    ui::kv("Duration", &ui::format_duration_ms(timed.duration_ms()));

    println!();
    if report.dry_run {
        ui::info("Dry run - no changes made");
    } else if let Some(halted) = &report.halted {
        ui::error(&format!("Run halted at {}", halted.address));
    } else if report.is_success() {
        ui::success("Host converged");
    } else {
        ui::warn(&format!(
            "Host converged with {} failure(s)",
            report.failures.len()
        ));
    }

    for entry in report
        .entries
        .iter()
        .filter(|e| matches!(e.state, DeclarationState::NotRun))
    {
        ui::dim(&format!("not run: {}", entry.address));
    }
}
