//! `run`, `plan` and `validate`

use anyhow::{Result, bail};
use declarative::{ExecuteOptions, RunList, RunReport, SystemProbe};
use std::io;
use std::path::{Path, PathBuf};

use crate::Context;
use crate::cli::{PlanArgs, RunArgs};
use crate::engine::{self, ConsoleProgress, Overrides, Providers, differ, planner};
use crate::progress;
use crate::schema::Config;
use crate::sys;
use crate::ui;

/// Converge the host
pub fn run(ctx: &Context, args: RunArgs) -> Result<()> {
    let talk = !ctx.quiet && !args.json;
    let (path, config) = load(args.config.as_deref())?;
    let opts = engine::execute_options(
        &config.settings,
        &Overrides {
            dry_run: false,
            verbose: ctx.verbose > 0,
            continue_on_error: args.continue_on_error,
            timeout_secs: args.timeout,
        },
    );
    let run_list = plan_run_list(&config, &opts, talk)?;

    if talk {
        ui::header(&format!("Converging {} declarations", run_list.len()));
        ui::kv("Config", &path.display().to_string());
        if !sys::is_root() {
            ui::warn("Not running as root; account, package and service changes will likely fail");
        }
        println!();
    }

    let mut progress = if talk {
        ConsoleProgress::new(ctx.verbose > 0)
    } else {
        ConsoleProgress::quiet()
    };
    let timed = engine::run(&run_list, &opts, &SystemProbe, &mut progress);

    if args.json {
        timed.write_json(io::stdout().lock())?;
    } else if !ctx.quiet {
        engine::print_summary(&timed);
    }
    finish(&timed.report)
}

/// Preview a run
pub fn plan(ctx: &Context, args: PlanArgs) -> Result<()> {
    let json = args.json;
    let talk = !ctx.quiet && !json;
    let (path, config) = load(args.config.as_deref())?;

    let opts = engine::execute_options(
        &config.settings,
        &Overrides {
            dry_run: true,
            verbose: ctx.verbose > 0,
            ..Overrides::default()
        },
    );
    let run_list = plan_run_list(&config, &opts, talk)?;
    let mut progress = ConsoleProgress::quiet();
    let timed = engine::run(&run_list, &opts, &SystemProbe, &mut progress);

    if json {
        timed.write_json(io::stdout().lock())?;
    } else if !ctx.quiet {
        ui::header(&format!("Plan for {}", path.display()));
        differ::display_plan(&timed.report);
        engine::print_summary(&timed);
    }
    finish(&timed.report)
}

/// Check the configuration and every notification target
pub fn validate(ctx: &Context, config: Option<&Path>) -> Result<()> {
    let (path, config) = load(config)?;
    let opts = engine::execute_options(&config.settings, &Overrides::default());
    let run_list = plan_run_list(&config, &opts, false)?;
    if ctx.quiet {
        return Ok(());
    }

    ui::success(&format!(
        "{} is valid ({} declarations)",
        path.display(),
        run_list.len()
    ));
    for declaration in run_list.iter() {
        let mut notes = Vec::new();
        if declaration.notify_only {
            notes.push("notify only".to_string());
        }
        for guard in &declaration.guards {
            notes.push(guard.to_string());
        }
        for notify in &declaration.notifies {
            notes.push(format!(
                "{} {} ({})",
                notify.action, notify.target, notify.timing
            ));
        }
        if notes.is_empty() {
            ui::dim(&declaration.address().to_string());
        } else {
            ui::dim(&format!("{} [{}]", declaration.address(), notes.join("; ")));
        }
    }
    Ok(())
}

fn load(explicit: Option<&Path>) -> Result<(PathBuf, Config)> {
    let path = planner::config_path(explicit)?;
    let config = Config::load(&path)?;
    Ok((path, config))
}

fn plan_run_list(config: &Config, opts: &ExecuteOptions, talk: bool) -> Result<RunList> {
    let pb = if talk {
        progress::spinner("Planning...")
    } else {
        progress::hidden()
    };
    let run_list = engine::build_run_list(config, &Providers::host(), opts);
    pb.finish_and_clear();
    run_list
}

/// Report every failure on stderr; any failure fails the command
fn finish(report: &RunReport) -> Result<()> {
    if report.is_success() {
        return Ok(());
    }
    for failure in &report.failures {
        ui::failure(&failure.address, &failure.action, &failure.reason);
    }
    if let Some(halted) = &report.halted {
        bail!("run halted at {}", halted.address);
    }
    bail!("{} declaration(s) failed", report.failures.len())
}
