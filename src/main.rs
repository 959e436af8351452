#[cfg(not(unix))]
compile_error!("provisor manages Unix hosts only");

mod backend;
mod cli;
mod commands;
mod engine;
mod paths;
mod progress;
mod recipe;
mod resource;
mod schema;
mod sys;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };
    match cli.command {
        Command::Run(args) => commands::provision::run(&ctx, args),
        Command::Plan(args) => commands::provision::plan(&ctx, args),
        Command::Validate { config } => commands::provision::validate(&ctx, config.as_deref()),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "provisor", &mut io::stdout());
            Ok(())
        }
    }
}
