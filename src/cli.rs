use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "provisor")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge a host to a declared state", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Converge the host to the configuration
    Run(RunArgs),

    /// Show what a run would change, without changing anything
    Plan(PlanArgs),

    /// Check the configuration and list its declarations
    Validate {
        /// Config file
        config: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Config file (default: $PROVISOR_CONFIG, /etc/provisor/provisor.toml
    /// or ~/.config/provisor/provisor.toml)
    pub config: Option<PathBuf>,

    /// Keep going after a failed declaration
    #[arg(long)]
    pub continue_on_error: bool,

    /// Default per-declaration timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Print the run report as JSON instead of progress output
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct PlanArgs {
    /// Config file
    pub config: Option<PathBuf>,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::parse_from([
            "provisor",
            "-vv",
            "run",
            "/etc/provisor/site.toml",
            "--continue-on-error",
            "--timeout",
            "300",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.config, Some(PathBuf::from("/etc/provisor/site.toml")));
                assert!(args.continue_on_error);
                assert_eq!(args.timeout, Some(300));
                assert!(!args.json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["provisor", "plan", "--json", "-q"]);
        assert!(cli.quiet);
        assert!(matches!(
            cli.command,
            Command::Plan(PlanArgs {
                config: None,
                json: true
            })
        ));
    }
}
