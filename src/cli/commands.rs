//! CLI command definitions using clap.
//!
//! - run: start the agent until Ctrl-C (default)
//! - check-config: load and validate configuration, then print it
//! - discover: run one discovery scan and print what it found

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// capagent - edge-side local capability agent
#[derive(Parser, Debug)]
#[command(name = "capagent")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Run the agent until interrupted
    Run {
        /// Seconds between health summaries printed to the console (0 disables)
        #[arg(long, default_value_t = 60)]
        status_every: u64,
    },

    /// Load and validate configuration, then print the effective values
    CheckConfig,

    /// Run a single discovery scan and list the endpoints found
    Discover,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_no_args() {
        // No subcommand means run
        let cli = Cli::try_parse_from(["capagent"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.is_verbose());
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::try_parse_from(["capagent", "-v"]).unwrap();
        assert!(cli.is_verbose());
    }

    #[test]
    fn test_cli_config_option() {
        let cli = Cli::try_parse_from(["capagent", "-c", "/etc/capagent/capagent.yml"]).unwrap();
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/etc/capagent/capagent.yml")));
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["capagent", "run"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Run { status_every: 60 }));
    }

    #[test]
    fn test_run_status_every() {
        let cli = Cli::try_parse_from(["capagent", "run", "--status-every", "0"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Run { status_every: 0 }));
    }

    #[test]
    fn test_check_config_with_global_config() {
        let cli = Cli::try_parse_from(["capagent", "check-config", "--config", "a.yml"]).unwrap();
        assert_eq!(cli.command, Some(Commands::CheckConfig));
        assert_eq!(cli.config, Some(PathBuf::from("a.yml")));
    }

    #[test]
    fn test_discover() {
        let cli = Cli::try_parse_from(["capagent", "discover"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Discover));
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        assert!(Cli::try_parse_from(["capagent", "daemon"]).is_err());
    }
}
