//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// orch - policy-driven service orchestration.
#[derive(Parser, Debug)]
#[command(name = "orch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "ORCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the policy.
    Validate {
        /// Show warnings as well as errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Resolve the policy and show dependency outcomes.
    Resolve {
        /// Only show this dependency (`namespace:dependency:name`).
        #[arg(short, long)]
        dependency: Option<String>,

        /// List resolved component instances.
        #[arg(short, long)]
        instances: bool,
    },

    /// Show the actions needed to reach the desired state.
    Plan {
        /// Show changed fields of updates.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Apply the plan and record a new revision.
    Apply {
        /// Stop after the first wave with a failure.
        #[arg(long)]
        fail_fast: bool,

        /// Maximum number of actions applied concurrently.
        #[arg(long)]
        max_parallel: Option<usize>,
    },

    /// Check for drift between the policy and the actual state.
    Drift,

    /// Show endpoints of deployed code instances.
    Endpoints {
        /// Only show this dependency (`namespace:dependency:name`).
        #[arg(short, long)]
        dependency: Option<String>,
    },

    /// Show plugin resources of one dependency.
    Resources {
        /// Dependency key (`namespace:dependency:name`).
        dependency: String,
    },

    /// Manage the state backend.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show the current state and recent revisions.
    Show {
        /// Number of revisions to list.
        #[arg(long, default_value = "5")]
        revisions: usize,
    },

    /// Release a state lock.
    Unlock {
        /// Lock ID to release; defaults to the current lock.
        #[arg(long)]
        lock_id: Option<String>,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apply_flags() {
        let cli = Cli::try_parse_from(["orch", "apply", "--fail-fast", "--max-parallel", "2"]).unwrap();
        match cli.command {
            Commands::Apply {
                fail_fast,
                max_parallel,
            } => {
                assert!(fail_fast);
                assert_eq!(max_parallel, Some(2));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["orch", "state", "show", "--output", "json", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.output, OutputFormat::Json));
        assert!(matches!(
            cli.command,
            Commands::State {
                command: StateCommands::Show { revisions: 5 }
            }
        ));
    }
}
