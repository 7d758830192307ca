//! CLI command definitions for the `bvault` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod inspect;
pub mod run;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use uuid::Uuid;

/// Durable fan-out file backups.
#[derive(Parser)]
#[command(name = "bvault", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for engine decisions, -vv for everything).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Back up every file under ROOT and drive the instance to completion.
    Run {
        /// Directory to back up. Defaults to `default_root` from config.toml,
        /// then to the directory holding this executable.
        root: Option<String>,
    },

    /// Continue an unfinished instance from its recorded history.
    Resume {
        /// Instance to resume.
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        instance_id: Option<Uuid>,

        /// Resume every unfinished instance.
        #[arg(long)]
        all: bool,
    },

    /// Show an instance and the state of each file backup.
    Status {
        instance_id: Uuid,
    },

    /// Dump the raw event log of an instance.
    History {
        instance_id: Uuid,
    },

    /// List instances, newest first.
    #[command(alias = "ls")]
    List {
        /// Filter by status (running, completed, failed).
        #[arg(long)]
        status: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn resume_requires_id_or_all() {
        assert!(Cli::try_parse_from(["bvault", "resume"]).is_err());
        assert!(Cli::try_parse_from(["bvault", "resume", "--all"]).is_ok());

        let id = Uuid::now_v7().to_string();
        assert!(Cli::try_parse_from(["bvault", "resume", &id]).is_ok());
        assert!(Cli::try_parse_from(["bvault", "resume", &id, "--all"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["bvault", "run", "/data", "--json", "-vv"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run { root } => assert_eq!(root.as_deref(), Some("/data")),
            _ => panic!("expected run"),
        }
    }
}
