//! Backvault CLI entry point.
//!
//! Binary name: `bvault`
//!
//! Parses CLI arguments, initializes tracing, database and config, then
//! dispatches to the command handler. The process exits non-zero when a
//! backup fails or is interrupted.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use backvault_observe::tracing_setup::{init_tracing, otel_requested, shutdown_tracing};
use cli::run::Outcome;
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,backvault_core=debug,backvault_infra=debug",
        _ => "trace",
    };
    init_tracing(filter, otel_requested()).map_err(|e| anyhow::anyhow!("{e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "bvault", &mut std::io::stdout());
        return Ok(());
    }

    let outcome = dispatch(cli).await;
    shutdown_tracing();

    match outcome? {
        Outcome::Success => Ok(()),
        other => std::process::exit(other.exit_code()),
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<Outcome> {
    let state = AppState::init().await?;

    match cli.command {
        Commands::Run { root } => cli::run::run_backup(&state, root, cli.json, cli.quiet).await,

        Commands::Resume { instance_id, all } => {
            cli::run::resume(&state, instance_id, all, cli.json, cli.quiet).await
        }

        Commands::Status { instance_id } => {
            cli::inspect::status(&state, instance_id, cli.json).await?;
            Ok(Outcome::Success)
        }

        Commands::History { instance_id } => {
            cli::inspect::history(&state, instance_id, cli.json).await?;
            Ok(Outcome::Success)
        }

        Commands::List { status } => {
            cli::inspect::list(&state, status, cli.json).await?;
            Ok(Outcome::Success)
        }

        // Handled before state initialization
        Commands::Completions { .. } => Ok(Outcome::Success),
    }
}
