//! `bvault run` and `bvault resume`: drive instances with a live progress bar.
//!
//! Ctrl+C interrupts the engine instead of killing the process, so the
//! instance is left `Running` with a consistent history and can be resumed.

use std::cell::Cell;
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use comfy_table::{Cell as TableCell, Color, ContentArrangement, Table, presets};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use backvault_core::workflow::executor::{EngineError, ExecutionResult};
use backvault_infra::config::resolve_root;
use backvault_types::activity::ActivityStatus;
use backvault_types::event::EngineEvent;
use backvault_types::history::project_backup_tasks;
use backvault_types::instance::InstanceStatus;
use backvault_types::outcome::OrchestrationFailure;

use crate::state::{AppState, ConcreteEngine};

/// How a command ended, for the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Outcome {
    Success,
    Failed,
    Interrupted,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Success => 0,
            Outcome::Failed => 1,
            Outcome::Interrupted => 130,
        }
    }
}

/// Start a new backup of `root` and drive it to completion.
pub async fn run_backup(
    state: &AppState,
    root: Option<String>,
    json: bool,
    quiet: bool,
) -> Result<Outcome> {
    let root = resolve_root(root.as_deref(), &state.config).unwrap_or_default();
    let engine = state.engine();

    if !json && !quiet {
        println!();
        println!("  {} Backing up {}", style("▸").cyan().bold(), style(&root).cyan());
        println!();
    }

    let progress = Progress::new(!json && !quiet)?;
    let result = drive_with_progress(&engine, engine.start(root), &progress).await;
    progress.finish();

    handle_result(state, result, json, quiet).await
}

/// Resume one instance, or every unfinished one with `all`.
pub async fn resume(
    state: &AppState,
    instance_id: Option<Uuid>,
    all: bool,
    json: bool,
    quiet: bool,
) -> Result<Outcome> {
    let engine = state.engine();
    let progress = Progress::new(!json && !quiet)?;

    if all {
        let results = drive_with_progress(&engine, engine.resume_unfinished(), &progress).await;
        progress.finish();
        let results = results?;

        if results.is_empty() && !json && !quiet {
            println!();
            println!("  {} No unfinished instances.", style("i").blue().bold());
            println!();
            return Ok(Outcome::Success);
        }

        let mut worst = Outcome::Success;
        for (_, result) in results {
            worst = worst.max(handle_result(state, result, json, quiet).await?);
        }
        return Ok(worst);
    }

    let Some(instance_id) = instance_id else {
        anyhow::bail!("an instance id or --all is required");
    };
    let result = drive_with_progress(&engine, engine.resume(instance_id), &progress).await;
    progress.finish();

    handle_result(state, result, json, quiet).await
}

/// Poll `run` to completion while rendering engine events and forwarding
/// Ctrl+C to the engine.
async fn drive_with_progress<F, T>(engine: &ConcreteEngine, run: F, progress: &Progress) -> T
where
    F: Future<Output = T>,
{
    let mut events = engine.event_bus().subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(run);
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            result = &mut run => return result,
            signal = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                if signal.is_ok() {
                    progress.message("interrupting, waiting for the journal...");
                    engine.interrupt_all();
                }
            }
            event = events.recv() => match event {
                Ok(event) => progress.apply(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "progress display fell behind engine events");
                }
                Err(RecvError::Closed) => return run.await,
            },
        }
    }
}

async fn handle_result(
    state: &AppState,
    result: Result<ExecutionResult, EngineError>,
    json: bool,
    quiet: bool,
) -> Result<Outcome> {
    match result {
        Ok(result) => report(state, &result, json, quiet).await,
        Err(EngineError::Interrupted(id)) => {
            if json {
                let out = serde_json::json!({
                    "instance_id": id,
                    "status": InstanceStatus::Running,
                    "interrupted": true,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                eprintln!();
                eprintln!(
                    "  {} Interrupted. Continue with: {}",
                    style("!").yellow().bold(),
                    style(format!("bvault resume {id}")).yellow()
                );
                eprintln!();
            }
            Ok(Outcome::Interrupted)
        }
        Err(EngineError::NonDeterministic {
            instance_id,
            violation,
        }) => {
            if json {
                let out = serde_json::json!({
                    "instance_id": instance_id,
                    "status": InstanceStatus::Failed,
                    "failure": OrchestrationFailure::NonDeterministic(violation),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                eprintln!();
                eprintln!(
                    "  {} Instance {} no longer matches its history: {violation}",
                    style("✗").red().bold(),
                    style(instance_id).dim()
                );
                eprintln!();
            }
            Ok(Outcome::Failed)
        }
        Err(e) => Err(e.into()),
    }
}

/// Print the outcome of a finished instance.
async fn report(
    state: &AppState,
    result: &ExecutionResult,
    json: bool,
    quiet: bool,
) -> Result<Outcome> {
    let outcome = match result.status {
        InstanceStatus::Completed => Outcome::Success,
        _ => Outcome::Failed,
    };

    let (_, history) = state.journal().load(result.instance_id).await?;
    let activities = state.activities();
    let tasks = project_backup_tasks(&history, |source| {
        activities.target_path(source).display().to_string()
    });
    let backed_up = tasks
        .iter()
        .filter(|t| t.status == ActivityStatus::Completed)
        .count();

    if json {
        let out = serde_json::json!({
            "instance_id": result.instance_id,
            "status": result.status,
            "total_bytes": result.total_bytes(),
            "files": tasks.len(),
            "backed_up": backed_up,
            "failure": result.failure,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(outcome);
    }

    match &result.failure {
        None => {
            if !quiet {
                println!(
                    "  {} Backed up {} files ({}), instance {}",
                    style("✓").green().bold(),
                    style(backed_up).bold(),
                    style(format_bytes(result.total_bytes().unwrap_or(0))).cyan(),
                    style(result.instance_id).dim()
                );
                println!();
            }
        }
        Some(OrchestrationFailure::Aggregate(aggregate)) => {
            eprintln!(
                "  {} {} of {} backups failed, instance {}",
                style("✗").red().bold(),
                style(aggregate.failures.len()).red().bold(),
                aggregate.attempted,
                style(result.instance_id).dim()
            );
            eprintln!();

            let mut table = Table::new();
            table.load_preset(presets::UTF8_FULL_CONDENSED);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec![
                TableCell::new("File").fg(Color::White),
                TableCell::new("Error").fg(Color::White),
            ]);
            for item in &aggregate.failures {
                table.add_row(vec![
                    TableCell::new(&item.label).fg(Color::Cyan),
                    TableCell::new(&item.message).fg(Color::Red),
                ]);
            }
            eprintln!("{table}");
            eprintln!();
        }
        Some(failure) => {
            eprintln!(
                "  {} Backup failed: {failure}, instance {}",
                style("✗").red().bold(),
                style(result.instance_id).dim()
            );
            eprintln!();
        }
    }

    Ok(outcome)
}

/// Progress bar over every activity the engine schedules.
struct Progress {
    bar: Option<ProgressBar>,
    failed: Cell<usize>,
}

impl Progress {
    fn new(enabled: bool) -> Result<Self> {
        let bar = if enabled {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("  {spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} activities {msg}")?
                    .progress_chars("=> "),
            );
            bar.enable_steady_tick(Duration::from_millis(80));
            Some(bar)
        } else {
            None
        };

        Ok(Self {
            bar,
            failed: Cell::new(0),
        })
    }

    fn message(&self, msg: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(msg.to_string());
        }
    }

    fn apply(&self, event: &EngineEvent) {
        let Some(bar) = &self.bar else {
            return;
        };

        match event {
            EngineEvent::InstanceStarted { root_path, .. } => {
                bar.set_message(format!("scanning {root_path}"));
            }
            EngineEvent::InstanceResumed { pending, .. } => {
                bar.inc_length(*pending as u64);
                bar.set_message(format!("resuming, {pending} pending"));
            }
            EngineEvent::ActivitiesScheduled { kind, count, .. } => {
                bar.inc_length(*count as u64);
                bar.set_message(format!("{count} {kind} scheduled"));
            }
            EngineEvent::ActivityFinished { succeeded, .. } => {
                bar.inc(1);
                if !succeeded {
                    self.failed.set(self.failed.get() + 1);
                    bar.set_message(format!("{} failed", self.failed.get()));
                }
            }
            EngineEvent::InstanceFinished { status, .. } => {
                bar.set_message(status.to_string());
            }
        }
    }

    fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
