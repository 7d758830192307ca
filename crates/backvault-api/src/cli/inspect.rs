//! Read-only commands: `status`, `history` and `list`.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use backvault_types::activity::ActivityStatus;
use backvault_types::history::{EventKind, HistoryEvent, project_backup_tasks};
use backvault_types::instance::{InstanceStatus, WorkflowInstance};

use crate::state::AppState;

/// Show an instance and the state of each file backup.
pub async fn status(state: &AppState, instance_id: Uuid, json: bool) -> Result<()> {
    let (instance, history) = state.journal().load(instance_id).await?;
    let activities = state.activities();
    let tasks = project_backup_tasks(&history, |source| {
        activities.target_path(source).display().to_string()
    });

    if json {
        let out = serde_json::json!({
            "instance": instance,
            "tasks": tasks,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let done = tasks
        .iter()
        .filter(|t| t.status == ActivityStatus::Completed)
        .count();
    let failed = tasks
        .iter()
        .filter(|t| t.status == ActivityStatus::Failed)
        .count();
    let bytes: u64 = tasks.iter().filter_map(|t| t.bytes).sum();

    println!();
    println!(
        "  {} Instance {}",
        style("▸").cyan().bold(),
        style(instance.id).cyan()
    );
    println!();
    println!("  Status:   {}", status_label(instance.status));
    println!("  Root:     {}", instance.root_path);
    println!("  Started:  {}", instance.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Updated:  {}", instance.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Events:   {}", instance.replay_cursor);
    println!(
        "  Files:    {} backed up, {} failed, {} pending ({bytes} bytes)",
        style(done).green(),
        style(failed).red(),
        tasks.len() - done - failed
    );
    if let Some(error) = &instance.error {
        println!("  Error:    {}", style(error).red());
    }
    println!();

    if tasks.is_empty() {
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Source").fg(Color::White),
        Cell::new("Backup").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Bytes").fg(Color::White),
    ]);

    for task in &tasks {
        let status_cell = match task.status {
            ActivityStatus::Completed => Cell::new("● done").fg(Color::Green),
            ActivityStatus::Failed => Cell::new("✗ failed").fg(Color::Red),
            ActivityStatus::Scheduled => Cell::new("○ pending").fg(Color::Yellow),
        };
        let detail = match (&task.bytes, &task.error) {
            (Some(bytes), _) => bytes.to_string(),
            (None, Some(error)) => error.clone(),
            (None, None) => "-".to_string(),
        };
        table.add_row(vec![
            Cell::new(&task.source_path).fg(Color::Cyan),
            Cell::new(&task.backup_path).fg(Color::DarkGrey),
            status_cell,
            Cell::new(detail),
        ]);
    }

    println!("{table}");
    println!();
    Ok(())
}

/// Dump the raw event log of an instance.
pub async fn history(state: &AppState, instance_id: Uuid, json: bool) -> Result<()> {
    let (_, history) = state.journal().load(instance_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Seq").fg(Color::White),
        Cell::new("Recorded").fg(Color::White),
        Cell::new("Event").fg(Color::White),
        Cell::new("Detail").fg(Color::White),
    ]);

    for event in &history {
        table.add_row(vec![
            Cell::new(event.seq),
            Cell::new(event.recorded_at.format("%H:%M:%S%.3f")).fg(Color::DarkGrey),
            Cell::new(event.kind.name()).fg(event_color(&event.kind)),
            Cell::new(event_detail(event)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

/// List instances, newest first.
pub async fn list(state: &AppState, status: Option<String>, json: bool) -> Result<()> {
    let status_filter = match status {
        Some(s) => Some(s.parse::<InstanceStatus>().map_err(|e| anyhow::anyhow!(e))?),
        None => None,
    };

    let instances = state.journal().list(status_filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&instances)?);
        return Ok(());
    }

    if instances.is_empty() {
        println!();
        println!(
            "  {} No instances found. Start one with: {}",
            style("i").blue().bold(),
            style("bvault run <ROOT>").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Instance").fg(Color::White),
        Cell::new("Root").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Events").fg(Color::White),
        Cell::new("Updated").fg(Color::White),
    ]);

    for instance in &instances {
        table.add_row(instance_row(instance));
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn instance_row(instance: &WorkflowInstance) -> Vec<Cell> {
    let status_cell = match instance.status {
        InstanceStatus::Running => Cell::new("● running").fg(Color::Yellow),
        InstanceStatus::Completed => Cell::new("● completed").fg(Color::Green),
        InstanceStatus::Failed => Cell::new("✗ failed").fg(Color::Red),
    };

    vec![
        Cell::new(instance.id).fg(Color::Cyan),
        Cell::new(&instance.root_path),
        status_cell,
        Cell::new(instance.replay_cursor),
        Cell::new(format_relative_time(&instance.updated_at)).fg(Color::DarkGrey),
    ]
}

fn status_label(status: InstanceStatus) -> String {
    match status {
        InstanceStatus::Running => style("running").yellow().to_string(),
        InstanceStatus::Completed => style("completed").green().to_string(),
        InstanceStatus::Failed => style("failed").red().to_string(),
    }
}

fn event_color(kind: &EventKind) -> Color {
    match kind {
        EventKind::Started { .. } | EventKind::Completed { .. } => Color::Green,
        EventKind::ActivityScheduled { .. } => Color::Blue,
        EventKind::ActivityCompleted { .. } => Color::Cyan,
        EventKind::ActivityFailed { .. } | EventKind::Failed { .. } => Color::Red,
    }
}

/// One-line summary of an event's payload.
fn event_detail(event: &HistoryEvent) -> String {
    match &event.kind {
        EventKind::Started {
            orchestration,
            input,
        } => format!("{orchestration}({})", compact(input)),
        EventKind::ActivityScheduled { kind, input } => format!("{kind}({})", compact(input)),
        EventKind::ActivityCompleted {
            scheduled_seq,
            output,
            attempts,
        } => format!(
            "#{scheduled_seq} -> {} (attempts: {attempts})",
            compact(output)
        ),
        EventKind::ActivityFailed {
            scheduled_seq,
            error,
            attempts,
        } => format!("#{scheduled_seq} -> {error} (attempts: {attempts})"),
        EventKind::Completed { output } => compact(output),
        EventKind::Failed { failure } => failure.to_string(),
    }
}

/// Render a JSON value on one line, eliding long arrays.
fn compact(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) if items.len() > 3 => {
            format!("[{} items]", items.len())
        }
        other => other.to_string(),
    }
}

fn format_relative_time(dt: &chrono::DateTime<chrono::Utc>) -> String {
    let now = chrono::Utc::now();
    let diff = now - *dt;

    if diff.num_minutes() < 1 {
        "just now".to_string()
    } else if diff.num_hours() < 1 {
        format!("{}m ago", diff.num_minutes())
    } else if diff.num_days() < 1 {
        format!("{}h ago", diff.num_hours())
    } else if diff.num_days() < 30 {
        format!("{}d ago", diff.num_days())
    } else {
        dt.format("%Y-%m-%d").to_string()
    }
}
