//! focuslink - host for the shared task store
//!
//! Each command plays one execution context: `migrate`, `add-*` and `focus`
//! act as the primary app; `tasks`, `categories` and `glance` read the store
//! the way a widget or intent handler does, without ever writing.
//!
//! Usage:
//!   focuslink tasks --filter today
//!   focuslink add-task "Write report" --due 2026-10-20 --focus-minutes 45
//!   focuslink focus <task-uid> --minutes 10

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use focuslink_lib::{
    db::{CategoryColor, NewTask},
    init_logging,
    live::BroadcasterPhase,
    open_reader,
    settings::shared_container_dir,
    snapshot::TaskFilter,
    PrimaryApp, BUILD_NUMBER,
};
use log::{info, warn};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "focuslink")]
#[command(about = "Shared task store and live focus sessions")]
#[command(version)]
struct Args {
    /// Shared container directory (defaults to FOCUSLINK_DATA_DIR, then the
    /// platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Build identifier the migration gate runs for
    #[arg(long, global = true, default_value = BUILD_NUMBER)]
    build: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the store as the primary app and run pending repairs
    Migrate,
    /// List tasks, read-only
    Tasks {
        /// today, tomorrow, this-week, overdue or all
        #[arg(long, default_value = "all")]
        filter: TaskFilter,
    },
    /// List categories with weekly progress, read-only
    Categories,
    /// Home-screen summary, read-only
    Glance,
    AddTask {
        name: String,
        /// YYYY-MM-DD (local noon) or an RFC 3339 timestamp
        #[arg(long)]
        due: Option<String>,
        #[arg(long)]
        focus_minutes: Option<u32>,
        #[arg(long)]
        repeating: bool,
        /// Category id; may be given more than once
        #[arg(long = "category")]
        categories: Vec<i64>,
    },
    AddCategory {
        name: String,
        #[arg(long, default_value = "blue")]
        color: String,
        /// Tasks to complete per week; 0 means no target
        #[arg(long, default_value_t = 0)]
        weekly_target: u32,
    },
    /// Focus on a task until the interval ends or Ctrl+C
    Focus {
        task_uid: String,
        /// Override the task's own focus length
        #[arg(long)]
        minutes: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let container = match args.data_dir {
        Some(dir) => dir,
        None => shared_container_dir()
            .ok_or_else(|| anyhow!("no shared container; pass --data-dir"))?,
    };

    match args.command {
        Command::Migrate => {
            let app = PrimaryApp::boot(&container, &args.build).await?;
            match app.migration() {
                Some(outcome) => println!("{outcome:?}"),
                None => println!("Incomplete; will retry on next launch"),
            }
            app.shutdown().await;
        }
        Command::Tasks { filter } => {
            let projection = open_reader(&container)?;
            print_json(&projection.tasks_matching(filter, &Local::now()).await)?;
        }
        Command::Categories => {
            let projection = open_reader(&container)?;
            print_json(&projection.snapshot_categories().await)?;
        }
        Command::Glance => {
            let projection = open_reader(&container)?;
            print_json(&projection.glance(&Local::now()).await)?;
        }
        Command::AddTask {
            name,
            due,
            focus_minutes,
            repeating,
            categories,
        } => {
            let due_at = due.as_deref().map(parse_due).transpose()?;
            let app = PrimaryApp::boot(&container, &args.build).await?;
            let task = app
                .db
                .create_task(NewTask {
                    name,
                    due_at,
                    focus_minutes,
                    repeating,
                    category_ids: categories,
                })
                .await?;
            print_json(&task)?;
            app.shutdown().await;
        }
        Command::AddCategory {
            name,
            color,
            weekly_target,
        } => {
            let color = CategoryColor::parse(&color).ok_or_else(|| {
                let known: Vec<_> = CategoryColor::ALL.iter().map(|c| c.as_str()).collect();
                anyhow!("unknown color {color}; expected one of {}", known.join(", "))
            })?;
            let app = PrimaryApp::boot(&container, &args.build).await?;
            let category = app.db.create_category(name, color, weekly_target).await?;
            print_json(&category)?;
            app.shutdown().await;
        }
        Command::Focus { task_uid, minutes } => {
            focus(&container, &args.build, &task_uid, minutes).await?;
        }
    }

    Ok(())
}

async fn focus(container: &Path, build: &str, task_uid: &str, minutes: Option<u32>) -> Result<()> {
    let mut app = PrimaryApp::boot(container, build).await?;
    app.relay.start();

    // Stand-in companion: print whatever the relay forwards.
    if let Some(mut inbox) = app.take_companion_inbox() {
        tokio::spawn(async move {
            while let Some(payload) = inbox.recv().await {
                println!("companion <- {}", String::from_utf8_lossy(&payload));
            }
        });
    }

    let session = match minutes {
        Some(minutes) => {
            let task = app
                .projection
                .task_query()
                .entities_for(&[task_uid.to_string()])
                .await
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("no task with identifier {task_uid}"))?;
            app.focus
                .start_focus(&task.name, Duration::from_secs(u64::from(minutes) * 60))
                .await?
        }
        None => app.focus.start_focus_for_task(task_uid).await?,
    };
    info!("Focus session {session} started");
    if app.focus.broadcaster().phase().await == BroadcasterPhase::Idle {
        warn!("Live sessions are disabled; timing without a live display");
    }

    let mut poll = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; stopping focus");
                break;
            }
            _ = poll.tick() => {
                match app.focus.state().await {
                    Some(state) if state.remaining_ms > 0 => {}
                    _ => break,
                }
            }
        }
    }

    app.shutdown().await;
    Ok(())
}

fn parse_due(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("invalid due date {value}"))?;
    let Some(noon) = date.and_hms_opt(12, 0, 0) else {
        bail!("invalid due date {value}");
    };
    match Local.from_local_datetime(&noon).earliest() {
        Some(local) => Ok(local.with_timezone(&Utc)),
        None => bail!("{value} has no local noon"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
