//! `syndica` — administrative CLI for the scheduled publishing pipeline.

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use syndica_core::{ContentBundle, Platform, TaskId};
use syndica_infra::{
    DispatcherConfig, ExecutionOutcome, PublishExecutor, Scheduling, SqliteTaskStore, Sweeper,
    SweeperConfig, TokioDispatcher,
};
use syndica_publishers::{PublisherSettings, RedditConfig, RedditCredentials, XConfig};
use syndica_tasks::TaskStatus;

const USAGE: &str = r#"syndica — scheduled multi-platform publishing

USAGE:
    syndica schedule --content <bundle.json> --platforms <list> --at <time> [--db <path>]
    syndica run --task <task-id> [--db <path>]
    syndica worker [--db <path>]
    syndica cancel --task <task-id> [--db <path>]
    syndica list [--status <status>] [--limit <n>] [--db <path>]
    syndica cleanup [--days <n>] [--db <path>]

EXAMPLES:
    # Schedule a reddit + x publish for new year's eve
    syndica schedule --content launch.json --platforms reddit,x --at "2026-12-31T18:00:00Z"

    # Run a pending task immediately (manual trigger)
    syndica run --task 0198c6b2-...

    # Long-running worker: re-arms pending tasks and sweeps retention
    syndica worker

The content bundle file maps platform names to payloads:
    {"reddit": {"title": "...", "text": "..."}, "x": {"text": "..."}}

Supported platforms: reddit, x (alias: twitter), tiktok, bilibili,
xiaohongshu, douyin. The last four are manual-publish targets: the worker
formats the content for human action instead of calling an API.

The database path defaults to $SYNDICA_DB, then ./syndica.db.
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    syndica_observability::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        print!("{USAGE}");
        return Ok(());
    };

    match command.as_str() {
        "schedule" => cmd_schedule(&args[1..]).await,
        "run" => cmd_run(&args[1..]).await,
        "worker" => cmd_worker(&args[1..]).await,
        "cancel" => cmd_cancel(&args[1..]).await,
        "list" => cmd_list(&args[1..]).await,
        "cleanup" => cmd_cleanup(&args[1..]).await,
        "help" | "--help" | "-h" => {
            print!("{USAGE}");
            Ok(())
        }
        other => bail!("unknown command: {other}\n\n{USAGE}"),
    }
}

/// Value of a `--name value` flag, if present.
fn flag(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

async fn open_store(args: &[String]) -> anyhow::Result<SqliteTaskStore> {
    let path = flag(args, "--db")
        .or_else(|| std::env::var("SYNDICA_DB").ok())
        .unwrap_or_else(|| "syndica.db".to_string());
    let url = format!("sqlite://{path}?mode=rwc");
    SqliteTaskStore::connect(&url)
        .await
        .with_context(|| format!("failed to open task database at {path}"))
}

/// Accepts RFC 3339 (`2026-12-31T18:00:00Z`) or a naive UTC
/// `YYYY-MM-DD HH:MM`.
fn parse_schedule_time(s: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    bail!("cannot parse schedule time {s:?}; use RFC 3339 or \"YYYY-MM-DD HH:MM\" (UTC)")
}

/// Publisher configuration from the environment, with documented defaults.
fn load_publisher_settings() -> PublisherSettings {
    let reddit_credentials = match (
        std::env::var("REDDIT_CLIENT_ID"),
        std::env::var("REDDIT_CLIENT_SECRET"),
        std::env::var("REDDIT_USERNAME"),
        std::env::var("REDDIT_PASSWORD"),
    ) {
        (Ok(client_id), Ok(client_secret), Ok(username), Ok(password)) => {
            Some(RedditCredentials {
                client_id,
                client_secret,
                username,
                password,
                user_agent: std::env::var("REDDIT_USER_AGENT")
                    .unwrap_or_else(|_| "syndica/0.1".to_string()),
            })
        }
        _ => {
            tracing::warn!("reddit credentials not fully set; reddit publishes will fail");
            None
        }
    };

    let bearer_token = std::env::var("X_BEARER_TOKEN").ok();
    if bearer_token.is_none() {
        tracing::warn!("X_BEARER_TOKEN not set; x publishes will fail");
    }

    PublisherSettings {
        reddit: RedditConfig {
            subreddit: std::env::var("REDDIT_SUBREDDIT").unwrap_or_else(|_| "test".to_string()),
            credentials: reddit_credentials,
            ..Default::default()
        },
        x: XConfig {
            character_limit: std::env::var("X_CHARACTER_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(280),
            bearer_token,
            ..Default::default()
        },
    }
}

async fn cmd_schedule(args: &[String]) -> anyhow::Result<()> {
    let content_path =
        flag(args, "--content").context("--content <bundle.json> is required")?;
    let platforms = flag(args, "--platforms").context("--platforms <list> is required")?;
    let at = flag(args, "--at").context("--at <time> is required")?;

    let platforms = Platform::parse_list(&platforms)?;
    let scheduled_at = parse_schedule_time(&at)?;
    let raw = std::fs::read_to_string(&content_path)
        .with_context(|| format!("failed to read {content_path}"))?;
    let bundle: ContentBundle =
        serde_json::from_str(&raw).with_context(|| format!("invalid bundle in {content_path}"))?;

    let store = open_store(args).await?;
    // No long-lived backend in a one-shot CLI process; the worker re-arms
    // scheduled tasks on startup.
    let service = Scheduling::new(store, None);
    let task = service.schedule(bundle, platforms, scheduled_at).await?;

    println!("scheduled task {}", task.task_id);
    println!("  platforms:    {}", platform_list(&task.platforms));
    println!("  scheduled at: {}", task.scheduled_at);
    println!("  run it with:  syndica run --task {}", task.task_id);
    Ok(())
}

async fn cmd_run(args: &[String]) -> anyhow::Result<()> {
    let task_id: TaskId = flag(args, "--task")
        .context("--task <task-id> is required")?
        .parse()?;

    let store = open_store(args).await?;
    let executor =
        PublishExecutor::with_default_publishers(store, &load_publisher_settings())
            .map_err(|e| anyhow::anyhow!("failed to build publishers: {e}"))?;

    match executor.run(task_id).await {
        ExecutionOutcome::Finished { status, report } => {
            println!("task {task_id}: {status}");
            for outcome in report.outcomes() {
                let mark = if outcome.success { "ok" } else { "FAILED" };
                let mut detail = String::new();
                if outcome.skipped {
                    detail.push_str(" (already published)");
                }
                if outcome.manual {
                    detail.push_str(" (manual handoff)");
                }
                if let Some(url) = &outcome.post_url {
                    detail.push_str(&format!(" {url}"));
                }
                if let Some(error) = &outcome.error {
                    detail.push_str(&format!(" {error}"));
                }
                println!("  {:<12} {mark}{detail}", outcome.platform.to_string());
            }
        }
        ExecutionOutcome::Cancelled => println!("task {task_id} was cancelled; nothing to do"),
        ExecutionOutcome::Fatal(e) => bail!("task {task_id} failed: {e}"),
        ExecutionOutcome::Retryable(e) => bail!("task {task_id} hit a transient failure: {e}"),
    }
    Ok(())
}

async fn cmd_worker(args: &[String]) -> anyhow::Result<()> {
    let store = open_store(args).await?;

    let executor =
        PublishExecutor::with_default_publishers(store.clone(), &load_publisher_settings())
            .map_err(|e| anyhow::anyhow!("failed to build publishers: {e}"))?;
    let dispatcher = TokioDispatcher::new(executor, DispatcherConfig::default());

    let rearmed = dispatcher.rearm_pending().await?;
    println!("worker started ({rearmed} pending task(s) re-armed); ctrl-c to stop");

    let sweeper = Sweeper::spawn(store, SweeperConfig::default());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    println!("shutting down...");

    sweeper.shutdown().await;
    dispatcher.shutdown().await;
    Ok(())
}

async fn cmd_cancel(args: &[String]) -> anyhow::Result<()> {
    let task_id: TaskId = flag(args, "--task")
        .context("--task <task-id> is required")?
        .parse()?;

    let store = open_store(args).await?;
    let service = Scheduling::new(store, None);
    let outcome = service.cancel(task_id).await?;
    println!("cancel {task_id}: {outcome}");
    Ok(())
}

async fn cmd_list(args: &[String]) -> anyhow::Result<()> {
    let status: Option<TaskStatus> = flag(args, "--status").map(|s| s.parse()).transpose()?;
    let limit: usize = flag(args, "--limit")
        .map(|s| s.parse())
        .transpose()
        .context("--limit must be a number")?
        .unwrap_or(50);

    let store = open_store(args).await?;
    let service = Scheduling::new(store, None);
    let tasks = service.list(status, limit).await?;

    if tasks.is_empty() {
        println!("no tasks");
        return Ok(());
    }
    for task in tasks {
        println!(
            "{}  {:<15}  scheduled {}  [{}]",
            task.task_id,
            task.status.to_string(),
            task.scheduled_at,
            platform_list(&task.platforms),
        );
        if let Some(error) = &task.error {
            println!("    error: {error}");
        }
    }
    Ok(())
}

async fn cmd_cleanup(args: &[String]) -> anyhow::Result<()> {
    let days: i64 = flag(args, "--days")
        .map(|s| s.parse())
        .transpose()
        .context("--days must be a number")?
        .unwrap_or(7);

    let store = open_store(args).await?;
    let service = Scheduling::new(store, None);
    let counts = service.cleanup(chrono::Duration::days(days)).await?;
    println!(
        "cleanup: removed {} content(s), {} task(s), {} receipt(s)",
        counts.contents, counts.tasks, counts.receipts
    );
    Ok(())
}

fn platform_list(platforms: &[Platform]) -> String {
    platforms
        .iter()
        .map(Platform::as_str)
        .collect::<Vec<_>>()
        .join(",")
}
