//! # clawlink-agent
//!
//! Clawlink agent binary — wires settings, logging, the durable queue, the
//! board client, capture, and context retrieval behind an NDJSON hook
//! transport: one JSON event per stdin line, one JSON response per
//! `beforeAgentStart` on stdout.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clawlink_board::{BoardApi, BoardClientConfig, HttpBoardClient};
use clawlink_capture::{CaptureAgent, HookEvent, LogSink};
use clawlink_context::ContextEngine;
use clawlink_delivery::{
    ConnectionConfig, ConnectionPool, QueueEntryRepo, SenderConfig, new_file, run_migrations,
    spawn_sender,
};
use clawlink_logging::TransportHandle;
use clawlink_settings::{
    ClawlinkSettings, SettingsError, expand_home, load_settings_from_path, settings_path,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Clawlink agent.
#[derive(Parser, Debug)]
#[command(name = "clawlink-agent", about = "Event capture and delivery agent for Clawboard")]
struct Cli {
    /// Path to the settings file (default: `~/.clawlink/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Queue database path (overrides the settings value).
    #[arg(long, global = true)]
    queue_db: Option<PathBuf>,

    /// Tracing filter used when `CLAWLINK_LOG` is unset (overrides the
    /// settings value).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Agent subcommands; `run` is the default.
#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Read hook events from stdin and relay them to the board.
    Run,
    /// Print queue statistics as JSON and exit.
    Status,
    /// Run one drain pass over the durable queue and exit.
    Drain,
}

/// Wire names the capture dispatcher understands.
const KNOWN_HOOKS: &[&str] = &[
    "messageReceived",
    "messageSending",
    "messageSent",
    "beforeToolCall",
    "afterToolCall",
    "beforeAgentStart",
    "agentEnd",
];

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (settings, settings_err) = load_cli_settings(&cli);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_agent(settings, settings_err).await,
        Command::Status => {
            clawlink_logging::init_subscriber(&settings.logging.level);
            let stats = queue_status(&settings)?;
            println!("{stats}");
            Ok(())
        }
        Command::Drain => {
            clawlink_logging::init_subscriber(&settings.logging.level);
            let summary = drain_queue(&settings).await?;
            println!("{summary}");
            Ok(())
        }
    }
}

/// Load settings from the CLI path (or the default location) and apply CLI
/// overrides. A load failure falls back to defaults; the error is returned
/// so it can be logged once the subscriber is up.
fn load_cli_settings(cli: &Cli) -> (ClawlinkSettings, Option<SettingsError>) {
    let path = cli.settings.clone().unwrap_or_else(settings_path);
    let (mut settings, err) = match load_settings_from_path(&path) {
        Ok(settings) => (settings, None),
        Err(err) => (ClawlinkSettings::default(), Some(err)),
    };
    if let Some(queue_db) = &cli.queue_db {
        settings.queue_db = queue_db.to_string_lossy().into_owned();
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level = level.clone();
    }
    (settings, err)
}

/// Open the queue database and bring its schema current.
fn open_queue(settings: &ClawlinkSettings) -> Result<(ConnectionPool, PathBuf)> {
    let path = expand_home(&settings.queue_db);
    let pool = new_file(&path.to_string_lossy(), &ConnectionConfig::default())
        .context("failed to open queue database")?;
    {
        let conn = pool.get().context("failed to check out a queue connection")?;
        let _ = run_migrations(&conn).context("failed to run queue migrations")?;
    }
    Ok((pool, path))
}

/// Initialize tracing. With the transport enabled, diagnostics also persist
/// into the queue database over a dedicated connection; the pragmas must
/// match the pool's or concurrent writes hit `SQLITE_BUSY`.
fn init_logging(
    settings: &ClawlinkSettings,
    queue_path: &Path,
) -> Result<Option<(TransportHandle, tokio::task::JoinHandle<()>)>> {
    if !settings.logging.transport_enabled {
        clawlink_logging::init_subscriber(&settings.logging.level);
        return Ok(None);
    }
    let conn = rusqlite::Connection::open(queue_path)
        .context("failed to open the logging database connection")?;
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
        .context("failed to set logging connection pragmas")?;
    let handle = clawlink_logging::init_subscriber_with_sqlite(&settings.logging.level, conn);
    let flush_task = clawlink_logging::spawn_flush_task(handle.clone());
    Ok(Some((handle, flush_task)))
}

fn build_board_client(settings: &ClawlinkSettings) -> Result<HttpBoardClient> {
    let config = BoardClientConfig {
        base_url: settings.base_url.clone(),
        token: settings.token.clone(),
        request_timeout: Duration::from_millis(settings.delivery.request_timeout_ms),
        use_ingest: true,
    };
    HttpBoardClient::new(config).context("failed to build the board client")
}

/// The `run` command: full pipeline bootstrap, then the stdin hook loop.
async fn run_agent(settings: ClawlinkSettings, settings_err: Option<SettingsError>) -> Result<()> {
    let (pool, queue_path) = open_queue(&settings)?;
    let log_handles = init_logging(&settings, &queue_path)?;
    if let Some(err) = settings_err {
        warn!(error = %err, "settings file failed to load; running on defaults");
    }

    let settings = Arc::new(settings);
    let api: Arc<dyn BoardApi> = Arc::new(build_board_client(&settings)?);
    let (sender, delivery_worker) = spawn_sender(
        api.clone(),
        pool.clone(),
        SenderConfig::from_settings(&settings.delivery),
    );
    let sink: Arc<dyn LogSink> = Arc::new(sender.clone());
    let capture = Arc::new(CaptureAgent::new(settings.clone(), sink, api.clone()));
    let engine = ContextEngine::new(settings.clone(), api);

    // Capture events are handled off the stdin loop, in arrival order, so a
    // slow scope lookup never delays a beforeAgentStart response.
    let (capture_tx, mut capture_rx) = mpsc::unbounded_channel::<HookEvent>();
    let capture_worker = {
        let capture = capture.clone();
        tokio::spawn(async move {
            while let Some(event) = capture_rx.recv().await {
                capture.handle(event).await;
            }
        })
    };

    info!(
        version = clawlink_core::constants::VERSION,
        board = %settings.base_url,
        queue = %queue_path.display(),
        "clawlink agent ready"
    );

    hook_loop(&capture_tx, &engine).await?;

    // Shutdown: finish queued capture work, flush the durable queue, then
    // let the delivery worker run its final drain.
    drop(capture_tx);
    let _ = capture_worker.await;
    sender.flush().await;
    drop(sender);
    drop(capture);
    let _ = delivery_worker.await;

    if let Some((handle, flush_task)) = log_handles {
        flush_task.abort();
        handle.flush();
    }
    info!("shutdown complete");
    Ok(())
}

/// Read NDJSON hook events from stdin until EOF or ctrl-c.
///
/// Capture hooks are forwarded to the capture worker; `beforeAgentStart`
/// is awaited inline and answered on stdout with a single JSON line.
async fn hook_loop(
    capture_tx: &mpsc::UnboundedSender<HookEvent>,
    engine: &ContextEngine,
) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received; shutting down");
                return Ok(());
            }
        };
        let Some(line) = line else {
            info!("stdin closed; shutting down");
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            ParsedLine::Event(event) => match *event {
                HookEvent::BeforeAgentStart { meta, ctx, prompt, .. } => {
                    let response = match engine.before_agent_start(&meta, &ctx.key, &prompt).await
                    {
                        Some(block) => serde_json::json!({ "contextBlock": block }),
                        None => serde_json::json!({}),
                    };
                    respond(&mut stdout, &response).await?;
                }
                event => {
                    if capture_tx.send(event).is_err() {
                        warn!("capture worker is gone, dropping event");
                    }
                }
            },
            ParsedLine::UnknownHook(hook) => debug!(hook, "unknown hook type ignored"),
            ParsedLine::Malformed(err) => warn!(error = %err, "malformed hook line skipped"),
        }
    }
}

async fn respond(stdout: &mut tokio::io::Stdout, value: &serde_json::Value) -> Result<()> {
    let mut line = serde_json::to_vec(value).context("failed to encode hook response")?;
    line.push(b'\n');
    stdout.write_all(&line).await.context("failed to write hook response")?;
    stdout.flush().await.context("failed to flush hook response")?;
    Ok(())
}

/// One classified stdin line.
enum ParsedLine {
    /// A hook event the dispatcher understands.
    Event(Box<HookEvent>),
    /// Valid JSON tagged with a hook name this build does not know.
    UnknownHook(String),
    /// Everything else; the line is skipped.
    Malformed(String),
}

fn parse_line(line: &str) -> ParsedLine {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => return ParsedLine::Malformed(err.to_string()),
    };
    if let Some(hook) = value.get("hookType").and_then(serde_json::Value::as_str) {
        if !KNOWN_HOOKS.contains(&hook) {
            return ParsedLine::UnknownHook(hook.to_owned());
        }
    }
    match serde_json::from_value(value) {
        Ok(event) => ParsedLine::Event(Box::new(event)),
        Err(err) => ParsedLine::Malformed(err.to_string()),
    }
}

/// The `status` command: aggregate queue health as a JSON object.
fn queue_status(settings: &ClawlinkSettings) -> Result<serde_json::Value> {
    let (pool, _) = open_queue(settings)?;
    let conn = pool.get().context("failed to check out a queue connection")?;
    let stats = QueueEntryRepo::stats(&conn, now_ms()).context("failed to read queue statistics")?;
    Ok(serde_json::json!({
        "total": stats.total,
        "due": stats.due,
        "oldestCreatedAtMs": stats.oldest_created_at_ms,
        "maxAttempts": stats.max_attempts,
    }))
}

/// The `drain` command: one pass over the due backlog, then a summary.
async fn drain_queue(settings: &ClawlinkSettings) -> Result<serde_json::Value> {
    let (pool, _) = open_queue(settings)?;
    let api: Arc<dyn BoardApi> = Arc::new(build_board_client(settings)?);

    let before = {
        let conn = pool.get().context("failed to check out a queue connection")?;
        QueueEntryRepo::stats(&conn, now_ms()).context("failed to read queue statistics")?
    };

    let (sender, worker) = spawn_sender(api, pool.clone(), SenderConfig::from_settings(&settings.delivery));
    sender.flush().await;
    drop(sender);
    let _ = worker.await;

    let after = {
        let conn = pool.get().context("failed to check out a queue connection")?;
        QueueEntryRepo::stats(&conn, now_ms()).context("failed to read queue statistics")?
    };
    Ok(serde_json::json!({
        "flushed": before.total.saturating_sub(after.total),
        "remaining": after.total,
    }))
}

fn now_ms() -> i64 {
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
