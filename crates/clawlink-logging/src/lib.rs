//! # clawlink-logging
//!
//! Structured logging with `tracing` and a `SQLite` diagnostics transport.
//!
//! Because stdout is the hook-response channel, the fmt layer always writes
//! to **stderr**. The optional [`SqliteTransport`] layer persists warn/error
//! records into the agent database's `agent_log` table so delivery problems
//! remain inspectable after the process exits.

#![deny(unsafe_code)]

pub mod transport;
pub mod types;

pub use transport::{SqliteTransport, TransportConfig, TransportHandle};
pub use types::LogLevel;

/// Environment variable consulted for the tracing filter.
pub const LOG_FILTER_ENV: &str = "CLAWLINK_LOG";

/// Initialize the global tracing subscriber with stderr output only.
///
/// Call once at application startup. Subsequent calls are no-ops. The filter
/// comes from `CLAWLINK_LOG` when set, else the supplied default level.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init is a no-op if a subscriber is already set
    let _ = subscriber.try_init();
}

/// Initialize the global tracing subscriber with stderr output AND `SQLite`
/// persistence.
///
/// Composes a `fmt` layer (stderr) with [`SqliteTransport`] (database) on a
/// shared [`tracing_subscriber::Registry`]. Call once at application startup.
///
/// Returns a [`TransportHandle`] for manual flushing and shutdown cleanup.
///
/// # Arguments
///
/// * `level` - Filter used when `CLAWLINK_LOG` is unset.
/// * `conn` - A [`rusqlite::Connection`] with the `agent_log` table already
///   created.
pub fn init_subscriber_with_sqlite(level: &str, conn: rusqlite::Connection) -> TransportHandle {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let transport = SqliteTransport::new(conn, TransportConfig::default());
    let handle = transport.handle();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(transport)
        .try_init();

    handle
}

/// Spawn a periodic flush task for the log transport.
///
/// Flushes pending diagnostics to `SQLite` at the default interval. Abort
/// the returned handle on shutdown after a final [`TransportHandle::flush`].
pub fn spawn_flush_task(handle: TransportHandle) -> tokio::task::JoinHandle<()> {
    let interval_ms = TransportConfig::default().flush_interval_ms;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
        loop {
            let _ = interval.tick().await;
            handle.flush();
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
