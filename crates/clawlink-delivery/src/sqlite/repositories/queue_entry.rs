//! Queue entry repository — CRUD for the `delivery_queue` table.
//!
//! Entries are uniquely identified by their idempotency key. The repository
//! is policy-free: backoff math and delivery attempts live in the sender,
//! which calls in here with precomputed timestamps.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;

/// A durable queue row.
#[derive(Clone, Debug)]
pub struct QueueEntryRow {
    /// Rowid, also the drain order.
    pub id: i64,
    /// Server-side dedup key, unique per logical event.
    pub idempotency_key: String,
    /// Serialized `LogPayload`.
    pub payload_json: String,
    /// Delivery attempts so far.
    pub attempts: u32,
    /// Enqueue time, unix millis.
    pub created_at_ms: i64,
    /// Earliest time the next attempt may run, unix millis.
    pub next_attempt_at_ms: i64,
    /// Message from the most recent failed attempt.
    pub last_error: Option<String>,
}

/// Aggregate queue health, surfaced by the `status` command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Total queued entries.
    pub total: u64,
    /// Entries eligible for delivery right now.
    pub due: u64,
    /// Enqueue time of the oldest entry, unix millis.
    pub oldest_created_at_ms: Option<i64>,
    /// Highest attempt count across entries.
    pub max_attempts: u32,
}

/// Durable queue repository — stateless, every method takes `&Connection`.
pub struct QueueEntryRepo;

impl QueueEntryRepo {
    /// Insert a payload, ignoring duplicates. Returns whether a row was added.
    ///
    /// `INSERT OR IGNORE` on the unique idempotency key makes replays of the
    /// same logical event a no-op, so a crash between send and queue insert
    /// can never produce two rows.
    pub fn enqueue(
        conn: &Connection,
        idempotency_key: &str,
        payload_json: &str,
        now_ms: i64,
    ) -> Result<bool> {
        let changed = conn.execute(
            "INSERT OR IGNORE INTO delivery_queue
                 (idempotency_key, payload_json, attempts, created_at_ms, next_attempt_at_ms)
             VALUES (?1, ?2, 0, ?3, ?3)",
            params![idempotency_key, payload_json, now_ms],
        )?;
        Ok(changed > 0)
    }

    /// Entries whose `next_attempt_at_ms` has passed, oldest first.
    pub fn due_entries(conn: &Connection, now_ms: i64, limit: usize) -> Result<Vec<QueueEntryRow>> {
        let mut stmt = conn.prepare_cached(
            "SELECT id, idempotency_key, payload_json, attempts, created_at_ms,
                    next_attempt_at_ms, last_error
             FROM delivery_queue
             WHERE next_attempt_at_ms <= ?1
             ORDER BY id
             LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![now_ms, limit], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Record a failed attempt: bump the counter and reschedule.
    pub fn record_failure(
        conn: &Connection,
        id: i64,
        error: &str,
        next_attempt_at_ms: i64,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE delivery_queue
             SET attempts = attempts + 1, last_error = ?1, next_attempt_at_ms = ?2
             WHERE id = ?3",
            params![error, next_attempt_at_ms, id],
        )?;
        Ok(changed > 0)
    }

    /// Remove a delivered entry. Returns whether a row was deleted.
    pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
        let changed = conn.execute("DELETE FROM delivery_queue WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Look up an entry by its idempotency key.
    pub fn get_by_key(conn: &Connection, idempotency_key: &str) -> Result<Option<QueueEntryRow>> {
        let row = conn
            .query_row(
                "SELECT id, idempotency_key, payload_json, attempts, created_at_ms,
                        next_attempt_at_ms, last_error
                 FROM delivery_queue WHERE idempotency_key = ?1",
                params![idempotency_key],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Aggregate queue health at the given time.
    pub fn stats(conn: &Connection, now_ms: i64) -> Result<QueueStats> {
        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(next_attempt_at_ms <= ?1), 0),
                    MIN(created_at_ms),
                    COALESCE(MAX(attempts), 0)
             FROM delivery_queue",
            params![now_ms],
            |row| {
                Ok(QueueStats {
                    total: row.get(0)?,
                    due: row.get(1)?,
                    oldest_created_at_ms: row.get(2)?,
                    max_attempts: row.get(3)?,
                })
            },
        )
        .map_err(Into::into)
    }

    /// Map a rusqlite row to `QueueEntryRow`.
    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueEntryRow> {
        Ok(QueueEntryRow {
            id: row.get(0)?,
            idempotency_key: row.get(1)?,
            payload_json: row.get(2)?,
            attempts: row.get(3)?,
            created_at_ms: row.get(4)?,
            next_attempt_at_ms: row.get(5)?,
            last_error: row.get(6)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
