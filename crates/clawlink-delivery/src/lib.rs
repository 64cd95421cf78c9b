//! # clawlink-delivery
//!
//! At-least-once delivery of log payloads to the board service.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`sender`] | Ordered worker: immediate send, retry, queue fallback, drains |
//! | [`idempotency`] | Deterministic `X-Idempotency-Key` derivation |
//! | [`sqlite`] | Durable queue storage: pool, migrations, repositories |
//! | [`errors`] | [`QueueError`] |
//!
//! Reliability model: a payload either reaches the board inside the send
//! deadline or lands in the durable queue, where it is retried on a capped
//! backoff until it succeeds. The unique idempotency key makes both the
//! queue and the server side dedup replays.

#![deny(unsafe_code)]

pub mod errors;
pub mod idempotency;
pub mod sender;
pub mod sqlite;

pub use errors::{QueueError, Result};
pub use idempotency::ensure_idempotency_key;
pub use sender::{DeliverySender, SenderConfig, spawn_sender};
pub use sqlite::{
    ConnectionConfig, ConnectionPool, QueueEntryRepo, QueueEntryRow, QueueStats, new_file,
    new_in_memory, run_migrations,
};
