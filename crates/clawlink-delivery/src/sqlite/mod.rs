//! `SQLite` storage for the durable queue.
//!
//! Layout mirrors the runtime split: [`connection`] owns pooling and
//! pragmas, [`migrations`] owns schema evolution, [`repositories`] owns
//! row-level access. All policy (backoff, drains) lives above this module.

pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{ConnectionConfig, ConnectionPool, PooledConnection, new_file, new_in_memory};
pub use migrations::run_migrations;
pub use repositories::{QueueEntryRepo, QueueEntryRow, QueueStats};
