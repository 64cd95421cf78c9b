//! Stateless repositories over the queue database.

pub mod queue_entry;

pub use queue_entry::{QueueEntryRepo, QueueEntryRow, QueueStats};
