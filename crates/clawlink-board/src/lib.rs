//! # clawlink-board
//!
//! HTTP surface of the Clawboard service.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`api`] | [`BoardApi`] trait, the seam between capture/context logic and HTTP |
//! | [`client`] | `reqwest`-backed [`HttpBoardClient`] |
//! | [`types`] | Wire DTOs for logs, topics, tasks, search, and context |
//! | [`errors`] | [`BoardError`] |
//!
//! The trait deliberately does no retrying. Delivery policy (immediate
//! backoff, durable queueing) lives in `clawlink-delivery`; context budget
//! handling lives in `clawlink-context`.

#![deny(unsafe_code)]

pub mod api;
pub mod client;
pub mod errors;
pub mod types;

pub use api::BoardApi;
pub use client::{BoardClientConfig, HttpBoardClient, IDEMPOTENCY_HEADER};
pub use errors::{BoardError, BoardResult};
pub use types::{
    ContextQuery, ContextResponse, LogKind, LogPayload, LogQuery, LogRow, LogSource, SearchQuery,
    SearchResponse, Task, Topic, TopicUpsert,
};
