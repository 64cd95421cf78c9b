//! # clawlink-context
//!
//! Ranked contextual memory for agent turns.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | [`ContextEngine`], the `beforeAgentStart` orchestrator |
//! | [`ranker`] | Local fallback ranking over raw board rows |
//! | [`block`] | Plain-text block rendering |
//! | [`query`] | Prompt normalization and lexical scoring |
//!
//! Everything here is advisory: any failure, timeout, or empty result means
//! the turn starts without injected context. The engine never surfaces an
//! error to the hook caller.

#![deny(unsafe_code)]

pub mod block;
pub mod engine;
pub mod query;
pub mod ranker;

pub use block::{assemble_block, hard_truncate};
pub use engine::{ContextEngine, RETRIEVAL_INSTRUCTION, wrap_block};
pub use query::{QUERY_MAX_CHARS, is_heartbeat_prompt, jaccard_similarity, normalize_query};
pub use ranker::{LocalRanking, RankedTask, RankedTopic, local_rank};
