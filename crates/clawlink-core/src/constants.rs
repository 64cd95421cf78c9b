//! Package-level constants shared across the relay.

/// Current version of the Clawlink relay (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "clawlink";

/// Sentinel opening an injected context block.
///
/// The context engine wraps every block it emits in these markers, and the
/// sanitizer strips any marker-delimited block from captured text so injected
/// context never re-enters the activity log.
pub const CONTEXT_BLOCK_BEGIN: &str = "[CLAWBOARD_CONTEXT_BEGIN]";

/// Sentinel closing an injected context block.
pub const CONTEXT_BLOCK_END: &str = "[CLAWBOARD_CONTEXT_END]";

/// Reply sentinel some runtimes emit when an agent decides to stay silent.
/// Transcript replay skips messages that consist of exactly this text.
pub const NO_REPLY_SENTINEL: &str = "NO_REPLY";

/// Session-key prefixes that never produce board traffic. Matched
/// case-insensitively at the start of a key or immediately after an
/// `agent:<id>:` prefix.
pub const DEFAULT_IGNORED_SESSION_PREFIXES: &[&str] = &["clawboard-classifier", "cron:"];
