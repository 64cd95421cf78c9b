//! Board client error types.

use thiserror::Error;

/// Result type alias for board API operations.
pub type BoardResult<T> = Result<T, BoardError>;

/// Errors that can occur talking to the Clawboard service.
#[derive(Debug, Error)]
pub enum BoardError {
    /// Transport-level failure (connect, timeout, body decode).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("board API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        message: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
