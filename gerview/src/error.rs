//! Error taxonomy for the diff engine.
//!
//! Three failure classes, with distinct propagation rules:
//! - [`Error::MalformedDiff`] — the server sent a payload the two panes
//!   cannot be aligned from. Fatal to the current render; the session
//!   abandons the load and keeps its previous state if one exists.
//! - [`Error::Transport`] — the store/server could not be reached or a query
//!   failed. Reported once to the caller; never retried automatically.
//! - [`Error::StaleState`] — an async completion arrived after the owning
//!   session was destroyed. Silently discarded, never surfaced to the user.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The diff payload is internally inconsistent (e.g. a content block that
    /// carries neither common nor per-side lines, or the two sides' hunk
    /// sequences diverge in count).
    #[error("malformed diff payload: {0}")]
    MalformedDiff(String),

    /// A store/server operation failed.
    #[error("review store error: {0}")]
    Transport(#[from] tokio_rusqlite::Error),

    /// The diff payload was not valid JSON.
    #[error("unreadable diff payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// A completion arrived for a session that has been destroyed.
    #[error("session was destroyed before the operation completed")]
    StaleState,
}

pub type Result<T> = std::result::Result<T, Error>;
