//! Event bus for diff sessions.
//!
//! Background-load results and store observer notifications are normalised
//! into a single `SessionEvent` enum and sent over a tokio unbounded MPSC
//! channel. The embedder's loop receives from this channel and feeds each
//! event back into the session for application.
//!
//! Load completions are stamped with the request generation current when
//! they were spawned; the session discards completions whose generation no
//! longer matches, which is how switching file or base cancels a load that
//! is still in flight.

use tokio::sync::mpsc;

use crate::error::Error;
use crate::fetch::LoadedFile;

/// All events a diff session can receive from its background tasks.
#[derive(Debug)]
#[non_exhaustive]
pub enum SessionEvent {
    /// A background file load finished.
    FileLoaded {
        generation: u64,
        result: Result<LoadedFile, Error>,
    },
    /// A draft entered or left the comment store; badges and titles should
    /// be refreshed.
    CountsChanged,
}

/// Holds the sender and receiver ends of the session event channel.
///
/// The sender (`tx`) is cloned into each background task; the receiver
/// (`rx`) is owned by the embedder's loop.
pub struct EventHandler {
    pub tx: mpsc::UnboundedSender<SessionEvent>,
    pub rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl EventHandler {
    /// Creates a fresh unbounded channel. Producers are a handful of
    /// short-lived load tasks and observer hooks, so backpressure is not a
    /// concern.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new()
    }
}
