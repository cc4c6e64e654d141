//! gerview — dual-pane diff presentation engine for code review.
//!
//! Renders a review server's pre-computed file diff as two padded,
//! line-aligned panes, anchors published and draft comment threads to
//! logical lines so they survive padding and re-rendering, and keeps the two
//! independently scrollable panes coherent. The local review store
//! (`gerview-core`) is the only external boundary; transport to the actual
//! server lives behind it.
//!
//! Typical embedding:
//!
//! ```no_run
//! use gerview::{Config, DiffSession};
//!
//! # async fn run() -> gerview::Result<()> {
//! let config = Config::load();
//! let conn = gerview_core::db::open_store(&config.store_path).await?;
//! let mut session = DiffSession::open(conn, config, "change-9", "src/lib.rs").await?;
//! while let Some(event) = session.next_event().await {
//!     if let Err(err) = session.handle_event(event) {
//!         eprintln!("load failed: {err}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod comments;
pub mod config;
pub mod error;
pub mod event;
pub mod fetch;
pub mod hunk;
pub mod linemap;
pub mod payload;
pub mod scroll;
pub mod session;

pub use comments::{CommentStore, FileCounts};
pub use config::Config;
pub use error::{Error, Result};
pub use event::SessionEvent;
pub use hunk::{Hunk, HunkKind, Pane};
pub use linemap::{build_panes, ChangeBlock, LineMap, PaneId, PaneSet};
pub use payload::{parse_diff, DiffInfo};
pub use scroll::{ScrollSync, Viewport};
pub use session::{DiffSession, SessionState};
