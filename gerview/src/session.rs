//! Presentation driver for one open diff view.
//!
//! A session aggregates the rendered panes, the comment store, and the
//! scroll synchronizer for the currently selected file, and exposes the
//! navigation surface intended to be bound to user-facing commands. Loads
//! run on background tasks and come back over the event channel; the session
//! applies a completion only when its generation stamp is still current, so
//! switching file or base while a load is in flight strands the older load
//! harmlessly.
//!
//! State machine: `Loading -> Rendered -> (Loading on file/base switch) ->
//! Rendered -> Destroyed`. Navigation is disabled while `Loading`.

use std::time::Duration;

use gerview_core::db;
use gerview_core::types::{FileEntry, Revision, StoredComment};
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::comments::CommentStore;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::{EventHandler, SessionEvent};
use crate::fetch::{self, LoadedFile};
use crate::linemap::{PaneId, PaneSet};
use crate::scroll::{shared, ScrollSync, Scroller, SharedViewport, Viewport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Loading,
    Rendered,
    Destroyed,
}

pub struct DiffSession {
    conn: Connection,
    config: Config,
    change_id: String,
    revisions: Vec<Revision>,
    current: Revision,
    /// Patch-set number of the comparison base; `None` is the parent commit.
    base: Option<i64>,
    /// Non-binary files of the current revision, case-insensitive sorted.
    files: Vec<FileEntry>,
    file_name: String,
    state: SessionState,
    generation: u64,
    events: EventHandler,
    panes: Option<PaneSet>,
    comments: Option<CommentStore>,
    sync: Option<ScrollSync>,
    viewports: Option<(SharedViewport, SharedViewport)>,
    selected_block: Option<usize>,
    comment_cursor: Option<usize>,
    intraline_visible: bool,
    viewport_extent: (f64, f64),
}

impl DiffSession {
    /// Opens a session on a change's current revision and starts loading the
    /// given file. The caller drives completion by pumping [`Self::next_event`]
    /// into [`Self::handle_event`].
    pub async fn open(
        conn: Connection,
        config: Config,
        change_id: &str,
        file: &str,
    ) -> Result<DiffSession> {
        let revisions = db::revisions(&conn, change_id).await?;
        let current = revisions
            .last()
            .cloned()
            .ok_or_else(|| Error::MalformedDiff(format!("change {change_id} has no revisions")))?;

        let mut files = db::files(&conn, change_id, &current.revision_id).await?;
        // Binary files carry no renderable hunks and are excluded up front.
        files.retain(|f| !f.binary);
        files.sort_by_key(|f| f.path.to_uppercase());

        let intraline_visible = config.intraline_highlights;
        let mut session = DiffSession {
            conn,
            config,
            change_id: change_id.to_owned(),
            revisions,
            current,
            base: None,
            files,
            file_name: file.to_owned(),
            state: SessionState::Loading,
            generation: 0,
            events: EventHandler::new(),
            panes: None,
            comments: None,
            sync: None,
            viewports: None,
            selected_block: None,
            comment_cursor: None,
            intraline_visible,
            viewport_extent: (120.0, 40.0),
        };
        session.request_load(file.to_owned(), None);
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn change_id(&self) -> &str {
        &self.change_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn base(&self) -> Option<i64> {
        self.base
    }

    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn panes(&self) -> Option<&PaneSet> {
        self.panes.as_ref()
    }

    pub fn comments(&self) -> Option<&CommentStore> {
        self.comments.as_ref()
    }

    /// The shared (left, right) viewports, present while `Rendered`.
    pub fn viewports(&self) -> Option<&(SharedViewport, SharedViewport)> {
        self.viewports.as_ref()
    }

    pub fn intraline_visible(&self) -> bool {
        self.intraline_visible
    }

    /// Pure presentation toggle; pane data is unaffected.
    pub fn toggle_intraline_highlights(&mut self) -> bool {
        self.intraline_visible = !self.intraline_visible;
        self.intraline_visible
    }

    /// Visible (columns, rows) of each pane, used for new viewports and
    /// centering. Applies to viewports created by later loads.
    pub fn set_viewport_extent(&mut self, cols: f64, rows: f64) {
        self.viewport_extent = (cols, rows);
    }

    /// Receives the next background event; `None` once all senders are gone.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.rx.recv().await
    }

    /// Applies one background event. Stale completions (older generation or
    /// destroyed session) are discarded without effect or error; a load
    /// failure is surfaced exactly once and the previous render, if any,
    /// stays intact.
    pub fn handle_event(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::FileLoaded { generation, result } => {
                if self.state == SessionState::Destroyed || generation != self.generation {
                    debug!(generation, "discarding stale load completion");
                    return Ok(());
                }
                match result {
                    Ok(loaded) => {
                        self.apply_loaded(loaded);
                        Ok(())
                    }
                    Err(err) => {
                        if self.panes.is_some() {
                            warn!(%err, "file load failed, keeping previous render");
                            self.state = SessionState::Rendered;
                        } else {
                            self.destroy();
                        }
                        Err(err)
                    }
                }
            }
            SessionEvent::CountsChanged => Ok(()),
        }
    }

    fn request_load(&mut self, file: String, base: Option<i64>) {
        self.state = SessionState::Loading;
        self.generation += 1;
        let base_rev = base.and_then(|number| {
            let found = self
                .revisions
                .iter()
                .find(|r| r.number == number && r.number != self.current.number)
                .cloned();
            if found.is_none() {
                warn!(number, "unknown base revision, comparing against parent");
            }
            found
        });
        fetch::spawn_load(
            self.conn.clone(),
            self.events.tx.clone(),
            self.generation,
            self.change_id.clone(),
            self.current.clone(),
            base_rev,
            file,
        );
    }

    /// Tears down the comment store and scroll synchronizer. Idempotent;
    /// called before constructing their replacements and on destroy, so no
    /// stale tick or hook can touch the new state.
    fn teardown_render(&mut self) {
        if let Some(sync) = &mut self.sync {
            sync.destroy();
        }
        self.sync = None;
        if let Some(comments) = &mut self.comments {
            comments.destroy();
        }
        self.comments = None;
        self.viewports = None;
        self.selected_block = None;
        self.comment_cursor = None;
    }

    fn apply_loaded(&mut self, loaded: LoadedFile) {
        self.teardown_render();

        self.file_name = loaded.file_name.clone();
        self.base = loaded.base;

        let mut store = CommentStore::new(
            self.conn.clone(),
            self.change_id.clone(),
            loaded.file_name,
            self.current.revision_id.clone(),
            loaded.base.is_some(),
            loaded.panes.a.map.clone(),
            loaded.panes.b.map.clone(),
        );
        store.populate(&loaded.comments.comments, &loaded.comments.drafts);
        let tx = self.events.tx.clone();
        store.on_draft_added(Box::new(move |_| {
            let _ = tx.send(SessionEvent::CountsChanged);
        }));
        let tx = self.events.tx.clone();
        store.on_draft_removed(Box::new(move |_| {
            let _ = tx.send(SessionEvent::CountsChanged);
        }));

        let height = loaded.panes.height() as f64;
        let width = |pane: &crate::hunk::Pane| {
            pane.rows().map(str::len).max().unwrap_or(0) as f64
        };
        let left = shared(Viewport::new(
            (width(&loaded.panes.a.pane), height),
            self.viewport_extent,
        ));
        let right = shared(Viewport::new(
            (width(&loaded.panes.b.pane), height),
            self.viewport_extent,
        ));
        // Pane heights are equal after padding, so the pair syncs 1:1.
        let sync = ScrollSync::start(
            vec![
                Scroller::new(SharedViewport::clone(&left), false, false),
                Scroller::new(SharedViewport::clone(&right), false, false),
            ],
            Duration::from_millis(self.config.sync_interval_ms.max(1)),
        );

        self.viewports = Some((left, right));
        self.sync = Some(sync);
        self.comments = Some(store);
        self.panes = Some(loaded.panes);
        self.state = SessionState::Rendered;
    }

    fn nav_enabled(&self) -> bool {
        self.state == SessionState::Rendered
    }

    fn file_index(&self) -> Option<usize> {
        self.files.iter().position(|f| f.path == self.file_name)
    }

    pub fn can_next_file(&self) -> bool {
        self.nav_enabled()
            && self
                .file_index()
                .is_some_and(|i| i + 1 < self.files.len())
    }

    pub fn can_prev_file(&self) -> bool {
        self.nav_enabled() && self.file_index().is_some_and(|i| i > 0)
    }

    /// Switches to the next file in case-insensitive order; re-enters
    /// `Loading`. Returns false at the end of the sequence.
    pub fn next_file(&mut self) -> bool {
        if !self.can_next_file() {
            return false;
        }
        let index = match self.file_index() {
            Some(i) => i,
            None => return false,
        };
        let target = self.files[index + 1].path.clone();
        self.request_load(target, self.base);
        true
    }

    pub fn prev_file(&mut self) -> bool {
        if !self.can_prev_file() {
            return false;
        }
        let index = match self.file_index() {
            Some(i) => i,
            None => return false,
        };
        let target = self.files[index - 1].path.clone();
        self.request_load(target, self.base);
        true
    }

    pub fn can_next_change_block(&self) -> bool {
        self.nav_enabled()
            && self.panes.as_ref().is_some_and(|p| {
                match self.selected_block {
                    None => !p.blocks.is_empty(),
                    Some(i) => i + 1 < p.blocks.len(),
                }
            })
    }

    pub fn can_prev_change_block(&self) -> bool {
        self.nav_enabled() && self.selected_block.is_some_and(|i| i > 0)
    }

    /// Moves the change-block cursor forward and centers both panes on the
    /// block. Returns the block's starting rendered row.
    pub fn next_change_block(&mut self) -> Option<usize> {
        if !self.can_next_change_block() {
            return None;
        }
        let next = self.selected_block.map_or(0, |i| i + 1);
        self.selected_block = Some(next);
        let row = self.panes.as_ref()?.blocks[next].start_row;
        self.scroll_to_row(row);
        Some(row)
    }

    pub fn prev_change_block(&mut self) -> Option<usize> {
        if !self.can_prev_change_block() {
            return None;
        }
        let prev = self.selected_block? - 1;
        self.selected_block = Some(prev);
        let row = self.panes.as_ref()?.blocks[prev].start_row;
        self.scroll_to_row(row);
        Some(row)
    }

    /// Moves to the next commented rendered row on a pane, ascending by
    /// logical line.
    pub fn next_comment(&mut self, pane: PaneId) -> Option<usize> {
        if !self.nav_enabled() {
            return None;
        }
        let rows = self.comments.as_ref()?.collection(pane).anchored_rows();
        let next = match self.comment_cursor {
            None => rows.first().copied(),
            Some(current) => rows.into_iter().find(|r| *r > current),
        }?;
        self.comment_cursor = Some(next);
        self.scroll_to_row(next);
        Some(next)
    }

    pub fn prev_comment(&mut self, pane: PaneId) -> Option<usize> {
        if !self.nav_enabled() {
            return None;
        }
        let rows = self.comments.as_ref()?.collection(pane).anchored_rows();
        let prev = match self.comment_cursor {
            None => rows.last().copied(),
            Some(current) => rows.into_iter().rev().find(|r| *r < current),
        }?;
        self.comment_cursor = Some(prev);
        self.scroll_to_row(prev);
        Some(prev)
    }

    /// Re-renders the current file against a different base; `None` compares
    /// against the parent commit. The base must be an existing, non-current
    /// patch set.
    pub fn switch_base(&mut self, base: Option<i64>) -> bool {
        if !self.nav_enabled() {
            return false;
        }
        if let Some(number) = base {
            let known = self
                .revisions
                .iter()
                .any(|r| r.number == number && r.number != self.current.number);
            if !known {
                return false;
            }
        }
        self.request_load(self.file_name.clone(), base);
        true
    }

    /// Resolves a selection of rendered rows to the single logical line a
    /// draft may be composed at. Padding rows are excluded up front; a
    /// selection resolving to more than one logical line is rejected.
    pub fn comment_target(&self, pane: PaneId, rows: &[usize]) -> Option<i64> {
        if !self.nav_enabled() {
            return None;
        }
        let map = &self.panes.as_ref()?.side(pane).map;
        let mut lines: Vec<i64> = rows.iter().filter_map(|r| map.logical_line(*r)).collect();
        lines.sort_unstable();
        lines.dedup();
        match lines.as_slice() {
            [line] => Some(*line),
            _ => None,
        }
    }

    /// Composes a draft at the selected rows. Returns `Ok(None)` when the
    /// selection does not resolve to exactly one logical line.
    pub async fn compose_draft(
        &mut self,
        pane: PaneId,
        rows: &[usize],
        message: &str,
    ) -> Result<Option<StoredComment>> {
        let Some(line) = self.comment_target(pane, rows) else {
            return Ok(None);
        };
        let store = self.comments.as_mut().ok_or(Error::StaleState)?;
        let created = store.create_draft(pane, &[line], message, None).await?;
        Ok(created.into_iter().next())
    }

    /// Centers both viewports on a rendered row; the pair stays aligned so
    /// the synchronizer has nothing to correct.
    fn scroll_to_row(&mut self, row: usize) {
        let Some((left, right)) = &self.viewports else {
            return;
        };
        for view in [left, right] {
            let mut guard = match view.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let centered = row as f64 - guard.viewport_extent.1 / 2.0;
            let range = guard.scrollable();
            guard.position.1 = centered.clamp(0.0, range.1);
        }
    }

    /// Closes the view and releases its comment store and synchronizer.
    /// Safe to call more than once; in-flight loads become stale.
    pub fn destroy(&mut self) {
        self.generation += 1;
        self.teardown_render();
        self.panes = None;
        self.state = SessionState::Destroyed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gerview_core::types::CommentSide;

    const DIFF_F: &str = "{\"meta_a\":{\"name\":\"src/alpha.rs\"},\
                           \"meta_b\":{\"name\":\"src/alpha.rs\"},\
                           \"content\":[{\"ab\":[\"l1\",\"l2\",\"l3\"]},\
                                        {\"a\":[\"x\"],\"b\":[\"y\",\"z\"]}]}";

    async fn seeded_session() -> DiffSession {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.keep().join("store.db");
        let conn = db::open_store(&path.to_string_lossy()).await.unwrap();

        for (number, revision_id) in [(1, "rev-1"), (2, "rev-2")] {
            db::ingest_revision(
                &conn,
                Revision {
                    change_id: "change-9".into(),
                    number,
                    revision_id: revision_id.into(),
                },
            )
            .await
            .unwrap();
        }
        for (path, binary) in [
            ("src/alpha.rs", false),
            ("Zeta.md", false),
            ("logo.png", true),
        ] {
            db::ingest_file(
                &conn,
                "change-9",
                "rev-2",
                FileEntry {
                    path: path.into(),
                    status: "M".into(),
                    lines_inserted: 1,
                    lines_deleted: 0,
                    binary,
                },
            )
            .await
            .unwrap();
        }
        for (base, file, payload) in [
            (None, "src/alpha.rs", DIFF_F),
            (Some(1), "src/alpha.rs", DIFF_F),
            (None, "Zeta.md", "not json"),
        ] {
            db::ingest_diff(&conn, "change-9", "rev-2", base, file, payload.into())
                .await
                .unwrap();
        }

        DiffSession::open(conn, Config::default(), "change-9", "src/alpha.rs")
            .await
            .unwrap()
    }

    async fn pump(session: &mut DiffSession) -> Result<()> {
        let event = session.next_event().await.unwrap();
        session.handle_event(event)
    }

    #[tokio::test]
    async fn load_renders_and_enables_navigation() {
        let mut session = seeded_session().await;
        assert_eq!(session.state(), SessionState::Loading);
        assert!(!session.can_next_file(), "navigation disabled while loading");

        pump(&mut session).await.unwrap();
        assert_eq!(session.state(), SessionState::Rendered);

        // Binary file excluded, names sorted case-insensitively.
        let names: Vec<&str> = session.files().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(names, vec!["src/alpha.rs", "Zeta.md"]);
        assert!(session.can_next_file());
        assert!(!session.can_prev_file());

        let panes = session.panes().unwrap();
        assert_eq!(panes.height(), 5);

        // Change-block navigation walks the block list and stops at the end.
        assert_eq!(session.next_change_block(), Some(3));
        assert!(session.next_change_block().is_none());
        assert!(!session.can_prev_change_block());
    }

    #[tokio::test]
    async fn comment_targets_and_compose() {
        let mut session = seeded_session().await;
        pump(&mut session).await.unwrap();

        // Row 4 on the left pane is padding; a selection of it alone is
        // unusable, and mixed selections resolve to the content line only.
        assert_eq!(session.comment_target(PaneId::Left, &[4]), None);
        assert_eq!(session.comment_target(PaneId::Left, &[3, 4]), Some(4));
        // Two logical lines selected: rejected.
        assert_eq!(session.comment_target(PaneId::Right, &[3, 4]), None);

        let draft = session
            .compose_draft(PaneId::Right, &[3], "tighten this")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(draft.line, Some(4));
        assert_eq!(draft.side, CommentSide::Revision);

        // The observer hook posted a counts refresh.
        match session.next_event().await.unwrap() {
            SessionEvent::CountsChanged => {}
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(
            session.comments().unwrap().counts_for("src/alpha.rs").drafts,
            1
        );
        assert_eq!(session.next_comment(PaneId::Right), Some(3));
        assert_eq!(session.next_comment(PaneId::Right), None);
    }

    #[tokio::test]
    async fn switch_base_rebuilds_and_validates() {
        let mut session = seeded_session().await;
        pump(&mut session).await.unwrap();

        assert!(!session.switch_base(Some(2)), "current revision is not a base");
        assert!(!session.switch_base(Some(9)), "unknown patch set");

        assert!(session.switch_base(Some(1)));
        assert_eq!(session.state(), SessionState::Loading);
        pump(&mut session).await.unwrap();
        assert_eq!(session.base(), Some(1));
        assert_eq!(session.state(), SessionState::Rendered);

        // Left-pane drafts in a revision-vs-revision comparison persist on
        // the PARENT side of the current revision.
        let draft = session
            .compose_draft(PaneId::Left, &[1], "base note")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(draft.revision_id, "rev-2");
    }

    #[tokio::test]
    async fn failed_load_keeps_previous_render() {
        let mut session = seeded_session().await;
        pump(&mut session).await.unwrap();

        assert!(session.next_file(), "moves to Zeta.md");
        assert_eq!(session.state(), SessionState::Loading);
        let err = pump(&mut session).await;
        assert!(err.is_err(), "Zeta.md payload is not parseable");

        assert_eq!(session.state(), SessionState::Rendered);
        assert_eq!(session.file_name(), "src/alpha.rs", "reverted to prior file");
        assert!(session.panes().is_some(), "previous panes intact");
    }

    #[tokio::test]
    async fn stale_completions_are_discarded() {
        let mut session = seeded_session().await;

        // Supersede the initial load before its completion is applied.
        assert_eq!(session.state(), SessionState::Loading);
        session.request_load("src/alpha.rs".to_owned(), None);

        let first = session.next_event().await.unwrap();
        session.handle_event(first).unwrap();
        let second = session.next_event().await.unwrap();
        session.handle_event(second).unwrap();
        assert_eq!(session.state(), SessionState::Rendered);

        // Completions after destroy are silently dropped.
        session.request_load("src/alpha.rs".to_owned(), None);
        session.destroy();
        session.destroy(); // idempotent
        let late = session.next_event().await.unwrap();
        session.handle_event(late).unwrap();
        assert_eq!(session.state(), SessionState::Destroyed);
        assert!(session.panes().is_none());
    }
}
