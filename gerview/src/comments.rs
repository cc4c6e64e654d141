//! Comment anchor store for one open diff view.
//!
//! Comments anchor to (side, logical line) coordinates so they survive
//! re-rendering and pane padding; rendered-row lookups go through the line
//! maps built in [`crate::linemap`]. The store owns two side-scoped
//! collections (left pane tagged PARENT, right pane tagged REVISION) and is
//! destroyed together with its view. Draft mutations round-trip through the
//! review store before local state changes, and a destroyed flag is checked
//! after every await so completions that outlive the view change nothing.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gerview_core::db;
use gerview_core::types::{CommentSide, NewDraft, StoredComment};
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::error::{Error, Result};
use crate::linemap::{LineMap, PaneId};

/// Observer invoked when a draft enters or leaves the store.
pub type DraftHook = Box<dyn Fn(&StoredComment) + Send>;

/// Published/draft tallies for one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileCounts {
    pub comments: usize,
    pub drafts: usize,
}

/// Anchor line for a comment; file-level comments (no line, or line 0)
/// anchor at line 1.
fn anchor_line(comment: &StoredComment) -> i64 {
    comment.line.filter(|l| *l > 0).unwrap_or(1)
}

/// Comments for one side of one file, keyed by logical line.
pub struct CommentCollection {
    side: CommentSide,
    map: LineMap,
    comments: BTreeMap<i64, Vec<StoredComment>>,
    drafts: BTreeMap<i64, Vec<StoredComment>>,
    comment_count: usize,
    draft_count: usize,
}

impl CommentCollection {
    fn new(side: CommentSide, map: LineMap) -> Self {
        CommentCollection {
            side,
            map,
            comments: BTreeMap::new(),
            drafts: BTreeMap::new(),
            comment_count: 0,
            draft_count: 0,
        }
    }

    pub fn side(&self) -> CommentSide {
        self.side
    }

    /// Adds a comment if its side matches this collection's; a mismatch is
    /// a no-op so a mixed-side stream can be fed to both collections.
    pub fn attach(&mut self, comment: StoredComment) {
        if comment.side != self.side {
            return;
        }
        let line = anchor_line(&comment);
        if comment.draft {
            self.draft_count += 1;
            self.drafts.entry(line).or_default().push(comment);
        } else {
            self.comment_count += 1;
            self.comments.entry(line).or_default().push(comment);
        }
    }

    /// Removes a comment by id, keeping counts in step for both published
    /// comments and drafts.
    pub fn detach(&mut self, id: &str) -> Option<StoredComment> {
        for (bucket, count) in [
            (&mut self.drafts, &mut self.draft_count),
            (&mut self.comments, &mut self.comment_count),
        ] {
            let found = bucket
                .iter()
                .find_map(|(line, items)| {
                    items.iter().position(|c| c.id == id).map(|i| (*line, i))
                });
            if let Some((line, index)) = found {
                let items = bucket.get_mut(&line)?;
                let removed = items.remove(index);
                if items.is_empty() {
                    bucket.remove(&line);
                }
                *count -= 1;
                return Some(removed);
            }
        }
        None
    }

    pub fn find(&self, id: &str) -> Option<&StoredComment> {
        self.drafts
            .values()
            .chain(self.comments.values())
            .flatten()
            .find(|c| c.id == id)
    }

    /// All comments and drafts anchored at a logical line, ordered by
    /// update time ascending.
    pub fn at_logical_line(&self, line: i64) -> Vec<&StoredComment> {
        let mut out: Vec<&StoredComment> = self
            .comments
            .get(&line)
            .into_iter()
            .chain(self.drafts.get(&line))
            .flatten()
            .collect();
        out.sort_by_key(|c| c.updated);
        out
    }

    /// Comments visible at a rendered row; empty for padding rows.
    pub fn at_rendered_row(&self, row: usize) -> Vec<&StoredComment> {
        match self.map.logical_line(row) {
            Some(line) => self.at_logical_line(line),
            None => Vec::new(),
        }
    }

    pub fn draft_at_line(&self, line: i64) -> Option<&StoredComment> {
        self.drafts.get(&line).and_then(|items| items.first())
    }

    /// Rendered rows carrying at least one comment, ascending by logical
    /// line. Anchors without a mapped row (deleted context) are skipped.
    pub fn anchored_rows(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self
            .comments
            .keys()
            .chain(self.drafts.keys())
            .filter_map(|line| self.map.rendered_row(*line))
            .collect();
        rows.sort_unstable();
        rows.dedup();
        rows
    }

    pub fn counts(&self) -> FileCounts {
        FileCounts {
            comments: self.comment_count,
            drafts: self.draft_count,
        }
    }

    fn clear(&mut self) {
        self.comments.clear();
        self.drafts.clear();
        self.comment_count = 0;
        self.draft_count = 0;
    }
}

/// Both side collections plus the draft workflow for one open file.
pub struct CommentStore {
    conn: Connection,
    change_id: String,
    file_name: String,
    /// Server coordinate for new drafts: always the revision under review.
    revision_id: String,
    /// True when the comparison base is itself a revision (not the change's
    /// parent commit). Determines the side tag of left-pane drafts.
    base_is_revision: bool,
    left: CommentCollection,
    right: CommentCollection,
    counts_by_file: HashMap<String, FileCounts>,
    destroyed: Arc<AtomicBool>,
    on_draft_added: Option<DraftHook>,
    on_draft_removed: Option<DraftHook>,
}

impl CommentStore {
    pub fn new(
        conn: Connection,
        change_id: impl Into<String>,
        file_name: impl Into<String>,
        revision_id: impl Into<String>,
        base_is_revision: bool,
        left_map: LineMap,
        right_map: LineMap,
    ) -> Self {
        CommentStore {
            conn,
            change_id: change_id.into(),
            file_name: file_name.into(),
            revision_id: revision_id.into(),
            base_is_revision,
            left: CommentCollection::new(CommentSide::Parent, left_map),
            right: CommentCollection::new(CommentSide::Revision, right_map),
            counts_by_file: HashMap::new(),
            destroyed: Arc::new(AtomicBool::new(false)),
            on_draft_added: None,
            on_draft_removed: None,
        }
    }

    pub fn on_draft_added(&mut self, hook: DraftHook) {
        self.on_draft_added = Some(hook);
    }

    pub fn on_draft_removed(&mut self, hook: DraftHook) {
        self.on_draft_removed = Some(hook);
    }

    pub fn collection(&self, pane: PaneId) -> &CommentCollection {
        match pane {
            PaneId::Left => &self.left,
            PaneId::Right => &self.right,
        }
    }

    fn collection_mut(&mut self, pane: PaneId) -> &mut CommentCollection {
        match pane {
            PaneId::Left => &mut self.left,
            PaneId::Right => &mut self.right,
        }
    }

    /// Feeds the fetched per-file comment and draft maps into the store.
    /// The current file's entries land in the side collections; every
    /// file's tallies are kept for badge display.
    pub fn populate(
        &mut self,
        comments: &HashMap<String, Vec<StoredComment>>,
        drafts: &HashMap<String, Vec<StoredComment>>,
    ) {
        for (by_file, draft) in [(comments, false), (drafts, true)] {
            for (file, items) in by_file {
                let entry = self.counts_by_file.entry(file.clone()).or_default();
                if draft {
                    entry.drafts += items.len();
                } else {
                    entry.comments += items.len();
                }
                if *file == self.file_name {
                    for item in items {
                        self.left.attach(item.clone());
                        self.right.attach(item.clone());
                    }
                }
            }
        }
    }

    /// Tallies for a file; the open file reports live collection counts.
    pub fn counts_for(&self, file: &str) -> FileCounts {
        if file == self.file_name {
            let left = self.left.counts();
            let right = self.right.counts();
            FileCounts {
                comments: left.comments + right.comments,
                drafts: left.drafts + right.drafts,
            }
        } else {
            self.counts_by_file.get(file).copied().unwrap_or_default()
        }
    }

    pub fn resolve_at_rendered_row(&self, pane: PaneId, row: usize) -> Vec<&StoredComment> {
        self.collection(pane).at_rendered_row(row)
    }

    /// Closest commented rendered row after `row` on the given pane.
    pub fn next_comment_row(&self, pane: PaneId, row: usize) -> Option<usize> {
        self.collection(pane)
            .anchored_rows()
            .into_iter()
            .find(|r| *r > row)
    }

    /// Closest commented rendered row before `row` on the given pane.
    pub fn prev_comment_row(&self, pane: PaneId, row: usize) -> Option<usize> {
        self.collection(pane)
            .anchored_rows()
            .into_iter()
            .rev()
            .find(|r| *r < row)
    }

    /// The server-side coordinate for a draft composed on a pane. Right-pane
    /// drafts always target the revision under review on side REVISION. A
    /// left-pane draft is tagged PARENT exactly when the comparison base is
    /// itself a revision of the change; the revision id stays the current
    /// one, since the server resolves PARENT relative to it.
    fn draft_side(&self, pane: PaneId) -> CommentSide {
        match pane {
            PaneId::Left if self.base_is_revision => CommentSide::Parent,
            _ => CommentSide::Revision,
        }
    }

    /// Creates one draft per logical line through the review store, then
    /// mirrors each into local state tagged with the pane's visual side.
    pub async fn create_draft(
        &mut self,
        pane: PaneId,
        logical_lines: &[i64],
        message: &str,
        in_reply_to: Option<String>,
    ) -> Result<Vec<StoredComment>> {
        let mut created = Vec::with_capacity(logical_lines.len());
        for &line in logical_lines {
            let draft = db::create_draft(
                &self.conn,
                NewDraft {
                    change_id: self.change_id.clone(),
                    revision_id: self.revision_id.clone(),
                    side: self.draft_side(pane),
                    file_path: self.file_name.clone(),
                    line: Some(line),
                    message: message.to_owned(),
                    in_reply_to: in_reply_to.clone(),
                },
            )
            .await?;

            if self.is_destroyed() {
                debug!(draft = %draft.id, "draft created after view teardown, discarding");
                return Err(Error::StaleState);
            }

            let local = StoredComment {
                side: self.collection(pane).side(),
                ..draft
            };
            self.collection_mut(pane).attach(local.clone());
            if let Some(hook) = &self.on_draft_added {
                hook(&local);
            }
            created.push(local);
        }
        Ok(created)
    }

    /// Rewrites a draft's message. An empty message deletes the draft
    /// instead; returns the surviving draft, if any.
    pub async fn update_draft(
        &mut self,
        pane: PaneId,
        draft_id: &str,
        message: &str,
        in_reply_to: Option<String>,
    ) -> Result<Option<StoredComment>> {
        if message.trim().is_empty() {
            self.delete_draft(pane, draft_id).await?;
            return Ok(None);
        }

        let updated = db::update_draft(&self.conn, draft_id, message, in_reply_to).await?;
        if self.is_destroyed() {
            debug!(draft = %draft_id, "draft updated after view teardown, discarding");
            return Err(Error::StaleState);
        }

        let local = StoredComment {
            side: self.collection(pane).side(),
            ..updated
        };
        self.erase(pane, draft_id);
        self.collection_mut(pane).attach(local.clone());
        if let Some(hook) = &self.on_draft_added {
            hook(&local);
        }
        Ok(Some(local))
    }

    /// Deletes a draft from the review store and from local state.
    pub async fn delete_draft(&mut self, pane: PaneId, draft_id: &str) -> Result<()> {
        db::delete_draft(&self.conn, draft_id).await?;
        if self.is_destroyed() {
            debug!(draft = %draft_id, "draft deleted after view teardown, discarding");
            return Err(Error::StaleState);
        }
        self.erase(pane, draft_id);
        Ok(())
    }

    /// Replies to a comment: reuses the draft already at the comment's line
    /// if one exists, otherwise creates a new one threaded under it.
    pub async fn reply(
        &mut self,
        pane: PaneId,
        comment_id: &str,
        message: &str,
    ) -> Result<Option<StoredComment>> {
        let Some(parent) = self.collection(pane).find(comment_id) else {
            return Ok(None);
        };
        let line = anchor_line(parent);
        let parent_id = parent.id.clone();

        if let Some(existing) = self.collection(pane).draft_at_line(line) {
            let existing_id = existing.id.clone();
            self.update_draft(pane, &existing_id, message, Some(parent_id))
                .await
        } else {
            let created = self
                .create_draft(pane, &[line], message, Some(parent_id))
                .await?;
            Ok(created.into_iter().next())
        }
    }

    /// Removes a comment from local state only, firing the removal hook for
    /// drafts. Counts stay symmetric with `attach`.
    pub fn erase(&mut self, pane: PaneId, id: &str) {
        if let Some(removed) = self.collection_mut(pane).detach(id) {
            if removed.draft {
                if let Some(hook) = &self.on_draft_removed {
                    hook(&removed);
                }
            }
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Shared teardown flag, checked by continuations that may outlive the
    /// view.
    pub fn destroyed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.destroyed)
    }

    /// Tears the store down. Safe to call more than once.
    pub fn destroy(&mut self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.left.clear();
        self.right.clear();
        self.counts_by_file.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linemap::build_panes;
    use crate::payload::parse_diff;

    async fn test_store(base_is_revision: bool) -> CommentStore {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.keep().join("store.db");
        let conn = db::open_store(&path.to_string_lossy()).await.unwrap();
        let set = build_panes(
            &parse_diff(
                "{\"meta_a\":{\"name\":\"f\"},\"meta_b\":{\"name\":\"f\"},\
                  \"content\":[{\"ab\":[\"l1\",\"l2\",\"l3\"]},\
                               {\"a\":[\"x\"],\"b\":[\"y\",\"z\"]}]}",
            )
            .unwrap(),
        )
        .unwrap();
        CommentStore::new(
            conn,
            "change-9",
            "f",
            "rev-2",
            base_is_revision,
            set.a.map,
            set.b.map,
        )
    }

    fn published(id: &str, side: CommentSide, line: i64, updated: i64) -> StoredComment {
        StoredComment {
            id: id.into(),
            change_id: "change-9".into(),
            revision_id: "rev-2".into(),
            file_path: "f".into(),
            line: Some(line),
            side,
            author: Some("reviewer".into()),
            message: "hm".into(),
            updated,
            in_reply_to: None,
            draft: false,
        }
    }

    #[tokio::test]
    async fn mixed_stream_splits_by_side_and_resolves_by_row() {
        let mut store = test_store(false).await;
        let mut comments = HashMap::new();
        comments.insert(
            "f".to_string(),
            vec![
                published("later", CommentSide::Revision, 4, 200),
                published("earlier", CommentSide::Revision, 4, 100),
                published("left", CommentSide::Parent, 4, 100),
            ],
        );
        let mut other = HashMap::new();
        other.insert("g".to_string(), vec![published("o", CommentSide::Revision, 1, 1)]);
        comments.extend(other);
        store.populate(&comments, &HashMap::new());

        // Logical line 4 renders at row 3 on both sides.
        let right = store.resolve_at_rendered_row(PaneId::Right, 3);
        assert_eq!(
            right.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            vec!["earlier", "later"],
            "stacked comments ordered by update time"
        );
        assert_eq!(store.resolve_at_rendered_row(PaneId::Left, 3).len(), 1);

        // Row 4 is a padding row on the left pane.
        assert!(store.resolve_at_rendered_row(PaneId::Left, 4).is_empty());

        assert_eq!(
            store.counts_for("f"),
            FileCounts {
                comments: 3,
                drafts: 0
            }
        );
        assert_eq!(store.counts_for("g").comments, 1);
        assert_eq!(store.counts_for("unseen"), FileCounts::default());
    }

    #[tokio::test]
    async fn draft_round_trip_returns_counts_to_zero() {
        let mut store = test_store(false).await;
        let added = Arc::new(AtomicBool::new(false));
        let removed = Arc::new(AtomicBool::new(false));
        let a = Arc::clone(&added);
        store.on_draft_added(Box::new(move |_| a.store(true, Ordering::SeqCst)));
        let r = Arc::clone(&removed);
        store.on_draft_removed(Box::new(move |_| r.store(true, Ordering::SeqCst)));

        let created = store
            .create_draft(PaneId::Right, &[2, 4], "needs a test", None)
            .await
            .unwrap();
        assert_eq!(created.len(), 2);
        assert!(added.load(Ordering::SeqCst));
        assert_eq!(store.counts_for("f").drafts, 2);
        assert_eq!(store.next_comment_row(PaneId::Right, 1), Some(3));
        assert_eq!(store.prev_comment_row(PaneId::Right, 3), Some(1));
        assert_eq!(store.next_comment_row(PaneId::Right, 3), None);

        for draft in &created {
            store.delete_draft(PaneId::Right, &draft.id).await.unwrap();
        }
        assert!(removed.load(Ordering::SeqCst));
        assert_eq!(store.counts_for("f"), FileCounts::default());
        assert!(store.resolve_at_rendered_row(PaneId::Right, 3).is_empty());
    }

    #[tokio::test]
    async fn left_pane_draft_side_follows_comparison_base() {
        // Base is revision 1: left-pane drafts are PARENT-side against the
        // current revision, but display under the pane's own side.
        let mut store = test_store(true).await;
        let created = store
            .create_draft(PaneId::Left, &[2], "base note", None)
            .await
            .unwrap();
        assert_eq!(created[0].side, CommentSide::Parent);
        assert_eq!(created[0].revision_id, "rev-2");

        let stored = db::comments_by_file(&store.conn, "change-9", "rev-2", true)
            .await
            .unwrap();
        assert_eq!(stored["f"][0].side, CommentSide::Parent);

        // Parent-commit comparison: left-pane drafts are REVISION-side.
        let mut store = test_store(false).await;
        let created = store
            .create_draft(PaneId::Left, &[2], "parent note", None)
            .await
            .unwrap();
        let stored = db::comments_by_file(&store.conn, "change-9", "rev-2", true)
            .await
            .unwrap();
        assert_eq!(stored["f"][0].side, CommentSide::Revision);
        // The local mirror carries the pane's visual side regardless.
        assert_eq!(created[0].side, CommentSide::Parent);
        assert_eq!(store.resolve_at_rendered_row(PaneId::Left, 1).len(), 1);
    }

    #[tokio::test]
    async fn empty_update_deletes_and_reply_reuses_draft() {
        let mut store = test_store(false).await;
        let mut comments = HashMap::new();
        comments.insert(
            "f".to_string(),
            vec![published("c-1", CommentSide::Revision, 2, 100)],
        );
        store.populate(&comments, &HashMap::new());

        let reply = store
            .reply(PaneId::Right, "c-1", "agreed")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.in_reply_to.as_deref(), Some("c-1"));
        assert_eq!(store.counts_for("f").drafts, 1);

        // A second reply at the same line folds into the existing draft.
        let again = store
            .reply(PaneId::Right, "c-1", "agreed, with caveats")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.id, reply.id);
        assert_eq!(store.counts_for("f").drafts, 1);

        // Blanking the message deletes the draft.
        let gone = store
            .update_draft(PaneId::Right, &again.id, "  ", None)
            .await
            .unwrap();
        assert!(gone.is_none());
        assert_eq!(store.counts_for("f").drafts, 0);

        // Replying to an unknown comment is a no-op.
        assert!(store.reply(PaneId::Right, "ghost", "?").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completions_after_destroy_change_nothing() {
        let mut store = test_store(false).await;
        store.destroy();
        store.destroy(); // idempotent

        let result = store.create_draft(PaneId::Right, &[4], "late", None).await;
        assert!(matches!(result, Err(Error::StaleState)));
        assert_eq!(store.counts_for("f"), FileCounts::default());
        assert!(store.resolve_at_rendered_row(PaneId::Right, 3).is_empty());
        assert!(store.is_destroyed());
    }
}
