//! Background loads for a diff session.
//!
//! One task is spawned per load request. It pulls the stored diff payload,
//! builds both panes, then fetches the comments and drafts maps as a pair of
//! joined futures; nothing dependent proceeds until both have completed. The
//! finished bundle is posted back over the event channel stamped with the
//! request generation it was spawned under.

use std::collections::HashMap;

use futures::future::try_join;
use gerview_core::db;
use gerview_core::types::{CommentSide, Revision, StoredComment};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::event::SessionEvent;
use crate::linemap::{build_panes, PaneSet};
use crate::payload;

/// Comments and drafts grouped by file path, sides normalised to the visual
/// coordinate system of the current comparison.
#[derive(Debug, Default)]
pub struct FileComments {
    pub comments: HashMap<String, Vec<StoredComment>>,
    pub drafts: HashMap<String, Vec<StoredComment>>,
}

/// Everything a session needs to render one file.
#[derive(Debug)]
pub struct LoadedFile {
    pub file_name: String,
    /// Patch-set number of the comparison base; `None` means the change's
    /// parent commit.
    pub base: Option<i64>,
    pub panes: PaneSet,
    pub comments: FileComments,
}

/// Merges a base revision's comments with the current revision's.
///
/// Comments live on the revision they were written against, tagged REVISION.
/// When that revision becomes the left pane of a comparison, its comments
/// re-anchor there tagged PARENT; the current revision keeps contributing
/// the right pane's REVISION entries.
fn merge_sided(
    base: HashMap<String, Vec<StoredComment>>,
    current: HashMap<String, Vec<StoredComment>>,
) -> HashMap<String, Vec<StoredComment>> {
    let mut out: HashMap<String, Vec<StoredComment>> = HashMap::new();
    for (file, items) in base {
        let entry = out.entry(file).or_default();
        for mut item in items {
            if item.side == CommentSide::Revision {
                item.side = CommentSide::Parent;
                entry.push(item);
            }
        }
    }
    for (file, items) in current {
        out.entry(file)
            .or_default()
            .extend(items.into_iter().filter(|i| i.side == CommentSide::Revision));
    }
    out.retain(|_, items| !items.is_empty());
    out
}

/// Loads the comments and drafts maps for a comparison. The two fetches per
/// revision run as a joined pair; both must complete before the result is
/// handed on.
pub async fn load_comments(
    conn: &Connection,
    change_id: &str,
    current: &Revision,
    base: Option<&Revision>,
) -> Result<FileComments> {
    match base {
        None => {
            let (comments, drafts) = try_join(
                db::comments_by_file(conn, change_id, &current.revision_id, false),
                db::comments_by_file(conn, change_id, &current.revision_id, true),
            )
            .await?;
            Ok(FileComments { comments, drafts })
        }
        Some(base) => {
            let fetch_pair = |revision_id: String| async move {
                try_join(
                    db::comments_by_file(conn, change_id, &revision_id, false),
                    db::comments_by_file(conn, change_id, &revision_id, true),
                )
                .await
            };
            let (base_pair, current_pair) = try_join(
                fetch_pair(base.revision_id.clone()),
                fetch_pair(current.revision_id.clone()),
            )
            .await?;
            Ok(FileComments {
                comments: merge_sided(base_pair.0, current_pair.0),
                drafts: merge_sided(base_pair.1, current_pair.1),
            })
        }
    }
}

/// Loads one file end to end: diff payload, panes, then comments. The panes
/// are fully built before any comment data is fetched, so comment placement
/// always sees a finished line map.
pub async fn load_file(
    conn: &Connection,
    change_id: &str,
    current: &Revision,
    base: Option<&Revision>,
    file: &str,
) -> Result<LoadedFile> {
    let raw = db::diff_payload(
        conn,
        change_id,
        &current.revision_id,
        base.map(|r| r.number),
        file,
    )
    .await?
    .ok_or_else(|| Error::MalformedDiff(format!("no stored diff payload for {file}")))?;

    let diff = payload::parse_diff(&raw)?;
    let panes = build_panes(&diff)?;
    let comments = load_comments(conn, change_id, current, base).await?;

    Ok(LoadedFile {
        file_name: file.to_owned(),
        base: base.map(|r| r.number),
        panes,
        comments,
    })
}

/// Spawns a load task and returns its handle. The completion is posted back
/// stamped with `generation`; a session that has moved on discards it.
pub fn spawn_load(
    conn: Connection,
    tx: UnboundedSender<SessionEvent>,
    generation: u64,
    change_id: String,
    current: Revision,
    base: Option<Revision>,
    file: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = load_file(&conn, &change_id, &current, base.as_ref(), &file).await;

        if result.is_ok() {
            // Opening a file diff marks it reviewed; a failure here only
            // loses the flag, never the render.
            if let Err(err) = db::set_reviewed(&conn, &change_id, &current.revision_id, &file).await
            {
                warn!(%err, file, "could not record reviewed flag");
            }
        }

        if tx
            .send(SessionEvent::FileLoaded { generation, result })
            .is_err()
        {
            debug!(generation, "session dropped before its load completed");
        }
    })
}
