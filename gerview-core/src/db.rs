use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::types::{CommentSide, FileEntry, NewDraft, Revision, StoredComment};

/// Opens (or creates) the review store at `path`, configures WAL mode, and
/// applies schema migrations via the `schema_version` table.
///
/// This function is the single entry point for all store connections. It sets
/// `busy_timeout` via the `Connection` method (not a PRAGMA string) so the
/// setting takes effect regardless of pragma caching.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the file cannot be opened, WAL
/// configuration fails, or schema DDL fails.
pub async fn open_store(path: &str) -> Result<Connection, tokio_rusqlite::Error> {
    let conn = Connection::open(path).await?;

    conn.call(|db| {
        db.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;
        db.busy_timeout(Duration::from_secs(5))?;
        Ok(())
    })
    .await?;

    // Checkpoint any leftover WAL from a previous run.
    conn.call(|db| {
        db.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    })
    .await?;

    conn.call(|db| {
        crate::schema::migrate(db)?;
        Ok(())
    })
    .await?;

    Ok(conn)
}

/// Returns the current Unix timestamp in seconds.
fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn comment_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StoredComment> {
    let side: String = r.get(5)?;
    Ok(StoredComment {
        id: r.get(0)?,
        change_id: r.get(1)?,
        revision_id: r.get(2)?,
        file_path: r.get(3)?,
        line: r.get(4)?,
        side: CommentSide::parse(Some(&side)),
        author: r.get(6)?,
        message: r.get(7)?,
        updated: r.get(8)?,
        in_reply_to: r.get(9)?,
        draft: r.get(10)?,
    })
}

const COMMENT_COLUMNS: &str =
    "id, change_id, revision_id, file_path, line, side, author, message, updated, in_reply_to, draft";

/// Inserts or replaces a revision row (replica ingest).
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the upsert transaction fails.
pub async fn ingest_revision(
    conn: &Connection,
    revision: Revision,
) -> Result<(), tokio_rusqlite::Error> {
    conn.call(move |db| {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO revisions (change_id, number, revision_id)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(change_id, number) DO UPDATE SET revision_id = excluded.revision_id",
            rusqlite::params![&revision.change_id, revision.number, &revision.revision_id],
        )?;
        tx.commit()?;
        Ok(())
    })
    .await
}

/// Inserts or replaces a file listing row for a revision (replica ingest).
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the upsert transaction fails.
pub async fn ingest_file(
    conn: &Connection,
    change_id: &str,
    revision_id: &str,
    file: FileEntry,
) -> Result<(), tokio_rusqlite::Error> {
    let change_id = change_id.to_owned();
    let revision_id = revision_id.to_owned();

    conn.call(move |db| {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO files
                 (change_id, revision_id, path, status, lines_inserted, lines_deleted, binary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(change_id, revision_id, path) DO UPDATE SET
                 status = excluded.status,
                 lines_inserted = excluded.lines_inserted,
                 lines_deleted = excluded.lines_deleted,
                 binary = excluded.binary",
            rusqlite::params![
                &change_id,
                &revision_id,
                &file.path,
                &file.status,
                file.lines_inserted,
                file.lines_deleted,
                file.binary,
            ],
        )?;
        tx.commit()?;
        Ok(())
    })
    .await
}

/// Stores the raw JSON diff payload for (revision, base, path).
///
/// `base = None` means the diff is against the revision's immediate parent;
/// it is stored as `0` since patch-set numbers are 1-based.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the upsert transaction fails.
pub async fn ingest_diff(
    conn: &Connection,
    change_id: &str,
    revision_id: &str,
    base: Option<i64>,
    file_path: &str,
    payload: String,
) -> Result<(), tokio_rusqlite::Error> {
    let change_id = change_id.to_owned();
    let revision_id = revision_id.to_owned();
    let file_path = file_path.to_owned();

    conn.call(move |db| {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO diffs (change_id, revision_id, base, file_path, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(change_id, revision_id, base, file_path)
             DO UPDATE SET payload = excluded.payload",
            rusqlite::params![
                &change_id,
                &revision_id,
                base.unwrap_or(0),
                &file_path,
                &payload
            ],
        )?;
        tx.commit()?;
        Ok(())
    })
    .await
}

/// Inserts or replaces a comment row (replica ingest of published comments).
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the upsert transaction fails.
pub async fn ingest_comment(
    conn: &Connection,
    comment: StoredComment,
) -> Result<(), tokio_rusqlite::Error> {
    conn.call(move |db| {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO comments ({COMMENT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            rusqlite::params![
                &comment.id,
                &comment.change_id,
                &comment.revision_id,
                &comment.file_path,
                comment.line,
                comment.side.as_str(),
                &comment.author,
                &comment.message,
                comment.updated,
                &comment.in_reply_to,
                comment.draft,
            ],
        )?;
        tx.commit()?;
        Ok(())
    })
    .await
}

/// Loads the revisions of a change, ordered by patch-set number ascending.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the query fails.
pub async fn revisions(
    conn: &Connection,
    change_id: &str,
) -> Result<Vec<Revision>, tokio_rusqlite::Error> {
    let change_id = change_id.to_owned();

    conn.call(move |db| {
        let mut stmt = db.prepare(
            "SELECT change_id, number, revision_id FROM revisions
             WHERE change_id = ?1 ORDER BY number ASC",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![&change_id], |r| {
                Ok(Revision {
                    change_id: r.get(0)?,
                    number: r.get(1)?,
                    revision_id: r.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })
    .await
}

/// Loads the file listing for a revision.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the query fails.
pub async fn files(
    conn: &Connection,
    change_id: &str,
    revision_id: &str,
) -> Result<Vec<FileEntry>, tokio_rusqlite::Error> {
    let change_id = change_id.to_owned();
    let revision_id = revision_id.to_owned();

    conn.call(move |db| {
        let mut stmt = db.prepare(
            "SELECT path, status, lines_inserted, lines_deleted, binary FROM files
             WHERE change_id = ?1 AND revision_id = ?2",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![&change_id, &revision_id], |r| {
                Ok(FileEntry {
                    path: r.get(0)?,
                    status: r.get(1)?,
                    lines_inserted: r.get(2)?,
                    lines_deleted: r.get(3)?,
                    binary: r.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })
    .await
}

/// Fetches the raw JSON diff payload for (revision, base, path), if present.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the query fails.
pub async fn diff_payload(
    conn: &Connection,
    change_id: &str,
    revision_id: &str,
    base: Option<i64>,
    file_path: &str,
) -> Result<Option<String>, tokio_rusqlite::Error> {
    let change_id = change_id.to_owned();
    let revision_id = revision_id.to_owned();
    let file_path = file_path.to_owned();

    conn.call(move |db| {
        let payload = db
            .query_row(
                "SELECT payload FROM diffs
                 WHERE change_id = ?1 AND revision_id = ?2 AND base = ?3 AND file_path = ?4",
                rusqlite::params![&change_id, &revision_id, base.unwrap_or(0), &file_path],
                |r| r.get(0),
            )
            .optional()?;
        Ok(payload)
    })
    .await
}

/// Loads published comments (`drafts = false`) or draft comments
/// (`drafts = true`) for a revision, grouped by file path.
///
/// Rows are ordered by `updated` ascending within each file, matching the
/// stacking order comment threads render in.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the query fails.
pub async fn comments_by_file(
    conn: &Connection,
    change_id: &str,
    revision_id: &str,
    drafts: bool,
) -> Result<HashMap<String, Vec<StoredComment>>, tokio_rusqlite::Error> {
    let change_id = change_id.to_owned();
    let revision_id = revision_id.to_owned();

    conn.call(move |db| {
        let mut stmt = db.prepare(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments
             WHERE change_id = ?1 AND revision_id = ?2 AND draft = ?3
             ORDER BY updated ASC"
        ))?;
        let rows = stmt
            .query_map(
                rusqlite::params![&change_id, &revision_id, drafts],
                comment_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut by_file: HashMap<String, Vec<StoredComment>> = HashMap::new();
        for comment in rows {
            by_file.entry(comment.file_path.clone()).or_default().push(comment);
        }
        Ok(by_file)
    })
    .await
}

/// Creates a draft comment and returns the persisted row.
///
/// The id is a fresh UUID v4 and `updated` is set to the current time, the
/// same fields the review server would fill in on a draft create.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the insert transaction fails.
pub async fn create_draft(
    conn: &Connection,
    draft: NewDraft,
) -> Result<StoredComment, tokio_rusqlite::Error> {
    conn.call(move |db| {
        let comment = StoredComment {
            id: uuid::Uuid::new_v4().to_string(),
            change_id: draft.change_id,
            revision_id: draft.revision_id,
            file_path: draft.file_path,
            line: draft.line,
            side: draft.side,
            author: None,
            message: draft.message,
            updated: now_secs(),
            in_reply_to: draft.in_reply_to,
            draft: true,
        };

        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute(
            &format!(
                "INSERT INTO comments ({COMMENT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            rusqlite::params![
                &comment.id,
                &comment.change_id,
                &comment.revision_id,
                &comment.file_path,
                comment.line,
                comment.side.as_str(),
                &comment.author,
                &comment.message,
                comment.updated,
                &comment.in_reply_to,
                comment.draft,
            ],
        )?;
        tx.commit()?;
        Ok(comment)
    })
    .await
}

/// Updates a draft's message (and optionally `in_reply_to`), returning the
/// persisted row. The `updated` timestamp is refreshed.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the draft does not exist or the update
/// transaction fails.
pub async fn update_draft(
    conn: &Connection,
    draft_id: &str,
    message: &str,
    in_reply_to: Option<String>,
) -> Result<StoredComment, tokio_rusqlite::Error> {
    let draft_id = draft_id.to_owned();
    let message = message.to_owned();

    conn.call(move |db| {
        let now = now_secs();
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute(
            "UPDATE comments
             SET message = ?1,
                 updated = ?2,
                 in_reply_to = COALESCE(?3, in_reply_to)
             WHERE id = ?4 AND draft = 1",
            rusqlite::params![&message, now, &in_reply_to, &draft_id],
        )?;
        let comment = tx.query_row(
            &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?1 AND draft = 1"),
            rusqlite::params![&draft_id],
            comment_from_row,
        )?;
        tx.commit()?;
        Ok(comment)
    })
    .await
}

/// Deletes a draft comment. Published comments are never deleted locally.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the delete transaction fails.
pub async fn delete_draft(
    conn: &Connection,
    draft_id: &str,
) -> Result<(), tokio_rusqlite::Error> {
    let draft_id = draft_id.to_owned();

    conn.call(move |db| {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM comments WHERE id = ?1 AND draft = 1",
            rusqlite::params![&draft_id],
        )?;
        tx.commit()?;
        Ok(())
    })
    .await
}

/// Marks a file as reviewed for a revision (upsert, fire-and-forget from the
/// caller's point of view).
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the upsert transaction fails.
pub async fn set_reviewed(
    conn: &Connection,
    change_id: &str,
    revision_id: &str,
    file_path: &str,
) -> Result<(), tokio_rusqlite::Error> {
    let change_id = change_id.to_owned();
    let revision_id = revision_id.to_owned();
    let file_path = file_path.to_owned();

    conn.call(move |db| {
        let now = now_secs();
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO file_review_state (change_id, revision_id, file_path, reviewed, reviewed_at)
             VALUES (?1, ?2, ?3, 1, ?4)
             ON CONFLICT(change_id, revision_id, file_path)
             DO UPDATE SET reviewed = 1, reviewed_at = excluded.reviewed_at",
            rusqlite::params![&change_id, &revision_id, &file_path, now],
        )?;
        tx.commit()?;
        Ok(())
    })
    .await
}
