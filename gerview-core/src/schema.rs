/// DDL to create the schema_version tracking table.
///
/// Applied unconditionally on every store open (before checking the version),
/// using `IF NOT EXISTS` so it is safe to run multiple times.
pub const SCHEMA_VERSION_DDL: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    ) STRICT;
";

/// DDL for the full v1 schema.
///
/// The store is a local replica of one review server's data, scoped by
/// `change_id`. It contains five tables:
/// - `revisions`: the patch sets of a change, ordered by `number`.
/// - `files`: per-revision file listing with change stats and a binary flag.
/// - `diffs`: raw JSON diff payloads keyed by (revision, base, path).
///   `base = 0` means "against the immediate parent".
/// - `comments`: published comments and local drafts, distinguished by the
///   `draft` flag. `side` uses the server's PARENT/REVISION coordinate.
/// - `file_review_state`: per-file reviewed flag, set when a diff is opened.
///
/// All tables use `STRICT` mode for type enforcement.
pub const SCHEMA_V1_SQL: &str = "
    CREATE TABLE IF NOT EXISTS revisions (
        change_id   TEXT    NOT NULL,
        number      INTEGER NOT NULL,
        revision_id TEXT    NOT NULL,
        PRIMARY KEY (change_id, number)
    ) STRICT;

    CREATE TABLE IF NOT EXISTS files (
        change_id      TEXT    NOT NULL,
        revision_id    TEXT    NOT NULL,
        path           TEXT    NOT NULL,
        status         TEXT    NOT NULL DEFAULT 'M',
        lines_inserted INTEGER NOT NULL DEFAULT 0,
        lines_deleted  INTEGER NOT NULL DEFAULT 0,
        binary         INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (change_id, revision_id, path)
    ) STRICT;

    CREATE TABLE IF NOT EXISTS diffs (
        change_id   TEXT    NOT NULL,
        revision_id TEXT    NOT NULL,
        base        INTEGER NOT NULL DEFAULT 0,
        file_path   TEXT    NOT NULL,
        payload     TEXT    NOT NULL,
        PRIMARY KEY (change_id, revision_id, base, file_path)
    ) STRICT;

    CREATE TABLE IF NOT EXISTS comments (
        id          TEXT    PRIMARY KEY,
        change_id   TEXT    NOT NULL,
        revision_id TEXT    NOT NULL,
        file_path   TEXT    NOT NULL,
        line        INTEGER,
        side        TEXT    NOT NULL DEFAULT 'REVISION'
                            CHECK(side IN ('PARENT', 'REVISION')),
        author      TEXT,
        message     TEXT    NOT NULL,
        updated     INTEGER NOT NULL,
        in_reply_to TEXT,
        draft       INTEGER NOT NULL DEFAULT 0
    ) STRICT;

    CREATE INDEX IF NOT EXISTS comments_by_revision
        ON comments (change_id, revision_id, draft);

    CREATE TABLE IF NOT EXISTS file_review_state (
        change_id   TEXT    NOT NULL,
        revision_id TEXT    NOT NULL,
        file_path   TEXT    NOT NULL,
        reviewed    INTEGER NOT NULL DEFAULT 0,
        reviewed_at INTEGER,
        PRIMARY KEY (change_id, revision_id, file_path)
    ) STRICT;
";

/// Runs forward-only schema migration to bring the store to the latest version.
///
/// Idempotent: safe to call on every open regardless of whether the schema has
/// already been applied.
///
/// # Process
///
/// 1. Creates the `schema_version` table if it does not exist.
/// 2. Reads the current version (`0` if the table is empty).
/// 3. If the version is below 1, applies `SCHEMA_V1_SQL` inside a
///    `BEGIN IMMEDIATE` transaction and records `version = 1`.
///
/// # Errors
///
/// Returns `rusqlite::Error` if the DDL fails or the version row cannot be read.
pub fn migrate(db: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    db.execute_batch(SCHEMA_VERSION_DDL)?;

    let version: i64 = db
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);

    if version < 1 {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute_batch(SCHEMA_V1_SQL)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
        tx.commit()?;
    }

    Ok(())
}
