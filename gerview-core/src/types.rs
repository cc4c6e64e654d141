/// One patch set of a change.
///
/// `number` is the user-visible patch-set number (1-based); `revision_id` is
/// the server's opaque revision hash. Revisions are ordered by `number`, and
/// the highest number is the change's current revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub change_id: String,
    pub number: i64,
    pub revision_id: String,
}

/// One file touched by a revision, as listed by the review server.
///
/// `binary` files carry no renderable diff payload and are skipped by diff
/// sessions up front.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: String,
    /// Status letter: `A` added, `M` modified, `D` deleted, `R` renamed.
    pub status: String,
    pub lines_inserted: i64,
    pub lines_deleted: i64,
    pub binary: bool,
}

/// The review server's coordinate for which file revision a comment is
/// attached to: the revision itself, or its parent.
///
/// This is distinct from the visual left/right pane a comment appears in —
/// the mapping between the two depends on the comparison base (see the
/// engine's comment store).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommentSide {
    Parent,
    #[default]
    Revision,
}

impl CommentSide {
    /// The wire/database representation (`PARENT` / `REVISION`).
    pub const fn as_str(self) -> &'static str {
        match self {
            CommentSide::Parent => "PARENT",
            CommentSide::Revision => "REVISION",
        }
    }

    /// Parses the wire representation. A missing or empty side means
    /// `Revision`, matching the server's default.
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("PARENT") => CommentSide::Parent,
            _ => CommentSide::Revision,
        }
    }
}

/// A comment row as persisted in the store.
///
/// Published comments carry an `author`; drafts do not (they are always the
/// local user's). `line` is `None` for file-level comments.
#[derive(Debug, Clone)]
pub struct StoredComment {
    pub id: String, // UUID v4 text
    pub change_id: String,
    pub revision_id: String,
    pub file_path: String,
    pub line: Option<i64>,
    pub side: CommentSide,
    pub author: Option<String>,
    pub message: String,
    pub updated: i64, // Unix timestamp seconds
    pub in_reply_to: Option<String>,
    pub draft: bool,
}

/// Parameters for creating a draft comment.
#[derive(Debug, Clone)]
pub struct NewDraft {
    pub change_id: String,
    pub revision_id: String,
    pub side: CommentSide,
    pub file_path: String,
    pub line: Option<i64>,
    pub message: String,
    pub in_reply_to: Option<String>,
}
