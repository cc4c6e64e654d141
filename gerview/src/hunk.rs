//! Rendered hunk model for one pane of a dual-pane diff.
//!
//! A pane is an ordered list of hunks; concatenating their lines yields the
//! pane's rendered buffer. Padding hunks carry blank lines inserted so both
//! panes end up the same height, and are the only rows with no logical line
//! behind them.

/// What a hunk contributes to the rendered pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HunkKind {
    /// Lines identical on both sides.
    Common,
    /// Lines that differ from the other side.
    Changed,
    /// Blank filler rows aligning this pane with the other side.
    Padding,
}

/// One contiguous run of rendered rows in a pane.
#[derive(Debug, Clone)]
pub struct Hunk {
    pub kind: HunkKind,
    pub lines: Vec<String>,
    /// Character ranges within this hunk's joined text that differ
    /// intraline, as absolute `(begin, end)` offsets. Only populated for
    /// `Changed` hunks when the server's intraline pass succeeded.
    pub intraline: Vec<(usize, usize)>,
    /// For `Padding` hunks: true when this side's half of the change was
    /// empty, i.e. the other side holds a pure insertion or deletion.
    pub removal: bool,
}

impl Hunk {
    pub fn common(lines: Vec<String>) -> Self {
        Hunk {
            kind: HunkKind::Common,
            lines,
            intraline: Vec::new(),
            removal: false,
        }
    }

    pub fn changed(lines: Vec<String>, intraline: Vec<(usize, usize)>) -> Self {
        Hunk {
            kind: HunkKind::Changed,
            lines,
            intraline,
            removal: false,
        }
    }

    pub fn padding(rows: usize, removal: bool) -> Self {
        Hunk {
            kind: HunkKind::Padding,
            lines: vec![String::new(); rows],
            intraline: Vec::new(),
            removal,
        }
    }

    pub fn height(&self) -> usize {
        self.lines.len()
    }
}

/// The rendered buffer of one pane.
#[derive(Debug, Clone, Default)]
pub struct Pane {
    pub hunks: Vec<Hunk>,
}

impl Pane {
    pub fn push(&mut self, hunk: Hunk) {
        if hunk.height() > 0 {
            self.hunks.push(hunk);
        }
    }

    /// Total rendered row count, padding included.
    pub fn height(&self) -> usize {
        self.hunks.iter().map(Hunk::height).sum()
    }

    /// All rendered rows in order.
    pub fn rows(&self) -> impl Iterator<Item = &str> {
        self.hunks.iter().flat_map(|h| h.lines.iter().map(String::as_str))
    }

    /// The full pane text, one rendered row per line.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for row in self.rows() {
            out.push_str(row);
            out.push('\n');
        }
        out
    }
}

/// Resolves the server's cumulative `(skip, length)` intraline pairs into
/// absolute `(begin, end)` character offsets within one hunk's text.
///
/// Each pair skips `skip` characters from the end of the previous edit, then
/// marks `length` characters as changed.
pub fn resolve_intraline(edits: &[(usize, usize)]) -> Vec<(usize, usize)> {
    let mut out = Vec::with_capacity(edits.len());
    let mut last_edit = 0usize;
    for &(skip, len) in edits {
        let begin = last_edit + skip;
        let end = begin + len;
        last_edit = end;
        out.push((begin, end));
    }
    out
}
