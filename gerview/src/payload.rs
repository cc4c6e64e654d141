//! Wire model of the review server's diff payload.
//!
//! The payload is the server's pre-computed diff for one file: metadata for
//! both revisions of the file plus an ordered list of content blocks, each
//! either common to both sides (`ab`) or changed (`a`/`b` with optional
//! intraline edit lists). Diff computation itself happens server-side; this
//! module only deserializes.
//!
//! All types are fully owned (no borrowed lifetimes) so payloads can cross
//! task boundaries and be cached without arena allocation.

use serde::Deserialize;

/// The anti-XSSI prefix the server puts in front of every JSON response.
const XSSI_PREFIX: &str = ")]}'";

/// Metadata for one side's file revision.
#[derive(Debug, Clone, Deserialize)]
pub struct FileMeta {
    pub name: String,
    /// Total line count of this revision of the file.
    #[serde(default)]
    pub lines: Option<i64>,
}

/// One content block of the diff.
///
/// Exactly one of the two shapes is populated: `ab` for a block common to
/// both sides, or `a`/`b` (either may be absent for pure insertions and
/// deletions) for a changed block. `edit_a`/`edit_b` carry the server's
/// cumulative `(skip, length)` intraline edit pairs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentBlock {
    #[serde(default)]
    pub ab: Option<Vec<String>>,
    #[serde(default)]
    pub a: Option<Vec<String>>,
    #[serde(default)]
    pub b: Option<Vec<String>>,
    #[serde(default)]
    pub edit_a: Vec<(usize, usize)>,
    #[serde(default)]
    pub edit_b: Vec<(usize, usize)>,
}

impl ContentBlock {
    /// True if this block describes lines common to both sides.
    pub fn is_common(&self) -> bool {
        self.ab.is_some()
    }
}

/// The full diff payload for one file.
#[derive(Debug, Clone, Deserialize)]
pub struct DiffInfo {
    #[serde(default)]
    pub meta_a: Option<FileMeta>,
    #[serde(default)]
    pub meta_b: Option<FileMeta>,
    /// `"OK"` when the intraline pass succeeded; edits are ignored otherwise.
    #[serde(default)]
    pub intraline_status: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

impl DiffInfo {
    /// True if the server's intraline pass produced usable edit ranges.
    pub fn intraline_ok(&self) -> bool {
        self.intraline_status.as_deref() == Some("OK")
    }

    /// The file name for the given pane, falling back to the other side's
    /// name when this side of the file does not exist (added/deleted files).
    pub fn name_for_side(&self, left: bool) -> Option<&str> {
        let (own, other) = if left {
            (&self.meta_a, &self.meta_b)
        } else {
            (&self.meta_b, &self.meta_a)
        };
        own.as_ref().or(other.as_ref()).map(|m| m.name.as_str())
    }
}

/// Strips the server's `)]}'` anti-XSSI prefix, if present.
pub fn strip_xssi_prefix(raw: &str) -> &str {
    raw.strip_prefix(XSSI_PREFIX)
        .map(|rest| rest.trim_start_matches(['\r', '\n']))
        .unwrap_or(raw)
}

/// Parses a raw diff payload (with or without the anti-XSSI prefix).
pub fn parse_diff(raw: &str) -> Result<DiffInfo, serde_json::Error> {
    serde_json::from_str(strip_xssi_prefix(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefixed_payload() {
        let raw = ")]}'\n{\"meta_a\":{\"name\":\"src/lib.rs\",\"lines\":10},\
                   \"meta_b\":{\"name\":\"src/lib.rs\",\"lines\":11},\
                   \"intraline_status\":\"OK\",\
                   \"content\":[{\"ab\":[\"fn main() {\"]},\
                                {\"a\":[\"old\"],\"b\":[\"new\",\"er\"],\
                                 \"edit_a\":[[0,3]],\"edit_b\":[[0,3]]}]}";
        let diff = parse_diff(raw).unwrap();
        assert!(diff.intraline_ok());
        assert_eq!(diff.content.len(), 2);
        assert!(diff.content[0].is_common());
        assert_eq!(diff.content[1].b.as_ref().unwrap().len(), 2);
        assert_eq!(diff.content[1].edit_a, vec![(0, 3)]);
    }

    #[test]
    fn parses_bare_payload_and_missing_fields() {
        let diff = parse_diff("{\"meta_b\":{\"name\":\"new.txt\"},\"content\":[{\"b\":[\"x\"]}]}")
            .unwrap();
        assert!(diff.meta_a.is_none());
        assert!(!diff.intraline_ok());
        assert_eq!(diff.name_for_side(true), Some("new.txt"));
        assert!(diff.content[0].a.is_none());
        assert!(diff.content[0].edit_b.is_empty());
    }

    #[test]
    fn prefix_stripping_leaves_plain_json_alone() {
        assert_eq!(strip_xssi_prefix("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_xssi_prefix(")]}'\n{}"), "{}");
    }
}
