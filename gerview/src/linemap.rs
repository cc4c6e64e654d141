//! Builds the two padded panes and their line maps from a diff payload.
//!
//! Both panes are built in one pass over the payload's content blocks. Each
//! block starts at the same rendered row on both sides; changed blocks where
//! the sides differ in length are followed by a padding hunk on the shorter
//! side so the next block lines up again. The line maps record, per side,
//! where each logical line of the file revision landed in the padded pane.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::hunk::{resolve_intraline, Hunk, Pane};
use crate::payload::DiffInfo;

/// Bidirectional logical/rendered line mapping for one pane.
///
/// Logical lines are 1-based and correspond to the file revision shown on
/// this side. Rendered rows are 0-based and index into the padded pane.
/// Padding rows have no logical line and are absent from the rendered side
/// of the map; a miss there means "cannot anchor anything here".
#[derive(Debug, Clone, Default)]
pub struct LineMap {
    logical_to_rendered: HashMap<i64, usize>,
    rendered_to_logical: HashMap<usize, i64>,
}

impl LineMap {
    fn record(&mut self, logical: i64, rendered: usize) {
        self.logical_to_rendered.insert(logical, rendered);
        self.rendered_to_logical.insert(rendered, logical);
    }

    /// The rendered row holding the given logical line.
    pub fn rendered_row(&self, logical: i64) -> Option<usize> {
        self.logical_to_rendered.get(&logical).copied()
    }

    /// The logical line shown at the given rendered row, or `None` for
    /// padding rows.
    pub fn logical_line(&self, rendered: usize) -> Option<i64> {
        self.rendered_to_logical.get(&rendered).copied()
    }

    /// Number of mapped logical lines.
    pub fn len(&self) -> usize {
        self.logical_to_rendered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logical_to_rendered.is_empty()
    }
}

/// A rendered-row span covering one changed diff unit, padding included.
/// Both panes share the same spans, which is what makes them usable as
/// navigation anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeBlock {
    pub start_row: usize,
    pub rows: usize,
}

/// Which of the two panes, in visual terms. The left pane shows the
/// comparison base, the right pane the revision under review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneId {
    Left,
    Right,
}

/// One pane's rendered buffer plus its line map.
#[derive(Debug, Clone, Default)]
pub struct PaneSide {
    pub pane: Pane,
    pub map: LineMap,
}

/// Both rendered panes and the shared change-block list.
#[derive(Debug, Clone, Default)]
pub struct PaneSet {
    pub a: PaneSide,
    pub b: PaneSide,
    pub blocks: Vec<ChangeBlock>,
}

impl PaneSet {
    /// Rendered height; equal for both panes by construction.
    pub fn height(&self) -> usize {
        self.a.pane.height()
    }

    pub fn side(&self, pane: PaneId) -> &PaneSide {
        match pane {
            PaneId::Left => &self.a,
            PaneId::Right => &self.b,
        }
    }
}

/// Builds both panes from a parsed diff payload.
///
/// Fails with [`Error::MalformedDiff`] if the payload carries no file
/// metadata, a content block has neither a common nor a per-side shape, or
/// the two sides' rendered offsets diverge between blocks.
pub fn build_panes(diff: &DiffInfo) -> Result<PaneSet> {
    if diff.meta_a.is_none() && diff.meta_b.is_none() {
        return Err(Error::MalformedDiff(
            "payload carries no file metadata for either side".into(),
        ));
    }

    let intraline_ok = diff.intraline_ok();
    let mut out = PaneSet::default();

    // Logical counters are 1-based after increment; padding counters
    // accumulate filler rows emitted so far on each side. A logical line's
    // rendered row is (logical - 1) + padding at the time it is emitted.
    let mut logical_a: i64 = 0;
    let mut logical_b: i64 = 0;
    let mut padding_a: usize = 0;
    let mut padding_b: usize = 0;

    for (index, block) in diff.content.iter().enumerate() {
        let row_a = logical_a as usize + padding_a;
        let row_b = logical_b as usize + padding_b;
        if row_a != row_b {
            return Err(Error::MalformedDiff(format!(
                "sides diverge before block {index}: rendered row {row_a} vs {row_b}"
            )));
        }

        if let Some(common) = &block.ab {
            for _ in common {
                logical_a += 1;
                out.a.map.record(logical_a, (logical_a - 1) as usize + padding_a);
                logical_b += 1;
                out.b.map.record(logical_b, (logical_b - 1) as usize + padding_b);
            }
            out.a.pane.push(Hunk::common(common.clone()));
            out.b.pane.push(Hunk::common(common.clone()));
            continue;
        }

        if block.a.is_none() && block.b.is_none() {
            return Err(Error::MalformedDiff(format!(
                "content block {index} has neither common nor per-side lines"
            )));
        }
        let lines_a = block.a.clone().unwrap_or_default();
        let lines_b = block.b.clone().unwrap_or_default();

        for _ in &lines_a {
            logical_a += 1;
            out.a.map.record(logical_a, (logical_a - 1) as usize + padding_a);
        }
        for _ in &lines_b {
            logical_b += 1;
            out.b.map.record(logical_b, (logical_b - 1) as usize + padding_b);
        }

        let len_a = lines_a.len();
        let len_b = lines_b.len();
        let edits_a = if intraline_ok {
            resolve_intraline(&block.edit_a)
        } else {
            Vec::new()
        };
        let edits_b = if intraline_ok {
            resolve_intraline(&block.edit_b)
        } else {
            Vec::new()
        };
        out.a.pane.push(Hunk::changed(lines_a, edits_a));
        out.b.pane.push(Hunk::changed(lines_b, edits_b));

        let pad_a = len_b.saturating_sub(len_a);
        if pad_a > 0 {
            out.a.pane.push(Hunk::padding(pad_a, len_a == 0));
            padding_a += pad_a;
        }
        let pad_b = len_a.saturating_sub(len_b);
        if pad_b > 0 {
            out.b.pane.push(Hunk::padding(pad_b, len_b == 0));
            padding_b += pad_b;
        }

        let rows = len_a.max(len_b);
        if rows > 0 {
            out.blocks.push(ChangeBlock {
                start_row: row_a,
                rows,
            });
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::parse_diff;

    fn diff(json: &str) -> DiffInfo {
        parse_diff(json).unwrap()
    }

    const BOTH_META: &str =
        "\"meta_a\":{\"name\":\"f\"},\"meta_b\":{\"name\":\"f\"}";

    #[test]
    fn common_plus_uneven_change_pads_the_short_side() {
        let set = build_panes(&diff(&format!(
            "{{{BOTH_META},\"content\":[\
                {{\"ab\":[\"l1\",\"l2\",\"l3\"]}},\
                {{\"a\":[\"x\"],\"b\":[\"y\",\"z\"]}}]}}"
        )))
        .unwrap();

        // Side A: 3 common + "x" + 1 padding row; side B: 3 common + 2 rows.
        assert_eq!(set.a.pane.height(), 5);
        assert_eq!(set.b.pane.height(), 5);
        assert_eq!(set.a.pane.text(), "l1\nl2\nl3\nx\n\n");
        assert_eq!(set.b.pane.text(), "l1\nl2\nl3\ny\nz\n");

        assert_eq!(set.a.map.rendered_row(4), Some(3));
        assert_eq!(set.b.map.rendered_row(4), Some(3));
        assert_eq!(set.b.map.rendered_row(5), Some(4));

        // The padding row on A has no logical line.
        assert_eq!(set.a.map.logical_line(4), None);
        assert_eq!(set.a.map.len(), 4);
        assert_eq!(set.b.map.len(), 5);

        assert_eq!(
            set.blocks,
            vec![ChangeBlock {
                start_row: 3,
                rows: 2
            }]
        );
    }

    #[test]
    fn maps_are_inverses_over_mapped_lines() {
        let set = build_panes(&diff(&format!(
            "{{{BOTH_META},\"content\":[\
                {{\"ab\":[\"c1\",\"c2\"]}},\
                {{\"a\":[\"d1\",\"d2\",\"d3\"],\"b\":[]}},\
                {{\"ab\":[\"c3\"]}},\
                {{\"a\":[],\"b\":[\"i1\"]}},\
                {{\"ab\":[\"c4\"]}}]}}"
        )))
        .unwrap();

        for side in [&set.a, &set.b] {
            for logical in 1..=side.map.len() as i64 {
                let rendered = side.map.rendered_row(logical).unwrap();
                assert_eq!(side.map.logical_line(rendered), Some(logical));
            }
        }
        assert_eq!(set.a.pane.height(), set.b.pane.height());

        // Pure deletion pads B, pure insertion pads A; both flagged removal.
        let b_pad = set.b.pane.hunks.iter().find(|h| h.height() == 3).unwrap();
        assert!(b_pad.removal);
        let a_pad = set.a.pane.hunks.iter().find(|h| h.removal && h.height() == 1);
        assert!(a_pad.is_some());

        // Change blocks: deletion spans rows 2..5, insertion starts at row 6.
        assert_eq!(
            set.blocks,
            vec![
                ChangeBlock {
                    start_row: 2,
                    rows: 3
                },
                ChangeBlock {
                    start_row: 6,
                    rows: 1
                },
            ]
        );
    }

    #[test]
    fn intraline_ranges_follow_server_status() {
        let body = format!(
            "{{{BOTH_META},\"intraline_status\":\"{{}}\",\"content\":[\
                {{\"a\":[\"abcdef\"],\"b\":[\"abXdef\"],\
                  \"edit_a\":[[2,1]],\"edit_b\":[[2,1]]}}]}}"
        );
        let ok = build_panes(&diff(&body.replace("{}", "OK"))).unwrap();
        assert_eq!(ok.b.pane.hunks[0].intraline, vec![(2, 3)]);

        let timeout = build_panes(&diff(&body.replace("{}", "TIMEOUT"))).unwrap();
        assert!(timeout.b.pane.hunks[0].intraline.is_empty());
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        let no_meta = build_panes(&diff("{\"content\":[{\"ab\":[\"x\"]}]}"));
        assert!(matches!(no_meta, Err(Error::MalformedDiff(_))));

        let empty_block = build_panes(&diff(&format!(
            "{{{BOTH_META},\"content\":[{{\"ab\":[\"x\"]}},{{}}]}}"
        )));
        assert!(matches!(empty_block, Err(Error::MalformedDiff(_))));
    }

    #[test]
    fn empty_content_renders_empty_panes() {
        let set = build_panes(&diff(&format!("{{{BOTH_META},\"content\":[]}}"))).unwrap();
        assert_eq!(set.height(), 0);
        assert!(set.blocks.is_empty());
        assert!(set.a.map.is_empty());
    }
}
