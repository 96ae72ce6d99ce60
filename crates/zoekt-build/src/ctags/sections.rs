use crate::types::{DocumentSection, Symbol};

use super::Entry;

/// Convert parser entries into sorted, non-overlapping byte ranges.
///
/// The range of an entry is the first occurrence of its name on its line.
/// Entries on lines outside the content, entries whose name does not occur
/// on the line, and entries overlapping an earlier accepted range are
/// dropped.
pub fn tags_to_sections(content: &[u8], tags: &[Entry]) -> (Vec<DocumentSection>, Vec<Symbol>) {
    let mut nls: Vec<usize> = content
        .iter()
        .enumerate()
        .filter(|(_, &b)| b == b'\n')
        .map(|(i, _)| i)
        .collect();
    nls.push(content.len());

    let mut sections: Vec<DocumentSection> = Vec::with_capacity(tags.len());
    let mut meta: Vec<Symbol> = Vec::with_capacity(tags.len());

    for t in tags {
        if t.line <= 0 {
            continue;
        }
        let line_idx = (t.line - 1) as usize;
        if line_idx >= nls.len() {
            continue;
        }
        let line_start = if line_idx == 0 { 0 } else { nls[line_idx - 1] + 1 };
        let line_end = nls[line_idx];
        if line_start > line_end {
            continue;
        }
        let line = &content[line_start..line_end];

        let Some(pos) = find(line, t.name.as_bytes()) else {
            continue;
        };
        let start = (line_start + pos) as u32;
        let end = start + t.name.len() as u32;

        let Some(at) = insertion_point(&sections, start, end) else {
            continue;
        };
        sections.insert(at, DocumentSection { start, end });
        meta.insert(
            at,
            Symbol {
                sym: t.name.clone(),
                kind: t.kind.clone(),
                parent: t.parent.clone(),
                parent_kind: t.parent_kind.clone(),
            },
        );
    }
    (sections, meta)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

// Index at which [start, end) keeps `secs` sorted, or None if it overlaps.
// Scans from the back since tags mostly arrive in line order.
fn insertion_point(secs: &[DocumentSection], start: u32, end: u32) -> Option<usize> {
    for i in (0..secs.len()).rev() {
        let s = secs[i];
        if start >= s.end {
            return Some(i + 1);
        }
        if end <= s.start {
            continue;
        }
        return None;
    }
    Some(0)
}
