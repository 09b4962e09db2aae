use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::citations::store::CitationStore;
use crate::models::CitationRecord;

static CITATION_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+)\]").expect("citation marker regex"));

/// A run of prose or a clickable citation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InlineSegment {
    Text { text: String },
    Citation { id: u32, record: CitationRecord },
}

fn push_text(segments: &mut Vec<InlineSegment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(InlineSegment::Text { text: last }) = segments.last_mut() {
        last.push_str(text);
    } else {
        segments.push(InlineSegment::Text {
            text: text.to_string(),
        });
    }
}

/// Splits `prose` on `[n]` markers. Markers with no record in `store` stay
/// literal text so the view never shows a control that opens nothing.
pub fn render_inline(prose: &str, store: &CitationStore) -> Vec<InlineSegment> {
    let mut segments = Vec::new();
    let mut cursor = 0;

    for caps in CITATION_MARKER.captures_iter(prose) {
        let Some(whole) = caps.get(0) else { continue };
        let record = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .and_then(|id| store.get(id));

        push_text(&mut segments, &prose[cursor..whole.start()]);
        match record {
            Some(record) => segments.push(InlineSegment::Citation {
                id: record.id,
                record: record.clone(),
            }),
            None => push_text(&mut segments, whole.as_str()),
        }
        cursor = whole.end();
    }
    push_text(&mut segments, &prose[cursor..]);

    segments
}

/// Ids referenced in `prose`, in order, without duplicates.
pub fn referenced_ids(prose: &str) -> Vec<u32> {
    let mut ids: Vec<u32> = Vec::new();
    for id in CITATION_MARKER
        .captures_iter(prose)
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
    {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CitationKind;

    fn store_with(ids: &[u32]) -> CitationStore {
        let mut store = CitationStore::new();
        for id in ids {
            store.put(CitationRecord::new(*id, CitationKind::Web, format!("Source {}", id)));
        }
        store
    }

    #[test]
    fn test_unresolved_marker_is_inert_text() {
        let segments = render_inline("Rates rose [7] last year.", &store_with(&[]));
        assert_eq!(
            segments,
            vec![InlineSegment::Text {
                text: "Rates rose [7] last year.".to_string()
            }]
        );
    }

    #[test]
    fn test_known_marker_becomes_citation() {
        let segments = render_inline("Rates rose [1][7].", &store_with(&[1]));
        assert_eq!(segments.len(), 3);
        assert!(matches!(&segments[0], InlineSegment::Text { text } if text == "Rates rose "));
        assert!(matches!(&segments[1], InlineSegment::Citation { id: 1, .. }));
        assert!(matches!(&segments[2], InlineSegment::Text { text } if text == "[7]."));
    }

    #[test]
    fn test_referenced_ids() {
        assert_eq!(referenced_ids("a [2] b [1] c [2] [x]"), vec![2, 1]);
    }
}
