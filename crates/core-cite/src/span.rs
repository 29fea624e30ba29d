//! Citation spans read straight off the document's attributes.
//!
//! A span is a maximal run of characters carrying the same `citation-id`.
//! Trails are runs of characters whose `citation-trail` names a citation;
//! they are the auto-inserted `". "` after a span.

use crate::style::CitationStyle;
use core_document::{Document, Range, attr};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationSpan {
    pub id: String,
    pub range: Range,
    pub text: String,
    /// `citation-source`: bibliography entry id.
    pub entry_id: Option<String>,
    /// `citation-style` the text was rendered with.
    pub style: Option<CitationStyle>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailRun {
    pub id: String,
    pub range: Range,
}

/// Every citation span in document order.
pub fn spans(doc: &Document) -> Vec<CitationSpan> {
    let mut out: Vec<CitationSpan> = Vec::new();
    let mut index = 0usize;
    for op in &doc.contents().ops {
        let len = op.len();
        let id = op
            .attributes()
            .and_then(|a| a.get_str(attr::CITATION_ID))
            .filter(|id| !id.is_empty());
        if let Some(id) = id {
            let text = op.insert_text().unwrap_or_default();
            match out.last_mut() {
                Some(last) if last.id == id && last.range.end() == index => {
                    last.range.length += len;
                    last.text.push_str(&text);
                }
                _ => {
                    let attrs = op.attributes();
                    out.push(CitationSpan {
                        id: id.to_string(),
                        range: Range::new(index, len),
                        text,
                        entry_id: attrs
                            .and_then(|a| a.get_str(attr::CITATION_SOURCE))
                            .map(str::to_string),
                        style: attrs
                            .and_then(|a| a.get_str(attr::CITATION_STYLE))
                            .and_then(|s| s.parse().ok()),
                    });
                }
            }
        }
        index += len;
    }
    out
}

pub fn trails(doc: &Document) -> Vec<TrailRun> {
    let mut out: Vec<TrailRun> = Vec::new();
    let mut index = 0usize;
    for op in &doc.contents().ops {
        let len = op.len();
        if let Some(id) = op.attributes().and_then(|a| a.get_str(attr::CITATION_TRAIL)) {
            match out.last_mut() {
                Some(last) if last.id == id && last.range.end() == index => {
                    last.range.length += len;
                }
                _ => out.push(TrailRun {
                    id: id.to_string(),
                    range: Range::new(index, len),
                }),
            }
        }
        index += len;
    }
    out
}

/// The span strictly containing `index`, if any.
pub fn span_containing(doc: &Document, index: usize) -> Option<CitationSpan> {
    spans(doc)
        .into_iter()
        .find(|s| s.range.strictly_contains(index))
}

/// The span ending exactly at `index`.
pub fn span_ending_at(doc: &Document, index: usize) -> Option<CitationSpan> {
    spans(doc).into_iter().find(|s| s.range.end() == index)
}

/// Distinct ids in order of first appearance.
pub fn ordered_ids(doc: &Document) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for span in spans(doc) {
        if !ids.contains(&span.id) {
            ids.push(span.id);
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_document::{Attributes, Delta};
    use pretty_assertions::assert_eq;

    fn cited(id: &str) -> Attributes {
        Attributes::new()
            .with(attr::CITATION_ID, id)
            .with(attr::CITATION_SOURCE, "e1")
            .with(attr::CITATION_STYLE, "numeric")
    }

    fn doc() -> Document {
        Document::from_delta(
            Delta::new()
                .insert("Fact")
                .insert_with(" [1]", cited("a"))
                .insert_with(". ", Attributes::new().with(attr::CITATION_TRAIL, "a"))
                .insert("More")
                .insert_with(" [1]", cited("a").with(attr::BOLD, true))
                .insert("\n"),
        )
        .unwrap()
    }

    #[test]
    fn merges_runs_with_same_id() {
        let doc = doc();
        let found = spans(&doc);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].range, Range::new(4, 4));
        assert_eq!(found[0].text, " [1]");
        assert_eq!(found[0].entry_id.as_deref(), Some("e1"));
        assert_eq!(found[0].style, Some(CitationStyle::Numeric));
        assert_eq!(found[1].range, Range::new(14, 4));
        assert_eq!(ordered_ids(&doc), vec!["a".to_string()]);
    }

    #[test]
    fn trail_and_position_queries() {
        let doc = doc();
        assert_eq!(
            trails(&doc),
            vec![TrailRun {
                id: "a".into(),
                range: Range::new(8, 2)
            }]
        );
        assert_eq!(span_containing(&doc, 6).map(|s| s.range.index), Some(4));
        assert!(span_containing(&doc, 4).is_none());
        assert!(span_containing(&doc, 8).is_none());
        assert_eq!(span_ending_at(&doc, 8).map(|s| s.id), Some("a".to_string()));
    }
}
