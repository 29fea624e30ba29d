use core_cite::{CitationManager, CitationStyle, CiteError, spans};
use core_document::{Attributes, Delta, Document, Range, attr};
use core_events::{ChangeSource, EditorEvent, EventReceiver, NotificationKind};
use core_services::{BibliographyEntry, CitationRecord, InMemoryBibliography, ServiceError};
use core_state::EditorState;
use pretty_assertions::assert_eq;

fn setup(text: &str) -> (EditorState, EventReceiver, CitationManager) {
    let (sink, rx) = core_events::channel();
    let state = EditorState::new(Document::from_text(text), sink);
    (state, rx, CitationManager::new("doc-1", CitationStyle::Numeric))
}

fn lovelace() -> BibliographyEntry {
    BibliographyEntry::new("e-a", "Notes on the Analytical Engine")
        .with_author("Ada Lovelace")
        .with_year(1843)
}

fn smith_jones() -> BibliographyEntry {
    BibliographyEntry::new("e-b", "Shared Work")
        .with_author("Smith, J.")
        .with_author("Jones, K.")
        .with_year(2020)
}

fn notifications(rx: &mut EventReceiver) -> Vec<NotificationKind> {
    rx.drain()
        .into_iter()
        .filter_map(|ev| match ev {
            EditorEvent::Notification(n) => Some(n.kind),
            _ => None,
        })
        .collect()
}

fn span_ids(state: &EditorState) -> Vec<String> {
    spans(state.document()).into_iter().map(|s| s.id).collect()
}

#[tokio::test]
async fn numeric_then_author_date_keeps_ids() {
    let (mut state, _rx, mut cites) = setup("Alpha\nBeta\n");
    let store = InMemoryBibliography::new();

    let a = cites
        .insert_citation(&mut state, &store, Range::caret(5), lovelace())
        .await
        .unwrap();
    assert_eq!(state.document().text(), "Alpha [1]. \nBeta\n");
    assert_eq!(state.selection(), Some(Range::caret(11)));

    let b = cites
        .insert_citation(&mut state, &store, Range::caret(16), smith_jones())
        .await
        .unwrap();
    assert_eq!(state.document().text(), "Alpha [1]. \nBeta [2]. \n");
    assert_eq!(store.len(), 2);
    assert_eq!(store.get(a.as_str()).unwrap().entry.document_id, "doc-1");

    let rewritten = cites
        .reformat_all(&mut state, CitationStyle::AuthorDate)
        .unwrap();
    assert_eq!(rewritten, 2);
    assert_eq!(
        state.document().text(),
        "Alpha (Lovelace, 1843). \nBeta (Smith & Jones, 2020). \n"
    );
    assert_eq!(span_ids(&state), vec![a.to_string(), b.to_string()]);
    assert_eq!(cites.get(a.as_str()).unwrap().in_text, " (Lovelace, 1843)");
    assert_eq!(cites.style(), CitationStyle::AuthorDate);
}

#[tokio::test]
async fn reformat_is_idempotent_and_one_undo_step() {
    let (mut state, mut rx, mut cites) = setup("Alpha\nBeta\n");
    let store = InMemoryBibliography::new();
    cites
        .insert_citation(&mut state, &store, Range::caret(5), lovelace())
        .await
        .unwrap();
    cites
        .insert_citation(&mut state, &store, Range::caret(16), smith_jones())
        .await
        .unwrap();
    let ids = span_ids(&state);
    rx.drain();

    cites
        .reformat_all(&mut state, CitationStyle::AuthorDate)
        .unwrap();
    let suppressed: Vec<bool> = rx
        .drain()
        .into_iter()
        .filter_map(|ev| match ev {
            EditorEvent::TextChanged(c) => Some(c.suppressed),
            _ => None,
        })
        .collect();
    assert_eq!(suppressed, vec![true]);

    let once = state.document().clone();
    assert_eq!(
        cites
            .reformat_all(&mut state, CitationStyle::AuthorDate)
            .unwrap(),
        0
    );
    assert_eq!(state.document(), &once);
    assert_eq!(span_ids(&state), ids);

    state.undo().unwrap();
    assert_eq!(state.document().text(), "Alpha [1]. \nBeta [2]. \n");
    assert_eq!(span_ids(&state), ids);
}

#[tokio::test]
async fn numbering_is_deduplicated_in_document_order() {
    let cited = |id: &str, style: &str| {
        Attributes::new()
            .with(attr::CITATION_ID, id)
            .with(attr::CITATION_STYLE, style)
    };
    let doc = Document::from_delta(
        Delta::new()
            .insert("One")
            .insert_with(" (X, 2001)", cited("b", "author-date"))
            .insert(" two")
            .insert_with(" (Y, 1999)", cited("a", "author-date"))
            .insert(" three")
            .insert_with(" (X, 2001)", cited("b", "author-date"))
            .insert("\n"),
    )
    .unwrap();
    let (sink, _rx) = core_events::channel();
    let mut state = EditorState::new(doc, sink);
    let mut cites = CitationManager::new("doc-1", CitationStyle::AuthorDate);

    assert_eq!(cites.reformat_all(&mut state, CitationStyle::Numeric).unwrap(), 3);
    assert_eq!(state.document().text(), "One [1] two [2] three [1]\n");
    assert_eq!(span_ids(&state), vec!["b", "a", "b"]);
}

#[tokio::test]
async fn deletion_removes_only_its_own_punctuation() {
    let (mut state, _rx, mut cites) = setup("Claim.\nNext [x]. here\n");
    let store = InMemoryBibliography::new();

    // The user's period is kept; only the space was inserted.
    let id = cites
        .insert_citation(&mut state, &store, Range::caret(5), lovelace())
        .await
        .unwrap();
    assert_eq!(state.document().text(), "Claim [1]. \nNext [x]. here\n");

    cites
        .delete_citation(&mut state, &store, id.as_str())
        .await
        .unwrap();
    assert_eq!(state.document().text(), "Claim.\nNext [x]. here\n");
    assert_eq!(store.deleted(), vec![id.to_string()]);
    assert!(cites.get(id.as_str()).is_none());

    assert_eq!(
        cites.delete_citation(&mut state, &store, id.as_str()).await,
        Err(CiteError::NotFound(id.to_string()))
    );
    assert_eq!(state.document().text(), "Claim.\nNext [x]. here\n");
}

#[tokio::test]
async fn insertion_and_deletion_are_single_undo_steps() {
    let (mut state, _rx, mut cites) = setup("Alpha\n");
    let store = InMemoryBibliography::new();
    state
        .insert_text(5, " text", &Attributes::new(), ChangeSource::User)
        .unwrap();
    cites
        .insert_citation(&mut state, &store, Range::caret(10), lovelace())
        .await
        .unwrap();
    assert_eq!(state.document().text(), "Alpha text [1]. \n");

    state.undo().unwrap();
    assert_eq!(state.document().text(), "Alpha text\n");
    state.undo().unwrap();
    assert_eq!(state.document().text(), "Alpha\n");
}

#[tokio::test]
async fn store_failure_leaves_document_untouched() {
    let (mut state, mut rx, mut cites) = setup("Alpha\n");
    let store = InMemoryBibliography::new();
    store.fail_next(ServiceError::Network("offline".into()));
    rx.drain();

    let err = cites
        .insert_citation(&mut state, &store, Range::caret(5), lovelace())
        .await
        .unwrap_err();
    assert!(matches!(err, CiteError::Service(ServiceError::Network(_))));
    assert_eq!(state.document().text(), "Alpha\n");
    assert!(!state.history().can_undo());
    assert!(store.is_empty());
    assert_eq!(notifications(&mut rx), vec![NotificationKind::CitationRejected]);
}

#[tokio::test]
async fn edits_inside_a_span_are_rejected() {
    let (mut state, _rx, mut cites) = setup("Alpha\n");
    let store = InMemoryBibliography::new();
    let id = cites
        .insert_citation(&mut state, &store, Range::caret(5), lovelace())
        .await
        .unwrap();
    let doc = state.document();

    assert_eq!(
        CitationManager::guard_edit(doc, Range::caret(7)),
        Err(CiteError::InsideCitation {
            id: id.to_string(),
            index: 7
        })
    );
    assert!(CitationManager::guard_edit(doc, Range::caret(5)).is_ok());
    assert!(CitationManager::guard_edit(doc, Range::caret(9)).is_ok());
    assert!(CitationManager::guard_edit(doc, Range::new(3, 4)).is_err());
    assert!(CitationManager::guard_edit(doc, Range::new(5, 4)).is_ok());
    assert!(CitationManager::guard_edit(doc, Range::new(0, 11)).is_ok());

    // Citing inside another citation is refused before the store is touched.
    assert!(matches!(
        cites
            .insert_citation(&mut state, &store, Range::caret(7), smith_jones())
            .await,
        Err(CiteError::InsideCitation { .. })
    ));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn caret_guard_moves_past_span_and_restores_trail() {
    let (mut state, _rx, mut cites) = setup("Alpha\n");
    let store = InMemoryBibliography::new();
    let id = cites
        .insert_citation(&mut state, &store, Range::caret(5), lovelace())
        .await
        .unwrap();

    assert_eq!(cites.guard_caret(&mut state, 7).unwrap(), 11);
    assert_eq!(state.selection(), Some(Range::caret(11)));
    assert_eq!(state.document().text(), "Alpha [1]. \n");
    assert_eq!(cites.guard_caret(&mut state, 2).unwrap(), 2);

    state.delete_text(9, 2, ChangeSource::User).unwrap();
    assert_eq!(state.document().text(), "Alpha [1]\n");
    assert_eq!(cites.guard_caret(&mut state, 9).unwrap(), 11);
    assert_eq!(state.document().text(), "Alpha [1]. \n");
    let trail = state.document().get_format(Range::new(9, 2)).unwrap();
    assert_eq!(trail.get_str(attr::CITATION_TRAIL), Some(id.as_str()));
}

#[test]
fn plain_caret_is_applied_as_the_selection() {
    let (mut state, _rx, mut cites) = setup("Alpha\nBeta\n");
    assert_eq!(state.selection(), None);

    assert_eq!(cites.guard_caret(&mut state, 3).unwrap(), 3);
    assert_eq!(state.selection(), Some(Range::caret(3)));

    assert_eq!(
        cites.normalize_selection(&mut state, Range::caret(8)).unwrap(),
        Range::caret(8)
    );
    assert_eq!(state.selection(), Some(Range::caret(8)));
    assert_eq!(state.document().text(), "Alpha\nBeta\n");
}

#[tokio::test]
async fn selection_inside_span_is_normalized() {
    let (mut state, _rx, mut cites) = setup("Alpha\n");
    let store = InMemoryBibliography::new();
    cites
        .insert_citation(&mut state, &store, Range::caret(5), lovelace())
        .await
        .unwrap();

    assert_eq!(
        cites.normalize_selection(&mut state, Range::new(6, 2)).unwrap(),
        Range::caret(11)
    );
    assert_eq!(
        cites.normalize_selection(&mut state, Range::new(0, 3)).unwrap(),
        Range::new(0, 3)
    );
    assert_eq!(
        cites.normalize_selection(&mut state, Range::new(5, 4)).unwrap(),
        Range::new(5, 4)
    );
    assert_eq!(state.selection(), Some(Range::new(5, 4)));
}

#[tokio::test]
async fn reconcile_follows_free_form_edits() {
    let (mut state, _rx, mut cites) = setup("Alpha\n");
    let store = InMemoryBibliography::new();
    let id = cites
        .insert_citation(&mut state, &store, Range::caret(5), lovelace())
        .await
        .unwrap();

    state.delete_text(5, 6, ChangeSource::User).unwrap();
    let summary = cites.reconcile(&state, &store).await.unwrap();
    assert_eq!(summary.deleted, 1);
    assert!(store.get(id.as_str()).is_none());

    state.undo().unwrap();
    assert_eq!(state.document().text(), "Alpha [1]. \n");
    let summary = cites.reconcile(&state, &store).await.unwrap();
    assert_eq!(summary.restored, 1);
    assert!(store.get(id.as_str()).is_some());
    assert!(cites.get(id.as_str()).is_some());
}

#[tokio::test]
async fn failed_store_delete_is_retried() {
    let (mut state, mut rx, mut cites) = setup("Alpha\n");
    let store = InMemoryBibliography::new();
    let id = cites
        .insert_citation(&mut state, &store, Range::caret(5), lovelace())
        .await
        .unwrap();
    rx.drain();

    store.fail_next(ServiceError::Network("timeout".into()));
    cites
        .delete_citation(&mut state, &store, id.as_str())
        .await
        .unwrap();
    assert_eq!(state.document().text(), "Alpha\n");
    assert_eq!(notifications(&mut rx), vec![NotificationKind::CitationRejected]);
    assert_eq!(cites.pending_deletes().count(), 1);

    let summary = cites.reconcile(&state, &store).await.unwrap();
    assert_eq!(summary.deleted, 1);
    assert_eq!(cites.pending_deletes().count(), 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn hydrate_loads_entries_for_restyling() {
    let doc = Document::from_delta(
        Delta::new()
            .insert("Alpha")
            .insert_with(
                " [1]",
                Attributes::new()
                    .with(attr::CITATION_ID, "c-1")
                    .with(attr::CITATION_SOURCE, "e-a")
                    .with(attr::CITATION_STYLE, "numeric"),
            )
            .insert("\n"),
    )
    .unwrap();
    let store = InMemoryBibliography::with_records([CitationRecord {
        citation_id: "c-1".into(),
        entry: lovelace().in_document("doc-1"),
    }]);
    let (sink, _rx) = core_events::channel();
    let mut state = EditorState::new(doc, sink);
    let mut cites = CitationManager::new("doc-1", CitationStyle::Numeric);

    assert_eq!(cites.hydrate(state.document(), &store).await.unwrap(), 1);
    assert_eq!(cites.get("c-1").unwrap().in_text, " [1]");
    cites
        .reformat_all(&mut state, CitationStyle::AuthorDate)
        .unwrap();
    assert_eq!(state.document().text(), "Alpha (Lovelace, 1843)\n");
}
