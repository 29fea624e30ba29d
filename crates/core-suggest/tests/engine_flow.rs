use core_config::SuggestionConfig;
use core_document::{Document, Range, attr};
use core_events::{ChangeSource, EditorEvent, EventReceiver, NotificationKind};
use core_services::{InMemoryCredits, ScriptedGenerator, ServiceError};
use core_state::EditorState;
use core_suggest::{
    StreamStep, StructuralKind, SuggestError, SuggestionEngine, SuggestionPhase,
};
use pretty_assertions::assert_eq;

fn setup(text: &str, caret: usize) -> (EditorState, EventReceiver, SuggestionEngine) {
    let (sink, rx) = core_events::channel();
    let mut state = EditorState::new(Document::from_text(text), sink);
    state
        .set_selection(Some(Range::caret(caret)), ChangeSource::User)
        .unwrap();
    (state, rx, SuggestionEngine::new(SuggestionConfig::default()))
}

fn has_pending_colour(doc: &Document) -> bool {
    doc.contents()
        .ops
        .iter()
        .any(|op| op.attributes().is_some_and(|a| a.contains_key(attr::COLOR)))
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

#[tokio::test]
async fn typing_interrupts_streaming_suggestion() {
    let (mut state, _rx, mut engine) = setup("Hello. \n", 7);
    let credits = InMemoryCredits::new(100);
    let generator = ScriptedGenerator::new().with_stalled_stream(&[" World"]);

    engine.request(&mut state, &credits).await.unwrap();
    engine.begin_stream(&generator).unwrap();
    assert_eq!(
        engine.next_token(&mut state).await.unwrap(),
        StreamStep::Token { len: 6 }
    );
    assert_eq!(state.document().text(), "Hello.  World\n");
    assert!(has_pending_colour(state.document()));

    let at = engine.interrupt(&mut state, 7).unwrap();
    assert_eq!(at, 7);
    state
        .insert_text(at, "X", &Default::default(), ChangeSource::User)
        .unwrap();
    assert_eq!(state.document().text(), "Hello. X\n");
    assert!(!has_pending_colour(state.document()));
    assert_eq!(engine.phase(), SuggestionPhase::Idle);
}

#[tokio::test]
async fn streamed_line_break_keeps_line_format() {
    let (mut state, _rx, mut engine) = setup("Intro\n", 5);
    state
        .format_line(0, 0, attr::HEADER, 1u8.into(), ChangeSource::User)
        .unwrap();
    let credits = InMemoryCredits::new(100);
    let generator = ScriptedGenerator::new().with_stream(&[" part.\nSecond"]);

    engine.request(&mut state, &credits).await.unwrap();
    engine.stream_to_end(&mut state, &generator).await.unwrap();
    assert_eq!(state.document().text(), "Intro part.\nSecond\n");
    let lines = state.document().lines();
    assert_eq!(lines[0].attributes.get_int(attr::HEADER), Some(1));
    assert_eq!(lines[1].attributes.get_int(attr::HEADER), Some(1));

    engine.decline(&mut state).unwrap();
    assert_eq!(state.document().text(), "Intro\n");
    assert_eq!(state.document().lines()[0].attributes.get_int(attr::HEADER), Some(1));
}

#[tokio::test]
async fn decline_restores_document_caret_and_history() {
    let (mut state, _rx, mut engine) = setup("Hello. \n", 7);
    let credits = InMemoryCredits::new(100);
    let generator = ScriptedGenerator::new().with_stream(&["Next ", "words."]);
    let before = state.document().clone();

    engine.request(&mut state, &credits).await.unwrap();
    let last = engine.stream_to_end(&mut state, &generator).await.unwrap();
    assert_eq!(last, StreamStep::Finished);
    assert_eq!(engine.phase(), SuggestionPhase::AwaitingDecision);
    assert!(engine.live().unwrap().is_complete);

    engine.decline(&mut state).unwrap();
    assert_eq!(state.document(), &before);
    assert_eq!(state.selection(), Some(Range::caret(7)));
    assert!(!state.history().can_undo());
    assert_eq!(engine.decline(&mut state), Err(SuggestError::NoSuggestion));
}

#[tokio::test]
async fn accept_commits_text_and_debits_words() {
    let (mut state, _rx, mut engine) = setup("Hello. \n", 7);
    let credits = InMemoryCredits::new(100);
    let generator = ScriptedGenerator::new().with_stream(&["Nice ", "to meet you."]);

    engine.request(&mut state, &credits).await.unwrap();
    engine.stream_to_end(&mut state, &generator).await.unwrap();
    let words = engine.accept(&mut state, &credits).await.unwrap();

    assert_eq!(words, 4);
    assert_eq!(credits.debited(), 4);
    assert_eq!(state.document().text(), "Hello. Nice to meet you.\n");
    assert!(!has_pending_colour(state.document()));
    assert_eq!(state.selection(), Some(Range::caret(24)));
    assert_eq!(engine.phase(), SuggestionPhase::Idle);

    // The accepted suggestion is a single undo step.
    assert_eq!(state.history().undo_depth(), 1);
    state.undo().unwrap();
    assert_eq!(state.document().text(), "Hello. \n");
}

#[tokio::test]
async fn acceptance_blocked_by_balance() {
    let (mut state, mut rx, mut engine) = setup("Hello. \n", 7);
    let credits = InMemoryCredits::new(10);
    let fifty: Vec<String> = (0..50).map(|i| format!("w{i} ")).collect();
    let tokens: Vec<&str> = fifty.iter().map(String::as_str).collect();
    let generator = ScriptedGenerator::new().with_stream(&tokens);

    engine.request(&mut state, &credits).await.unwrap();
    engine.stream_to_end(&mut state, &generator).await.unwrap();
    rx.drain();
    let before = state.document().clone();

    let err = engine.accept(&mut state, &credits).await.unwrap_err();
    assert_eq!(err, SuggestError::InsufficientCredits { required: 50 });
    assert_eq!(state.document(), &before);
    assert_eq!(credits.balance(), 10);
    assert_eq!(
        notifications(&mut rx),
        vec![NotificationKind::InsufficientCredits]
    );
    assert_eq!(engine.phase(), SuggestionPhase::AwaitingDecision);
}

#[tokio::test]
async fn request_blocked_without_credits() {
    let (mut state, mut rx, mut engine) = setup("Hello. \n", 7);
    let credits = InMemoryCredits::new(0);
    rx.drain();
    let err = engine.request(&mut state, &credits).await.unwrap_err();
    assert!(matches!(err, SuggestError::InsufficientCredits { .. }));
    assert_eq!(engine.phase(), SuggestionPhase::Idle);
    assert_eq!(state.document().text(), "Hello. \n");
    assert_eq!(
        notifications(&mut rx),
        vec![NotificationKind::InsufficientCredits]
    );
}

#[tokio::test]
async fn second_request_while_live_is_ignored() {
    let (mut state, _rx, mut engine) = setup("Hello. \n", 7);
    let credits = InMemoryCredits::new(100);
    engine.request(&mut state, &credits).await.unwrap();
    assert_eq!(
        engine.request(&mut state, &credits).await,
        Err(SuggestError::AlreadyLive)
    );
    assert!(!engine.should_trigger(&state, std::time::Instant::now()));
}

#[tokio::test]
async fn stream_error_keeps_arrived_text() {
    let (mut state, mut rx, mut engine) = setup("Hello. \n", 7);
    let credits = InMemoryCredits::new(100);
    let generator = ScriptedGenerator::new()
        .with_failing_stream(&["Partial"], ServiceError::Network("reset".into()));

    engine.request(&mut state, &credits).await.unwrap();
    rx.drain();
    let last = engine.stream_to_end(&mut state, &generator).await.unwrap();
    assert!(matches!(last, StreamStep::Failed(ServiceError::Network(_))));
    assert_eq!(state.document().text(), "Hello. Partial\n");
    assert_eq!(engine.phase(), SuggestionPhase::AwaitingDecision);
    assert!(!engine.live().unwrap().is_complete);
    assert!(notifications(&mut rx).contains(&NotificationKind::ServiceUnavailable));
}

#[tokio::test]
async fn sentinel_ends_stream() {
    let (mut state, _rx, mut engine) = setup("Hello. \n", 7);
    let credits = InMemoryCredits::new(100);
    let generator = ScriptedGenerator::new().with_stream(&["Yes.", "[DONE]", "ignored"]);
    engine.request(&mut state, &credits).await.unwrap();
    engine.stream_to_end(&mut state, &generator).await.unwrap();
    assert_eq!(engine.live().unwrap().generated_text, "Yes.");
}

#[tokio::test]
async fn empty_stream_returns_to_idle() {
    let (mut state, _rx, mut engine) = setup("Hello. \n", 7);
    let credits = InMemoryCredits::new(100);
    let generator = ScriptedGenerator::new().with_stream(&[]);
    engine.request(&mut state, &credits).await.unwrap();
    engine.stream_to_end(&mut state, &generator).await.unwrap();
    assert_eq!(engine.phase(), SuggestionPhase::Idle);
    assert!(engine.live().is_none());
}

#[tokio::test]
async fn abort_from_another_task_removes_pending_text() {
    let (mut state, _rx, mut engine) = setup("Hello. \n", 7);
    let credits = InMemoryCredits::new(100);
    let generator = ScriptedGenerator::new().with_stalled_stream(&["Half"]);

    engine.request(&mut state, &credits).await.unwrap();
    let abort = engine.begin_stream(&generator).unwrap();
    engine.next_token(&mut state).await.unwrap();
    assert_eq!(state.document().text(), "Hello. Half\n");

    let remote = abort.clone();
    tokio::spawn(async move {
        remote.signal();
    });
    assert_eq!(
        engine.next_token(&mut state).await.unwrap(),
        StreamStep::Aborted
    );
    assert_eq!(state.document().text(), "Hello. \n");
    assert!(!has_pending_colour(state.document()));

    // Repeated cancellation changes nothing.
    abort.signal();
    assert!(!engine.cancel(&mut state));
    assert!(!engine.cancel(&mut state));
    assert_eq!(state.document().text(), "Hello. \n");
    assert_eq!(state.selection(), Some(Range::caret(7)));
}

#[tokio::test]
async fn regenerate_reissues_the_same_request() {
    let (mut state, _rx, mut engine) = setup("Hello. \n", 7);
    let credits = InMemoryCredits::new(100);
    let generator = ScriptedGenerator::new()
        .with_stream(&["First."])
        .with_stream(&["Second."]);

    engine.request(&mut state, &credits).await.unwrap();
    engine.stream_to_end(&mut state, &generator).await.unwrap();
    engine
        .regenerate(&mut state, &credits, &generator)
        .await
        .unwrap();
    engine.stream_to_end(&mut state, &generator).await.unwrap();

    assert_eq!(state.document().text(), "Hello. Second.\n");
    let requests = generator.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], requests[1]);
}

#[tokio::test]
async fn structural_heading_follows_pending_contract() {
    let (mut state, _rx, mut engine) = setup("Intro text\nMore\n", 0);
    let credits = InMemoryCredits::new(100);
    let generator = ScriptedGenerator::new()
        .with_stream(&["Background"])
        .with_stream(&["Context"]);

    engine
        .begin_structural(&mut state, &credits, 11, StructuralKind::Heading(2))
        .await
        .unwrap();
    engine.stream_to_end(&mut state, &generator).await.unwrap();
    assert_eq!(state.document().text(), "Intro text\nBackground\nMore\n");

    engine.decline(&mut state).unwrap();
    assert_eq!(state.document().text(), "Intro text\nMore\n");
    assert_eq!(state.selection(), Some(Range::caret(0)));

    engine
        .begin_structural(&mut state, &credits, 11, StructuralKind::Heading(2))
        .await
        .unwrap();
    engine.stream_to_end(&mut state, &generator).await.unwrap();
    engine.accept(&mut state, &credits).await.unwrap();
    let lines = state.document().lines();
    assert_eq!(lines[1].text(), "Context");
    assert_eq!(lines[1].attributes.get_int(attr::HEADER), Some(2));
    assert!(!has_pending_colour(state.document()));
}

#[tokio::test]
async fn structural_requires_line_boundary() {
    let (mut state, _rx, mut engine) = setup("Intro\n", 0);
    let credits = InMemoryCredits::new(100);
    assert_eq!(
        engine
            .begin_structural(&mut state, &credits, 3, StructuralKind::Paragraph)
            .await,
        Err(SuggestError::NotLineBoundary(3))
    );
    assert_eq!(engine.phase(), SuggestionPhase::Idle);
}
