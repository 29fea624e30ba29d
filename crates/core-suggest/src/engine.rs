use crate::context::{build_context, word_count};
use crate::trigger::TriggerPolicy;
use core_config::SuggestionConfig;
use core_document::{AttrValue, Attributes, DocumentError, Range, attr};
use core_events::{ChangeSource, Notification, NotificationKind, TextChange};
use core_services::{
    DONE_SENTINEL, GenerationKind, GenerationRequest, GenerationService, ServiceError,
    TokenStream, WordCredits,
};
use core_state::{EditError, EditorState};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_stream::StreamExt;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionPhase {
    Idle,
    Requesting,
    Streaming,
    AwaitingDecision,
}

impl SuggestionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SuggestionPhase::Idle => "idle",
            SuggestionPhase::Requesting => "requesting",
            SuggestionPhase::Streaming => "streaming",
            SuggestionPhase::AwaitingDecision => "awaiting_decision",
        }
    }

    /// Streaming or fully generated but undecided.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SuggestionPhase::Streaming | SuggestionPhase::AwaitingDecision
        )
    }
}

/// What a structural suggestion generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralKind {
    Heading(u8),
    Paragraph,
}

impl StructuralKind {
    fn generation_kind(self) -> GenerationKind {
        match self {
            StructuralKind::Heading(_) => GenerationKind::Heading,
            StructuralKind::Paragraph => GenerationKind::Paragraph,
        }
    }

    fn line_attributes(self) -> Attributes {
        match self {
            StructuralKind::Heading(level) => {
                Attributes::new().with(attr::HEADER, level.clamp(1, 3))
            }
            StructuralKind::Paragraph => Attributes::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionMode {
    Inline,
    Structural(StructuralKind),
}

/// The live (uncommitted) suggestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    /// Pending range holding the generated text.
    pub range: Range,
    pub generated_text: String,
    pub is_complete: bool,
    /// Where generation started.
    pub origin: usize,
    pub mode: SuggestionMode,
    /// Selection before the trigger fired; restored on decline.
    pub caret_before: Option<Range>,
    /// Structural mode inserts a fresh line right after `range`.
    pub line_inserted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SuggestError {
    #[error("suggestions are disabled")]
    Disabled,
    #[error("a suggestion is already live")]
    AlreadyLive,
    #[error("no live suggestion")]
    NoSuggestion,
    #[error("no caret to anchor a suggestion")]
    NoCaret,
    #[error("operation not allowed while {0:?}")]
    InvalidPhase(SuggestionPhase),
    #[error("index {0} is not at a line boundary")]
    NotLineBoundary(usize),
    #[error("insufficient word credits for {required} words")]
    InsufficientCredits { required: u64 },
    #[error(transparent)]
    Edit(#[from] EditError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Abort handle for an in-flight stream. Signalling is idempotent.
#[derive(Clone, Debug)]
pub struct SuggestionAbort {
    notify: Arc<Notify>,
}

impl SuggestionAbort {
    pub fn signal(&self) {
        self.notify.notify_one();
    }
}

#[derive(Clone, Debug)]
struct AbortListener {
    notify: Arc<Notify>,
}

impl AbortListener {
    fn new_pair() -> (SuggestionAbort, Self) {
        let notify = Arc::new(Notify::new());
        (
            SuggestionAbort {
                notify: notify.clone(),
            },
            AbortListener { notify },
        )
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Outcome of pulling one item off the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStep {
    /// A token of `len` characters was inserted.
    Token { len: usize },
    /// End of stream or sentinel.
    Finished,
    /// Stream error; whatever arrived is kept.
    Failed(ServiceError),
    /// Aborted through the handle; pending text removed.
    Aborted,
}

enum Polled {
    Aborted,
    Item(Option<Result<String, ServiceError>>),
}

pub struct SuggestionEngine {
    config: SuggestionConfig,
    trigger: TriggerPolicy,
    phase: SuggestionPhase,
    live: Option<Suggestion>,
    last_request: Option<GenerationRequest>,
    stream: Option<TokenStream>,
    listener: Option<AbortListener>,
    abort: Option<SuggestionAbort>,
}

impl SuggestionEngine {
    pub fn new(config: SuggestionConfig) -> Self {
        let trigger = TriggerPolicy::new(config.debounce());
        Self {
            config,
            trigger,
            phase: SuggestionPhase::Idle,
            live: None,
            last_request: None,
            stream: None,
            listener: None,
            abort: None,
        }
    }

    pub fn phase(&self) -> SuggestionPhase {
        self.phase
    }
    pub fn live(&self) -> Option<&Suggestion> {
        self.live.as_ref()
    }
    pub fn last_request(&self) -> Option<&GenerationRequest> {
        self.last_request.as_ref()
    }
    /// Handle for aborting the current stream from another task.
    pub fn abort_handle(&self) -> Option<SuggestionAbort> {
        self.abort.clone()
    }
    pub fn config(&self) -> &SuggestionConfig {
        &self.config
    }

    fn set_phase(&mut self, next: SuggestionPhase) {
        if self.phase != next {
            debug!(target: "suggest.engine", from = self.phase.as_str(), to = next.as_str(), "phase_transition");
            self.phase = next;
        }
    }

    fn pending_attributes(&self) -> Attributes {
        Attributes::new().with(attr::COLOR, self.config.pending_color.as_str())
    }

    fn make_request(&self, kind: GenerationKind, context: core_services::SuggestionContext) -> GenerationRequest {
        let mut request = GenerationRequest::new(kind, context);
        request.language = self.config.language.clone();
        request.tone = self.config.tone.clone();
        request
    }

    /// Feed a committed change to the trigger policy. Returns `true` when the
    /// change is a user edit worth evaluating a trigger for.
    pub fn observe(&mut self, change: &TextChange, now: Instant) -> bool {
        self.trigger.observe(change, now)
    }

    /// Whether a request should fire at the current caret.
    pub fn should_trigger(&self, state: &EditorState, now: Instant) -> bool {
        if !self.config.enabled || self.phase != SuggestionPhase::Idle {
            return false;
        }
        match state.selection() {
            Some(sel) if sel.is_collapsed() => {
                self.trigger.should_fire(state.document(), sel.index, now)
            }
            _ => false,
        }
    }

    async fn ensure_credits<C: WordCredits>(
        &self,
        state: &EditorState,
        credits: &C,
        words: u64,
    ) -> Result<(), SuggestError> {
        match credits.check_availability(words).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!(target: "suggest.engine", words, "insufficient_credits");
                state.events().notify(Notification::new(
                    NotificationKind::InsufficientCredits,
                    format!("not enough word credits for {words} words"),
                ));
                Err(SuggestError::InsufficientCredits { required: words })
            }
            Err(e) => {
                warn!(target: "suggest.engine", error = %e, "credit_check_failed");
                state.events().notify(Notification::new(
                    NotificationKind::ServiceUnavailable,
                    "word-credit service unavailable",
                ));
                Err(SuggestError::Service(e))
            }
        }
    }

    fn check_can_open(&self) -> Result<(), SuggestError> {
        if !self.config.enabled {
            return Err(SuggestError::Disabled);
        }
        if self.phase != SuggestionPhase::Idle {
            debug!(target: "suggest.engine", phase = self.phase.as_str(), "request_ignored_live");
            return Err(SuggestError::AlreadyLive);
        }
        Ok(())
    }

    /// Open an inline suggestion at the caret. Checks credits first; on any
    /// failure nothing changes.
    pub async fn request<C: WordCredits>(
        &mut self,
        state: &mut EditorState,
        credits: &C,
    ) -> Result<(), SuggestError> {
        self.check_can_open()?;
        let selection = state.selection();
        let caret = selection.map(|r| r.end()).ok_or(SuggestError::NoCaret)?;
        self.ensure_credits(state, credits, u64::from(self.config.min_request_words))
            .await?;
        let context = build_context(state.document(), caret);
        let request = self.make_request(GenerationKind::Continuation, context);
        state.cutoff();
        self.open(request, caret, SuggestionMode::Inline, selection, false);
        Ok(())
    }

    /// Open a structural suggestion on a new line inserted at `at`, which must
    /// be the start of a line (typically the end of a block).
    pub async fn begin_structural<C: WordCredits>(
        &mut self,
        state: &mut EditorState,
        credits: &C,
        at: usize,
        kind: StructuralKind,
    ) -> Result<(), SuggestError> {
        self.check_can_open()?;
        let doc = state.document();
        Range::caret(at).check(doc.len())?;
        if at > 0 && doc.get_text(Range::new(at - 1, 1))? != "\n" {
            return Err(SuggestError::NotLineBoundary(at));
        }
        self.ensure_credits(state, credits, u64::from(self.config.min_request_words))
            .await?;
        let context = build_context(state.document(), at.saturating_sub(1));
        let request = self.make_request(kind.generation_kind(), context);
        let caret_before = state.selection();
        state.cutoff();
        state.insert_text(at, "\n", &kind.line_attributes(), ChangeSource::Api)?;
        self.open(request, at, SuggestionMode::Structural(kind), caret_before, true);
        Ok(())
    }

    fn open(
        &mut self,
        request: GenerationRequest,
        at: usize,
        mode: SuggestionMode,
        caret_before: Option<Range>,
        line_inserted: bool,
    ) {
        debug!(target: "suggest.engine", at, mode = ?mode, "suggestion_opened");
        self.live = Some(Suggestion {
            range: Range::caret(at),
            generated_text: String::new(),
            is_complete: false,
            origin: at,
            mode,
            caret_before,
            line_inserted,
        });
        self.last_request = Some(request);
        self.set_phase(SuggestionPhase::Requesting);
    }

    /// Start streaming the pending request.
    pub fn begin_stream<G: GenerationService>(
        &mut self,
        generator: &G,
    ) -> Result<SuggestionAbort, SuggestError> {
        if self.phase != SuggestionPhase::Requesting {
            return Err(SuggestError::InvalidPhase(self.phase));
        }
        let request = self.last_request.clone().ok_or(SuggestError::NoSuggestion)?;
        self.stream = Some(generator.stream(request));
        let (abort, listener) = AbortListener::new_pair();
        self.listener = Some(listener);
        self.abort = Some(abort.clone());
        self.set_phase(SuggestionPhase::Streaming);
        Ok(abort)
    }

    /// Pull one item off the stream and apply it.
    pub async fn next_token(&mut self, state: &mut EditorState) -> Result<StreamStep, SuggestError> {
        if self.phase != SuggestionPhase::Streaming {
            return Err(SuggestError::InvalidPhase(self.phase));
        }
        let polled = match (self.stream.as_mut(), self.listener.as_ref()) {
            (Some(stream), Some(listener)) => tokio::select! {
                biased;
                _ = listener.wait() => Polled::Aborted,
                item = stream.next() => Polled::Item(item),
            },
            _ => Polled::Item(None),
        };
        match polled {
            Polled::Aborted => {
                debug!(target: "suggest.engine", "stream_aborted");
                self.cancel(state);
                Ok(StreamStep::Aborted)
            }
            Polled::Item(None) => {
                self.finish_stream(state, true);
                Ok(StreamStep::Finished)
            }
            Polled::Item(Some(Ok(token))) if token.trim() == DONE_SENTINEL => {
                trace!(target: "suggest.engine", "sentinel");
                self.finish_stream(state, true);
                Ok(StreamStep::Finished)
            }
            Polled::Item(Some(Ok(token))) => {
                let len = self.insert_token(state, &token)?;
                Ok(StreamStep::Token { len })
            }
            Polled::Item(Some(Err(e))) => {
                warn!(target: "suggest.engine", error = %e, "stream_failed");
                state.events().notify(Notification::new(
                    NotificationKind::ServiceUnavailable,
                    "suggestion stream interrupted",
                ));
                self.finish_stream(state, false);
                Ok(StreamStep::Failed(e))
            }
        }
    }

    /// Stream until the end, an error or an abort. Returns the final step.
    pub async fn stream_to_end<G: GenerationService>(
        &mut self,
        state: &mut EditorState,
        generator: &G,
    ) -> Result<StreamStep, SuggestError> {
        if self.phase == SuggestionPhase::Requesting {
            self.begin_stream(generator)?;
        }
        loop {
            match self.next_token(state).await? {
                StreamStep::Token { .. } => continue,
                done => return Ok(done),
            }
        }
    }

    fn insert_token(&mut self, state: &mut EditorState, token: &str) -> Result<usize, SuggestError> {
        let at = self
            .live
            .as_ref()
            .map(|s| s.range.end())
            .ok_or(SuggestError::NoSuggestion)?;
        let len = token.chars().count();
        if len == 0 {
            return Ok(0);
        }
        let mut attrs = self.pending_attributes();
        if token.contains('\n') {
            // Line breaks split the current line: both halves keep its format.
            if let Some(line) = state.document().line_at(at) {
                let (_, block) = line.attributes.split_block();
                for (key, value) in block.iter().filter(|(key, _)| *key != attr::BLOCK_ID) {
                    attrs.set(key, value.clone());
                }
            }
        }
        if let Err(e) = state.insert_text(at, token, &attrs, ChangeSource::Api) {
            warn!(target: "suggest.engine", error = %e, "token_insert_rejected");
            self.cancel(state);
            return Err(e.into());
        }
        if let Some(live) = self.live.as_mut() {
            live.range.length += len;
            live.generated_text.push_str(token);
        }
        trace!(target: "suggest.engine", len, "token_inserted");
        Ok(len)
    }

    fn finish_stream(&mut self, state: &mut EditorState, complete: bool) {
        self.stream = None;
        self.listener = None;
        self.abort = None;
        let empty = self
            .live
            .as_ref()
            .is_none_or(|s| s.generated_text.is_empty());
        if empty {
            debug!(target: "suggest.engine", "stream_produced_nothing");
            self.cancel(state);
            return;
        }
        if let Some(live) = self.live.as_mut() {
            live.is_complete = complete;
        }
        self.set_phase(SuggestionPhase::AwaitingDecision);
    }

    /// Commit the live suggestion: credit check for its word count, clear the
    /// pending colour, checkpoint, debit, move the caret to the end.
    /// Returns the number of words debited.
    pub async fn accept<C: WordCredits>(
        &mut self,
        state: &mut EditorState,
        credits: &C,
    ) -> Result<u64, SuggestError> {
        if !self.phase.is_live() {
            return Err(SuggestError::InvalidPhase(self.phase));
        }
        let (range, words) = match self.live.as_ref() {
            Some(s) => (s.range, word_count(&s.generated_text)),
            None => return Err(SuggestError::NoSuggestion),
        };
        self.ensure_credits(state, credits, words).await?;
        self.stream = None;
        self.listener = None;
        self.abort = None;
        if !range.is_collapsed() {
            let clear = Attributes::new().with(attr::COLOR, AttrValue::Null);
            state.format_text(range.index, range.length, &clear, ChangeSource::Api)?;
        }
        state.cutoff();
        if let Err(e) = credits.debit(words).await {
            warn!(target: "suggest.engine", error = %e, words, "debit_failed");
            state.events().notify(Notification::new(
                NotificationKind::ServiceUnavailable,
                "word-credit debit failed",
            ));
        }
        state.set_selection(Some(Range::caret(range.end())), ChangeSource::Api)?;
        self.live = None;
        self.set_phase(SuggestionPhase::Idle);
        debug!(target: "suggest.engine", words, "accepted");
        Ok(words)
    }

    /// Remove the pending text and put the caret back where it was.
    pub fn decline(&mut self, state: &mut EditorState) -> Result<(), SuggestError> {
        if self.live.is_none() {
            return Err(SuggestError::NoSuggestion);
        }
        self.cancel(state);
        debug!(target: "suggest.engine", "declined");
        Ok(())
    }

    /// Decline, then re-issue the last request with the same anchor.
    pub async fn regenerate<C: WordCredits, G: GenerationService>(
        &mut self,
        state: &mut EditorState,
        credits: &C,
        generator: &G,
    ) -> Result<SuggestionAbort, SuggestError> {
        let request = self.last_request.clone().ok_or(SuggestError::NoSuggestion)?;
        let previous = self.live.clone().ok_or(SuggestError::NoSuggestion)?;
        self.cancel(state);
        self.ensure_credits(state, credits, u64::from(self.config.min_request_words))
            .await?;
        state.cutoff();
        if let SuggestionMode::Structural(kind) = previous.mode {
            state.insert_text(previous.origin, "\n", &kind.line_attributes(), ChangeSource::Api)?;
        }
        self.open(
            request,
            previous.origin,
            previous.mode,
            previous.caret_before,
            previous.line_inserted,
        );
        debug!(target: "suggest.engine", "regenerate");
        self.begin_stream(generator)
    }

    /// The user typed or deleted at `index` while a suggestion is live. The
    /// pending text is discarded and the returned index is where the user's
    /// edit applies in the original text. `None` when nothing was live.
    pub fn interrupt(&mut self, state: &mut EditorState, index: usize) -> Option<usize> {
        self.interrupt_range(state, Range::caret(index))
            .map(|r| r.index)
    }

    /// Like [`interrupt`](Self::interrupt) for a whole selection. Both ends
    /// are mapped past the discarded text, so the part of the selection that
    /// covered pending text is dropped and the rest keeps its length.
    pub fn interrupt_range(&mut self, state: &mut EditorState, range: Range) -> Option<Range> {
        let live = self.live.as_ref()?;
        let removed = live.range.length + usize::from(live.line_inserted);
        let start = live.range.index;
        let map = |pos: usize| {
            if pos <= start {
                pos
            } else if pos <= start + removed {
                start
            } else {
                pos - removed
            }
        };
        let from = map(range.index);
        let to = map(range.end());
        debug!(target: "suggest.engine", phase = self.phase.as_str(), "interrupted_by_user");
        self.cancel(state);
        Some(Range::new(from, to - from))
    }

    /// Drop any live suggestion, removing its pending text. Idempotent.
    /// Returns `true` when something was discarded.
    pub fn cancel(&mut self, state: &mut EditorState) -> bool {
        self.stream = None;
        self.listener = None;
        self.abort = None;
        let Some(live) = self.live.take() else {
            self.set_phase(SuggestionPhase::Idle);
            return false;
        };
        let remove = live.range.length + usize::from(live.line_inserted);
        if remove > 0
            && let Err(e) = state.delete_text(live.range.index, remove, ChangeSource::Api)
        {
            warn!(target: "suggest.engine", error = %e, "pending_removal_failed");
        }
        let caret = live.caret_before.unwrap_or(Range::caret(live.origin));
        if let Err(e) = state.set_selection(Some(caret), ChangeSource::Api) {
            warn!(target: "suggest.engine", error = %e, "caret_restore_failed");
        }
        state.cutoff();
        self.set_phase(SuggestionPhase::Idle);
        debug!(target: "suggest.engine", removed = remove, "suggestion_discarded");
        true
    }
}

impl From<DocumentError> for SuggestError {
    fn from(e: DocumentError) -> Self {
        SuggestError::Edit(EditError::Document(e))
    }
}
