use crate::error::ServiceError;
use crate::lock;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio_stream::{Stream, StreamExt};
use tracing::trace;

/// Token that terminates a stream early.
pub const DONE_SENTINEL: &str = "[DONE]";

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ServiceError>> + Send>>;

/// Caret-relative context sent with every request. Opaque to the engine
/// beyond assembling it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SuggestionContext {
    pub full_text: String,
    pub text_before_caret: String,
    pub heading: Option<String>,
    pub paragraph: String,
    pub sentence: String,
    pub sentence_closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationKind {
    /// Inline continuation at the caret.
    Continuation,
    Heading,
    Paragraph,
    /// Pipe-delimited table.
    Table,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    pub kind: GenerationKind,
    pub context: SuggestionContext,
    pub language: String,
    pub tone: Option<String>,
}

impl GenerationRequest {
    pub fn new(kind: GenerationKind, context: SuggestionContext) -> Self {
        Self {
            kind,
            context,
            language: "en".to_string(),
            tone: None,
        }
    }
}

/// Text generation collaborator.
pub trait GenerationService: Send + Sync {
    /// Token stream for an inline or structural suggestion. Connection
    /// failures surface as the first item.
    fn stream(&self, request: GenerationRequest) -> TokenStream;

    /// One-shot generation of a whole block (e.g. a table).
    fn generate_block(
        &self,
        request: GenerationRequest,
    ) -> impl Future<Output = Result<String, ServiceError>> + Send;
}

impl<T: GenerationService> GenerationService for Arc<T> {
    fn stream(&self, request: GenerationRequest) -> TokenStream {
        (**self).stream(request)
    }
    fn generate_block(
        &self,
        request: GenerationRequest,
    ) -> impl Future<Output = Result<String, ServiceError>> + Send {
        (**self).generate_block(request)
    }
}

#[derive(Debug, Clone)]
enum Script {
    Tokens(Vec<String>),
    /// Tokens, then an error item.
    Failing(Vec<String>, ServiceError),
    /// Tokens, then never ends (until the consumer drops it).
    Stalled(Vec<String>),
}

/// Plays back queued responses in order. An exhausted queue yields empty
/// streams and `Rejected` block responses.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    streams: Mutex<VecDeque<Script>>,
    blocks: Mutex<VecDeque<Result<String, ServiceError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

fn owned(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream(self, tokens: &[&str]) -> Self {
        lock(&self.streams).push_back(Script::Tokens(owned(tokens)));
        self
    }

    pub fn with_failing_stream(self, tokens: &[&str], err: ServiceError) -> Self {
        lock(&self.streams).push_back(Script::Failing(owned(tokens), err));
        self
    }

    pub fn with_stalled_stream(self, tokens: &[&str]) -> Self {
        lock(&self.streams).push_back(Script::Stalled(owned(tokens)));
        self
    }

    pub fn with_block(self, response: Result<String, ServiceError>) -> Self {
        lock(&self.blocks).push_back(response);
        self
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }
}

impl GenerationService for ScriptedGenerator {
    fn stream(&self, request: GenerationRequest) -> TokenStream {
        trace!(target: "services.generation", kind = ?request.kind, "stream_requested");
        lock(&self.requests).push(request);
        let script = lock(&self.streams)
            .pop_front()
            .unwrap_or(Script::Tokens(Vec::new()));
        match script {
            Script::Tokens(tokens) => Box::pin(tokio_stream::iter(tokens.into_iter().map(Ok))),
            Script::Failing(tokens, err) => Box::pin(
                tokio_stream::iter(tokens.into_iter().map(Ok))
                    .chain(tokio_stream::once(Err(err))),
            ),
            Script::Stalled(tokens) => Box::pin(
                tokio_stream::iter(tokens.into_iter().map(Ok)).chain(tokio_stream::pending()),
            ),
        }
    }

    async fn generate_block(&self, request: GenerationRequest) -> Result<String, ServiceError> {
        trace!(target: "services.generation", kind = ?request.kind, "block_requested");
        lock(&self.requests).push(request);
        lock(&self.blocks)
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::Rejected("no scripted block".to_string())))
    }
}
