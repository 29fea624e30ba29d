//! Editor event types and the sink that carries them out of the mutation path.
//!
//! Every successful document mutation produces a [`TextChange`]; the history
//! manager consumes it inline, while the suggestion trigger, citation
//! reconciliation and autosave consume it from the channel after the mutation
//! returns.
//!
//! Channel policy: bounded (`EVENT_CHANNEL_CAP`) and non-blocking on the
//! producer side. The mutation path must never block or fail because a
//! consumer fell behind, so a full channel drops the event and bumps
//! `EVENTS_DROPPED`. Consumers treat the document itself as the source of
//! truth and only use events as hints, so a dropped event costs at most a
//! missed suggestion trigger or a later autosave.

use core_document::{Delta, Range};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};

pub const EVENT_CHANNEL_CAP: usize = 4096;

// Simple relaxed counters, inspected by tests and logged on shutdown.
pub static EVENTS_EMITTED: AtomicU64 = AtomicU64::new(0);
pub static EVENTS_DROPPED: AtomicU64 = AtomicU64::new(0);
pub static NOTIFICATIONS_RAISED: AtomicU64 = AtomicU64::new(0);

/// Who caused a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeSource {
    /// Keystrokes, commands and undo/redo.
    User,
    /// Programmatic batches: streamed suggestions, citation rewrites.
    Api,
    /// Bookkeeping invisible to history (e.g. block id assignment).
    Silent,
}

impl ChangeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeSource::User => "user",
            ChangeSource::Api => "api",
            ChangeSource::Silent => "silent",
        }
    }
}

/// A committed document mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChange {
    pub delta: Delta,
    pub old_len: usize,
    pub new_len: usize,
    pub source: ChangeSource,
    /// Raised while a bulk rewrite is in progress; text-change side effects
    /// (suggestion triggering, autosave) must ignore it.
    pub suppressed: bool,
}

impl TextChange {
    pub fn has_deletes(&self) -> bool {
        self.delta.has_deletes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    InsufficientCredits,
    ServiceUnavailable,
    StructuralGenerationFailed,
    CitationRejected,
    EditRejected,
}

/// User-facing message produced at a component boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

impl Notification {
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    TextChanged(TextChange),
    SelectionChanged {
        range: Option<Range>,
        source: ChangeSource,
    },
    Notification(Notification),
}

/// Producer half. Cheap to clone; never blocks.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<EditorEvent>,
}

/// Consumer half.
#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<EditorEvent>,
}

pub fn channel() -> (EventSink, EventReceiver) {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAP);
    (EventSink { tx }, EventReceiver { rx })
}

impl EventSink {
    pub fn emit(&self, event: EditorEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {
                EVENTS_EMITTED.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                EVENTS_DROPPED.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(target: "events", cap = EVENT_CHANNEL_CAP, "event_dropped_full");
            }
            Err(TrySendError::Closed(_)) => {
                EVENTS_DROPPED.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(target: "events", "event_dropped_closed");
            }
        }
    }

    pub fn notify(&self, notification: Notification) {
        NOTIFICATIONS_RAISED.fetch_add(1, Ordering::Relaxed);
        tracing::info!(target: "events", kind = ?notification.kind, "notification");
        self.emit(EditorEvent::Notification(notification));
    }
}

impl EventReceiver {
    /// Everything queued right now, in emission order.
    pub fn drain(&mut self) -> Vec<EditorEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.rx.try_recv() {
            out.push(ev);
        }
        out
    }

    pub async fn recv(&mut self) -> Option<EditorEvent> {
        self.rx.recv().await
    }
}
