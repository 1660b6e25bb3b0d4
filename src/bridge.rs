//! Event bridge: non-blocking hand-off from any thread into the cooperative loop.
//!
//! Every producer, loop thread included, enqueues on the same unbounded
//! channel. A submit from the loop thread therefore lands behind the message
//! currently being processed and runs on a later loop iteration, and a single
//! producer's messages come out in the order they went in.

mod diagnostics;
mod event_loop;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc::UnboundedSender;

use crate::error::LoopError;
use crate::events::{Event, SignalEnvelope};

pub use diagnostics::{DiagnosticSink, MemoryDiagnostics, StderrDiagnostics};
pub use event_loop::{EventLoop, LoopConsumer};

pub(crate) enum LoopMessage {
    Event(Event),
    Signal(SignalEnvelope),
    Barrier(std::sync::mpsc::Sender<()>),
    Stop,
}

impl LoopMessage {
    fn describe(&self) -> (&'static str, &str) {
        match self {
            LoopMessage::Event(event) => (event.kind().as_str(), event.session_id()),
            LoopMessage::Signal(envelope) => ("signal", envelope.session_id.as_str()),
            LoopMessage::Barrier(_) => ("barrier", "-"),
            LoopMessage::Stop => ("stop", "-"),
        }
    }
}

/// Why a submit could not be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    NotStarted,
    Stopped,
}

impl Unavailable {
    fn as_str(self) -> &'static str {
        match self {
            Unavailable::NotStarted => "loop not started",
            Unavailable::Stopped => "loop stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    Dropped(Unavailable),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub submitted: u64,
    pub dropped: u64,
}

struct BridgeInner {
    sender: OnceLock<UnboundedSender<LoopMessage>>,
    diagnostics: Arc<dyn DiagnosticSink>,
    submitted: AtomicU64,
    dropped: AtomicU64,
}

/// Cloneable handle given to producers. Attached to exactly one [`EventLoop`].
#[derive(Clone)]
pub struct EventBridge {
    inner: Arc<BridgeInner>,
}

impl EventBridge {
    pub fn new(diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                sender: OnceLock::new(),
                diagnostics,
                submitted: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_stderr_diagnostics() -> Self {
        Self::new(Arc::new(StderrDiagnostics))
    }

    /// Hand an event to the loop. Never blocks, never panics, never logs.
    pub fn submit(&self, event: Event) -> SubmitOutcome {
        self.enqueue(LoopMessage::Event(event))
    }

    /// Hand a raw run signal to the loop for routing.
    pub fn submit_signal(&self, envelope: SignalEnvelope) -> SubmitOutcome {
        self.enqueue(LoopMessage::Signal(envelope))
    }

    pub fn is_attached(&self) -> bool {
        self.inner.sender.get().is_some()
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn attach(&self, sender: UnboundedSender<LoopMessage>) -> Result<(), LoopError> {
        self.inner
            .sender
            .set(sender)
            .map_err(|_| LoopError::AlreadyAttached)
    }

    /// Control messages (barrier, stop) share the event queue so they observe
    /// everything submitted before them.
    pub(crate) fn send_control(&self, message: LoopMessage) -> bool {
        match self.inner.sender.get() {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }

    fn enqueue(&self, message: LoopMessage) -> SubmitOutcome {
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        let Some(sender) = self.inner.sender.get() else {
            self.report_dropped(&message, Unavailable::NotStarted);
            return SubmitOutcome::Dropped(Unavailable::NotStarted);
        };
        match sender.send(message) {
            Ok(()) => SubmitOutcome::Queued,
            Err(err) => {
                self.report_dropped(&err.0, Unavailable::Stopped);
                SubmitOutcome::Dropped(Unavailable::Stopped)
            }
        }
    }

    /// Exactly one side-channel line per dropped message.
    pub(crate) fn report_dropped(&self, message: &LoopMessage, reason: Unavailable) {
        if matches!(message, LoopMessage::Barrier(_) | LoopMessage::Stop) {
            return;
        }
        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        let (kind, session_id) = message.describe();
        self.inner.diagnostics.write_line(&format!(
            "flowrelay: event bridge unavailable ({}); dropped {} for session {}",
            reason.as_str(),
            kind,
            session_id
        ));
    }
}
