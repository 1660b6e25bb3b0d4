//! Event domain: the closed taxonomy routed by the dispatcher, and the raw
//! signal envelope produced by workflow runs.

mod event;
mod kind;
mod signal;

pub use event::{Artifact, Event, EventPayload, OutboundMessage, ProposedAction};
pub use kind::{EventKind, UnknownEventKind};
pub use signal::{HumanDecision, RunSignal, SignalEnvelope, StageSignal};
