//! Seam between the orchestrator and the opaque execution engine.
//!
//! The engine runs on a worker thread and talks outward only through its
//! [`WorkerContext`], which forwards signals over the event bridge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::bridge::EventBridge;
use crate::error::EngineError;
use crate::events::{Artifact, HumanDecision, ProposedAction, RunSignal, SignalEnvelope, StageSignal};
use crate::sessions::Session;

#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub workflow_id: String,
    pub session_id: String,
    pub input: Value,
}

/// Final answer of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub content: Value,
}

impl RunOutcome {
    pub fn new(content: Value) -> Self {
        Self { content }
    }
}

pub trait ExecutionEngine: Send + Sync {
    /// Drive one run to completion. Call [`WorkerContext::checkpoint`] between
    /// processing units; cancellation is only observed there.
    fn execute(&self, request: &RunRequest, ctx: &mut WorkerContext)
        -> Result<RunOutcome, EngineError>;
}

pub struct WorkerContext {
    workflow_id: String,
    session: Arc<Session>,
    bridge: EventBridge,
    timeout: Duration,
    deadline: Instant,
    poll_interval: Duration,
    decisions: Receiver<HumanDecision>,
    awaiting_input: Arc<AtomicBool>,
}

impl WorkerContext {
    pub(crate) fn new(
        session: Arc<Session>,
        bridge: EventBridge,
        timeout: Duration,
        poll_interval: Duration,
        decisions: Receiver<HumanDecision>,
        awaiting_input: Arc<AtomicBool>,
    ) -> Self {
        Self {
            workflow_id: session.workflow_id().to_string(),
            session,
            bridge,
            timeout,
            deadline: Instant::now() + timeout,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            decisions,
            awaiting_input,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn session_id(&self) -> &str {
        self.session.session_id()
    }

    pub fn is_cancelled(&self) -> bool {
        self.session.is_cancelled()
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Processing-unit boundary: stop here if the session was cancelled or
    /// the workflow's time limit ran out.
    pub fn checkpoint(&self) -> Result<(), EngineError> {
        if self.session.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(EngineError::TimedOut(self.timeout));
        }
        Ok(())
    }

    pub fn emit_stage(&self, signal: StageSignal) {
        self.submit(RunSignal::Stage(signal));
    }

    pub fn emit_artifact(&self, artifact: Artifact) {
        self.submit(RunSignal::Artifact(artifact));
    }

    /// Pause the run until an operator answers `action`.
    ///
    /// The wait is interrupted by cancellation and by the run's deadline, both
    /// reported the same way [`checkpoint`](Self::checkpoint) reports them.
    pub fn request_confirmation(
        &mut self,
        action: ProposedAction,
    ) -> Result<HumanDecision, EngineError> {
        self.checkpoint()?;
        // Answers to an earlier pause are stale now.
        while self.decisions.try_recv().is_ok() {}

        self.awaiting_input.store(true, Ordering::SeqCst);
        self.submit(RunSignal::HumanInputRequired(action));
        let result = loop {
            if let Err(err) = self.checkpoint() {
                break Err(err);
            }
            match self.decisions.recv_timeout(self.poll_interval) {
                Ok(decision) => break Ok(decision),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break Err(EngineError::Cancelled),
            }
        };
        self.awaiting_input.store(false, Ordering::SeqCst);
        result
    }

    pub(crate) fn submit(&self, signal: RunSignal) {
        // A dropped signal is already reported on the bridge side channel.
        let _ = self.bridge.submit_signal(SignalEnvelope::new(
            self.workflow_id.as_str(),
            self.session.session_id(),
            signal,
        ));
    }

    pub(crate) fn session(&self) -> &Arc<Session> {
        &self.session
    }
}
