//! Per-session run driver.
//!
//! ```text
//! start_run ──► SessionAuthority::get_or_create
//!           ──► RunTable::register        (one run per session)
//!           ──► bridge ◄── Started
//!           ──► worker thread ── ExecutionEngine::execute ──► bridge ◄── signals
//!
//! loop thread: SignalRouter ──► ProgressStateMachine ──► EventDispatcher
//! ```
//!
//! Workers only ever reach the loop through the bridge. Cancellation is a
//! flag on the session that the worker observes at its next checkpoint.

mod activity;
mod engine;
mod router;
mod scripted;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::bridge::EventBridge;
use crate::client::{ClientConnection, ClientHub};
use crate::error::{OrchestratorError, SessionError};
use crate::events::{HumanDecision, RunSignal, SignalEnvelope};
use crate::progress::ProgressState;
use crate::sessions::{Session, SessionAuthority, SessionHealth, UserContext};

pub use activity::ActivityTracker;
pub use engine::{ExecutionEngine, RunOutcome, RunRequest, WorkerContext};
pub use router::{ProgressProfiles, SignalRouter};
pub use scripted::{ScriptStep, ScriptedEngine};

use worker::RunTable;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub default_timeout: Duration,
    pub human_input_poll: Duration,
    workflow_timeouts: HashMap<String, Duration>,
}

impl OrchestratorSettings {
    pub fn new(default_timeout: Duration, human_input_poll: Duration) -> Self {
        Self {
            default_timeout,
            human_input_poll,
            workflow_timeouts: HashMap::new(),
        }
    }

    pub fn with_workflow_timeout(mut self, workflow_id: impl Into<String>, timeout: Duration) -> Self {
        self.workflow_timeouts.insert(workflow_id.into(), timeout);
        self
    }

    pub fn timeout_for(&self, workflow_id: &str) -> Duration {
        self.workflow_timeouts
            .get(workflow_id)
            .copied()
            .unwrap_or(self.default_timeout)
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::new(Duration::from_secs(600), Duration::from_millis(50))
    }
}

/// Returned by [`Orchestrator::start_run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTicket {
    pub workflow_id: String,
    pub session_id: String,
    pub is_new_session: bool,
    pub replaced_session_id: Option<String>,
}

pub struct Orchestrator {
    authority: Arc<SessionAuthority>,
    bridge: EventBridge,
    engine: Arc<dyn ExecutionEngine>,
    router: Arc<SignalRouter>,
    runs: Arc<RunTable>,
    hub: Arc<ClientHub>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        authority: Arc<SessionAuthority>,
        bridge: EventBridge,
        engine: Arc<dyn ExecutionEngine>,
        router: Arc<SignalRouter>,
        hub: Arc<ClientHub>,
        settings: OrchestratorSettings,
    ) -> Self {
        let runs = router.runs().clone();
        Self {
            authority,
            bridge,
            engine,
            router,
            runs,
            hub,
            settings,
        }
    }

    pub fn authority(&self) -> &Arc<SessionAuthority> {
        &self.authority
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Start a run of `workflow_id` for `user` on a background worker.
    ///
    /// With `force_new`, an existing session for the pair is replaced (or the
    /// request rejected, per the authority's conflict policy). Without it, a
    /// session with a run still in flight yields
    /// [`OrchestratorError::RunInProgress`].
    pub fn start_run(
        &self,
        workflow_id: &str,
        user: &UserContext,
        input: Value,
        force_new: bool,
    ) -> Result<RunTicket, OrchestratorError> {
        let lease = self.authority.get_or_create(workflow_id, user, force_new)?;
        if let Some(replaced) = lease.replaced_session_id.as_deref() {
            self.submit(workflow_id, replaced, RunSignal::Closed);
            self.hub.disconnect(replaced);
        }

        let session = lease.session;
        let session_id = session.session_id().to_string();
        let channels = self.runs.register(&session)?;
        session.clear_cancel();
        if !session.is_live() {
            // Evicted between lookup and registration.
            self.runs.finish(&session_id);
            return Err(SessionError::NotFound(session_id).into());
        }
        session.set_busy(true);
        session.set_settled(false);
        session.record_message();

        let timeout = self.settings.timeout_for(workflow_id);
        let ctx = WorkerContext::new(
            session.clone(),
            self.bridge.clone(),
            timeout,
            self.settings.human_input_poll,
            channels.decisions,
            channels.awaiting_input,
        );
        self.submit(workflow_id, &session_id, RunSignal::Started);

        let request = RunRequest {
            workflow_id: workflow_id.to_string(),
            session_id: session_id.clone(),
            input,
        };
        if let Err(err) = worker::spawn(self.engine.clone(), request, ctx) {
            self.submit(
                workflow_id,
                &session_id,
                RunSignal::Failed {
                    message: format!("worker could not start: {err}"),
                },
            );
            return Err(OrchestratorError::Spawn(err));
        }
        info!(
            session_id = %session_id,
            workflow_id = %workflow_id,
            timeout_secs = timeout.as_secs(),
            "run dispatched to worker"
        );

        Ok(RunTicket {
            workflow_id: workflow_id.to_string(),
            session_id,
            is_new_session: lease.is_new,
            replaced_session_id: lease.replaced_session_id,
        })
    }

    /// Ask the session's run to stop at its next checkpoint. Returns false
    /// when the session exists but nothing is running.
    pub fn cancel(&self, session_id: &str) -> Result<bool, OrchestratorError> {
        if self.runs.cancel(session_id) {
            info!(session_id = %session_id, "cancellation requested");
            return Ok(true);
        }
        self.require_session(session_id)?;
        Ok(false)
    }

    /// Answer a run paused on human input.
    pub fn respond(&self, session_id: &str, decision: HumanDecision) -> Result<(), OrchestratorError> {
        self.runs.respond(session_id, decision)?;
        debug!(session_id = %session_id, "operator decision delivered");
        Ok(())
    }

    /// Return a finished session's progress to READY, e.g. after its input
    /// changed and the previous output is stale.
    pub fn reset_progress(&self, session_id: &str, reason: &str) -> Result<(), OrchestratorError> {
        let session = self.require_session(session_id)?;
        if self.runs.contains(session_id) {
            return Err(OrchestratorError::RunInProgress(session_id.to_string()));
        }
        session.set_settled(false);
        self.submit(
            session.workflow_id(),
            session_id,
            RunSignal::Reset {
                reason: reason.to_string(),
            },
        );
        Ok(())
    }

    pub fn progress(&self, session_id: &str) -> Option<ProgressState> {
        self.router.progress(session_id)
    }

    /// Open the live connection for a session's updates.
    pub fn connect(&self, session_id: &str) -> Result<ClientConnection, OrchestratorError> {
        self.require_session(session_id)?;
        Ok(self.hub.connect(session_id))
    }

    /// Explicit close by the user. A run in flight is cancelled by the
    /// eviction and still reports its terminal event.
    pub fn close_session(&self, session_id: &str) -> bool {
        let Some(session) = self.authority.lookup(session_id) else {
            return false;
        };
        if !self.authority.close(session_id) {
            return false;
        }
        self.submit(session.workflow_id(), session_id, RunSignal::Closed);
        self.hub.disconnect(session_id);
        true
    }

    pub fn health(&self, session_id: &str) -> Result<SessionHealth, OrchestratorError> {
        Ok(self.authority.get_session_health_status(session_id)?)
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.runs.contains(session_id)
    }

    pub fn running(&self) -> usize {
        self.runs.len()
    }

    /// Cancel every run in flight. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        self.runs.cancel_all()
    }

    fn require_session(&self, session_id: &str) -> Result<Arc<Session>, OrchestratorError> {
        self.authority
            .lookup(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()).into())
    }

    fn submit(&self, workflow_id: &str, session_id: &str, signal: RunSignal) {
        let _ = self
            .bridge
            .submit_signal(SignalEnvelope::new(workflow_id, session_id, signal));
    }
}
