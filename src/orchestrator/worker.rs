//! Worker threads and the table of runs in flight.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, info_span, warn};

use crate::dispatch::panic_message;
use crate::error::{EngineError, OrchestratorError};
use crate::events::{HumanDecision, RunSignal};
use crate::orchestrator::{ExecutionEngine, RunRequest, WorkerContext};
use crate::sessions::Session;

pub(crate) struct RunEntry {
    pub(crate) session: Arc<Session>,
    decisions: Sender<HumanDecision>,
    awaiting_input: Arc<AtomicBool>,
    started_at: Instant,
}

/// Handles the worker side of a freshly registered run.
pub(crate) struct RunChannels {
    pub(crate) decisions: Receiver<HumanDecision>,
    pub(crate) awaiting_input: Arc<AtomicBool>,
}

/// At most one run per session. Entries are added by the orchestrator and
/// removed on the loop thread when the run's terminal signal is routed.
#[derive(Default)]
pub(crate) struct RunTable {
    runs: Mutex<HashMap<String, RunEntry>>,
}

impl RunTable {
    pub(crate) fn register(&self, session: &Arc<Session>) -> Result<RunChannels, OrchestratorError> {
        let mut runs = self.runs.lock();
        let session_id = session.session_id();
        if runs.contains_key(session_id) {
            return Err(OrchestratorError::RunInProgress(session_id.to_string()));
        }
        let (tx, rx) = mpsc::channel();
        let awaiting_input = Arc::new(AtomicBool::new(false));
        runs.insert(
            session_id.to_string(),
            RunEntry {
                session: session.clone(),
                decisions: tx,
                awaiting_input: awaiting_input.clone(),
                started_at: Instant::now(),
            },
        );
        Ok(RunChannels {
            decisions: rx,
            awaiting_input,
        })
    }

    pub(crate) fn finish(&self, session_id: &str) -> Option<RunEntry> {
        let entry = self.runs.lock().remove(session_id)?;
        debug!(
            session_id = %session_id,
            elapsed_ms = entry.started_at.elapsed().as_millis() as u64,
            "run finished"
        );
        Some(entry)
    }

    /// True when a run is registered for a session that has since been
    /// closed or replaced.
    pub(crate) fn is_orphaned(&self, session_id: &str) -> bool {
        self.runs
            .lock()
            .get(session_id)
            .map(|entry| !entry.session.is_live())
            .unwrap_or(false)
    }

    pub(crate) fn contains(&self, session_id: &str) -> bool {
        self.runs.lock().contains_key(session_id)
    }

    pub(crate) fn cancel(&self, session_id: &str) -> bool {
        match self.runs.lock().get(session_id) {
            Some(entry) => {
                entry.session.request_cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel_all(&self) -> usize {
        let runs = self.runs.lock();
        for entry in runs.values() {
            entry.session.request_cancel();
        }
        runs.len()
    }

    pub(crate) fn respond(
        &self,
        session_id: &str,
        decision: HumanDecision,
    ) -> Result<(), OrchestratorError> {
        let runs = self.runs.lock();
        let entry = runs
            .get(session_id)
            .filter(|entry| entry.awaiting_input.load(Ordering::SeqCst))
            .ok_or_else(|| OrchestratorError::NoPendingInput(session_id.to_string()))?;
        entry
            .decisions
            .send(decision)
            .map_err(|_| OrchestratorError::NoPendingInput(session_id.to_string()))
    }

    pub(crate) fn len(&self) -> usize {
        self.runs.lock().len()
    }
}

pub(crate) fn spawn(
    engine: Arc<dyn ExecutionEngine>,
    request: RunRequest,
    ctx: WorkerContext,
) -> std::io::Result<()> {
    let name = format!("flowrelay-worker-{}", request.session_id);
    std::thread::Builder::new()
        .name(name)
        .spawn(move || run(engine, request, ctx))
        .map(|_| ())
}

/// Worker body: run the engine, then report exactly one terminal signal.
fn run(engine: Arc<dyn ExecutionEngine>, request: RunRequest, mut ctx: WorkerContext) {
    let span = info_span!(
        "run",
        session_id = %request.session_id,
        workflow_id = %request.workflow_id
    );
    let _entered = span.enter();
    info!("run started");

    let result = catch_unwind(AssertUnwindSafe(|| engine.execute(&request, &mut ctx)))
        .unwrap_or_else(|panic| {
            Err(EngineError::Failed(format!(
                "engine panicked: {}",
                panic_message(panic)
            )))
        });

    let terminal = match result {
        Ok(outcome) => {
            info!("run completed");
            RunSignal::Response {
                content: outcome.content,
            }
        }
        Err(EngineError::Cancelled) => {
            let reason = if ctx.session().is_live() {
                "cancelled by request"
            } else {
                "session closed"
            };
            info!(reason, "run cancelled");
            RunSignal::Cancelled {
                reason: reason.to_string(),
            }
        }
        Err(err @ EngineError::TimedOut(_)) => {
            warn!(error = %err, "run timed out");
            RunSignal::Failed {
                message: err.to_string(),
            }
        }
        Err(err) => {
            error!(error = %err, "run failed");
            RunSignal::Failed {
                message: err.to_string(),
            }
        }
    };
    ctx.submit(terminal);
}
