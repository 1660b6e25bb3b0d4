//! Loop-side routing of raw run signals.
//!
//! Stage signals go through the session's [`ProgressStateMachine`] and only
//! the states it emits are dispatched. Every other signal maps onto one event.
//! Terminal signals also close out the session's run entry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::bridge::LoopConsumer;
use crate::dispatch::EventDispatcher;
use crate::events::{Event, EventPayload, RunSignal, SignalEnvelope, StageSignal};
use crate::orchestrator::worker::RunTable;
use crate::progress::{GenerationBands, ProgressState, ProgressStateMachine};

/// Per-workflow progress parameters used when a session's machine is created.
#[derive(Debug, Clone)]
pub struct ProgressProfiles {
    default_bands: GenerationBands,
    workflow_bands: HashMap<String, GenerationBands>,
    unknown_total_increment: f64,
}

impl ProgressProfiles {
    pub fn new(default_bands: GenerationBands, unknown_total_increment: f64) -> Self {
        Self {
            default_bands,
            workflow_bands: HashMap::new(),
            unknown_total_increment,
        }
    }

    pub fn with_workflow(mut self, workflow_id: impl Into<String>, bands: GenerationBands) -> Self {
        self.workflow_bands.insert(workflow_id.into(), bands);
        self
    }

    pub fn bands_for(&self, workflow_id: &str) -> &GenerationBands {
        self.workflow_bands
            .get(workflow_id)
            .unwrap_or(&self.default_bands)
    }

    fn machine_for(&self, workflow_id: &str) -> ProgressStateMachine {
        ProgressStateMachine::new(
            self.bands_for(workflow_id).clone(),
            self.unknown_total_increment,
        )
    }
}

impl Default for ProgressProfiles {
    fn default() -> Self {
        Self::new(GenerationBands::default(), 2.0)
    }
}

pub struct SignalRouter {
    dispatcher: Arc<EventDispatcher>,
    profiles: ProgressProfiles,
    machines: Mutex<HashMap<String, ProgressStateMachine>>,
    runs: Arc<RunTable>,
}

impl SignalRouter {
    pub fn new(dispatcher: Arc<EventDispatcher>, profiles: ProgressProfiles) -> Self {
        Self {
            dispatcher,
            profiles,
            machines: Mutex::new(HashMap::new()),
            runs: Arc::new(RunTable::default()),
        }
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn progress(&self, session_id: &str) -> Option<ProgressState> {
        self.machines
            .lock()
            .get(session_id)
            .map(|machine| machine.state().clone())
    }

    /// Drop the session's progress machine. Later stage signals for it are
    /// ignored until a new run starts. Call only from the loop thread; other
    /// threads submit [`RunSignal::Closed`] instead.
    pub fn forget(&self, session_id: &str) -> bool {
        self.machines.lock().remove(session_id).is_some()
    }

    pub fn tracked_sessions(&self) -> usize {
        self.machines.lock().len()
    }

    pub(crate) fn runs(&self) -> &Arc<RunTable> {
        &self.runs
    }

    fn route(&self, envelope: SignalEnvelope) {
        let SignalEnvelope {
            workflow_id,
            session_id,
            signal,
        } = envelope;
        let event = |payload| Event::new(workflow_id.as_str(), session_id.as_str(), payload);

        match signal {
            RunSignal::Started => {
                if self.runs.is_orphaned(&session_id) {
                    debug!(session_id = %session_id, "run started on a closed session");
                    return;
                }
                let reset = {
                    let mut machines = self.machines.lock();
                    let machine = machines
                        .entry(session_id.clone())
                        .or_insert_with(|| self.profiles.machine_for(&workflow_id));
                    machine.reset("ready")
                };
                self.emit_progress(&workflow_id, &session_id, reset);
            }
            RunSignal::Stage(stage) => self.apply_stage(&workflow_id, &session_id, &stage),
            RunSignal::HumanInputRequired(action) => {
                self.dispatcher
                    .dispatch(&event(EventPayload::HumanInputRequired(action)));
            }
            RunSignal::Artifact(artifact) => {
                self.dispatcher
                    .dispatch(&event(EventPayload::ArtifactProduced(artifact)));
            }
            RunSignal::Response { content } => {
                self.close_progress(&workflow_id, &session_id, StageSignal::Completed { message: None });
                self.dispatcher
                    .dispatch(&event(EventPayload::TerminalResponse { content }));
                self.finish_run(&session_id);
            }
            RunSignal::Failed { message } => {
                self.close_progress(
                    &workflow_id,
                    &session_id,
                    StageSignal::Failed {
                        message: message.clone(),
                    },
                );
                self.dispatcher
                    .dispatch(&event(EventPayload::TerminalError { message }));
                self.finish_run(&session_id);
            }
            RunSignal::Cancelled { reason } => {
                self.dispatcher
                    .dispatch(&event(EventPayload::Cancelled { reason }));
                self.finish_run(&session_id);
            }
            RunSignal::Reset { reason } => {
                let reset = self
                    .machines
                    .lock()
                    .get_mut(&session_id)
                    .and_then(|machine| machine.reset(reason));
                self.emit_progress(&workflow_id, &session_id, reset);
            }
            RunSignal::Closed => {
                if self.forget(&session_id) {
                    debug!(session_id = %session_id, "progress dropped for closed session");
                }
            }
        }
    }

    fn apply_stage(&self, workflow_id: &str, session_id: &str, stage: &StageSignal) {
        let result = {
            let mut machines = self.machines.lock();
            let Some(machine) = machines.get_mut(session_id) else {
                debug!(session_id = %session_id, signal = stage.name(), "stage signal for untracked session");
                return;
            };
            machine.apply(stage)
        };
        match result {
            Ok(states) => self.emit_progress(workflow_id, session_id, states),
            Err(err) => warn!(
                session_id = %session_id,
                signal = stage.name(),
                error = %err,
                "stage signal rejected"
            ),
        }
    }

    /// Terminal signals settle progress unless the run already did.
    fn close_progress(&self, workflow_id: &str, session_id: &str, stage: StageSignal) {
        let result = {
            let mut machines = self.machines.lock();
            match machines.get_mut(session_id) {
                Some(machine) if !machine.state().stage.is_terminal() => machine.apply(&stage),
                _ => return,
            }
        };
        if let Ok(states) = result {
            self.emit_progress(workflow_id, session_id, states);
        }
    }

    // Dispatch happens after the machine lock is released: handlers may read
    // progress back through the router.
    fn emit_progress<I>(&self, workflow_id: &str, session_id: &str, states: I)
    where
        I: IntoIterator<Item = ProgressState>,
    {
        for state in states {
            self.dispatcher.dispatch(&Event::new(
                workflow_id,
                session_id,
                EventPayload::Progress(state),
            ));
        }
    }

    fn finish_run(&self, session_id: &str) {
        if let Some(entry) = self.runs.finish(session_id) {
            entry.session.set_settled(true);
            entry.session.set_busy(false);
        }
    }
}

impl LoopConsumer for SignalRouter {
    fn on_event(&self, event: Event) {
        self.dispatcher.dispatch(&event);
    }

    fn on_signal(&self, envelope: SignalEnvelope) {
        self.route(envelope);
    }
}
