use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use flowrelay::config::WorkflowConfig;
use flowrelay::dispatch::FnHandler;
use flowrelay::error::{EngineError, OrchestratorError, SessionError};
use flowrelay::events::{EventKind, EventPayload, HumanDecision, ProposedAction};
use flowrelay::orchestrator::{
    ExecutionEngine, RunOutcome, RunRequest, ScriptStep, ScriptedEngine, WorkerContext,
};
use flowrelay::sessions::UserContext;
use flowrelay::{Event, EventHandler, Service};

use crate::integration::support::{
    collect_turn, read_until, stages, test_config, wait_until, Recorder, WAIT,
};

fn long_parse() -> ScriptedEngine {
    ScriptedEngine::new(vec![ScriptStep::Parse {
        units: 2_000,
        total_known: true,
    }])
    .with_unit_delay(Duration::from_millis(5))
}

fn deploy_action() -> ProposedAction {
    ProposedAction {
        action_id: "deploy".to_string(),
        summary: "Deploy the generated config".to_string(),
        details: serde_json::json!({ "target": "staging" }),
    }
}

fn start(engine: impl ExecutionEngine + 'static) -> Service {
    Service::builder(test_config(), Arc::new(engine))
        .start()
        .unwrap()
}

#[test]
fn completed_run_streams_progress_artifact_and_response() {
    let service = start(ScriptedEngine::demo(3));
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new("alice");
    let lease = service.authority().get_or_create("demo", &user, false).unwrap();
    let mut connection = orchestrator.connect(lease.session.session_id()).unwrap();

    let ticket = orchestrator
        .start_run("demo", &user, serde_json::json!({ "units": 3 }), false)
        .unwrap();
    let messages = collect_turn(&mut connection);

    let last = messages.last().unwrap();
    assert_eq!(last.event_type, EventKind::TerminalResponse);
    assert_eq!(last.data["content"]["workflow_id"], "demo");
    assert_eq!(last.data["content"]["input"]["units"], 3);
    assert_eq!(
        messages
            .iter()
            .filter(|m| m.event_type == EventKind::ArtifactProduced)
            .count(),
        1
    );
    assert_eq!(
        messages.iter().filter(|m| m.event_type.is_terminal()).count(),
        1
    );
    assert_eq!(stages(&messages).last().map(String::as_str), Some("COMPLETED"));

    assert!(service.sync(WAIT));
    let health = orchestrator.health(&ticket.session_id).unwrap();
    assert!(health.is_live);
    assert!(!health.busy);
    assert_eq!(health.message_count, 2);
    assert!(!orchestrator.is_running(&ticket.session_id));
    service.shutdown(WAIT);
}

#[test]
fn cancel_stops_the_run_without_an_error_stage() {
    let service = start(long_parse());
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new("bob");
    let lease = service.authority().get_or_create("bulk", &user, false).unwrap();
    let session_id = lease.session.session_id().to_string();
    let mut connection = orchestrator.connect(&session_id).unwrap();

    orchestrator
        .start_run("bulk", &user, serde_json::json!({}), false)
        .unwrap();
    let mut messages = read_until(&mut connection, EventKind::Progress);
    assert!(orchestrator.cancel(&session_id).unwrap());
    messages.extend(collect_turn(&mut connection));

    let last = messages.last().unwrap();
    assert_eq!(last.event_type, EventKind::Cancelled);
    assert_eq!(last.data["reason"], "cancelled by request");
    assert!(!stages(&messages).iter().any(|stage| stage == "ERROR"));

    assert!(service.sync(WAIT));
    assert!(!orchestrator.is_running(&session_id));
    assert!(!orchestrator.cancel(&session_id).unwrap());
    assert!(matches!(
        orchestrator.cancel("no-such-session"),
        Err(OrchestratorError::Session(SessionError::NotFound(_)))
    ));

    // The session stays usable after a cancel.
    let mut connection = orchestrator.connect(&session_id).unwrap();
    let ticket = orchestrator
        .start_run("bulk", &user, serde_json::json!({}), false)
        .unwrap();
    assert_eq!(ticket.session_id, session_id);
    read_until(&mut connection, EventKind::Progress);
    orchestrator.cancel(&session_id).unwrap();
    let last = collect_turn(&mut connection).pop().unwrap();
    assert_eq!(last.event_type, EventKind::Cancelled);
    service.shutdown(WAIT);
}

#[test]
fn workflow_timeout_fails_the_run() {
    let mut config = test_config();
    config.workflows.insert(
        "slow".to_string(),
        WorkflowConfig {
            timeout_secs: Some(1),
            generation_bands: None,
        },
    );
    let service = Service::builder(config, Arc::new(long_parse()))
        .start()
        .unwrap();
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new("carol");
    let lease = service.authority().get_or_create("slow", &user, false).unwrap();
    let mut connection = orchestrator.connect(lease.session.session_id()).unwrap();

    orchestrator
        .start_run("slow", &user, serde_json::json!({}), false)
        .unwrap();
    let messages = collect_turn(&mut connection);

    let last = messages.last().unwrap();
    assert_eq!(last.event_type, EventKind::TerminalError);
    assert!(last.data["message"]
        .as_str()
        .unwrap()
        .contains("timed out"));
    assert_eq!(stages(&messages).last().map(String::as_str), Some("ERROR"));
    service.shutdown(WAIT);
}

#[test]
fn approved_confirmation_resumes_the_run() {
    let engine = ScriptedEngine::new(vec![
        ScriptStep::Confirm(deploy_action()),
        ScriptStep::Parse {
            units: 2,
            total_known: true,
        },
    ]);
    let service = start(engine);
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new("dave");
    let lease = service.authority().get_or_create("ops", &user, false).unwrap();
    let session_id = lease.session.session_id().to_string();
    let mut connection = orchestrator.connect(&session_id).unwrap();

    orchestrator
        .start_run("ops", &user, serde_json::json!({}), false)
        .unwrap();
    let paused = read_until(&mut connection, EventKind::HumanInputRequired);
    let request = paused.last().unwrap();
    assert_eq!(request.data["action_id"], "deploy");
    assert_eq!(request.data["details"]["target"], "staging");

    orchestrator
        .respond(&session_id, HumanDecision::Approve)
        .unwrap();
    let messages = collect_turn(&mut connection);
    assert_eq!(
        messages.last().unwrap().event_type,
        EventKind::TerminalResponse
    );
    assert!(matches!(
        orchestrator.respond(&session_id, HumanDecision::Approve),
        Err(OrchestratorError::NoPendingInput(_))
    ));
    service.shutdown(WAIT);
}

#[test]
fn rejected_confirmation_fails_the_run() {
    let engine = ScriptedEngine::new(vec![ScriptStep::Confirm(deploy_action())]);
    let service = start(engine);
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new("erin");
    let lease = service.authority().get_or_create("ops", &user, false).unwrap();
    let session_id = lease.session.session_id().to_string();
    let mut connection = orchestrator.connect(&session_id).unwrap();

    orchestrator
        .start_run("ops", &user, serde_json::json!({}), false)
        .unwrap();
    read_until(&mut connection, EventKind::HumanInputRequired);
    orchestrator
        .respond(
            &session_id,
            HumanDecision::Reject {
                reason: Some("not now".to_string()),
            },
        )
        .unwrap();

    let last = collect_turn(&mut connection).pop().unwrap();
    assert_eq!(last.event_type, EventKind::TerminalError);
    assert_eq!(last.data["message"], "action 'deploy' rejected: not now");
    service.shutdown(WAIT);
}

#[test]
fn cancel_interrupts_a_pending_confirmation() {
    let engine = ScriptedEngine::new(vec![ScriptStep::Confirm(deploy_action())]);
    let service = start(engine);
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new("frank");
    let lease = service.authority().get_or_create("ops", &user, false).unwrap();
    let session_id = lease.session.session_id().to_string();
    let mut connection = orchestrator.connect(&session_id).unwrap();

    orchestrator
        .start_run("ops", &user, serde_json::json!({}), false)
        .unwrap();
    read_until(&mut connection, EventKind::HumanInputRequired);
    orchestrator.cancel(&session_id).unwrap();

    let last = collect_turn(&mut connection).pop().unwrap();
    assert_eq!(last.event_type, EventKind::Cancelled);
    service.shutdown(WAIT);
}

#[test]
fn respond_without_a_pause_is_rejected() {
    let service = start(long_parse());
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new("gina");
    let ticket = orchestrator
        .start_run("bulk", &user, serde_json::json!({}), false)
        .unwrap();

    assert!(matches!(
        orchestrator.respond(&ticket.session_id, HumanDecision::Approve),
        Err(OrchestratorError::NoPendingInput(_))
    ));
    assert!(matches!(
        orchestrator.respond("no-such-session", HumanDecision::Approve),
        Err(OrchestratorError::NoPendingInput(_))
    ));
    service.shutdown(WAIT);
}

#[test]
fn second_run_on_a_busy_session_is_rejected() {
    let service = start(long_parse());
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new("hank");
    let ticket = orchestrator
        .start_run("bulk", &user, serde_json::json!({}), false)
        .unwrap();
    assert!(ticket.is_new_session);

    let err = orchestrator
        .start_run("bulk", &user, serde_json::json!({}), false)
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::RunInProgress(ref id) if *id == ticket.session_id));
    assert!(matches!(
        orchestrator.reset_progress(&ticket.session_id, "stale"),
        Err(OrchestratorError::RunInProgress(_))
    ));
    assert_eq!(orchestrator.running(), 1);
    assert!(orchestrator.health(&ticket.session_id).unwrap().busy);
    service.shutdown(WAIT);
}

#[test]
fn force_new_replaces_the_session_and_stops_its_run() {
    let cancelled = Arc::new(Recorder::default());
    let service = Service::builder(test_config(), Arc::new(long_parse()))
        .handler(EventKind::Cancelled, cancelled.clone())
        .start()
        .unwrap();
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new("iris");

    let first = orchestrator
        .start_run("bulk", &user, serde_json::json!({}), false)
        .unwrap();
    let mut old_connection = orchestrator.connect(&first.session_id).unwrap();

    let second = orchestrator
        .start_run("bulk", &user, serde_json::json!({}), true)
        .unwrap();
    assert!(second.is_new_session);
    assert_ne!(second.session_id, first.session_id);
    assert_eq!(
        second.replaced_session_id.as_deref(),
        Some(first.session_id.as_str())
    );

    // The replaced session's client is cut off and its run winds down.
    while old_connection.recv_timeout(WAIT).unwrap().is_some() {}
    assert!(wait_until(WAIT, || !orchestrator.is_running(&first.session_id)));
    assert!(orchestrator.is_running(&second.session_id));
    assert!(!orchestrator.health(&first.session_id).unwrap().is_live);
    assert!(orchestrator.health(&second.session_id).unwrap().is_live);
    assert!(service.sync(WAIT));
    assert!(service.router().progress(&first.session_id).is_none());
    let reasons: Vec<_> = cancelled
        .events()
        .into_iter()
        .filter(|event| event.session_id() == first.session_id)
        .map(|event| event.payload().clone())
        .collect();
    assert_eq!(
        reasons,
        vec![EventPayload::Cancelled {
            reason: "session closed".to_string()
        }]
    );
    assert_eq!(service.authority().len(), 1);
    service.shutdown(WAIT);
}

#[test]
fn closing_a_session_cancels_its_run() {
    let service = start(long_parse());
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new("jack");
    let ticket = orchestrator
        .start_run("bulk", &user, serde_json::json!({}), false)
        .unwrap();
    let mut connection = orchestrator.connect(&ticket.session_id).unwrap();

    assert!(orchestrator.close_session(&ticket.session_id));
    assert!(!orchestrator.close_session(&ticket.session_id));
    while connection.recv_timeout(WAIT).unwrap().is_some() {}

    assert!(wait_until(WAIT, || !orchestrator.is_running(&ticket.session_id)));
    assert!(service.sync(WAIT));
    assert!(service.router().progress(&ticket.session_id).is_none());
    assert!(service.authority().is_empty());
    assert!(!orchestrator.health(&ticket.session_id).unwrap().is_live);
    assert!(matches!(
        orchestrator.connect(&ticket.session_id),
        Err(OrchestratorError::Session(SessionError::NotFound(_)))
    ));
    service.shutdown(WAIT);
}

/// Blocks the loop thread on its first `TerminalError` for session "gate"
/// until released.
fn loop_gate() -> (Arc<dyn EventHandler>, mpsc::Sender<()>) {
    let (release, gate) = mpsc::channel::<()>();
    let gate = Mutex::new(gate);
    let handler = FnHandler::new("gate", move |event: &Event| {
        if event.session_id() == "gate" {
            let _ = gate.lock().unwrap().recv_timeout(WAIT);
        }
        Ok(())
    });
    (Arc::new(handler), release)
}

fn hold_loop(service: &Service) {
    service.bridge().submit(Event::new(
        "gate",
        "gate",
        EventPayload::TerminalError {
            message: "hold".to_string(),
        },
    ));
}

#[test]
fn close_while_the_loop_is_busy_leaves_nothing_tracked() {
    let (gate, release) = loop_gate();
    let service = Service::builder(test_config(), Arc::new(long_parse()))
        .handler(EventKind::TerminalError, gate)
        .start()
        .unwrap();
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new("wes");

    hold_loop(&service);
    let ticket = orchestrator
        .start_run("W", &user, serde_json::json!({}), false)
        .unwrap();
    assert!(orchestrator.close_session(&ticket.session_id));
    release.send(()).unwrap();

    assert!(wait_until(WAIT, || !orchestrator.is_running(&ticket.session_id)));
    assert!(service.sync(WAIT));
    assert_eq!(service.router().tracked_sessions(), 0);
    assert!(service.router().progress(&ticket.session_id).is_none());
    assert!(!orchestrator.health(&ticket.session_id).unwrap().is_live);
    service.shutdown(WAIT);
}

#[test]
fn force_new_while_the_loop_is_busy_tracks_only_the_new_session() {
    let (gate, release) = loop_gate();
    let service = Service::builder(test_config(), Arc::new(long_parse()))
        .handler(EventKind::TerminalError, gate)
        .start()
        .unwrap();
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new("xia");

    hold_loop(&service);
    let first = orchestrator
        .start_run("W", &user, serde_json::json!({}), false)
        .unwrap();
    let second = orchestrator
        .start_run("W", &user, serde_json::json!({}), true)
        .unwrap();
    release.send(()).unwrap();

    assert!(wait_until(WAIT, || !orchestrator.is_running(&first.session_id)));
    assert!(service.sync(WAIT));
    assert_eq!(service.router().tracked_sessions(), 1);
    assert!(service.router().progress(&first.session_id).is_none());
    assert!(service.router().progress(&second.session_id).is_some());

    assert!(orchestrator.cancel(&second.session_id).unwrap());
    assert!(wait_until(WAIT, || !orchestrator.is_running(&second.session_id)));
    service.shutdown(WAIT);
}

#[test]
fn finished_sessions_survive_the_idle_sweep() {
    let service = start(ScriptedEngine::demo(1));
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new("yuri");
    let idle = service
        .authority()
        .get_or_create("other", &user, false)
        .unwrap();

    let ticket = orchestrator
        .start_run("demo", &user, serde_json::json!({ "units": 1 }), false)
        .unwrap();
    assert!(wait_until(WAIT, || !orchestrator.is_running(&ticket.session_id)));
    assert!(service.sync(WAIT));
    std::thread::sleep(Duration::from_millis(20));

    let swept = service.authority().sweep_idle(Duration::from_millis(5));
    assert_eq!(swept, vec![idle.session.session_id().to_string()]);
    assert!(orchestrator.health(&ticket.session_id).unwrap().is_live);

    // Resetting the outcome makes the session eligible again.
    orchestrator.reset_progress(&ticket.session_id, "input changed").unwrap();
    std::thread::sleep(Duration::from_millis(20));
    let swept = service.authority().sweep_idle(Duration::from_millis(5));
    assert_eq!(swept, vec![ticket.session_id.clone()]);
    service.shutdown(WAIT);
}

struct Panicking;

impl ExecutionEngine for Panicking {
    fn execute(
        &self,
        _request: &RunRequest,
        _ctx: &mut WorkerContext,
    ) -> Result<RunOutcome, EngineError> {
        panic!("engine bug")
    }
}

#[test]
fn engine_panic_becomes_a_terminal_error() {
    let service = start(Panicking);
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new("kate");
    let lease = service.authority().get_or_create("wf", &user, false).unwrap();
    let mut connection = orchestrator.connect(lease.session.session_id()).unwrap();
    orchestrator
        .start_run("wf", &user, serde_json::json!({}), false)
        .unwrap();

    let messages = collect_turn(&mut connection);
    let last = messages.last().unwrap();
    assert_eq!(last.event_type, EventKind::TerminalError);
    assert_eq!(last.data["message"], "engine panicked: engine bug");
    assert_eq!(stages(&messages), vec!["ERROR"]);
    service.shutdown(WAIT);
}

#[test]
fn shutdown_cancels_runs_in_flight() {
    let cancelled = Arc::new(Recorder::default());
    let service = Service::builder(test_config(), Arc::new(long_parse()))
        .handler(EventKind::Cancelled, cancelled.clone())
        .start()
        .unwrap();
    let orchestrator = service.orchestrator().clone();
    for user in ["u1", "u2", "u3"] {
        orchestrator
            .start_run("bulk", &UserContext::new(user), serde_json::json!({}), false)
            .unwrap();
    }
    assert_eq!(orchestrator.running(), 3);

    service.shutdown(WAIT);
    assert_eq!(orchestrator.running(), 0);
    assert_eq!(cancelled.len(), 3);
}
