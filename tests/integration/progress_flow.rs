use std::sync::Arc;

use flowrelay::config::WorkflowConfig;
use flowrelay::events::{EventKind, StageSignal};
use flowrelay::progress::{BandSpec, Stage};
use flowrelay::sessions::UserContext;
use flowrelay::Service;

use crate::integration::support::{collect_turn, percentages, stages, test_config, StageScript, WAIT};

fn parse(processed: u64, total: Option<u64>) -> StageSignal {
    StageSignal::Parsing {
        processed,
        total,
        message: None,
    }
}

fn generate(phase: usize, percent: f64) -> StageSignal {
    StageSignal::Generating {
        phase,
        percent,
        message: None,
    }
}

#[test]
fn two_band_run_streams_expected_percentages() {
    let engine = StageScript::new(vec![
        parse(10, Some(100)),
        parse(55, Some(100)),
        StageSignal::EndOfParsing,
        generate(0, 100.0),
        generate(1, 100.0),
        StageSignal::Completed { message: None },
    ]);
    let service = Service::builder(test_config(), Arc::new(engine))
        .start()
        .unwrap();
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new("alice");

    let lease = service.authority().get_or_create("report", &user, false).unwrap();
    let mut connection = orchestrator.connect(lease.session.session_id()).unwrap();
    let ticket = orchestrator
        .start_run("report", &user, serde_json::json!({}), false)
        .unwrap();
    assert!(!ticket.is_new_session);

    let messages = collect_turn(&mut connection);
    assert_eq!(percentages(&messages), vec![10.0, 55.0, 50.0, 100.0, 100.0]);
    assert_eq!(
        stages(&messages),
        vec!["PARSING", "PARSING", "GENERATING", "GENERATING", "COMPLETED"]
    );
    let last = messages.last().unwrap();
    assert_eq!(last.event_type, EventKind::TerminalResponse);
    assert_eq!(last.data["content"], serde_json::json!("done"));
    assert!(messages
        .iter()
        .all(|m| m.session_id == ticket.session_id && m.workflow_id == "report"));

    assert!(service.sync(WAIT));
    let state = orchestrator.progress(&ticket.session_id).unwrap();
    assert_eq!(state.stage, Stage::Completed);
    assert_eq!(state.percentage, 100.0);
    service.shutdown(WAIT);
}

#[test]
fn response_without_stage_signals_fills_every_stage() {
    let service = Service::builder(test_config(), Arc::new(StageScript::new(vec![])))
        .start()
        .unwrap();
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new("bob");
    let lease = service.authority().get_or_create("chat", &user, false).unwrap();
    let mut connection = orchestrator.connect(lease.session.session_id()).unwrap();
    orchestrator
        .start_run("chat", &user, serde_json::json!("hi"), false)
        .unwrap();

    let messages = collect_turn(&mut connection);
    assert_eq!(stages(&messages), vec!["PARSING", "GENERATING", "COMPLETED"]);
    assert_eq!(percentages(&messages), vec![100.0, 100.0, 100.0]);
    service.shutdown(WAIT);
}

#[test]
fn workflow_bands_shape_generation_percentages() {
    let mut config = test_config();
    config.workflows.insert(
        "essay".to_string(),
        WorkflowConfig {
            timeout_secs: None,
            generation_bands: Some(vec![
                BandSpec::new("outline", 1.0),
                BandSpec::new("draft", 3.0),
            ]),
        },
    );
    let engine = StageScript::new(vec![
        parse(1, Some(1)),
        StageSignal::EndOfParsing,
        generate(0, 100.0),
        generate(1, 50.0),
    ]);
    let service = Service::builder(config, Arc::new(engine)).start().unwrap();
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new("carol");
    let lease = service.authority().get_or_create("essay", &user, false).unwrap();
    let mut connection = orchestrator.connect(lease.session.session_id()).unwrap();
    orchestrator
        .start_run("essay", &user, serde_json::json!(null), false)
        .unwrap();

    let messages = collect_turn(&mut connection);
    // Response closes out the run at 100%.
    assert_eq!(percentages(&messages), vec![100.0, 25.0, 62.5, 100.0]);
    service.shutdown(WAIT);
}

#[test]
fn reset_returns_finished_progress_to_ready() {
    let engine = StageScript::new(vec![StageSignal::Completed { message: None }]);
    let service = Service::builder(test_config(), Arc::new(engine))
        .start()
        .unwrap();
    let orchestrator = service.orchestrator().clone();
    let user = UserContext::new("dave");
    let ticket = orchestrator
        .start_run("doc", &user, serde_json::json!({}), false)
        .unwrap();
    assert!(crate::integration::support::wait_until(WAIT, || {
        !orchestrator.is_running(&ticket.session_id)
    }));

    let mut connection = orchestrator.connect(&ticket.session_id).unwrap();
    orchestrator
        .reset_progress(&ticket.session_id, "input changed")
        .unwrap();
    let message = connection.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(message.event_type, EventKind::Progress);
    assert_eq!(message.data["stage"], "READY");
    assert_eq!(message.data["percentage"], 0.0);
    assert_eq!(message.data["message"], "input changed");

    // Already READY: a second reset has nothing to report.
    orchestrator
        .reset_progress(&ticket.session_id, "again")
        .unwrap();
    assert!(service.sync(WAIT));
    assert_eq!(connection.try_recv(), None);
    service.shutdown(WAIT);
}
