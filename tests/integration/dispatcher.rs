use std::sync::atomic::Ordering;
use std::sync::Arc;

use flowrelay::dispatch::{DispatchReport, EventDispatcher, FnHandler};
use flowrelay::error::HandlerError;
use flowrelay::events::{Event, EventKind, EventPayload, OutboundMessage};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

use crate::integration::support::{CountingLayer, Recorder};

fn terminal_error() -> Event {
    Event::new(
        "wf",
        "s1",
        EventPayload::TerminalError {
            message: "boom".to_string(),
        },
    )
}

#[test]
fn unknown_type_is_rejected_and_unhandled_kind_warns_once() {
    let raw = r#"{"type":"unknown_kind","data":{},"workflow_id":"wf","session_id":"s1","timestamp":"2024-01-01T00:00:00.000Z"}"#;
    assert!(serde_json::from_str::<OutboundMessage>(raw).is_err());
    assert!("unknown_kind".parse::<EventKind>().is_err());

    let recorder = Arc::new(Recorder::default());
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(EventKind::Progress, recorder.clone());

    let (counting, warnings) = CountingLayer::new(Level::WARN);
    let subscriber = tracing_subscriber::registry().with(counting);
    let report = tracing::subscriber::with_default(subscriber, || {
        dispatcher.dispatch(&terminal_error())
    });

    assert_eq!(report, DispatchReport::Unhandled);
    assert_eq!(warnings.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.len(), 0);
    assert_eq!(dispatcher.stats().unhandled, 1);
}

#[test]
fn handler_failures_are_isolated_and_counted() {
    let before = Arc::new(Recorder::default());
    let after = Arc::new(Recorder::default());
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(EventKind::TerminalError, before.clone());
    dispatcher.register(
        EventKind::TerminalError,
        Arc::new(FnHandler::new("refuses", |_event: &Event| {
            Err(HandlerError::Failed("downstream unavailable".to_string()))
        })),
    );
    dispatcher.register(
        EventKind::TerminalError,
        Arc::new(FnHandler::new(
            "panics",
            |_event: &Event| -> Result<(), HandlerError> { panic!("handler bug") },
        )),
    );
    dispatcher.register(EventKind::TerminalError, after.clone());

    let (counting, errors) = CountingLayer::new(Level::ERROR);
    let subscriber = tracing_subscriber::registry().with(counting);
    let event = terminal_error();
    let report = tracing::subscriber::with_default(subscriber, || dispatcher.dispatch(&event));

    assert_eq!(
        report,
        DispatchReport::Delivered {
            invoked: 4,
            failed: 2
        }
    );
    assert_eq!(errors.load(Ordering::SeqCst), 2);
    assert_eq!(before.events(), vec![event.clone()]);
    assert_eq!(after.events(), vec![event]);

    // The panic left nothing poisoned: the next dispatch behaves the same.
    dispatcher.dispatch(&terminal_error());
    assert_eq!(after.len(), 2);
    assert_eq!(dispatcher.stats().handler_failures, 4);
    assert_eq!(dispatcher.stats().dispatched, 2);
}

#[test]
fn handlers_run_in_registration_order_per_kind() {
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let mut dispatcher = EventDispatcher::new();
    for name in ["first", "second", "third"] {
        let log = log.clone();
        dispatcher.register(
            EventKind::TerminalError,
            Arc::new(FnHandler::new(name, move |_event: &Event| {
                log.lock().push(name);
                Ok(())
            })),
        );
    }
    dispatcher.dispatch(&terminal_error());
    assert_eq!(*log.lock(), vec!["first", "second", "third"]);
}
