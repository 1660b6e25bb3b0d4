//! Type-keyed event routing with per-handler failure isolation.
//!
//! ```text
//! dispatch(event)
//!     │
//!     ├── table[event.kind] missing ──► one warning, event dropped
//!     │
//!     └── for handler in table[event.kind] (registration order)
//!             ├── Ok            ──► next
//!             ├── Err(e)        ──► error logged, next
//!             └── panic         ──► caught, error logged, next
//! ```
//!
//! The table is filled on an owned dispatcher during startup and is read-only
//! once the dispatcher is shared, so lookups take no lock.

mod handler;
mod table;

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{error, warn};

use crate::bridge::LoopConsumer;
use crate::error::HandlerError;
use crate::events::{Event, EventKind, SignalEnvelope};

pub use handler::{EventHandler, FnHandler};
pub use table::HandlerTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchReport {
    Unhandled,
    Delivered { invoked: usize, failed: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub unhandled: u64,
    pub handler_failures: u64,
}

#[derive(Default)]
pub struct EventDispatcher {
    table: HandlerTable,
    dispatched: AtomicU64,
    unhandled: AtomicU64,
    handler_failures: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.table.insert(kind, handler);
    }

    /// Register one handler for every kind of the taxonomy.
    pub fn register_all(&mut self, handler: Arc<dyn EventHandler>) {
        for kind in EventKind::ALL {
            self.table.insert(kind, handler.clone());
        }
    }

    pub fn table(&self) -> &HandlerTable {
        &self.table
    }

    pub fn dispatch(&self, event: &Event) -> DispatchReport {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let kind = event.kind();
        let Some(handlers) = self.table.handlers(kind) else {
            self.unhandled.fetch_add(1, Ordering::Relaxed);
            warn!(
                event_type = %kind,
                session_id = %event.session_id(),
                "no handler registered for event type; event dropped"
            );
            return DispatchReport::Unhandled;
        };

        let mut failed = 0usize;
        for handler in handlers {
            let result = catch_unwind(AssertUnwindSafe(|| handler.handle(event)))
                .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic))));
            if let Err(err) = result {
                failed += 1;
                self.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    handler = handler.name(),
                    event_type = %kind,
                    session_id = %event.session_id(),
                    error = %err,
                    "event handler failed"
                );
            }
        }
        DispatchReport::Delivered {
            invoked: handlers.len(),
            failed,
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            unhandled: self.unhandled.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

/// A bare dispatcher can drive a loop on its own; raw signals need the
/// orchestrator's router and are dropped here.
impl LoopConsumer for EventDispatcher {
    fn on_event(&self, event: Event) {
        self.dispatch(&event);
    }

    fn on_signal(&self, envelope: SignalEnvelope) {
        warn!(
            session_id = %envelope.session_id,
            "run signal reached a dispatcher without a router; dropped"
        );
    }
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
