//! Flowrelay: Session and Event Routing for Long-Running Workflows
//!
//! Runs multi-stage workflows on background worker threads and streams their
//! progress to live client connections. Workers hand events to a single
//! cooperative loop through the event bridge; the loop routes them through
//! the progress state machine and the type-keyed dispatcher. The session
//! authority guarantees one live session per (user, workflow).

pub mod bridge;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod logging;
pub mod orchestrator;
pub mod progress;
pub mod service;
pub mod sessions;
pub mod types;

pub use bridge::{EventBridge, EventLoop, SubmitOutcome};
pub use config::{ConfigLoader, ServiceConfig};
pub use dispatch::{EventDispatcher, EventHandler};
pub use error::ServiceError;
pub use events::{Event, EventKind, EventPayload};
pub use orchestrator::{ExecutionEngine, Orchestrator};
pub use progress::{ProgressState, ProgressStateMachine, Stage};
pub use service::Service;
pub use sessions::SessionAuthority;
