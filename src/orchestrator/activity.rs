use std::sync::Arc;

use crate::dispatch::EventHandler;
use crate::error::HandlerError;
use crate::events::{Event, EventKind};
use crate::sessions::SessionAuthority;

/// Keeps session activity current from the event stream, so the idle sweep
/// never evicts a session that is still producing output.
pub struct ActivityTracker {
    authority: Arc<SessionAuthority>,
}

impl ActivityTracker {
    pub fn new(authority: Arc<SessionAuthority>) -> Self {
        Self { authority }
    }
}

impl EventHandler for ActivityTracker {
    fn name(&self) -> &str {
        "activity_tracker"
    }

    fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        // Sessions closed mid-run still drain their last events.
        let Some(session) = self.authority.lookup(event.session_id()) else {
            return Ok(());
        };
        if event.kind() == EventKind::TerminalResponse {
            session.record_message();
        } else {
            session.touch();
        }
        Ok(())
    }
}
