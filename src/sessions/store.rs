//! Conversation-history store seam.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::SessionError;
use crate::sessions::{ConversationHandle, SessionKey};

/// External store handing out conversation handles. The core only holds the
/// handle and gives it back on eviction.
pub trait ConversationStore: Send + Sync {
    fn open(&self, key: &SessionKey, session_id: &str) -> Result<ConversationHandle, SessionError>;

    fn release(&self, handle: &ConversationHandle);
}

/// Process-local store that only tracks which handles are open.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    open: Mutex<HashSet<ConversationHandle>>,
    opened_total: AtomicU64,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_handles(&self) -> usize {
        self.open.lock().len()
    }

    pub fn opened_total(&self) -> u64 {
        self.opened_total.load(Ordering::Relaxed)
    }

    pub fn is_open(&self, handle: &ConversationHandle) -> bool {
        self.open.lock().contains(handle)
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn open(&self, key: &SessionKey, session_id: &str) -> Result<ConversationHandle, SessionError> {
        let handle = ConversationHandle::new(format!(
            "conv:{}:{}:{}",
            key.user_id, key.workflow_id, session_id
        ));
        self.open.lock().insert(handle.clone());
        self.opened_total.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    fn release(&self, handle: &ConversationHandle) {
        self.open.lock().remove(handle);
    }
}
