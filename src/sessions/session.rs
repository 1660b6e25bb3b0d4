//! Session record and its identifying types.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::now_millis;

/// Registry key: one live session per (user, workflow).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub user_id: String,
    pub workflow_id: String,
}

impl SessionKey {
    pub fn new(user_id: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            workflow_id: workflow_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
        }
    }
}

/// Opaque reference into the external conversation-history store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationHandle(String);

impl ConversationHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Snapshot for monitoring and cleanup sweeps.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionHealth {
    pub idle_duration: Duration,
    pub message_count: u64,
    pub is_live: bool,
    pub busy: bool,
}

/// Live session. Only [`SessionAuthority`](crate::sessions::SessionAuthority)
/// constructs and evicts these; the orchestrator flips the cancellation flag.
#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    session_id: String,
    created_at: DateTime<Utc>,
    conversation: ConversationHandle,
    cancelled: AtomicBool,
    live: AtomicBool,
    busy: AtomicBool,
    settled: AtomicBool,
    last_activity_ms: AtomicU64,
    message_count: AtomicU64,
}

impl Session {
    pub(crate) fn new(key: SessionKey, session_id: String, conversation: ConversationHandle) -> Self {
        Self {
            key,
            session_id,
            created_at: Utc::now(),
            conversation,
            cancelled: AtomicBool::new(false),
            live: AtomicBool::new(true),
            busy: AtomicBool::new(false),
            settled: AtomicBool::new(false),
            last_activity_ms: AtomicU64::new(now_millis()),
            message_count: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn user_id(&self) -> &str {
        &self.key.user_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.key.workflow_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn conversation(&self) -> &ConversationHandle {
        &self.conversation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn clear_cancel(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Eviction also stops any run still working on the session.
    pub(crate) fn mark_evicted(&self) {
        self.live.store(false, Ordering::Release);
        self.request_cancel();
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub(crate) fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::Release);
    }

    /// The last run reached COMPLETED, ERROR or was cancelled, and nothing
    /// has restarted or reset the session since.
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    pub(crate) fn set_settled(&self, settled: bool) {
        self.settled.store(settled, Ordering::Release);
    }

    pub(crate) fn touch(&self) {
        self.last_activity_ms.store(now_millis(), Ordering::Relaxed);
    }

    pub(crate) fn record_message(&self) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    pub fn idle_duration(&self) -> Duration {
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        Duration::from_millis(now_millis().saturating_sub(last))
    }

    pub fn health(&self) -> SessionHealth {
        SessionHealth {
            idle_duration: self.idle_duration(),
            message_count: self.message_count(),
            is_live: self.is_live(),
            busy: self.is_busy(),
        }
    }
}
