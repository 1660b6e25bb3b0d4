//! Session authority: creation, lookup and eviction of live sessions.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SessionError;
use crate::sessions::registry::Registry;
use crate::sessions::{ConversationStore, Session, SessionHealth, SessionKey, UserContext};
use crate::types::new_session_id;

/// What a `force_new` request does when a live session already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Last requester wins: the existing session is evicted and replaced.
    #[default]
    Replace,
    /// The request fails with [`SessionError::Conflict`].
    Reject,
}

#[derive(Debug, Clone)]
pub struct SessionLease {
    pub session: Arc<Session>,
    pub is_new: bool,
    pub replaced_session_id: Option<String>,
}

/// How many evicted sessions keep answering health queries.
const RETIRED_HISTORY: usize = 256;

/// Recently evicted sessions, oldest first.
#[derive(Default)]
struct Retired {
    order: VecDeque<String>,
    sessions: HashMap<String, Arc<Session>>,
}

impl Retired {
    fn push(&mut self, session: Arc<Session>) {
        let session_id = session.session_id().to_string();
        if self.sessions.insert(session_id.clone(), session).is_none() {
            self.order.push_back(session_id);
        }
        while self.order.len() > RETIRED_HISTORY {
            if let Some(oldest) = self.order.pop_front() {
                self.sessions.remove(&oldest);
            }
        }
    }
}

pub struct SessionAuthority {
    registry: Registry,
    store: Arc<dyn ConversationStore>,
    conflict_policy: ConflictPolicy,
    retired: Mutex<Retired>,
}

impl SessionAuthority {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        shard_count: usize,
        conflict_policy: ConflictPolicy,
    ) -> Self {
        Self {
            registry: Registry::new(shard_count),
            store,
            conflict_policy,
            retired: Mutex::new(Retired::default()),
        }
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.conflict_policy
    }

    /// Return the live session for (user, workflow), creating it when absent.
    ///
    /// The key's slot lock is held from the existence check through
    /// registration, so racing callers for one key collapse to one creator.
    pub fn get_or_create(
        &self,
        workflow_id: &str,
        user: &UserContext,
        force_new: bool,
    ) -> Result<SessionLease, SessionError> {
        let key = SessionKey::new(user.user_id.clone(), workflow_id);
        let slot = self.registry.slot(&key);
        let mut guard = slot.lock();

        let mut replaced_session_id = None;
        if let Some(existing) = guard.as_ref().cloned() {
            if !force_new {
                existing.touch();
                debug!(session_id = %existing.session_id(), "found existing session");
                return Ok(SessionLease {
                    session: existing,
                    is_new: false,
                    replaced_session_id: None,
                });
            }
            if self.conflict_policy == ConflictPolicy::Reject {
                return Err(SessionError::Conflict {
                    user_id: key.user_id.clone(),
                    workflow_id: key.workflow_id.clone(),
                    existing: existing.session_id().to_string(),
                });
            }
            *guard = None;
            self.retire(&existing);
            info!(
                session_id = %existing.session_id(),
                user_id = %key.user_id,
                workflow_id = %key.workflow_id,
                "session replaced by force_new request"
            );
            replaced_session_id = Some(existing.session_id().to_string());
        }

        let session_id = new_session_id();
        let conversation = self.store.open(&key, &session_id)?;
        let session = Arc::new(Session::new(key.clone(), session_id.clone(), conversation));
        self.registry.index(&session_id, &key);
        *guard = Some(session.clone());
        info!(
            session_id = %session_id,
            user_id = %key.user_id,
            workflow_id = %key.workflow_id,
            "session created"
        );

        Ok(SessionLease {
            session,
            is_new: true,
            replaced_session_id,
        })
    }

    /// Remove the session and release its conversation handle. Returns
    /// whether anything was removed; a second call is a no-op.
    pub fn evict(&self, session_id: &str) -> bool {
        let Some(key) = self.registry.key_for(session_id) else {
            return false;
        };
        let Some(slot) = self.registry.existing_slot(&key) else {
            self.registry.unindex(session_id);
            return false;
        };
        let removed = {
            let mut guard = slot.lock();
            let is_current = guard
                .as_ref()
                .map(|current| current.session_id() == session_id)
                .unwrap_or(false);
            if is_current {
                guard.take()
            } else {
                None
            }
        };
        drop(slot);

        let evicted = match removed {
            Some(session) => {
                self.retire(&session);
                info!(session_id = %session_id, "session evicted");
                true
            }
            None => false,
        };
        self.registry.release_slot_if_vacant(&key);
        evicted
    }

    /// Explicit close by the user.
    pub fn close(&self, session_id: &str) -> bool {
        self.evict(session_id)
    }

    pub fn lookup(&self, session_id: &str) -> Option<Arc<Session>> {
        let key = self.registry.key_for(session_id)?;
        let slot = self.registry.existing_slot(&key)?;
        let session = slot.lock().clone()?;
        (session.session_id() == session_id).then_some(session)
    }

    pub fn find(&self, workflow_id: &str, user_id: &str) -> Option<Arc<Session>> {
        let slot = self
            .registry
            .existing_slot(&SessionKey::new(user_id, workflow_id))?;
        let session = slot.lock().clone();
        session
    }

    /// Health of a live session, or of a recently evicted one (reported with
    /// `is_live == false`).
    pub fn get_session_health_status(&self, session_id: &str) -> Result<SessionHealth, SessionError> {
        if let Some(session) = self.lookup(session_id) {
            return Ok(session.health());
        }
        self.retired
            .lock()
            .sessions
            .get(session_id)
            .map(|session| session.health())
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Evict sessions idle for longer than `max_idle`. Sessions with a run in
    /// flight, or holding a finished run's outcome, stay registered until the
    /// user starts over. Returns the evicted ids.
    pub fn sweep_idle(&self, max_idle: Duration) -> Vec<String> {
        let mut evicted = Vec::new();
        for session in self.registry.sessions() {
            if session.is_busy() || session.is_settled() || session.idle_duration() <= max_idle {
                continue;
            }
            if self.evict(session.session_id()) {
                evicted.push(session.session_id().to_string());
            }
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), "idle sessions swept");
        }
        evicted
    }

    pub fn evict_all(&self) -> usize {
        self.registry
            .sessions()
            .iter()
            .filter(|session| self.evict(session.session_id()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn retire(&self, session: &Arc<Session>) {
        session.mark_evicted();
        self.registry.unindex(session.session_id());
        self.store.release(session.conversation());
        self.retired.lock().push(session.clone());
    }
}
