//! Sharded (user, workflow) → session map with per-key slots.
//!
//! Lock order: shard slot map → slot → id index. The shard map lock is only
//! held to find or insert a slot, so creating a session for one key never
//! waits on another key's conversation store round trip.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::sessions::{Session, SessionKey};

pub(crate) type Slot = Arc<Mutex<Option<Arc<Session>>>>;

#[derive(Default)]
struct Shard {
    slots: Mutex<HashMap<SessionKey, Slot>>,
    ids: Mutex<HashMap<String, SessionKey>>,
}

pub(crate) struct Registry {
    shards: Vec<Shard>,
}

impl Registry {
    pub(crate) fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1)).map(|_| Shard::default()).collect();
        Self { shards }
    }

    fn shard_for<K: Hash + ?Sized>(&self, key: &K) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    /// The key's slot, created empty when absent.
    pub(crate) fn slot(&self, key: &SessionKey) -> Slot {
        let mut slots = self.shard_for(key).slots.lock();
        slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    pub(crate) fn existing_slot(&self, key: &SessionKey) -> Option<Slot> {
        self.shard_for(key).slots.lock().get(key).cloned()
    }

    /// Drop the key's slot when it is empty and nobody else holds it.
    /// Callers must have released their own clone of the slot.
    pub(crate) fn release_slot_if_vacant(&self, key: &SessionKey) {
        let mut slots = self.shard_for(key).slots.lock();
        let vacant = slots
            .get(key)
            .map(|slot| Arc::strong_count(slot) == 1 && slot.lock().is_none())
            .unwrap_or(false);
        if vacant {
            slots.remove(key);
        }
    }

    pub(crate) fn index(&self, session_id: &str, key: &SessionKey) {
        self.shard_for(session_id)
            .ids
            .lock()
            .insert(session_id.to_string(), key.clone());
    }

    pub(crate) fn unindex(&self, session_id: &str) {
        self.shard_for(session_id).ids.lock().remove(session_id);
    }

    pub(crate) fn key_for(&self, session_id: &str) -> Option<SessionKey> {
        self.shard_for(session_id).ids.lock().get(session_id).cloned()
    }

    /// Point-in-time list of live sessions.
    pub(crate) fn sessions(&self) -> Vec<Arc<Session>> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let slots: Vec<Slot> = shard.slots.lock().values().cloned().collect();
            out.extend(slots.iter().filter_map(|slot| slot.lock().clone()));
        }
        out
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.ids.lock().len()).sum()
    }
}
