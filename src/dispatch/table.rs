//! Event kind → ordered handler list.

use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatch::EventHandler;
use crate::events::EventKind;

#[derive(Default, Clone)]
pub struct HandlerTable {
    entries: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends; handlers run in registration order.
    pub fn insert(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.entries.entry(kind).or_default().push(handler);
    }

    pub fn handlers(&self, kind: EventKind) -> Option<&[Arc<dyn EventHandler>]> {
        self.entries
            .get(&kind)
            .map(Vec::as_slice)
            .filter(|handlers| !handlers.is_empty())
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        let mut kinds: Vec<_> = self.entries.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
