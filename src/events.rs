use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{BlockRecord, TransactionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewBlock,
    NewTransaction,
    ConnectionFailed,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::NewBlock => "newBlock",
            EventKind::NewTransaction => "newTransaction",
            EventKind::ConnectionFailed => "connectionFailed",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ManagerEvent {
    NewBlock(Arc<BlockRecord>),
    NewTransaction(Arc<TransactionRecord>),
    ConnectionFailed,
}

impl ManagerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ManagerEvent::NewBlock(_) => EventKind::NewBlock,
            ManagerEvent::NewTransaction(_) => EventKind::NewTransaction,
            ManagerEvent::ConnectionFailed => EventKind::ConnectionFailed,
        }
    }
}

pub type Listener = Arc<dyn Fn(&ManagerEvent) + Send + Sync>;

/// Handle returned by [`EventBus::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, kind: EventKind, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.entry(kind).or_default().push((id, listener));
        id
    }

    /// Returns whether a listener was removed.
    pub fn off(&mut self, kind: EventKind, id: ListenerId) -> bool {
        let Some(list) = self.listeners.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        list.len() != before
    }

    /// Listeners for `kind` in registration order. Callers invoke them after
    /// releasing whatever lock guards the bus so a listener may re-enter it.
    pub fn listeners_for(&self, kind: EventKind) -> Vec<Listener> {
        self.listeners
            .get(&kind)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn emit(&self, event: &ManagerEvent) {
        for listener in self.listeners_for(event.kind()) {
            listener(event);
        }
    }

    #[cfg(test)]
    fn len(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map(Vec::len).unwrap_or(0)
    }
}
