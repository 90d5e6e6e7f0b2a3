use crate::Message;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::trace;

pub type BusHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Identifier for one installed listener, used for targeted removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
struct Listener {
    id: ListenerId,
    once: bool,
    handler: BusHandler,
}

/// Topic-keyed publish/subscribe bus.
///
/// Listeners registered under a message type are invoked serially, in
/// registration order, on the emitting task. Emission dispatches over a
/// snapshot of the listener table, so handlers may freely register or
/// remove listeners (including themselves) while running.
#[derive(Clone, Default)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
    next_id: AtomicU64,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a listener invoked on every emission of `name`.
    pub fn on(&self, name: &str, handler: BusHandler) -> ListenerId {
        self.install(name, handler, false)
    }

    /// Install a listener removed from the table before its first invocation.
    pub fn once(&self, name: &str, handler: BusHandler) -> ListenerId {
        self.install(name, handler, true)
    }

    fn install(&self, name: &str, handler: BusHandler, once: bool) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut table = self.inner.listeners.write().unwrap();
        table
            .entry(name.to_string())
            .or_default()
            .push(Listener { id, once, handler });
        id
    }

    /// Deliver a message to every listener under its type.
    ///
    /// One-shot listeners are dropped from the table before dispatch, so a
    /// handler re-registering under the same name cannot receive the
    /// triggering message twice.
    pub fn emit(&self, message: Message) {
        let batch: Vec<Listener> = {
            let mut table = self.inner.listeners.write().unwrap();
            match table.get_mut(&message.msg_type) {
                Some(listeners) => {
                    let batch = listeners.clone();
                    listeners.retain(|l| !l.once);
                    if listeners.is_empty() {
                        table.remove(&message.msg_type);
                    }
                    batch
                }
                None => Vec::new(),
            }
        };

        trace!(msg_type = %message.msg_type, listeners = batch.len(), "dispatching");
        for listener in batch {
            (listener.handler)(message.clone());
        }
    }

    /// Remove one listener by id. Returns true if it was found.
    pub fn remove(&self, name: &str, id: ListenerId) -> bool {
        let mut table = self.inner.listeners.write().unwrap();
        if let Some(listeners) = table.get_mut(name) {
            let before = listeners.len();
            listeners.retain(|l| l.id != id);
            let removed = listeners.len() < before;
            if listeners.is_empty() {
                table.remove(name);
            }
            return removed;
        }
        false
    }

    /// Remove every listener registered under the literal name.
    ///
    /// Wrapping layers can make handler-identity removal impossible, so
    /// name-level teardown is the supported contract.
    pub fn remove_all_listeners(&self, name: &str) -> bool {
        self.inner.listeners.write().unwrap().remove(name).is_some()
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap()
            .get(name)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
