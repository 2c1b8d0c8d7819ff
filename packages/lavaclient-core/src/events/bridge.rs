//! Fan-out of events to broadcast subscribers and registered observers.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{InstanceEvent, LavaEvent, PlayerEvent};

/// Forwards every event to each registered observer, then to a
/// `tokio::sync::broadcast` channel for async subscribers.
///
/// The bridge is `Send + Sync` and cheap to clone; observers may be added at
/// any time after construction.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<LavaEvent>,
    observers: Arc<RwLock<Vec<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            observers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Registers an observer. Observers run synchronously on the emitting
    /// task and must not block.
    pub fn add_observer(&self, observer: Arc<dyn EventEmitter>) {
        self.observers.write().push(observer);
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<LavaEvent> {
        self.tx.subscribe()
    }

    fn broadcast(&self, event: LavaEvent) {
        if let Err(e) = self.tx.send(event) {
            log::trace!("[EventBridge] No broadcast receivers: {}", e);
        }
    }
}

/// Generates an [`EventEmitter`] method that forwards to every observer and
/// then sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty) => {
        fn $method(&self, event: $event_ty) {
            for observer in self.observers.read().iter() {
                observer.$method(event.clone());
            }
            self.broadcast(LavaEvent::from(event));
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_instance, InstanceEvent);
    impl_emit!(emit_player, PlayerEvent);
}
