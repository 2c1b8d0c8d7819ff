//! Event emitter abstraction.
//!
//! Registries and sessions depend on the [`EventEmitter`] trait rather than a
//! concrete channel, so tests can count events and embedders can attach their
//! own observers.

use super::{InstanceEvent, PlayerEvent};

/// Trait for emitting events without knowledge of how they are delivered.
///
/// # Example
///
/// ```ignore
/// struct Observer;
///
/// impl EventEmitter for Observer {
///     fn emit_instance(&self, event: InstanceEvent) { /* ... */ }
///     fn emit_player(&self, event: PlayerEvent) { /* ... */ }
/// }
///
/// client.add_observer(Arc::new(Observer));
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits an instance lifecycle or statistics event.
    fn emit_instance(&self, event: InstanceEvent);

    /// Emits a playback event.
    fn emit_player(&self, event: PlayerEvent);
}

/// Discards every event.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_instance(&self, _event: InstanceEvent) {}

    fn emit_player(&self, _event: PlayerEvent) {}
}

/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_instance(&self, event: InstanceEvent) {
        tracing::debug!(?event, "instance_event");
    }

    fn emit_player(&self, event: PlayerEvent) {
        tracing::debug!(?event, "player_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BroadcastEventBridge;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingEventEmitter {
        instance_count: AtomicUsize,
        player_count: AtomicUsize,
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_instance(&self, _event: InstanceEvent) {
            self.instance_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_player(&self, _event: PlayerEvent) {
            self.player_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn builtin_emitters_coexist_with_other_observers() {
        let bridge = BroadcastEventBridge::new(4);
        let counting = Arc::new(CountingEventEmitter::default());
        bridge.add_observer(Arc::new(LoggingEventEmitter));
        bridge.add_observer(Arc::new(NoopEventEmitter));
        bridge.add_observer(counting.clone());

        bridge.emit_instance(InstanceEvent::Connected {
            instance: "a".into(),
            timestamp: 0,
        });
        for guild_id in ["1", "2"] {
            bridge.emit_player(PlayerEvent::QueueEnd {
                guild_id: guild_id.into(),
                timestamp: 0,
            });
        }

        assert_eq!(counting.instance_count.load(Ordering::SeqCst), 1);
        assert_eq!(counting.player_count.load(Ordering::SeqCst), 2);
    }
}
