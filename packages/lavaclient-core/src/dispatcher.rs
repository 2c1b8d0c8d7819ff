//! Routes channel traffic to instances and sessions.
//!
//! Every [`ChannelSession`](crate::channel::ChannelSession) hands its signals
//! to one unbounded queue; the dispatcher drains it on a single task, so
//! messages of one instance are applied in arrival order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelMessage, ChannelSignal};
use crate::events::{EventEmitter, InstanceEvent};
use crate::instances::{Instance, InstanceRegistry};
use crate::protocol::{Envelope, Inbound};
use crate::session::{Session, SessionRegistry};
use crate::utils::now_millis;

pub struct Dispatcher {
    instances: Arc<InstanceRegistry>,
    sessions: Arc<SessionRegistry>,
    emitter: Arc<dyn EventEmitter>,
}

impl Dispatcher {
    pub fn new(
        instances: Arc<InstanceRegistry>,
        sessions: Arc<SessionRegistry>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            instances,
            sessions,
            emitter,
        }
    }

    /// Consumes channel messages until cancelled or every sender is gone.
    pub async fn run(
        self: Arc<Self>,
        mut messages: mpsc::UnboundedReceiver<ChannelMessage>,
        cancel: CancellationToken,
    ) {
        log::info!("[Dispatcher] Started");
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = messages.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            self.handle(message).await;
        }
        log::info!("[Dispatcher] Stopped");
    }

    pub async fn handle(&self, message: ChannelMessage) {
        let ChannelMessage { instance, signal } = message;
        let Some(source) = self.instances.get(&instance) else {
            log::debug!("[Dispatcher] Dropping signal from unregistered {}", instance);
            return;
        };
        if source.channel().is_shut_down() {
            return;
        }

        match signal {
            ChannelSignal::Connected => {
                self.emitter.emit_instance(InstanceEvent::Connected {
                    instance,
                    timestamp: now_millis(),
                });
                self.adopt_parked().await;
            }
            ChannelSignal::Ready {
                resumed,
                resume_attempted,
            } => {
                self.emitter.emit_instance(InstanceEvent::Ready {
                    instance: instance.clone(),
                    resumed,
                    timestamp: now_millis(),
                });
                if resume_attempted && !resumed {
                    self.replay_on(&source).await;
                }
                self.adopt_parked().await;
            }
            ChannelSignal::Message(envelope) => self.on_message(&source, envelope).await,
            ChannelSignal::Disconnected { code, reason } => {
                self.emitter.emit_instance(InstanceEvent::Disconnected {
                    instance,
                    code,
                    reason,
                    timestamp: now_millis(),
                });
            }
            ChannelSignal::Lost => {
                self.emitter.emit_instance(InstanceEvent::Lost {
                    instance: instance.clone(),
                    timestamp: now_millis(),
                });
                self.fail_over(&instance).await;
            }
            ChannelSignal::AuthenticationFailed { status } => {
                self.emitter.emit_instance(InstanceEvent::AuthenticationFailed {
                    instance: instance.clone(),
                    status,
                    timestamp: now_millis(),
                });
                self.fail_over(&instance).await;
            }
            ChannelSignal::GaveUp { attempts } => {
                self.emitter.emit_instance(InstanceEvent::GaveUp {
                    instance: instance.clone(),
                    attempts,
                    timestamp: now_millis(),
                });
                self.fail_over(&instance).await;
            }
        }
    }

    async fn on_message(&self, source: &Arc<Instance>, envelope: Envelope) {
        let inbound = match envelope.decode() {
            Ok(inbound) => inbound,
            Err(e) => {
                log::warn!(
                    "[Dispatcher] Dropping malformed {} from {}: {}",
                    envelope.op,
                    source.id(),
                    e
                );
                return;
            }
        };

        match inbound {
            Inbound::Stats(snapshot) => {
                let stats = source.update_stats(snapshot);
                log::trace!(
                    "[Dispatcher] {} penalty {:.2}",
                    source.id(),
                    stats.penalty.total
                );
                self.emitter.emit_instance(InstanceEvent::Stats {
                    instance: source.id().to_string(),
                    stats: stats.snapshot.clone(),
                    penalty: stats.penalty.total,
                    timestamp: now_millis(),
                });
            }
            Inbound::PlayerUpdate(update) => {
                if let Some(session) = self.owned_session(source.id(), &update.guild_id) {
                    session.handle_player_update(update.state).await;
                }
            }
            Inbound::Event(event) => {
                if let Some(session) = self.owned_session(source.id(), event.guild_id()) {
                    session.handle_track_event(event).await;
                }
            }
            // consumed by the channel itself
            Inbound::Ready(_) => {}
            Inbound::Unknown(op) => {
                log::debug!("[Dispatcher] Ignoring unknown op {} from {}", op, source.id());
            }
        }
    }

    /// The session for `guild_id`, if it is assigned to `instance`. Traffic
    /// for sessions that already moved elsewhere is stale.
    fn owned_session(&self, instance: &str, guild_id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.get(guild_id)?;
        if session.instance_id().as_deref() == Some(instance) {
            Some(session)
        } else {
            log::debug!(
                "[Dispatcher] Dropping stale message for {} from {}",
                guild_id,
                instance
            );
            None
        }
    }

    /// Moves every session off `failed`, parking those with nowhere to go.
    pub async fn fail_over(&self, failed: &str) {
        let sessions = self.sessions.sessions_on(failed);
        if sessions.is_empty() {
            return;
        }
        log::warn!(
            "[Dispatcher] Moving {} session(s) off {}",
            sessions.len(),
            failed
        );
        for session in sessions {
            let target = self
                .instances
                .select(session.region_hint().as_deref(), &[failed])
                .ok();
            session.reassign(target).await;
        }
    }

    /// Server-side state is gone but the instance is back: replay in place.
    async fn replay_on(&self, instance: &Arc<Instance>) {
        for session in self.sessions.sessions_on(instance.id()) {
            session.reassign(Some(Arc::clone(instance))).await;
        }
    }

    async fn adopt_parked(&self) {
        for session in self.sessions.parked() {
            match self.instances.select(session.region_hint().as_deref(), &[]) {
                Ok(instance) => session.reassign(Some(instance)).await,
                Err(_) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ConnectionState;
    use crate::protocol::PlayerState;
    use crate::session::PlayOptions;
    use crate::test_support::{fixed_instance, live_instance, sample_track, RecordingEmitter};
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    struct Harness {
        instances: Arc<InstanceRegistry>,
        sessions: Arc<SessionRegistry>,
        emitter: Arc<RecordingEmitter>,
        dispatcher: Dispatcher,
    }

    fn harness() -> Harness {
        let instances = Arc::new(InstanceRegistry::new(BTreeMap::new()));
        let emitter = Arc::new(RecordingEmitter::default());
        let sessions = Arc::new(SessionRegistry::new(
            Arc::clone(&instances),
            emitter.clone(),
            4,
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&instances),
            Arc::clone(&sessions),
            emitter.clone(),
        );
        Harness {
            instances,
            sessions,
            emitter,
            dispatcher,
        }
    }

    fn message(instance: &str, payload: Value) -> ChannelMessage {
        ChannelMessage {
            instance: instance.to_string(),
            signal: ChannelSignal::Message(Envelope::parse(&payload.to_string()).unwrap()),
        }
    }

    fn signal(instance: &str, signal: ChannelSignal) -> ChannelMessage {
        ChannelMessage {
            instance: instance.to_string(),
            signal,
        }
    }

    #[tokio::test]
    async fn stats_replace_snapshot_and_emit() {
        let h = harness();
        let instance = fixed_instance("a", None, None, ConnectionState::Connected);
        h.instances.insert(instance.clone()).unwrap();

        h.dispatcher
            .handle(message(
                "a",
                json!({"op": "stats", "players": 7, "playingPlayers": 2, "uptime": 1,
                       "memory": {"free": 1, "used": 1, "allocated": 1, "reservable": 1},
                       "cpu": {"cores": 4, "systemLoad": 0.0, "lavalinkLoad": 0.0}}),
            ))
            .await;

        assert_eq!(instance.penalty(), 7.0);
        assert!(h.emitter.instance_events().iter().any(|event| matches!(
            event,
            InstanceEvent::Stats { instance, penalty, .. } if instance == "a" && *penalty == 7.0
        )));
    }

    #[tokio::test]
    async fn drops_traffic_from_unknown_instances_and_bad_payloads() {
        let h = harness();
        h.dispatcher
            .handle(signal("ghost", ChannelSignal::Lost))
            .await;
        let instance = fixed_instance("a", None, None, ConnectionState::Connected);
        h.instances.insert(instance.clone()).unwrap();
        h.dispatcher
            .handle(message("a", json!({"op": "stats", "players": "many"})))
            .await;

        assert!(h.emitter.instance_events().is_empty());
        assert!(instance.stats().is_none());
    }

    #[tokio::test]
    async fn player_updates_only_reach_the_owning_instance() {
        let h = harness();
        h.instances
            .insert(fixed_instance("a", None, Some(1), ConnectionState::Connected))
            .unwrap();
        h.instances
            .insert(fixed_instance("b", None, Some(9), ConnectionState::Connected))
            .unwrap();
        let session = h.sessions.get_or_create("g1", None);
        assert_eq!(session.instance_id().as_deref(), Some("a"));

        let update = |position: u64| {
            json!({"op": "playerUpdate", "guildId": "g1",
                   "state": {"time": 1, "position": position, "connected": true}})
        };
        h.dispatcher.handle(message("b", update(5_000))).await;
        assert_eq!(session.position().await, 0);
        h.dispatcher.handle(message("a", update(6_000))).await;
        assert_eq!(session.position().await, 6_000);
    }

    #[tokio::test]
    async fn lost_instance_fails_sessions_over() {
        let h = harness();
        let a = live_instance("a", None).await;
        let mut b = live_instance("b", None).await;
        a.instance.update_stats(Default::default());
        h.instances.insert(a.instance.clone()).unwrap();
        h.instances.insert(b.instance.clone()).unwrap();

        let session = h.sessions.get_or_create("g1", None);
        assert_eq!(session.instance_id().as_deref(), Some("a"));
        let t1 = sample_track("t1");
        session.play(t1.clone(), PlayOptions::default()).await.unwrap();
        session.enqueue(sample_track("t2")).await;
        session
            .handle_player_update(PlayerState {
                time: 1,
                position: 30_000,
                connected: true,
            })
            .await;

        h.dispatcher.handle(signal("a", ChannelSignal::Lost)).await;

        let play = b.backend.next_sent().await;
        assert_eq!(play["op"], "play");
        assert_eq!(play["track"], t1.encoded().unwrap());
        assert_eq!(play["startTime"], 30_000);
        assert_eq!(session.instance_id().as_deref(), Some("b"));
        assert_eq!(session.queue().await.len(), 1);
        assert!(h
            .emitter
            .instance_events()
            .iter()
            .any(|event| matches!(event, InstanceEvent::Lost { instance, .. } if instance == "a")));
    }

    #[tokio::test]
    async fn lost_without_alternative_parks_until_an_instance_connects() {
        let h = harness();
        let a = live_instance("a", None).await;
        h.instances.insert(a.instance.clone()).unwrap();
        let session = h.sessions.get_or_create("g1", None);
        session
            .play(sample_track("t1"), PlayOptions::default())
            .await
            .unwrap();

        a.instance
            .channel()
            .force_state(ConnectionState::Disconnected, None);
        h.dispatcher.handle(signal("a", ChannelSignal::Lost)).await;
        assert!(session.is_parked());

        let mut b = live_instance("b", None).await;
        h.instances.insert(b.instance.clone()).unwrap();
        h.dispatcher.handle(signal("b", ChannelSignal::Connected)).await;

        assert_eq!(b.backend.next_sent().await["op"], "play");
        assert_eq!(session.instance_id().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn failed_resume_replays_on_same_instance() {
        let h = harness();
        let mut a = live_instance("a", None).await;
        h.instances.insert(a.instance.clone()).unwrap();
        let session = h.sessions.get_or_create("g1", None);
        session.set_volume(30).await.unwrap();
        a.backend.next_sent().await;

        h.dispatcher
            .handle(signal(
                "a",
                ChannelSignal::Ready {
                    resumed: false,
                    resume_attempted: true,
                },
            ))
            .await;

        assert_eq!(
            a.backend.next_sent().await,
            json!({"op": "volume", "guildId": "g1", "volume": 30})
        );
        // no move, so no instance change
        assert!(h.emitter.player_events().is_empty());
    }

    #[tokio::test]
    async fn buffered_play_is_sent_once_an_instance_connects() {
        let h = harness();
        let session = h.sessions.get_or_create("g1", None);
        session
            .play(sample_track("t1"), PlayOptions::default())
            .await
            .unwrap();

        let mut a = live_instance("a", None).await;
        h.instances.insert(a.instance.clone()).unwrap();
        h.dispatcher.handle(signal("a", ChannelSignal::Connected)).await;

        let play = a.backend.next_sent().await;
        assert_eq!(play["track"], sample_track("t1").encoded().unwrap());
        assert_eq!(session.pending_len().await, 0);
    }

    #[tokio::test]
    async fn track_events_drive_the_session() {
        let h = harness();
        let mut a = live_instance("a", None).await;
        h.instances.insert(a.instance.clone()).unwrap();
        let session = h.sessions.get_or_create("g1", None);
        let t1 = sample_track("t1");
        session.play(t1.clone(), PlayOptions::default()).await.unwrap();
        session.enqueue(sample_track("t2")).await;
        a.backend.next_sent().await;

        h.dispatcher
            .handle(message(
                "a",
                json!({"op": "event", "type": "TrackEndEvent", "guildId": "g1",
                       "track": t1.encoded().unwrap(), "reason": "FINISHED"}),
            ))
            .await;

        assert_eq!(
            a.backend.next_sent().await["track"],
            sample_track("t2").encoded().unwrap()
        );
    }
}
