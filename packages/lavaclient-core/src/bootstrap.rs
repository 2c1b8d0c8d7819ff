//! Client bootstrap and dependency wiring.
//!
//! [`LavaClient`] is the composition root: the registries, the event bridge,
//! the dispatcher task and every instance channel are created and wired here,
//! and nowhere else.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::Client;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelMessage, ChannelSession, ChannelSettings, Connector, WsConnector};
use crate::config::{ClientConfig, InstanceConfig};
use crate::dispatcher::Dispatcher;
use crate::error::{LavaError, LavaResult};
use crate::events::{BroadcastEventBridge, EventEmitter, InstanceEvent, LavaEvent};
use crate::instances::{Instance, InstanceRegistry};
use crate::protocol_constants::HTTP_TIMEOUT_SECS;
use crate::rest::{LoadResult, RestClient, TrackLoader, TrackSource};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::session::{Session, SessionRegistry};
use crate::track::Track;
use crate::utils::now_millis;

/// The running client.
///
/// Dropping it does not stop background tasks; call [`LavaClient::shutdown`].
pub struct LavaClient {
    settings: ChannelSettings,
    instances: Arc<InstanceRegistry>,
    sessions: Arc<SessionRegistry>,
    dispatcher: Arc<Dispatcher>,
    /// Event bridge for subscribers and observers.
    event_bridge: Arc<BroadcastEventBridge>,
    connector: Arc<dyn Connector>,
    signals: mpsc::UnboundedSender<ChannelMessage>,
    sources: RwLock<Vec<Arc<dyn TrackSource>>>,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
    spawner: TokioSpawner,
    /// Parent of every channel's token.
    cancel_token: CancellationToken,
}

impl LavaClient {
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    pub fn instances(&self) -> &Arc<InstanceRegistry> {
        &self.instances
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Instances
    // ─────────────────────────────────────────────────────────────────────────

    /// Registers an instance and starts connecting to it.
    pub fn add_instance(&self, config: InstanceConfig) -> LavaResult<Arc<Instance>> {
        config.validate().map_err(LavaError::Configuration)?;
        if self.instances.contains(&config.name) {
            return Err(LavaError::DuplicateInstance(config.name));
        }

        let channel = ChannelSession::new(
            &config,
            self.settings.clone(),
            Arc::clone(&self.connector),
            self.signals.clone(),
            self.cancel_token.child_token(),
        );
        let instance = Instance::new(config, Arc::clone(&channel));
        // registered before starting so its first signals are not dropped
        self.instances.insert(Arc::clone(&instance))?;
        channel.start(&self.spawner);

        log::info!(
            "[Client] Added instance {} ({}, region {})",
            instance.id(),
            instance.config().channel_url(),
            instance.region().unwrap_or("-")
        );
        Ok(instance)
    }

    /// Moves the instance's sessions elsewhere, then closes its channel.
    pub async fn remove_instance(&self, id: &str) -> LavaResult<()> {
        if !self.instances.contains(id) {
            return Err(LavaError::InstanceNotFound(id.to_string()));
        }
        self.dispatcher.fail_over(id).await;
        if self.instances.remove(id).is_none() {
            return Err(LavaError::InstanceNotFound(id.to_string()));
        }

        log::info!("[Client] Removed instance {}", id);
        self.event_bridge.emit_instance(InstanceEvent::Removed {
            instance: id.to_string(),
            timestamp: now_millis(),
        });
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────────

    /// Returns the session for a destination, creating it if needed.
    pub fn session(&self, guild_id: &str, region_hint: Option<&str>) -> Arc<Session> {
        self.sessions.get_or_create(guild_id, region_hint)
    }

    pub fn get_session(&self, guild_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(guild_id)
    }

    /// Tears the destination's session down. Returns `false` if there was none.
    pub async fn disconnect(&self, guild_id: &str) -> bool {
        self.sessions.remove(guild_id).await.is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tracks
    // ─────────────────────────────────────────────────────────────────────────

    /// Adds a custom source, consulted in registration order before any
    /// instance.
    pub fn register_source(&self, source: Arc<dyn TrackSource>) {
        log::info!("[Client] Registered track source {}", source.name());
        self.sources.write().push(source);
    }

    /// Resolves a query through the custom sources, falling back to the best
    /// usable instance.
    pub async fn load_tracks(&self, query: &str) -> LavaResult<LoadResult> {
        let sources: Vec<_> = self.sources.read().iter().cloned().collect();
        for source in sources {
            if let Some(result) = source.load_item(query).await? {
                log::debug!("[Client] {} resolved by {}", query, source.name());
                return Ok(result);
            }
        }

        let instance = self.instances.select(None, &[])?;
        RestClient::new(self.http_client.clone(), instance.config())
            .load_tracks(query)
            .await
    }

    /// Decodes an identifier locally.
    pub fn decode_track(&self, encoded: &str) -> LavaResult<Track> {
        Track::from_encoded(encoded)
    }

    /// Decodes several identifiers locally, failing on the first bad one.
    pub fn decode_tracks<S: AsRef<str>>(&self, encoded: &[S]) -> LavaResult<Vec<Track>> {
        encoded
            .iter()
            .map(|value| Track::from_encoded(value.as_ref()))
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<LavaEvent> {
        self.event_bridge.subscribe()
    }

    pub fn add_observer(&self, observer: Arc<dyn EventEmitter>) {
        self.event_bridge.add_observer(observer);
    }

    /// Stops the dispatcher, every channel and every pending reconnect.
    pub async fn shutdown(&self) {
        log::info!("[Client] Beginning graceful shutdown...");
        self.cancel_token.cancel();
        self.instances.shutdown_all();
        log::info!(
            "[Client] Shutdown complete ({} session(s) dropped)",
            self.sessions.len()
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Creates the shared HTTP client for all request/response calls.
fn create_http_client() -> LavaResult<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()?)
}

/// Bootstraps a client speaking WebSocket to every configured instance.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns [`LavaError::Configuration`] if `config` is invalid.
pub fn bootstrap_client(config: ClientConfig) -> LavaResult<LavaClient> {
    bootstrap_with_connector(config, Arc::new(WsConnector), TokioSpawner::current())
}

/// Bootstraps a client over a custom transport.
///
/// Wiring order:
///
/// 1. Shared infrastructure (HTTP client, cancellation token, signal queue)
/// 2. Event bridge
/// 3. Instance registry, then the session registry on top of it
/// 4. Dispatcher task draining the signal queue
/// 5. One channel per configured instance
pub fn bootstrap_with_connector(
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    spawner: TokioSpawner,
) -> LavaResult<LavaClient> {
    config.validate().map_err(LavaError::Configuration)?;

    let http_client = create_http_client()?;
    let cancel_token = CancellationToken::new();
    let (signals, signal_rx) = mpsc::unbounded_channel();

    let event_bridge = Arc::new(BroadcastEventBridge::new(config.event_channel_capacity));

    let instances = Arc::new(InstanceRegistry::new(config.regions.clone()));
    let sessions = Arc::new(SessionRegistry::new(
        Arc::clone(&instances),
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        config.pending_capacity,
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&instances),
        Arc::clone(&sessions),
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
    ));
    spawner.spawn(Arc::clone(&dispatcher).run(signal_rx, cancel_token.clone()));

    let client = LavaClient {
        settings: ChannelSettings::from_config(&config),
        instances,
        sessions,
        dispatcher,
        event_bridge,
        connector,
        signals,
        sources: RwLock::new(Vec::new()),
        http_client,
        spawner,
        cancel_token,
    };

    for instance in config.instances {
        client.add_instance(instance)?;
    }
    log::info!(
        "[Client] Bootstrapped for user {} with {} instance(s)",
        config.user_id,
        client.instances.len()
    );
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffConfig;
    use crate::session::PlayOptions;
    use crate::test_support::{sample_track, MockConnector};
    use async_trait::async_trait;

    const WAIT: Duration = Duration::from_secs(2);

    fn test_config() -> ClientConfig {
        ClientConfig {
            user_id: "42".into(),
            resume_timeout_secs: 0,
            backoff: BackoffConfig {
                initial_ms: 5,
                max_ms: 20,
                jitter: 0.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn wait_usable(client: &LavaClient, id: &str) {
        tokio::time::timeout(WAIT, async {
            while !client.instances().get(id).is_some_and(|i| i.is_usable()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("instance never became usable");
    }

    struct PrefixSource;

    #[async_trait]
    impl TrackSource for PrefixSource {
        fn name(&self) -> &str {
            "prefix"
        }

        async fn load_item(&self, query: &str) -> LavaResult<Option<LoadResult>> {
            Ok(query
                .strip_prefix("custom:")
                .map(|id| LoadResult::Search(vec![sample_track(id)])))
        }
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let config = ClientConfig::default();
        let result = bootstrap_with_connector(config, MockConnector::new(), TokioSpawner::current());
        assert!(matches!(result, Err(LavaError::Configuration(_))));
    }

    #[tokio::test]
    async fn configured_instances_connect_and_play() {
        let connector = MockConnector::new();
        connector.accept();
        let mut config = test_config();
        config
            .instances
            .push(InstanceConfig::new("a", "localhost", 2333, "pw"));
        let client =
            bootstrap_with_connector(config, connector.clone(), TokioSpawner::current()).unwrap();

        let mut backend = connector.next_backend().await;
        wait_usable(&client, "a").await;
        assert_eq!(connector.requests()[0].header("Authorization"), Some("pw"));

        let session = client.session("g1", None);
        assert_eq!(session.instance_id().as_deref(), Some("a"));
        session
            .play(sample_track("t1"), PlayOptions::default())
            .await
            .unwrap();
        assert_eq!(backend.next_sent().await["op"], "play");

        assert!(client.disconnect("g1").await);
        assert_eq!(backend.next_sent().await["op"], "destroy");
        assert!(!client.disconnect("g1").await);

        client.shutdown().await;
        assert!(client.is_shut_down());
    }

    #[tokio::test]
    async fn duplicate_and_unknown_instances() {
        let client =
            bootstrap_with_connector(test_config(), MockConnector::new(), TokioSpawner::current())
                .unwrap();
        client
            .add_instance(InstanceConfig::new("a", "localhost", 2333, "pw"))
            .unwrap();
        assert!(matches!(
            client.add_instance(InstanceConfig::new("a", "other", 2333, "pw")),
            Err(LavaError::DuplicateInstance(_))
        ));
        assert!(matches!(
            client.add_instance(InstanceConfig::new("b", "", 2333, "pw")),
            Err(LavaError::Configuration(_))
        ));
        assert!(matches!(
            client.remove_instance("zzz").await,
            Err(LavaError::InstanceNotFound(_))
        ));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn removing_an_instance_moves_its_sessions() {
        let connector = MockConnector::new();
        connector.accept();
        connector.accept();
        let client =
            bootstrap_with_connector(test_config(), connector.clone(), TokioSpawner::current())
                .unwrap();
        let mut events = client.subscribe();

        client
            .add_instance(InstanceConfig::new("a", "localhost", 2333, "pw"))
            .unwrap();
        let mut backend_a = connector.next_backend().await;
        wait_usable(&client, "a").await;

        let session = client.session("g1", None);
        session
            .play(sample_track("t1"), PlayOptions::default())
            .await
            .unwrap();
        backend_a.next_sent().await;

        client
            .add_instance(InstanceConfig::new("b", "localhost", 2334, "pw"))
            .unwrap();
        let mut backend_b = connector.next_backend().await;
        wait_usable(&client, "b").await;

        client.remove_instance("a").await.unwrap();
        assert_eq!(backend_a.next_sent().await["op"], "destroy");
        let replayed = backend_b.next_sent().await;
        assert_eq!(replayed["op"], "play");
        assert_eq!(replayed["guildId"], "g1");
        assert_eq!(session.instance_id().as_deref(), Some("b"));
        assert!(!client.instances().contains("a"));

        let removed = tokio::time::timeout(WAIT, async {
            loop {
                if let Ok(LavaEvent::Instance(InstanceEvent::Removed { instance, .. })) =
                    events.recv().await
                {
                    return instance;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(removed, "a");
        client.shutdown().await;
    }

    #[tokio::test]
    async fn custom_sources_are_consulted_first() {
        let client =
            bootstrap_with_connector(test_config(), MockConnector::new(), TokioSpawner::current())
                .unwrap();
        client.register_source(Arc::new(PrefixSource));

        let result = client.load_tracks("custom:abc").await.unwrap();
        assert_eq!(result.tracks()[0].identifier(), "abc");

        assert!(matches!(
            client.load_tracks("ytsearch:abc").await,
            Err(LavaError::NoAvailableInstance(_))
        ));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn decodes_identifiers_locally() {
        let client =
            bootstrap_with_connector(test_config(), MockConnector::new(), TokioSpawner::current())
                .unwrap();
        let track = sample_track("dQw4w9WgXcQ");
        let encoded = track.encoded().unwrap().to_string();

        let decoded = client.decode_track(&encoded).unwrap();
        assert_eq!(decoded.title(), track.title());
        assert_eq!(client.decode_tracks(&[encoded.as_str()]).unwrap().len(), 1);
        assert!(matches!(
            client.decode_track("not base64!"),
            Err(LavaError::Codec(_))
        ));
        client.shutdown().await;
    }
}
