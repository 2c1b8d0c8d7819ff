//! Shared test fixtures: track builders, a scripted in-memory backend and a
//! recording event emitter.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as futures_mpsc;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::channel::{
    ChannelMessage, ChannelSession, ChannelSettings, ChannelSignal, ConnectError, ConnectRequest,
    Connection, ConnectionState, Connector, Frame,
};
use crate::codec::{TrackInfo, TrackRecord};
use crate::config::{BackoffConfig, InstanceConfig};
use crate::error::LavaError;
use crate::events::{EventEmitter, InstanceEvent, PlayerEvent};
use crate::instances::Instance;
use crate::runtime::TokioSpawner;
use crate::stats::StatsSnapshot;
use crate::track::Track;

const WAIT: Duration = Duration::from_secs(2);

// ─────────────────────────────────────────────────────────────────────────────
// Tracks
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn sample_info(identifier: &str) -> TrackInfo {
    TrackInfo {
        title: format!("Track {identifier}"),
        author: "Test Artist".to_string(),
        length: 180_000,
        identifier: identifier.to_string(),
        is_stream: false,
        uri: Some(format!("https://www.youtube.com/watch?v={identifier}")),
        artwork_url: Some(format!("https://i.ytimg.com/vi/{identifier}/hq.jpg")),
        isrc: None,
        source_name: "youtube".to_string(),
        position: 0,
    }
}

pub(crate) fn sample_track(identifier: &str) -> Track {
    let info = sample_info(identifier);
    let encoded = TrackRecord::new(info.clone())
        .encode()
        .expect("sample track encodes");
    Track::new(encoded, info)
}

// ─────────────────────────────────────────────────────────────────────────────
// Scripted backend
// ─────────────────────────────────────────────────────────────────────────────

/// Server side of one accepted mock connection.
pub(crate) struct MockBackend {
    sent: futures_mpsc::UnboundedReceiver<String>,
    frames: mpsc::UnboundedSender<Result<Frame, LavaError>>,
}

impl MockBackend {
    /// Pushes a JSON message to the client.
    pub(crate) fn push(&self, message: Value) {
        self.push_raw(&message.to_string());
    }

    pub(crate) fn push_raw(&self, text: &str) {
        let _ = self.frames.send(Ok(Frame::Text(text.to_string())));
    }

    pub(crate) fn close(&self, code: u16, reason: &str) {
        let _ = self.frames.send(Ok(Frame::Close {
            code: Some(code),
            reason: reason.to_string(),
        }));
    }

    /// Waits for the next command the client wrote.
    pub(crate) async fn next_sent(&mut self) -> Value {
        let text = tokio::time::timeout(WAIT, self.sent.next())
            .await
            .expect("timed out waiting for an outbound command")
            .expect("client closed the connection");
        serde_json::from_str(&text).expect("client sent valid json")
    }

    /// Everything written so far without waiting.
    pub(crate) fn drain_sent(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(Some(text)) = self.sent.next().now_or_never() {
            out.push(serde_json::from_str(&text).expect("client sent valid json"));
        }
        out
    }
}

enum Scripted {
    Accept,
    Reject(u16),
    Fail(String),
}

/// A [`Connector`] whose outcomes are scripted per attempt. Unscripted
/// attempts fail.
pub(crate) struct MockConnector {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ConnectRequest>>,
    backends_tx: mpsc::UnboundedSender<MockBackend>,
    backends_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockBackend>>,
}

impl MockConnector {
    pub(crate) fn new() -> Arc<Self> {
        let (backends_tx, backends_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            backends_tx,
            backends_rx: tokio::sync::Mutex::new(backends_rx),
        })
    }

    pub(crate) fn accept(&self) {
        self.script.lock().push_back(Scripted::Accept);
    }

    pub(crate) fn reject(&self, status: u16) {
        self.script.lock().push_back(Scripted::Reject(status));
    }

    pub(crate) fn fail(&self, reason: &str) {
        self.script.lock().push_back(Scripted::Fail(reason.to_string()));
    }

    pub(crate) fn requests(&self) -> Vec<ConnectRequest> {
        self.requests.lock().clone()
    }

    /// Waits for the next accepted connection.
    pub(crate) async fn next_backend(&self) -> MockBackend {
        let mut rx = self.backends_rx.lock().await;
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<Connection, ConnectError> {
        self.requests.lock().push(request);
        let next = self.script.lock().pop_front();
        match next {
            Some(Scripted::Accept) => {
                let (sent_tx, sent_rx) = futures_mpsc::unbounded::<String>();
                let (frames_tx, frames_rx) = mpsc::unbounded_channel();
                let _ = self.backends_tx.send(MockBackend {
                    sent: sent_rx,
                    frames: frames_tx,
                });
                let sink = sent_tx.sink_map_err(|e| LavaError::Transport(e.to_string()));
                Ok(Connection {
                    sink: Box::pin(sink),
                    stream: Box::pin(UnboundedReceiverStream::new(frames_rx)),
                })
            }
            Some(Scripted::Reject(status)) => Err(ConnectError::Unauthorized(status)),
            Some(Scripted::Fail(reason)) => Err(ConnectError::Failed(reason)),
            None => Err(ConnectError::Failed("nothing scripted".to_string())),
        }
    }
}

/// Receives the next channel signal, failing the test after a timeout.
pub(crate) async fn recv_signal(rx: &mut mpsc::UnboundedReceiver<ChannelMessage>) -> ChannelSignal {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a channel signal")
        .expect("channel signal sender dropped")
        .signal
}

// ─────────────────────────────────────────────────────────────────────────────
// Instances
// ─────────────────────────────────────────────────────────────────────────────

/// Fast-retrying channel settings without resuming.
pub(crate) fn test_settings() -> ChannelSettings {
    ChannelSettings {
        user_id: "42".into(),
        client_name: "lavaclient/test".into(),
        backoff: BackoffConfig {
            initial_ms: 5,
            max_ms: 20,
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: None,
        },
        resume_timeout: Duration::ZERO,
        backlog_capacity: 4,
    }
}

/// An instance whose channel is never started, pinned to `state`.
pub(crate) fn fixed_instance(
    name: &str,
    region: Option<&str>,
    players: Option<u32>,
    state: ConnectionState,
) -> Arc<Instance> {
    let mut config = InstanceConfig::new(name, "localhost", 2333, "pw");
    config.region = region.map(str::to_string);
    let (tx, _rx) = mpsc::unbounded_channel();
    let channel = ChannelSession::new(
        &config,
        test_settings(),
        MockConnector::new(),
        tx,
        CancellationToken::new(),
    );
    let since = state.is_usable().then(Instant::now);
    channel.force_state(state, since);

    let instance = Instance::new(config, channel);
    if let Some(players) = players {
        instance.update_stats(StatsSnapshot {
            players,
            ..Default::default()
        });
    }
    instance
}

/// A connected instance together with its mock backend.
pub(crate) struct LiveInstance {
    pub(crate) instance: Arc<Instance>,
    pub(crate) backend: MockBackend,
}

pub(crate) async fn live_instance(name: &str, region: Option<&str>) -> LiveInstance {
    let connector = MockConnector::new();
    connector.accept();
    let mut config = InstanceConfig::new(name, "localhost", 2333, "pw");
    config.region = region.map(str::to_string);
    let (tx, mut signals) = mpsc::unbounded_channel();
    let channel = ChannelSession::new(
        &config,
        test_settings(),
        connector.clone(),
        tx,
        CancellationToken::new(),
    );
    channel.start(&TokioSpawner::current());

    let backend = connector.next_backend().await;
    assert_eq!(recv_signal(&mut signals).await, ChannelSignal::Connected);
    LiveInstance {
        instance: Instance::new(config, channel),
        backend,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct RecordingEmitter {
    instance: Mutex<Vec<InstanceEvent>>,
    player: Mutex<Vec<PlayerEvent>>,
}

impl RecordingEmitter {
    pub(crate) fn instance_events(&self) -> Vec<InstanceEvent> {
        self.instance.lock().clone()
    }

    pub(crate) fn player_events(&self) -> Vec<PlayerEvent> {
        self.player.lock().clone()
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit_instance(&self, event: InstanceEvent) {
        self.instance.lock().push(event);
    }

    fn emit_player(&self, event: PlayerEvent) {
        self.player.lock().push(event);
    }
}
