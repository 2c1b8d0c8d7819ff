//! Persistent channel to one backend instance.
//!
//! A [`ChannelSession`] owns the connect / serve / reconnect loop:
//!
//! ```text
//! Disconnected -> Connecting -> Connected --close--> Resuming --ready--> Connected
//!                     |                       \                \
//!                     +--401/403--> Rejected    +--no token--> Disconnected (lost)
//! ```
//!
//! Inbound messages are parsed down to their [`Envelope`] and queued to the
//! dispatcher as [`ChannelMessage`]s; the receive loop never waits on
//! downstream processing.

mod backoff;
mod transport;

pub use backoff::Backoff;
pub use transport::{
    ConnectError, ConnectRequest, Connection, Connector, Frame, FrameSink, FrameStream,
    WsConnector,
};

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{BackoffConfig, ClientConfig, InstanceConfig};
use crate::error::{LavaError, LavaResult};
use crate::protocol::{Envelope, Outbound, Ready};
use crate::protocol_constants::{
    HEADER_AUTHORIZATION, HEADER_CLIENT_NAME, HEADER_RESUME_KEY, HEADER_SESSION_ID,
    HEADER_USER_ID,
};
use crate::runtime::TaskSpawner;

/// Instance name, used as its id throughout the client.
pub type InstanceId = String;

/// Connection state of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Dropped while holding a resume token; server-side state may survive.
    Resuming,
    /// Credential rejected. Not retried until reconfigured.
    Rejected,
    /// Shut down explicitly.
    Closed,
}

impl ConnectionState {
    /// Whether sessions may be assigned to an instance in this state.
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Connected | Self::Resuming)
    }
}

/// Something a channel wants the dispatcher to know.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    /// The transport handshake succeeded.
    Connected,
    /// The backend acknowledged the session.
    Ready { resumed: bool, resume_attempted: bool },
    /// Any other inbound message.
    Message(Envelope),
    Disconnected { code: Option<u16>, reason: String },
    /// Server-side state for this instance is gone (no resume possible).
    Lost,
    AuthenticationFailed { status: u16 },
    GaveUp { attempts: u32 },
}

/// A [`ChannelSignal`] tagged with the instance it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub instance: InstanceId,
    pub signal: ChannelSignal,
}

/// Client-wide settings every channel needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSettings {
    pub user_id: String,
    pub client_name: String,
    pub backoff: BackoffConfig,
    pub resume_timeout: Duration,
    pub backlog_capacity: usize,
}

impl ChannelSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            user_id: config.user_id.clone(),
            client_name: config.client_name.clone(),
            backoff: config.backoff.clone(),
            resume_timeout: config.resume_timeout(),
            backlog_capacity: config.backlog_capacity,
        }
    }

    fn resumable(&self) -> bool {
        !self.resume_timeout.is_zero()
    }
}

struct Status {
    state: ConnectionState,
    connected_since: Option<Instant>,
    resume_token: Option<String>,
    resume_deadline: Option<Instant>,
}

#[derive(Default)]
struct Writer {
    sink: Option<FrameSink>,
    /// Commands issued while resuming, flushed if the resume succeeds.
    backlog: VecDeque<String>,
}

/// Owns the persistent channel to one instance.
pub struct ChannelSession {
    instance: InstanceId,
    url: String,
    password: String,
    settings: ChannelSettings,
    connector: Arc<dyn Connector>,
    status: RwLock<Status>,
    writer: Mutex<Writer>,
    signals: mpsc::UnboundedSender<ChannelMessage>,
    cancel: CancellationToken,
}

impl ChannelSession {
    pub fn new(
        config: &InstanceConfig,
        settings: ChannelSettings,
        connector: Arc<dyn Connector>,
        signals: mpsc::UnboundedSender<ChannelMessage>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            instance: config.name.clone(),
            url: config.channel_url(),
            password: config.password.clone(),
            settings,
            connector,
            status: RwLock::new(Status {
                state: ConnectionState::Disconnected,
                connected_since: None,
                resume_token: None,
                resume_deadline: None,
            }),
            writer: Mutex::new(Writer::default()),
            signals,
            cancel,
        })
    }

    /// Spawns the connect/serve/reconnect loop.
    pub fn start<S: TaskSpawner>(self: &Arc<Self>, spawner: &S) {
        let this = Arc::clone(self);
        spawner.spawn(async move { this.run().await });
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn state(&self) -> ConnectionState {
        self.status.read().state
    }

    /// When the current connection was established; `None` while down.
    pub fn connected_since(&self) -> Option<Instant> {
        self.status.read().connected_since
    }

    pub fn resume_token(&self) -> Option<String> {
        self.status.read().resume_token.clone()
    }

    /// Writes one command.
    ///
    /// While resuming without a live socket the command is queued and
    /// delivered if the resume succeeds. Failures never change the
    /// connection state.
    pub async fn send(&self, command: &Outbound) -> LavaResult<()> {
        let payload = serde_json::to_string(command)?;
        let mut writer = self.writer.lock().await;

        if let Some(sink) = writer.sink.as_mut() {
            log::trace!("[Channel:{}] -> {}", self.instance, command.op());
            return sink.send(payload).await;
        }

        if self.state() == ConnectionState::Resuming {
            if writer.backlog.len() >= self.settings.backlog_capacity {
                writer.backlog.pop_front();
                log::warn!(
                    "[Channel:{}] Resume backlog full, dropped oldest command",
                    self.instance
                );
            }
            writer.backlog.push_back(payload);
            return Ok(());
        }

        if self.state() == ConnectionState::Rejected {
            return Err(LavaError::Authentication(format!(
                "instance {} rejected the credential",
                self.instance
            )));
        }

        Err(LavaError::Transport(format!(
            "instance {} is not connected",
            self.instance
        )))
    }

    /// Stops the loop, cancels any pending reconnect and closes the socket.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connection loop
    // ─────────────────────────────────────────────────────────────────────────

    async fn run(self: Arc<Self>) {
        let mut backoff = Backoff::new(self.settings.backoff.clone());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let request = self.begin_attempt();
            log::debug!("[Channel:{}] Connecting to {}", self.instance, request.url);
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => break,
                outcome = self.connector.connect(request) => outcome,
            };

            match outcome {
                Ok(connection) => {
                    backoff.reset();
                    let (code, reason) = self.serve(connection).await;
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    self.on_closed(code, reason).await;
                }
                Err(ConnectError::Unauthorized(status)) => {
                    log::error!(
                        "[Channel:{}] Credential rejected (HTTP {}), not retrying",
                        self.instance,
                        status
                    );
                    self.status.write().state = ConnectionState::Rejected;
                    self.emit(ChannelSignal::AuthenticationFailed { status });
                    return;
                }
                Err(ConnectError::Failed(reason)) => {
                    log::warn!(
                        "[Channel:{}] Connection attempt failed: {}",
                        self.instance,
                        reason
                    );
                    let mut status = self.status.write();
                    if status.state != ConnectionState::Resuming {
                        status.state = ConnectionState::Disconnected;
                    }
                }
            }

            self.expire_resume_window(false).await;

            let Some(delay) = backoff.next_delay() else {
                log::error!(
                    "[Channel:{}] Giving up after {} attempts",
                    self.instance,
                    backoff.attempts()
                );
                self.expire_resume_window(true).await;
                self.status.write().state = ConnectionState::Disconnected;
                self.emit(ChannelSignal::GaveUp {
                    attempts: backoff.attempts(),
                });
                return;
            };

            log::info!(
                "[Channel:{}] Reconnecting in {}ms (attempt {})",
                self.instance,
                delay.as_millis(),
                backoff.attempts()
            );
            let deadline = self.status.read().resume_deadline;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
                _ = sleep_until_opt(deadline) => self.expire_resume_window(false).await,
            }
        }

        self.status.write().state = ConnectionState::Closed;
        let mut writer = self.writer.lock().await;
        if let Some(mut sink) = writer.sink.take() {
            let _ = sink.close().await;
        }
        writer.backlog.clear();
        log::info!("[Channel:{}] Closed", self.instance);
    }

    fn begin_attempt(&self) -> ConnectRequest {
        let mut status = self.status.write();
        if status.state != ConnectionState::Resuming {
            status.state = ConnectionState::Connecting;
        }

        let mut headers = vec![
            (HEADER_AUTHORIZATION, self.password.clone()),
            (HEADER_USER_ID, self.settings.user_id.clone()),
            (HEADER_CLIENT_NAME, self.settings.client_name.clone()),
        ];
        if let Some(token) = &status.resume_token {
            headers.push((HEADER_RESUME_KEY, token.clone()));
            headers.push((HEADER_SESSION_ID, token.clone()));
        }

        ConnectRequest {
            url: self.url.clone(),
            headers,
        }
    }

    /// Reads frames until the connection ends. Returns the close code and reason.
    async fn serve(&self, connection: Connection) -> (Option<u16>, String) {
        let Connection { sink, mut stream } = connection;
        self.writer.lock().await.sink = Some(sink);

        let resuming = {
            let mut status = self.status.write();
            if status.state == ConnectionState::Resuming {
                true
            } else {
                status.state = ConnectionState::Connected;
                status.connected_since = Some(Instant::now());
                false
            }
        };
        if resuming {
            log::info!(
                "[Channel:{}] Reconnected, waiting for resume outcome",
                self.instance
            );
        } else {
            log::info!("[Channel:{}] Connected", self.instance);
        }
        self.emit(ChannelSignal::Connected);

        let closed = loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break (None, "shutdown".to_string()),
                frame = stream.next() => frame,
            };
            match frame {
                Some(Ok(Frame::Text(text))) => self.on_text(&text).await,
                Some(Ok(Frame::Close { code, reason })) => break (code, reason),
                Some(Err(e)) => break (None, e.to_string()),
                None => break (None, "connection ended".to_string()),
            }
        };

        self.writer.lock().await.sink = None;
        closed
    }

    async fn on_text(&self, text: &str) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("[Channel:{}] Dropping unparseable message: {}", self.instance, e);
                return;
            }
        };

        if envelope.op != "ready" {
            self.emit(ChannelSignal::Message(envelope));
            return;
        }

        match Ready::deserialize(&envelope.payload) {
            Ok(ready) => self.on_ready(ready).await,
            Err(e) => log::warn!("[Channel:{}] Malformed ready message: {}", self.instance, e),
        }
    }

    async fn on_ready(&self, ready: Ready) {
        let resume_attempted = {
            let mut status = self.status.write();
            let attempted = status.state == ConnectionState::Resuming;
            status.state = ConnectionState::Connected;
            status.resume_deadline = None;
            if attempted && !ready.resumed {
                status.connected_since = Some(Instant::now());
            }
            status.connected_since.get_or_insert_with(Instant::now);
            status.resume_token = self
                .settings
                .resumable()
                .then(|| ready.session_id.clone());
            attempted
        };

        {
            let mut writer = self.writer.lock().await;
            let backlog: Vec<String> = writer.backlog.drain(..).collect();
            if ready.resumed {
                if let Some(sink) = writer.sink.as_mut() {
                    for payload in backlog {
                        if let Err(e) = sink.send(payload).await {
                            log::warn!("[Channel:{}] Backlog flush failed: {}", self.instance, e);
                            break;
                        }
                    }
                }
            } else if !backlog.is_empty() {
                log::debug!(
                    "[Channel:{}] Discarding {} queued commands, sessions will be replayed",
                    self.instance,
                    backlog.len()
                );
            }
        }

        if ready.resumed {
            log::info!("[Channel:{}] Session resumed", self.instance);
        } else if self.settings.resumable() {
            let configure = Outbound::ConfigureResuming {
                key: ready.session_id.clone(),
                timeout: self.settings.resume_timeout.as_secs(),
            };
            if let Err(e) = self.send(&configure).await {
                log::warn!("[Channel:{}] Could not configure resuming: {}", self.instance, e);
            }
        }

        self.emit(ChannelSignal::Ready {
            resumed: ready.resumed,
            resume_attempted,
        });
    }

    async fn on_closed(&self, code: Option<u16>, reason: String) {
        log::warn!(
            "[Channel:{}] Connection closed (code {:?}): {}",
            self.instance,
            code,
            reason
        );
        let lost = {
            let mut status = self.status.write();
            if status.resume_token.is_some() && self.settings.resumable() {
                if status.state != ConnectionState::Resuming {
                    status.state = ConnectionState::Resuming;
                    status.resume_deadline = Some(Instant::now() + self.settings.resume_timeout);
                }
                false
            } else {
                status.state = ConnectionState::Disconnected;
                status.connected_since = None;
                status.resume_token = None;
                true
            }
        };

        self.emit(ChannelSignal::Disconnected { code, reason });
        if lost {
            self.emit(ChannelSignal::Lost);
        }
    }

    /// Ends a pending resume once its window has elapsed (or unconditionally
    /// with `force`), reporting the instance's sessions as lost.
    async fn expire_resume_window(&self, force: bool) {
        let expired = {
            let mut status = self.status.write();
            let due = status
                .resume_deadline
                .is_some_and(|deadline| Instant::now() >= deadline);
            if status.state == ConnectionState::Resuming && (force || due) {
                status.state = ConnectionState::Disconnected;
                status.resume_token = None;
                status.resume_deadline = None;
                status.connected_since = None;
                true
            } else {
                false
            }
        };

        if expired {
            log::warn!("[Channel:{}] Resume window elapsed", self.instance);
            self.writer.lock().await.backlog.clear();
            self.emit(ChannelSignal::Lost);
        }
    }

    fn emit(&self, signal: ChannelSignal) {
        if self.cancel.is_cancelled() {
            return;
        }
        let message = ChannelMessage {
            instance: self.instance.clone(),
            signal,
        };
        if self.signals.send(message).is_err() {
            log::trace!("[Channel:{}] Dispatcher gone, signal dropped", self.instance);
        }
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, state: ConnectionState, connected_since: Option<Instant>) {
        let mut status = self.status.write();
        status.state = state;
        status.connected_since = connected_since;
    }
}

fn sleep_until_opt(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::runtime::TokioSpawner;
    use crate::test_support::{recv_signal, MockConnector};
    use serde_json::json;

    fn settings(resume_secs: u64) -> ChannelSettings {
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
            resume_timeout: Duration::from_secs(resume_secs),
            backlog_capacity: 4,
        }
    }

    fn start(
        connector: Arc<MockConnector>,
        settings: ChannelSettings,
    ) -> (Arc<ChannelSession>, mpsc::UnboundedReceiver<ChannelMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = InstanceConfig::new("alpha", "localhost", 2333, "secret");
        let channel = ChannelSession::new(&config, settings, connector, tx, CancellationToken::new());
        channel.start(&TokioSpawner::current());
        (channel, rx)
    }

    #[tokio::test]
    async fn handshake_sends_identity_and_configures_resuming() {
        let connector = MockConnector::new();
        connector.accept();
        let (channel, mut rx) = start(connector.clone(), settings(30));

        let mut backend = connector.next_backend().await;
        assert_eq!(recv_signal(&mut rx).await, ChannelSignal::Connected);
        assert_eq!(channel.state(), ConnectionState::Connected);

        let requests = connector.requests();
        let request = &requests[0];
        assert_eq!(request.url, "ws://localhost:2333");
        assert_eq!(request.header("Authorization"), Some("secret"));
        assert_eq!(request.header("user-id"), Some("42"));
        assert_eq!(request.header("Resume-Key"), None);

        backend.push(json!({"op": "ready", "resumed": false, "sessionId": "tok-1"}));
        assert_eq!(
            recv_signal(&mut rx).await,
            ChannelSignal::Ready {
                resumed: false,
                resume_attempted: false
            }
        );
        assert_eq!(
            backend.next_sent().await,
            json!({"op": "configureResuming", "key": "tok-1", "timeout": 30})
        );
        assert_eq!(channel.resume_token().as_deref(), Some("tok-1"));
        channel.shutdown();
    }

    #[tokio::test]
    async fn other_ops_are_forwarded_as_envelopes() {
        let connector = MockConnector::new();
        connector.accept();
        let (channel, mut rx) = start(connector.clone(), settings(0));
        let backend = connector.next_backend().await;
        recv_signal(&mut rx).await;

        backend.push_raw("{not json");
        backend.push(json!({"op": "playerUpdate", "guildId": "1", "state": {"time": 1}}));
        match recv_signal(&mut rx).await {
            ChannelSignal::Message(envelope) => assert_eq!(envelope.op, "playerUpdate"),
            other => panic!("unexpected {other:?}"),
        }
        channel.shutdown();
    }

    #[tokio::test]
    async fn rejected_credential_is_not_retried() {
        let connector = MockConnector::new();
        connector.reject(401);
        connector.accept();
        let (channel, mut rx) = start(connector.clone(), settings(0));

        assert_eq!(
            recv_signal(&mut rx).await,
            ChannelSignal::AuthenticationFailed { status: 401 }
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(channel.state(), ConnectionState::Rejected);
        assert_eq!(connector.requests().len(), 1);

        let err = channel
            .send(&Outbound::Stop {
                guild_id: "1".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LavaError::Authentication(_)));
        assert_eq!(err.code(), "authentication_failed");
    }

    #[tokio::test]
    async fn drop_without_resume_token_reports_lost_and_reconnects() {
        let connector = MockConnector::new();
        connector.accept();
        connector.accept();
        let (channel, mut rx) = start(connector.clone(), settings(0));

        let backend = connector.next_backend().await;
        assert_eq!(recv_signal(&mut rx).await, ChannelSignal::Connected);
        backend.close(1006, "gone");

        assert_eq!(
            recv_signal(&mut rx).await,
            ChannelSignal::Disconnected {
                code: Some(1006),
                reason: "gone".into()
            }
        );
        assert_eq!(recv_signal(&mut rx).await, ChannelSignal::Lost);

        let _backend = connector.next_backend().await;
        assert_eq!(recv_signal(&mut rx).await, ChannelSignal::Connected);
        channel.shutdown();
    }

    #[tokio::test]
    async fn drop_with_token_resumes_without_lost() {
        let connector = MockConnector::new();
        connector.accept();
        connector.fail("refused");
        connector.accept();
        let (channel, mut rx) = start(connector.clone(), settings(30));

        let mut backend = connector.next_backend().await;
        recv_signal(&mut rx).await;
        backend.push(json!({"op": "ready", "resumed": false, "sessionId": "tok-9"}));
        recv_signal(&mut rx).await;
        backend.next_sent().await;
        backend.close(1001, "restart");
        recv_signal(&mut rx).await;
        assert_eq!(channel.state(), ConnectionState::Resuming);

        // queued while the socket is down
        channel
            .send(&Outbound::Pause {
                guild_id: "1".into(),
                pause: true,
            })
            .await
            .unwrap();

        let mut resumed = connector.next_backend().await;
        assert_eq!(recv_signal(&mut rx).await, ChannelSignal::Connected);
        let requests = connector.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].header("Resume-Key"), Some("tok-9"));
        assert_eq!(requests[2].header("Session-Id"), Some("tok-9"));

        resumed.push(json!({"op": "ready", "resumed": true, "sessionId": "tok-9"}));
        assert_eq!(
            recv_signal(&mut rx).await,
            ChannelSignal::Ready {
                resumed: true,
                resume_attempted: true
            }
        );
        assert_eq!(
            resumed.next_sent().await,
            json!({"op": "pause", "guildId": "1", "pause": true})
        );
        assert_eq!(channel.state(), ConnectionState::Connected);
        channel.shutdown();
    }

    #[tokio::test]
    async fn resume_window_elapsing_reports_lost() {
        let connector = MockConnector::new();
        connector.accept();
        let (channel, mut rx) = start(connector.clone(), settings(1));

        let mut backend = connector.next_backend().await;
        recv_signal(&mut rx).await;
        backend.push(json!({"op": "ready", "resumed": false, "sessionId": "tok-3"}));
        recv_signal(&mut rx).await;
        backend.next_sent().await;

        // every reconnect attempt fails from here on
        tokio::time::pause();
        let dropped_at = Instant::now();
        backend.close(1006, "gone");
        assert_eq!(
            recv_signal(&mut rx).await,
            ChannelSignal::Disconnected {
                code: Some(1006),
                reason: "gone".into()
            }
        );
        assert_eq!(channel.state(), ConnectionState::Resuming);

        assert_eq!(recv_signal(&mut rx).await, ChannelSignal::Lost);
        assert!(dropped_at.elapsed() >= Duration::from_secs(1));
        assert_ne!(channel.state(), ConnectionState::Resuming);
        assert_eq!(channel.resume_token(), None);
        assert!(connector.requests().len() > 2);

        let err = channel
            .send(&Outbound::Stop {
                guild_id: "1".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LavaError::Transport(_)));
        channel.shutdown();
    }

    #[tokio::test]
    async fn shutdown_during_backoff_cancels_reconnect() {
        tokio::time::pause();
        let connector = MockConnector::new();
        connector.fail("refused");
        let mut slow = settings(0);
        slow.backoff.initial_ms = 300;
        slow.backoff.max_ms = 300;
        let (channel, mut rx) = start(connector.clone(), slow);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.requests().len(), 1);

        channel.shutdown();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.requests().len(), 1);
        assert_eq!(channel.state(), ConnectionState::Closed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_while_down_is_transport_error() {
        let connector = MockConnector::new();
        let (channel, _rx) = start(connector, settings(0));
        let err = channel
            .send(&Outbound::Stop {
                guild_id: "1".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LavaError::Transport(_)));
        channel.shutdown();
    }

    #[tokio::test]
    async fn shutdown_closes_and_silences() {
        let connector = MockConnector::new();
        connector.accept();
        let (channel, mut rx) = start(connector.clone(), settings(0));
        let backend = connector.next_backend().await;
        recv_signal(&mut rx).await;

        channel.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(channel.state(), ConnectionState::Closed);

        backend.push(json!({"op": "stats"}));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }
}
