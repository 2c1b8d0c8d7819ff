//! Transport seam for the persistent channel.
//!
//! [`ChannelSession`](super::ChannelSession) only sees text frames through
//! [`Connector`], so tests can script a backend without sockets.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::error::LavaError;
use crate::protocol_constants::AUTH_REJECTED_STATUSES;

/// One inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: Option<u16>, reason: String },
}

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = LavaError> + Send>>;

/// Inbound half of a connection. Ends when the peer goes away.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, LavaError>> + Send>>;

/// An established connection.
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Everything needed to open one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
}

impl ConnectRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The backend refused the credential (HTTP status of the upgrade).
    Unauthorized(u16),
    /// Any other failure; worth retrying.
    Failed(String),
}

/// Opens connections to an instance.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: ConnectRequest) -> Result<Connection, ConnectError>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<Connection, ConnectError> {
        let mut upgrade = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectError::Failed(format!("invalid url {}: {e}", request.url)))?;

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConnectError::Failed(e.to_string()))?;
            let value =
                HeaderValue::from_str(value).map_err(|e| ConnectError::Failed(e.to_string()))?;
            upgrade.headers_mut().insert(name, value);
        }

        let (socket, _response) = match tokio_tungstenite::connect_async(upgrade).await {
            Ok(ok) => ok,
            Err(tungstenite::Error::Http(response)) => {
                let status = response.status().as_u16();
                return Err(if AUTH_REJECTED_STATUSES.contains(&status) {
                    ConnectError::Unauthorized(status)
                } else {
                    ConnectError::Failed(format!("upgrade rejected with HTTP {status}"))
                });
            }
            Err(e) => return Err(ConnectError::Failed(e.to_string())),
        };

        let (write, read) = socket.split();

        let sink = write
            .sink_map_err(|e| LavaError::Transport(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, LavaError>(Message::Text(text.into()))));

        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.to_string()))),
                Ok(Message::Close(frame)) => Some(Ok(match frame {
                    Some(frame) => Frame::Close {
                        code: Some(u16::from(frame.code)),
                        reason: frame.reason.to_string(),
                    },
                    None => Frame::Close {
                        code: None,
                        reason: String::new(),
                    },
                })),
                // ping/pong are answered by tungstenite itself
                Ok(_) => None,
                Err(e) => Some(Err(LavaError::Transport(e.to_string()))),
            })
        });

        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
