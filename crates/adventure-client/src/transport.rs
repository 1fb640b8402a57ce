//! Streaming channel transport.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

use crate::error::{ClientError, Result};
use crate::session::SessionId;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens streaming channels. A returned channel is open.
#[async_trait]
pub trait ChannelConnector: Send + Sync + 'static {
    async fn open(&self, url: &Url) -> Result<Box<dyn MessageChannel>>;
}

/// An open channel delivering plain-text frames.
#[async_trait]
pub trait MessageChannel: Send {
    /// Next text frame; `None` once the peer closed the channel.
    async fn next_message(&mut self) -> Option<Result<String>>;

    async fn close(&mut self) -> Result<()>;
}

/// Channel URL for a session: `ws`/`wss` matching the origin scheme, path `/ws/{id}`.
pub fn channel_url(origin: &Url, session_id: &SessionId) -> Result<Url> {
    let scheme = match origin.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(ClientError::InvalidUrl(format!(
                "unsupported origin scheme: {other}"
            )));
        }
    };
    let host = origin
        .host_str()
        .ok_or_else(|| ClientError::InvalidUrl(format!("origin has no host: {origin}")))?;
    let authority = match origin.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let mut url = Url::parse(&format!("{scheme}://{authority}/ws"))?;
    url.path_segments_mut()
        .map_err(|()| ClientError::InvalidUrl(origin.to_string()))?
        .push(session_id.as_str());
    Ok(url)
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn open(&self, url: &Url) -> Result<Box<dyn MessageChannel>> {
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|error| ClientError::WebSocket(error.to_string()))?;
        Ok(Box::new(WsChannel {
            url: url.to_string(),
            stream,
        }))
    }
}

struct WsChannel {
    url: String,
    stream: WsStream,
}

#[async_trait]
impl MessageChannel for WsChannel {
    async fn next_message(&mut self) -> Option<Result<String>> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(payload)) => {
                    debug!("ignoring binary frame from {} ({} bytes)", self.url, payload.len());
                }
                Ok(Message::Ping(payload)) => {
                    debug!("received ping from {} ({} bytes)", self.url, payload.len());
                }
                Ok(Message::Pong(_) | Message::Frame(_)) => {}
                Ok(Message::Close(_)) => return None,
                Err(error) => return Some(Err(ClientError::WebSocket(error.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .map_err(|error| ClientError::WebSocket(error.to_string()))
    }
}
