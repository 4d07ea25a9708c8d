use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use medchat_common::{ClientCommand, ServerEvent};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::ClientError;

/// One established duplex session.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, command: &ClientCommand) -> Result<(), ClientError>;

    /// Next event from the server, `Ok(None)` once the server has closed.
    ///
    /// Must be cancel-safe: the controller polls it inside `select!`.
    async fn next_event(&mut self) -> Result<Option<ServerEvent>, ClientError>;

    async fn close(&mut self);
}

/// Opens a fresh [`Transport`] for every (re)connect.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, ClientError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, ClientError> {
        let handshake = connect_async(self.url.as_str());
        let (stream, _) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| {
                ClientError::Connect(format!("timed out after {:?}", self.connect_timeout))
            })?
            .map_err(|err| ClientError::Connect(err.to_string()))?;
        log::debug!("Socket to {} open", self.url);
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WsStream,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, command: &ClientCommand) -> Result<(), ClientError> {
        let text = serde_json::to_string(command)?;
        self.stream
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))
    }

    async fn next_event(&mut self) -> Result<Option<ServerEvent>, ClientError> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return Ok(Some(serde_json::from_str(text.as_str())?));
                }
                Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                // Control frames are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(ClientError::Transport(err.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            log::debug!("Socket close failed: {err}");
        }
    }
}
