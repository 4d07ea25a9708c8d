use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unreadable frame: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Terminal: the controller stopped retrying and needs user action.
    #[error("gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("client is closed")]
    Closed,
}
