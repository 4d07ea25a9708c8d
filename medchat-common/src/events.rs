use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Message;

/// Events the server pushes to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Ack to the submitting connection once the message is persisted.
    MessageSent(Message),
    /// Live delivery to each of the recipient's connections.
    NewMessage(Message),
    /// Read receipt for the original sender.
    MessageRead {
        message_id: String,
        reader_id: String,
        read_timestamp: DateTime<Utc>,
    },
    UnreadCount { user_id: String, count: u64 },
    PresenceChanged { user_id: String, online: bool },
    Pong { server_time: DateTime<Utc> },
    /// Non-fatal failure of a single request.
    Error { code: ErrorCode, message: String },
}

impl ServerEvent {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Wire name of the event, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageSent(_) => "messageSent",
            Self::NewMessage(_) => "newMessage",
            Self::MessageRead { .. } => "messageRead",
            Self::UnreadCount { .. } => "unreadCount",
            Self::PresenceChanged { .. } => "presenceChanged",
            Self::Pong { .. } => "pong",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    Forbidden,
    NotAuthenticated,
    InvalidEvent,
    StorageError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::InvalidEvent => "INVALID_EVENT",
            Self::StorageError => "STORAGE_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
