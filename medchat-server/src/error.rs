use medchat_common::ErrorCode;
use thiserror::Error;

use crate::presence::ConnectionId;

/// Failure of a messaging operation, surfaced to the caller.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid message: {0}")]
    Validation(String),

    #[error("message {0} not found")]
    NotFound(String),

    #[error("user {user_id} is not allowed to {action}")]
    Forbidden { user_id: String, action: String },

    #[error("connection is not authenticated")]
    NotAuthenticated,

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl ChatError {
    pub fn forbidden(user_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self::Forbidden {
            user_id: user_id.into(),
            action: action.into(),
        }
    }

    /// Error code carried by the `error` event on the duplex channel.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Forbidden { .. } => ErrorCode::Forbidden,
            Self::NotAuthenticated => ErrorCode::NotAuthenticated,
            Self::Storage(_) => ErrorCode::StorageError,
        }
    }
}

/// Failure inside the store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// A push to one connection that did not go through.
///
/// Never propagated to the sender: the message is already persisted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection {0} is not attached")]
    UnknownConnection(ConnectionId),

    #[error("connection {0} closed its outbox")]
    Closed(ConnectionId),

    #[error("outbox of connection {0} is full")]
    Backpressure(ConnectionId),
}

pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_taxonomy() {
        assert_eq!(
            ChatError::Validation("empty content".into()).code(),
            ErrorCode::ValidationError
        );
        assert_eq!(ChatError::NotFound("m-1".into()).code(), ErrorCode::NotFound);
        assert_eq!(
            ChatError::forbidden("P1", "mark message m-1 as read").code(),
            ErrorCode::Forbidden
        );
        assert_eq!(
            ChatError::from(StoreError::Corrupt("bad".into())).code(),
            ErrorCode::StorageError
        );
    }

    #[test]
    fn forbidden_message_names_user() {
        let err = ChatError::forbidden("P1", "mark message m-1 as read");
        assert_eq!(
            err.to_string(),
            "user P1 is not allowed to mark message m-1 as read"
        );
    }
}
