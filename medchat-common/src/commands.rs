use serde::{Deserialize, Serialize};

/// Events a client sends over the duplex channel.
///
/// The set is closed: the server dispatches it through a single exhaustive
/// match, so adding a variant is a compile-checked change on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    /// Bind this connection to a user. The server answers with `unreadCount`.
    Authenticate { user_id: String },
    SendMessage {
        sender_id: String,
        recipient_id: String,
        content: String,
    },
    MarkAsRead { message_id: String, user_id: String },
    /// Application-level heartbeat.
    Ping,
    /// Explicit teardown. A transport close is mapped to the same variant.
    Disconnect,
}

impl ClientCommand {
    /// Wire name of the event, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::SendMessage { .. } => "sendMessage",
            Self::MarkAsRead { .. } => "markAsRead",
            Self::Ping => "ping",
            Self::Disconnect => "disconnect",
        }
    }
}
