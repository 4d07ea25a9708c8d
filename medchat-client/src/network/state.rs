use std::fmt;

/// Lifecycle of the reconnect controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out the backoff before attempt number `attempt` (1-based).
    Reconnecting { attempt: u32 },
    /// Retries used up. Needs user action.
    Exhausted,
    /// Torn down on request.
    Closed,
}

impl ControllerState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// The controller task has finished and will not reconnect.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exhausted | Self::Closed)
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Exhausted => write!(f, "offline, reconnect attempts exhausted"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
