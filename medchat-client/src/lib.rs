//! Terminal client for the medchat realtime channel.
//!
//! [`ReconnectController`](network::ReconnectController) owns the socket and
//! keeps it alive; callers talk to it through a cloneable
//! [`ClientHandle`](network::ClientHandle).

pub mod config;
pub mod error;
pub mod input;
pub mod network;

pub use config::{ClientConfig, ReconnectConfig};
pub use error::ClientError;
