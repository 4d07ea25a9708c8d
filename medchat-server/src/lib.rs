//! Realtime messaging and presence core for the clinic portal.
//!
//! The [`ChatHub`](messaging::ChatHub) is constructed by the process
//! bootstrap and owns every piece of live state: the connection registry,
//! the per-connection outboxes, the liveness monitors, the delivery router
//! and the read tracker. Message rows live in a [`MessageStore`](storage::MessageStore).

pub mod config;
pub mod error;
pub mod messaging;
pub mod network;
pub mod presence;
pub mod storage;

pub use config::ServerConfig;
pub use error::{ChatError, DeliveryError, StoreError};
pub use messaging::ChatHub;
