//! Wire protocol shared by the messaging server and its clients.
//!
//! Every frame on the duplex channel is a JSON text frame of the form
//! `{"event": "<name>", "data": {...}}`.

pub mod commands;
pub mod events;
pub mod types;

pub use commands::ClientCommand;
pub use events::{ErrorCode, ServerEvent};
pub use types::{Message, NewMessage};
