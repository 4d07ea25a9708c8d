//! HTTP and WebSocket surface over the [`ChatHub`](crate::messaging::ChatHub).

pub mod rest;
pub mod server;

use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::messaging::ChatHub;

pub use server::{router, serve};

/// Shared state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ChatHub>,
    /// Events queued per socket before pushes fail with backpressure.
    pub outbox_capacity: usize,
    pub send_timeout: Duration,
}

impl AppState {
    pub fn new(hub: Arc<ChatHub>, config: &ServerConfig) -> Self {
        Self {
            hub,
            outbox_capacity: config.outbox_capacity.max(1),
            send_timeout: config.send_timeout(),
        }
    }
}
