use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at};

use super::registry::ConnectionId;
use super::switchboard::{DisconnectReason, Liveness, Switchboard};

/// Heartbeat window for authenticated connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessSettings {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    /// How long a fresh connection may stay anonymous.
    pub auth_timeout: Duration,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(60),
            auth_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-connection timer that evicts a connection once its heartbeats stop.
///
/// Transport close events are not always delivered (partitions, suspended
/// mobile clients), so this timer is the authoritative liveness signal.
pub struct LivenessMonitor;

impl LivenessMonitor {
    /// Start monitoring an authenticated connection.
    ///
    /// The task ends on its own once the connection leaves the switchboard.
    pub fn spawn(
        switchboard: Arc<Switchboard>,
        connection_id: ConnectionId,
        settings: LivenessSettings,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(
                Instant::now() + settings.ping_interval,
                settings.ping_interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match switchboard.check(connection_id, settings.ping_timeout) {
                    Liveness::Alive => {}
                    Liveness::Gone => return,
                    Liveness::Expired => {
                        log::warn!(
                            "Connection {connection_id} missed heartbeats for over {:?}; evicting",
                            settings.ping_timeout
                        );
                        if let Some(departure) =
                            switchboard.evict(connection_id, DisconnectReason::TimedOut)
                        {
                            if departure.went_offline {
                                log::info!(
                                    "User {} is offline",
                                    departure.user_id.as_deref().unwrap_or("?")
                                );
                            }
                        }
                        return;
                    }
                }
            }
        })
    }

    /// Close a connection that has not authenticated within `timeout`.
    ///
    /// The switchboard aborts this task once the connection binds a user.
    pub fn spawn_auth_deadline(
        switchboard: Arc<Switchboard>,
        connection_id: ConnectionId,
        timeout: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if switchboard.expire_unauthenticated(connection_id).is_some() {
                log::info!("Connection {connection_id} sent no authenticate within {timeout:?}");
            }
        })
    }
}
