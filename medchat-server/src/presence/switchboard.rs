use std::collections::{HashMap, HashSet};

use medchat_common::ServerEvent;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use super::registry::{ConnectionId, ConnectionRegistry};
use crate::error::DeliveryError;

/// Per-connection lifecycle: `Connecting → Authenticated → Alive → (terminal)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Authenticated,
    Alive,
    TimedOut,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientClosed,
    TimedOut,
    /// No `authenticate` arrived before the deadline.
    Unauthenticated,
    ServerShutdown,
}

impl DisconnectReason {
    fn terminal_phase(self) -> ConnectionPhase {
        match self {
            Self::TimedOut => ConnectionPhase::TimedOut,
            Self::ClientClosed | Self::Unauthenticated | Self::ServerShutdown => {
                ConnectionPhase::Disconnected
            }
        }
    }
}

/// Result of a liveness check for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Expired,
    Gone,
}

/// What changed when a connection was bound to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub came_online: bool,
    /// Previous owner of the connection, if the rebind left them offline.
    pub left_offline: Option<String>,
    pub needs_monitor: bool,
}

/// A connection that has left the switchboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub connection_id: ConnectionId,
    pub user_id: Option<String>,
    pub went_offline: bool,
    pub reason: DisconnectReason,
    pub phase: ConnectionPhase,
}

/// Outcome of pushing one event to every connection of a user.
#[derive(Debug, Default)]
pub struct FanOut {
    pub targets: usize,
    pub delivered: usize,
    pub failures: Vec<DeliveryError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchboardStats {
    pub sessions: usize,
    pub connections: usize,
    pub online_users: usize,
}

struct Session {
    outbox: mpsc::Sender<ServerEvent>,
    phase: ConnectionPhase,
    kill: Option<oneshot::Sender<DisconnectReason>>,
    monitor: Option<JoinHandle<()>>,
    deadline: Option<JoinHandle<()>>,
}

impl Session {
    fn stop_tasks(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        if let Some(deadline) = self.deadline.take() {
            deadline.abort();
        }
    }
}

#[derive(Default)]
struct Inner {
    registry: ConnectionRegistry,
    sessions: HashMap<ConnectionId, Session>,
}

/// The connection registry plus each connection's outbox, behind one lock.
///
/// Every method takes the lock once and never awaits while holding it, so
/// each operation is atomic with respect to other connections' events.
#[derive(Default)]
pub struct Switchboard {
    inner: Mutex<Inner>,
}

impl Switchboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a freshly accepted transport. The receiver fires when the
    /// server wants the transport torn down.
    pub fn attach(
        &self,
        outbox: mpsc::Sender<ServerEvent>,
    ) -> (ConnectionId, oneshot::Receiver<DisconnectReason>) {
        let connection_id = ConnectionId::generate();
        let (kill_tx, kill_rx) = oneshot::channel();
        self.inner.lock().sessions.insert(
            connection_id,
            Session {
                outbox,
                phase: ConnectionPhase::Connecting,
                kill: Some(kill_tx),
                monitor: None,
                deadline: None,
            },
        );
        (connection_id, kill_rx)
    }

    /// Register an attached connection under `user_id`.
    pub fn bind(
        &self,
        connection_id: ConnectionId,
        user_id: &str,
    ) -> Result<Binding, DeliveryError> {
        let mut inner = self.inner.lock();
        let Inner { registry, sessions } = &mut *inner;
        let session = sessions
            .get_mut(&connection_id)
            .ok_or(DeliveryError::UnknownConnection(connection_id))?;

        let previous = registry.user_of(connection_id).map(str::to_string);
        let came_online = registry.register(user_id, connection_id);
        let left_offline = previous.filter(|prev| prev != user_id && !registry.is_online(prev));

        if session.phase == ConnectionPhase::Connecting {
            session.phase = ConnectionPhase::Authenticated;
        }
        if let Some(deadline) = session.deadline.take() {
            deadline.abort();
        }

        Ok(Binding {
            came_online,
            left_offline,
            needs_monitor: session.monitor.is_none(),
        })
    }

    /// Hand the liveness task to the session so it dies with it.
    pub fn install_monitor(&self, connection_id: ConnectionId, monitor: JoinHandle<()>) {
        let mut inner = self.inner.lock();
        match inner.sessions.get_mut(&connection_id) {
            Some(session) if session.monitor.is_none() => session.monitor = Some(monitor),
            _ => monitor.abort(),
        }
    }

    /// Hand the authentication deadline to a connection still in `Connecting`.
    pub fn install_deadline(&self, connection_id: ConnectionId, deadline: JoinHandle<()>) {
        let mut inner = self.inner.lock();
        match inner.sessions.get_mut(&connection_id) {
            Some(session) if session.phase == ConnectionPhase::Connecting => {
                session.deadline = Some(deadline);
            }
            _ => deadline.abort(),
        }
    }

    /// Record a heartbeat. `false` if the connection is unknown or unauthenticated.
    pub fn heartbeat(&self, connection_id: ConnectionId) -> bool {
        let mut inner = self.inner.lock();
        if !inner.registry.touch(connection_id) {
            return false;
        }
        if let Some(session) = inner.sessions.get_mut(&connection_id) {
            session.phase = ConnectionPhase::Alive;
        }
        true
    }

    pub fn check(&self, connection_id: ConnectionId, timeout: Duration) -> Liveness {
        let inner = self.inner.lock();
        if inner.registry.get(connection_id).is_none() {
            Liveness::Gone
        } else if inner
            .registry
            .is_expired(connection_id, Instant::now(), timeout)
        {
            Liveness::Expired
        } else {
            Liveness::Alive
        }
    }

    /// Remove a connection from the registry and drop its session.
    ///
    /// Idempotent: returns `None` if it already left.
    pub fn detach(
        &self,
        connection_id: ConnectionId,
        reason: DisconnectReason,
    ) -> Option<Departure> {
        detach_locked(&mut self.inner.lock(), connection_id, reason)
    }

    /// Detach a connection that never bound a user.
    ///
    /// `None` if it authenticated in the meantime or already left.
    pub fn expire_unauthenticated(&self, connection_id: ConnectionId) -> Option<Departure> {
        let mut inner = self.inner.lock();
        if inner.sessions.get(&connection_id)?.phase != ConnectionPhase::Connecting {
            return None;
        }
        detach_locked(&mut inner, connection_id, DisconnectReason::Unauthenticated)
    }

    /// Detach, and tell everyone else if the user went offline.
    pub fn evict(
        &self,
        connection_id: ConnectionId,
        reason: DisconnectReason,
    ) -> Option<Departure> {
        let departure = self.detach(connection_id, reason)?;
        if departure.went_offline {
            if let Some(user_id) = &departure.user_id {
                self.announce(user_id, false);
            }
        }
        Some(departure)
    }

    pub fn push(
        &self,
        connection_id: ConnectionId,
        event: ServerEvent,
    ) -> Result<(), DeliveryError> {
        let inner = self.inner.lock();
        let session = inner
            .sessions
            .get(&connection_id)
            .ok_or(DeliveryError::UnknownConnection(connection_id))?;
        try_push(connection_id, session, event)
    }

    /// Push `event` to every live connection of `user_id`.
    ///
    /// A failed push is recorded and skipped; it never stops the fan-out.
    pub fn push_to_user(&self, user_id: &str, event: &ServerEvent) -> FanOut {
        let inner = self.inner.lock();
        let targets = inner.registry.connections_for(user_id);
        let mut fan_out = FanOut {
            targets: targets.len(),
            ..FanOut::default()
        };

        for connection_id in targets {
            let result = match inner.sessions.get(&connection_id) {
                Some(session) => try_push(connection_id, session, event.clone()),
                None => Err(DeliveryError::UnknownConnection(connection_id)),
            };
            match result {
                Ok(()) => fan_out.delivered += 1,
                Err(err) => fan_out.failures.push(err),
            }
        }
        fan_out
    }

    /// Broadcast a presence change to every authenticated connection of other users.
    pub fn announce(&self, user_id: &str, online: bool) {
        let event = ServerEvent::PresenceChanged {
            user_id: user_id.to_string(),
            online,
        };
        let inner = self.inner.lock();
        for (connection_id, session) in &inner.sessions {
            match inner.registry.user_of(*connection_id) {
                Some(owner) if owner != user_id => {
                    if let Err(err) = try_push(*connection_id, session, event.clone()) {
                        log::debug!("Presence update for {user_id} skipped: {err}");
                    }
                }
                _ => {}
            }
        }
    }

    pub fn user_of(&self, connection_id: ConnectionId) -> Option<String> {
        self.inner
            .lock()
            .registry
            .user_of(connection_id)
            .map(str::to_string)
    }

    pub fn phase(&self, connection_id: ConnectionId) -> Option<ConnectionPhase> {
        self.inner
            .lock()
            .sessions
            .get(&connection_id)
            .map(|session| session.phase)
    }

    pub fn connections_for(&self, user_id: &str) -> HashSet<ConnectionId> {
        self.inner.lock().registry.connections_for(user_id)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.inner.lock().registry.is_online(user_id)
    }

    pub fn stats(&self) -> SwitchboardStats {
        let inner = self.inner.lock();
        SwitchboardStats {
            sessions: inner.sessions.len(),
            connections: inner.registry.connection_count(),
            online_users: inner.registry.user_count(),
        }
    }

    /// Tear down every session. Returns how many were closed.
    pub fn drain(&self, reason: DisconnectReason) -> usize {
        let mut inner = self.inner.lock();
        inner.registry.clear();
        let sessions: Vec<Session> = inner.sessions.drain().map(|(_, session)| session).collect();
        let closed = sessions.len();

        for mut session in sessions {
            session.stop_tasks();
            if let Some(kill) = session.kill.take() {
                let _ = kill.send(reason);
            }
        }
        closed
    }
}

fn detach_locked(
    inner: &mut Inner,
    connection_id: ConnectionId,
    reason: DisconnectReason,
) -> Option<Departure> {
    let mut session = inner.sessions.remove(&connection_id)?;
    let record = inner.registry.unregister(connection_id);

    session.phase = reason.terminal_phase();
    session.stop_tasks();
    if let Some(kill) = session.kill.take() {
        let _ = kill.send(reason);
    }

    let user_id = record.map(|record| record.user_id);
    let went_offline = user_id
        .as_deref()
        .is_some_and(|user| !inner.registry.is_online(user));

    Some(Departure {
        connection_id,
        user_id,
        went_offline,
        reason,
        phase: session.phase,
    })
}

fn try_push(
    connection_id: ConnectionId,
    session: &Session,
    event: ServerEvent,
) -> Result<(), DeliveryError> {
    session.outbox.try_send(event).map_err(|err| match err {
        mpsc::error::TrySendError::Full(_) => DeliveryError::Backpressure(connection_id),
        mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed(connection_id),
    })
}
