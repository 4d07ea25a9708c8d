use std::sync::Arc;

use async_trait::async_trait;
use medchat_common::{ClientCommand, ServerEvent};
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, sleep_until};

use super::state::ControllerState;
use super::transport::{Connector, Transport};
use crate::config::ControllerSettings;
use crate::error::ClientError;

/// Receives server events and controller state changes.
///
/// Callbacks run on the controller task: while one is pending, no heartbeat
/// is sent and no event is read. Long work belongs on a spawned task.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, event: ServerEvent);

    async fn on_state(&self, state: ControllerState) {
        let _ = state;
    }
}

/// Single handler slot. Subscribing replaces the occupant.
type HandlerSlot = Arc<RwLock<Option<Arc<dyn EventHandler>>>>;

/// Cheap, cloneable front door to a running [`ReconnectController`].
#[derive(Clone)]
pub struct ClientHandle {
    user_id: String,
    commands: mpsc::Sender<ClientCommand>,
    handler: HandlerSlot,
    state: watch::Receiver<ControllerState>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ClientHandle {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Queue a message. Commands issued while reconnecting go out after
    /// the next `authenticate`.
    pub async fn send_message(
        &self,
        recipient_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.submit(ClientCommand::SendMessage {
            sender_id: self.user_id.clone(),
            recipient_id: recipient_id.into(),
            content: content.into(),
        })
        .await
    }

    pub async fn mark_as_read(&self, message_id: impl Into<String>) -> Result<(), ClientError> {
        self.submit(ClientCommand::MarkAsRead {
            message_id: message_id.into(),
            user_id: self.user_id.clone(),
        })
        .await
    }

    async fn submit(&self, command: ClientCommand) -> Result<(), ClientError> {
        if self.state().is_terminal() {
            return Err(ClientError::Closed);
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Install `handler`, replacing any previous one.
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        *self.handler.write() = Some(handler);
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Watch channel of state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ControllerState> {
        self.state.clone()
    }

    /// Stop reconnecting and tear the connection down. The controller task
    /// ends with [`ControllerState::Closed`].
    pub fn unsubscribe(&self) {
        self.shutdown.send_replace(true);
        self.handler.write().take();
    }
}

enum SessionEnd {
    Closed,
    Lost(String),
}

/// Keeps one authenticated connection alive with bounded exponential backoff.
///
/// Retry state lives in the run loop, so every reconnect starts from the
/// same place: open a transport, send `authenticate` once, then pump.
pub struct ReconnectController {
    connector: Arc<dyn Connector>,
    user_id: String,
    settings: ControllerSettings,
    commands: mpsc::Receiver<ClientCommand>,
    handler: HandlerSlot,
    state: watch::Sender<ControllerState>,
    shutdown: watch::Receiver<bool>,
}

impl ReconnectController {
    pub fn spawn(
        connector: Arc<dyn Connector>,
        user_id: impl Into<String>,
        settings: ControllerSettings,
    ) -> (ClientHandle, JoinHandle<Result<(), ClientError>>) {
        let user_id = user_id.into();
        let (commands_tx, commands_rx) = mpsc::channel(settings.command_buffer);
        let (state_tx, state_rx) = watch::channel(ControllerState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handler: HandlerSlot = Arc::new(RwLock::new(None));

        let controller = Self {
            connector,
            user_id: user_id.clone(),
            settings,
            commands: commands_rx,
            handler: Arc::clone(&handler),
            state: state_tx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(controller.run());

        let handle = ClientHandle {
            user_id,
            commands: commands_tx,
            handler,
            state: state_rx,
            shutdown: Arc::new(shutdown_tx),
        };
        (handle, task)
    }

    async fn run(mut self) -> Result<(), ClientError> {
        let mut attempt: u32 = 0;
        self.set_state(ControllerState::Connecting).await;

        loop {
            let connected = tokio::select! {
                _ = closed(&mut self.shutdown) => return self.finish().await,
                result = self.connector.connect() => result,
            };

            match connected {
                Ok(mut transport) => {
                    attempt = 0;
                    let end = self.run_session(transport.as_mut()).await;
                    transport.close().await;
                    match end {
                        SessionEnd::Closed => return self.finish().await,
                        SessionEnd::Lost(reason) => log::warn!("Connection lost: {reason}"),
                    }
                }
                Err(err) => log::warn!("Connect failed: {err}"),
            }

            if !self.settings.reconnect.should_reconnect(attempt) {
                log::error!("Giving up after {attempt} reconnect attempts");
                self.set_state(ControllerState::Exhausted).await;
                return Err(ClientError::ReconnectExhausted { attempts: attempt });
            }

            let delay = self.settings.reconnect.delay_for(attempt);
            attempt += 1;
            self.set_state(ControllerState::Reconnecting { attempt }).await;
            log::info!("Reconnecting in {delay:?} (attempt {attempt})");

            tokio::select! {
                _ = closed(&mut self.shutdown) => return self.finish().await,
                _ = sleep(delay) => {}
            }
        }
    }

    async fn run_session(&mut self, transport: &mut dyn Transport) -> SessionEnd {
        let authenticate = ClientCommand::Authenticate {
            user_id: self.user_id.clone(),
        };
        if let Err(err) = transport.send(&authenticate).await {
            return SessionEnd::Lost(err.to_string());
        }
        self.set_state(ControllerState::Connected).await;
        log::info!("Connected as {}", self.user_id);

        let every = self.settings.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + every, every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pong_deadline: Option<Instant> = None;
        let mut consecutive_errors: u32 = 0;

        loop {
            let deadline = pong_deadline;
            tokio::select! {
                _ = closed(&mut self.shutdown) => {
                    if let Err(err) = transport.send(&ClientCommand::Disconnect).await {
                        log::debug!("Disconnect not sent: {err}");
                    }
                    return SessionEnd::Closed;
                }
                Some(command) = self.commands.recv() => {
                    if let Err(err) = transport.send(&command).await {
                        log::warn!("{} not sent: {err}", command.name());
                        return SessionEnd::Lost(err.to_string());
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(err) = transport.send(&ClientCommand::Ping).await {
                        return SessionEnd::Lost(err.to_string());
                    }
                    if pong_deadline.is_none() {
                        pong_deadline = Some(Instant::now() + self.settings.pong_timeout);
                    }
                }
                _ = overdue(deadline) => {
                    return SessionEnd::Lost(format!(
                        "no pong within {:?}",
                        self.settings.pong_timeout
                    ));
                }
                event = transport.next_event() => match event {
                    Ok(Some(event)) => {
                        match &event {
                            ServerEvent::Pong { .. } => {
                                pong_deadline = None;
                                consecutive_errors = 0;
                            }
                            ServerEvent::Error { code, message } => {
                                consecutive_errors += 1;
                                log::warn!("Server rejected a request ({code}): {message}");
                            }
                            _ => consecutive_errors = 0,
                        }
                        self.deliver(event).await;
                        if consecutive_errors >= self.settings.error_threshold.max(1) {
                            return SessionEnd::Lost(format!(
                                "{consecutive_errors} consecutive errors"
                            ));
                        }
                    }
                    Ok(None) => {
                        return SessionEnd::Lost("server closed the connection".to_string());
                    }
                    Err(ClientError::Protocol(err)) => {
                        log::warn!("Ignoring unreadable event: {err}")
                    }
                    Err(err) => return SessionEnd::Lost(err.to_string()),
                }
            }
        }
    }

    fn current_handler(&self) -> Option<Arc<dyn EventHandler>> {
        self.handler.read().clone()
    }

    async fn deliver(&self, event: ServerEvent) {
        if let Some(handler) = self.current_handler() {
            handler.on_event(event).await;
        }
    }

    async fn set_state(&self, state: ControllerState) {
        self.state.send_replace(state);
        if let Some(handler) = self.current_handler() {
            handler.on_state(state).await;
        }
    }

    async fn finish(&self) -> Result<(), ClientError> {
        log::info!("Client for {} closed", self.user_id);
        self.set_state(ControllerState::Closed).await;
        Ok(())
    }
}

/// Resolves once shutdown is requested or every handle is gone.
async fn closed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

async fn overdue(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
