use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use medchat_common::{ClientCommand, ErrorCode, Message, NewMessage, ServerEvent};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::router::DeliveryRouter;
use super::tracker::ReadTracker;
use crate::error::{ChatError, ChatResult};
use crate::presence::{
    ConnectionId, Departure, DisconnectReason, LivenessMonitor, LivenessSettings, Switchboard,
    SwitchboardStats,
};
use crate::storage::{MessageFilter, MessageStore, Page};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSettings {
    pub liveness: LivenessSettings,
    pub max_content_len: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            liveness: LivenessSettings::default(),
            max_content_len: 4_000,
            default_page_size: 50,
            max_page_size: 200,
        }
    }
}

/// Result of a successful send: the persisted row and whether any live
/// connection of the recipient received it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub message: Message,
    pub delivered: bool,
}

/// Owner of all live messaging state.
///
/// Both the duplex channel and the REST handlers go through the same
/// methods, so a history pull always reflects what live clients were told.
pub struct ChatHub {
    store: Arc<dyn MessageStore>,
    switchboard: Arc<Switchboard>,
    router: DeliveryRouter,
    tracker: ReadTracker,
    settings: HubSettings,
    stats_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChatHub {
    pub fn init(store: Arc<dyn MessageStore>, settings: HubSettings) -> Arc<Self> {
        let switchboard = Arc::new(Switchboard::new());
        Arc::new(Self {
            router: DeliveryRouter::new(Arc::clone(&switchboard)),
            tracker: ReadTracker::new(Arc::clone(&store), Arc::clone(&switchboard)),
            store,
            switchboard,
            settings,
            stats_task: Mutex::new(None),
        })
    }

    /// Periodically log connection statistics. Replaces a running logger.
    pub fn spawn_stats_logger(&self, every: Duration) {
        let switchboard = Arc::clone(&self.switchboard);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let stats = switchboard.stats();
                log::info!(
                    "Statistics: {} connections, {} online users, {} sessions",
                    stats.connections,
                    stats.online_users,
                    stats.sessions
                );
            }
        });
        if let Some(previous) = self.stats_task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Close every connection and stop background tasks.
    pub fn shutdown(&self) -> usize {
        if let Some(task) = self.stats_task.lock().take() {
            task.abort();
        }
        let closed = self.switchboard.drain(DisconnectReason::ServerShutdown);
        log::info!("Closed {closed} connections on shutdown");
        closed
    }

    /// Attach a transport. Events for it are written to `outbox`; the
    /// receiver fires when the hub wants the transport closed.
    ///
    /// The connection is closed if it does not authenticate in time.
    pub fn open_connection(
        &self,
        outbox: mpsc::Sender<ServerEvent>,
    ) -> (ConnectionId, oneshot::Receiver<DisconnectReason>) {
        let (connection_id, kill) = self.switchboard.attach(outbox);
        let deadline = LivenessMonitor::spawn_auth_deadline(
            Arc::clone(&self.switchboard),
            connection_id,
            self.settings.liveness.auth_timeout,
        );
        self.switchboard.install_deadline(connection_id, deadline);
        log::debug!("Connection {connection_id} opened");
        (connection_id, kill)
    }

    /// Handle one inbound event. Failures are answered with an `error` event
    /// on the same connection and never close it.
    pub async fn dispatch(&self, connection_id: ConnectionId, command: ClientCommand) {
        let name = command.name();
        let result = match command {
            ClientCommand::Authenticate { user_id } => {
                self.authenticate(connection_id, &user_id).await
            }
            ClientCommand::SendMessage {
                sender_id,
                recipient_id,
                content,
            } => {
                self.handle_send(
                    connection_id,
                    NewMessage::new(sender_id, recipient_id, content),
                )
                .await
            }
            ClientCommand::MarkAsRead {
                message_id,
                user_id,
            } => {
                self.handle_mark_read(connection_id, &message_id, &user_id)
                    .await
            }
            ClientCommand::Ping => {
                self.handle_ping(connection_id);
                Ok(())
            }
            ClientCommand::Disconnect => {
                self.disconnect(connection_id, DisconnectReason::ClientClosed);
                Ok(())
            }
        };

        if let Err(err) = result {
            self.reject(connection_id, name, &err);
        }
    }

    /// Answer a frame that could not be parsed as a known event.
    pub fn reject_frame(&self, connection_id: ConnectionId, detail: &str) {
        log::debug!("Connection {connection_id} sent an unreadable frame: {detail}");
        self.push_or_log(
            connection_id,
            ServerEvent::error(ErrorCode::InvalidEvent, detail),
        );
    }

    fn reject(&self, connection_id: ConnectionId, event: &str, err: &ChatError) {
        match err {
            ChatError::Storage(_) => log::error!("{event} on {connection_id} failed: {err}"),
            ChatError::Forbidden { .. } => {
                log::warn!("{event} on {connection_id} refused: {err}")
            }
            _ => log::debug!("{event} on {connection_id} rejected: {err}"),
        }
        self.push_or_log(connection_id, ServerEvent::error(err.code(), err.to_string()));
    }

    fn push_or_log(&self, connection_id: ConnectionId, event: ServerEvent) {
        let name = event.name();
        if let Err(err) = self.switchboard.push(connection_id, event) {
            log::debug!("Dropped {name} for {connection_id}: {err}");
        }
    }

    async fn authenticate(&self, connection_id: ConnectionId, user_id: &str) -> ChatResult<()> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ChatError::Validation("userId is required".to_string()));
        }

        let binding = match self.switchboard.bind(connection_id, user_id) {
            Ok(binding) => binding,
            Err(err) => {
                log::debug!("Authenticate for {user_id} ignored: {err}");
                return Ok(());
            }
        };

        if binding.needs_monitor {
            let monitor = LivenessMonitor::spawn(
                Arc::clone(&self.switchboard),
                connection_id,
                self.settings.liveness,
            );
            self.switchboard.install_monitor(connection_id, monitor);
        }
        if let Some(previous) = &binding.left_offline {
            log::info!("User {previous} is offline");
            self.switchboard.announce(previous, false);
        }
        if binding.came_online {
            log::info!("User {user_id} is online");
            self.switchboard.announce(user_id, true);
        }

        let count = self.tracker.unread_count(user_id).await?;
        self.push_or_log(
            connection_id,
            ServerEvent::UnreadCount {
                user_id: user_id.to_string(),
                count,
            },
        );
        Ok(())
    }

    fn authenticated_user(&self, connection_id: ConnectionId) -> ChatResult<String> {
        self.switchboard
            .user_of(connection_id)
            .ok_or(ChatError::NotAuthenticated)
    }

    async fn handle_send(
        &self,
        connection_id: ConnectionId,
        new_message: NewMessage,
    ) -> ChatResult<()> {
        let user_id = self.authenticated_user(connection_id)?;
        if new_message.sender_id != user_id {
            return Err(ChatError::forbidden(
                user_id,
                format!("send as {}", new_message.sender_id),
            ));
        }

        let receipt = self.send_message(new_message).await?;
        self.push_or_log(connection_id, ServerEvent::MessageSent(receipt.message));
        Ok(())
    }

    /// Validate, persist, then push to the recipient's live connections.
    ///
    /// Delivery failures never fail the send: the row is already durable.
    pub async fn send_message(&self, new_message: NewMessage) -> ChatResult<SendReceipt> {
        self.validate(&new_message)?;

        let message = self.store.create_message(new_message).await?;
        let outcome = self.router.route(&message);
        log::debug!(
            "Message {} from {} to {} persisted; live on {} connections",
            message.id,
            message.sender_id,
            message.recipient_id,
            outcome.connections
        );

        if self.switchboard.is_online(&message.recipient_id) {
            if let Err(err) = self.tracker.publish_unread(&message.recipient_id).await {
                log::error!(
                    "Unread count for {} not pushed: {err}",
                    message.recipient_id
                );
            }
        }

        Ok(SendReceipt {
            message,
            delivered: outcome.delivered,
        })
    }

    fn validate(&self, new_message: &NewMessage) -> ChatResult<()> {
        if new_message.sender_id.trim().is_empty() {
            return Err(ChatError::Validation("senderId is required".to_string()));
        }
        if new_message.recipient_id.trim().is_empty() {
            return Err(ChatError::Validation("recipientId is required".to_string()));
        }
        if new_message.content.trim().is_empty() {
            return Err(ChatError::Validation("content is required".to_string()));
        }
        let length = new_message.content.chars().count();
        if length > self.settings.max_content_len {
            return Err(ChatError::Validation(format!(
                "content is {length} characters; the limit is {}",
                self.settings.max_content_len
            )));
        }
        Ok(())
    }

    async fn handle_mark_read(
        &self,
        connection_id: ConnectionId,
        message_id: &str,
        user_id: &str,
    ) -> ChatResult<()> {
        let authenticated = self.authenticated_user(connection_id)?;
        if authenticated != user_id {
            return Err(ChatError::forbidden(
                authenticated,
                format!("mark messages read for {user_id}"),
            ));
        }
        self.mark_read(message_id, user_id).await.map(|_| ())
    }

    pub async fn mark_read(&self, message_id: &str, reader_id: &str) -> ChatResult<Message> {
        self.tracker.mark_read(message_id, reader_id).await
    }

    fn handle_ping(&self, connection_id: ConnectionId) {
        self.switchboard.heartbeat(connection_id);
        self.push_or_log(
            connection_id,
            ServerEvent::Pong {
                server_time: Utc::now(),
            },
        );
    }

    /// Heartbeat observed at the transport level (a websocket pong frame).
    pub fn transport_heartbeat(&self, connection_id: ConnectionId) -> bool {
        self.switchboard.heartbeat(connection_id)
    }

    /// Drop a connection and announce the user offline if it was their last.
    pub fn disconnect(
        &self,
        connection_id: ConnectionId,
        reason: DisconnectReason,
    ) -> Option<Departure> {
        let departure = self.switchboard.evict(connection_id, reason)?;
        match (&departure.user_id, departure.went_offline) {
            (Some(user_id), true) => log::info!("User {user_id} is offline ({reason:?})"),
            _ => log::debug!("Connection {connection_id} closed ({reason:?})"),
        }
        Some(departure)
    }

    /// Page request with configured defaults and the size cap applied.
    pub fn page(&self, page: Option<usize>, limit: Option<usize>) -> ChatResult<Page> {
        let page = Page::new(
            page.unwrap_or(1),
            limit.unwrap_or(self.settings.default_page_size),
        )
        .clamped(self.settings.max_page_size);
        if page.offset().is_none() {
            return Err(ChatError::Validation(format!(
                "page {} is out of range",
                page.page
            )));
        }
        Ok(page)
    }

    pub async fn messages(&self, filter: MessageFilter, page: Page) -> ChatResult<Vec<Message>> {
        let page = page.clamped(self.settings.max_page_size);
        Ok(self.store.get_messages(filter, page).await?)
    }

    pub async fn unread_count(&self, user_id: &str) -> ChatResult<u64> {
        self.tracker.unread_count(user_id).await
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.switchboard.is_online(user_id)
    }

    pub fn connection_count_for(&self, user_id: &str) -> usize {
        self.switchboard.connections_for(user_id).len()
    }

    pub fn stats(&self) -> SwitchboardStats {
        self.switchboard.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::storage::{ReadUpdate, SqliteMessageStore};
    use async_trait::async_trait;
    use chrono::DateTime;

    /// Store without the blocking pool, for paused-clock tests.
    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<Message>>,
        fail_writes: bool,
    }

    #[async_trait]
    impl MessageStore for MemoryStore {
        async fn create_message(&self, new_message: NewMessage) -> Result<Message, StoreError> {
            if self.fail_writes {
                return Err(StoreError::Corrupt("disk full".to_string()));
            }
            let mut rows = self.rows.lock();
            let message = Message {
                id: format!("m-{}", rows.len() + 1),
                sender_id: new_message.sender_id,
                recipient_id: new_message.recipient_id,
                content: new_message.content,
                created_at: Utc::now(),
                read: false,
                read_at: None,
            };
            rows.push(message.clone());
            Ok(message)
        }

        async fn get_message(&self, id: &str) -> Result<Option<Message>, StoreError> {
            Ok(self.rows.lock().iter().find(|m| m.id == id).cloned())
        }

        async fn get_messages(
            &self,
            filter: MessageFilter,
            _page: Page,
        ) -> Result<Vec<Message>, StoreError> {
            Ok(self
                .rows
                .lock()
                .iter()
                .filter(|m| {
                    filter
                        .recipient_id
                        .as_ref()
                        .is_none_or(|r| &m.recipient_id == r)
                })
                .filter(|m| !filter.unread_only || !m.read)
                .cloned()
                .collect())
        }

        async fn count_unread(&self, user_id: &str) -> Result<u64, StoreError> {
            let rows = self.rows.lock();
            Ok(rows
                .iter()
                .filter(|m| m.recipient_id == user_id && !m.read)
                .count() as u64)
        }

        async fn update_message_read(
            &self,
            id: &str,
            at: DateTime<Utc>,
        ) -> Result<Option<ReadUpdate>, StoreError> {
            let mut rows = self.rows.lock();
            let Some(row) = rows.iter_mut().find(|m| m.id == id) else {
                return Ok(None);
            };
            let transitioned = !row.read;
            if transitioned {
                row.read = true;
                row.read_at = Some(at.max(row.created_at));
            }
            Ok(Some(ReadUpdate {
                message: row.clone(),
                transitioned,
            }))
        }
    }

    fn sqlite_hub() -> (Arc<ChatHub>, SqliteMessageStore) {
        let store = SqliteMessageStore::in_memory().unwrap();
        let hub = ChatHub::init(Arc::new(store.clone()), HubSettings::default());
        (hub, store)
    }

    fn memory_hub() -> Arc<ChatHub> {
        ChatHub::init(Arc::new(MemoryStore::default()), HubSettings::default())
    }

    fn attach(hub: &ChatHub) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let (conn, _kill) = hub.open_connection(tx);
        (conn, rx)
    }

    /// Attach and authenticate, swallowing the initial unread count.
    async fn login(hub: &ChatHub, user: &str) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (conn, mut rx) = attach(hub);
        hub.dispatch(
            conn,
            ClientCommand::Authenticate {
                user_id: user.to_string(),
            },
        )
        .await;
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::UnreadCount { .. }
        ));
        (conn, rx)
    }

    /// Next queued event that is not a presence update.
    fn next(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
        loop {
            match rx.try_recv().unwrap() {
                ServerEvent::PresenceChanged { .. } => continue,
                event => return event,
            }
        }
    }

    fn send(from: &str, to: &str, content: &str) -> ClientCommand {
        ClientCommand::SendMessage {
            sender_id: from.to_string(),
            recipient_id: to.to_string(),
            content: content.to_string(),
        }
    }

    fn error_code(event: ServerEvent) -> ErrorCode {
        match event {
            ServerEvent::Error { code, .. } => code,
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn live_message_is_acked_delivered_and_counted() {
        let (hub, _store) = sqlite_hub();
        let (doctor, mut doctor_rx) = login(&hub, "D1").await;
        let (patient, mut patient_rx) = login(&hub, "P1").await;

        hub.dispatch(patient, send("P1", "D1", "Hello")).await;

        let ServerEvent::MessageSent(sent) = next(&mut patient_rx) else {
            panic!("expected messageSent ack");
        };
        assert!(!sent.id.is_empty());
        assert_eq!(next(&mut doctor_rx), ServerEvent::NewMessage(sent.clone()));
        assert_eq!(
            next(&mut doctor_rx),
            ServerEvent::UnreadCount {
                user_id: "D1".to_string(),
                count: 1,
            }
        );

        // Reading it clears the counter and notifies the sender.
        hub.dispatch(
            doctor,
            ClientCommand::MarkAsRead {
                message_id: sent.id.clone(),
                user_id: "D1".to_string(),
            },
        )
        .await;

        assert_eq!(
            next(&mut doctor_rx),
            ServerEvent::UnreadCount {
                user_id: "D1".to_string(),
                count: 0,
            }
        );
        let ServerEvent::MessageRead {
            message_id,
            reader_id,
            ..
        } = next(&mut patient_rx)
        else {
            panic!("expected read receipt");
        };
        assert_eq!(message_id, sent.id);
        assert_eq!(reader_id, "D1");

        let filter = MessageFilter {
            participant: Some("P1".to_string()),
            counterpart: Some("D1".to_string()),
            ..MessageFilter::default()
        };
        let stored = hub
            .messages(filter, Page::default())
            .await
            .unwrap();
        assert!(stored[0].read);
        assert!(stored[0].read_at.is_some());
    }

    #[tokio::test]
    async fn offline_recipient_gets_pending_count_on_login() {
        let (hub, store) = sqlite_hub();

        let receipt = hub
            .send_message(NewMessage::new("P1", "D1", "Are you there?"))
            .await
            .unwrap();
        assert!(!receipt.delivered);
        assert_eq!(store.message_count().unwrap(), 1);

        let (tx, mut rx) = mpsc::channel(8);
        let (conn, _kill) = hub.open_connection(tx);
        hub.dispatch(
            conn,
            ClientCommand::Authenticate {
                user_id: "D1".to_string(),
            },
        )
        .await;
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::UnreadCount {
                user_id: "D1".to_string(),
                count: 1,
            }
        );

        let filter = MessageFilter {
            recipient_id: Some("D1".to_string()),
            unread_only: true,
            ..MessageFilter::default()
        };
        let inbox = hub
            .messages(filter, Page::default())
            .await
            .unwrap();
        assert_eq!(inbox, vec![receipt.message]);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_stops_receiving_after_timeout() {
        let hub = memory_hub();
        let (_phone, _phone_rx) = login(&hub, "D1").await;
        let (laptop, mut laptop_rx) = login(&hub, "D1").await;

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(25)).await;
            hub.dispatch(laptop, ClientCommand::Ping).await;
        }
        assert_eq!(hub.connection_count_for("D1"), 1);

        let receipt = hub
            .send_message(NewMessage::new("P1", "D1", "Still there?"))
            .await
            .unwrap();
        assert!(receipt.delivered);

        while let Ok(event) = laptop_rx.try_recv() {
            if let ServerEvent::NewMessage(message) = event {
                assert_eq!(message.id, receipt.message.id);
                return;
            }
        }
        panic!("laptop never received the message");
    }

    #[tokio::test(start_paused = true)]
    async fn last_silent_device_leaves_user_offline() {
        let hub = memory_hub();
        let (_phone, _rx) = login(&hub, "D1").await;

        tokio::time::sleep(Duration::from_secs(91)).await;

        assert!(!hub.is_online("D1"));
        let receipt = hub
            .send_message(NewMessage::new("P1", "D1", "Hello?"))
            .await
            .unwrap();
        assert!(!receipt.delivered);
        assert_eq!(hub.unread_count("D1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn invalid_messages_never_reach_the_store() {
        let (hub, store) = sqlite_hub();

        for new_message in [
            NewMessage::new("", "D1", "Hello"),
            NewMessage::new("P1", " ", "Hello"),
            NewMessage::new("P1", "D1", "   "),
            NewMessage::new("P1", "D1", "x".repeat(4_001)),
        ] {
            let err = hub.send_message(new_message).await.unwrap_err();
            assert!(matches!(err, ChatError::Validation(_)));
        }
        assert_eq!(store.message_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn storage_failure_is_reported_to_sender_only() {
        let store = MemoryStore {
            fail_writes: true,
            ..MemoryStore::default()
        };
        let hub = ChatHub::init(Arc::new(store), HubSettings::default());
        let (_doctor, mut doctor_rx) = login(&hub, "D1").await;
        let (patient, mut patient_rx) = login(&hub, "P1").await;

        hub.dispatch(patient, send("P1", "D1", "Hello")).await;

        assert_eq!(error_code(next(&mut patient_rx)), ErrorCode::StorageError);
        while let Ok(event) = doctor_rx.try_recv() {
            assert!(matches!(event, ServerEvent::PresenceChanged { .. }));
        }
    }

    #[tokio::test]
    async fn commands_before_authenticate_are_rejected() {
        let hub = memory_hub();
        let (conn, mut rx) = attach(&hub);

        hub.dispatch(conn, send("P1", "D1", "Hello")).await;
        assert_eq!(error_code(rx.try_recv().unwrap()), ErrorCode::NotAuthenticated);

        hub.dispatch(
            conn,
            ClientCommand::MarkAsRead {
                message_id: "m-1".to_string(),
                user_id: "P1".to_string(),
            },
        )
        .await;
        assert_eq!(error_code(rx.try_recv().unwrap()), ErrorCode::NotAuthenticated);
    }

    #[tokio::test]
    async fn impersonation_is_forbidden() {
        let hub = memory_hub();
        let (patient, mut rx) = login(&hub, "P1").await;

        hub.dispatch(patient, send("P2", "D1", "Hello")).await;
        assert_eq!(error_code(next(&mut rx)), ErrorCode::Forbidden);

        let receipt = hub
            .send_message(NewMessage::new("D1", "P2", "Hi"))
            .await
            .unwrap();
        hub.dispatch(
            patient,
            ClientCommand::MarkAsRead {
                message_id: receipt.message.id,
                user_id: "P1".to_string(),
            },
        )
        .await;
        assert_eq!(error_code(next(&mut rx)), ErrorCode::Forbidden);
        assert_eq!(hub.unread_count("P2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_message_is_not_found() {
        let hub = memory_hub();
        let (doctor, mut rx) = login(&hub, "D1").await;

        hub.dispatch(
            doctor,
            ClientCommand::MarkAsRead {
                message_id: "nope".to_string(),
                user_id: "D1".to_string(),
            },
        )
        .await;
        assert_eq!(error_code(next(&mut rx)), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn messages_arrive_in_send_order() {
        let hub = memory_hub();
        let (_doctor, mut doctor_rx) = login(&hub, "D1").await;
        let (patient, _patient_rx) = login(&hub, "P1").await;

        for content in ["one", "two", "three"] {
            hub.dispatch(patient, send("P1", "D1", content)).await;
        }

        let mut received = Vec::new();
        while let Ok(event) = doctor_rx.try_recv() {
            if let ServerEvent::NewMessage(message) = event {
                received.push(message.content);
            }
        }
        assert_eq!(received, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let hub = memory_hub();
        let (conn, mut rx) = login(&hub, "P1").await;

        hub.dispatch(conn, ClientCommand::Ping).await;
        assert!(matches!(next(&mut rx), ServerEvent::Pong { .. }));
    }

    #[tokio::test]
    async fn disconnect_announces_offline_to_others() {
        let hub = memory_hub();
        let (patient, _patient_rx) = login(&hub, "P1").await;
        let (_doctor, mut doctor_rx) = login(&hub, "D1").await;

        hub.dispatch(patient, ClientCommand::Disconnect).await;

        assert_eq!(
            doctor_rx.try_recv().unwrap(),
            ServerEvent::PresenceChanged {
                user_id: "P1".to_string(),
                online: false,
            }
        );
        assert!(!hub.is_online("P1"));
        assert!(hub.disconnect(patient, DisconnectReason::ClientClosed).is_none());
    }

    #[tokio::test]
    async fn shutdown_closes_every_transport() {
        let hub = memory_hub();
        let (tx, _rx) = mpsc::channel(8);
        let (conn, kill) = hub.open_connection(tx);
        hub.dispatch(
            conn,
            ClientCommand::Authenticate {
                user_id: "P1".to_string(),
            },
        )
        .await;
        let (_other, _other_rx) = attach(&hub);

        assert_eq!(hub.shutdown(), 2);
        assert_eq!(kill.await.unwrap(), DisconnectReason::ServerShutdown);
        assert_eq!(hub.stats().sessions, 0);
    }

    #[tokio::test]
    async fn page_defaults_and_cap() {
        let hub = memory_hub();
        assert_eq!(hub.page(None, None).unwrap(), Page::new(1, 50));
        assert_eq!(hub.page(Some(3), Some(1_000)).unwrap(), Page::new(3, 200));
    }

    #[tokio::test]
    async fn unaddressable_page_is_a_validation_error() {
        let hub = memory_hub();
        let err = hub.page(Some(usize::MAX), None).unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn anonymous_socket_is_closed_after_auth_timeout() {
        let hub = memory_hub();
        let (tx, _rx) = mpsc::channel(8);
        let (_anonymous, kill) = hub.open_connection(tx);
        let (_patient, _patient_rx) = login(&hub, "P1").await;

        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(kill.await.unwrap(), DisconnectReason::Unauthenticated);
        assert!(hub.is_online("P1"));
        assert_eq!(hub.stats().sessions, 1);
    }
}
