use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use medchat_common::{Message, NewMessage};
use parking_lot::Mutex;

use super::message_db::MessageDatabase;
use super::models::{MessageFilter, Page, ReadUpdate};
use crate::error::StoreError;

/// Durable system of record for message rows.
///
/// Every call may suspend; callers must not hold registry state across it.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_message(&self, new_message: NewMessage) -> Result<Message, StoreError>;

    async fn get_message(&self, id: &str) -> Result<Option<Message>, StoreError>;

    async fn get_messages(
        &self,
        filter: MessageFilter,
        page: Page,
    ) -> Result<Vec<Message>, StoreError>;

    async fn count_unread(&self, user_id: &str) -> Result<u64, StoreError>;

    /// Mark read if still unread; `None` if the row does not exist.
    ///
    /// The check and the write are one step: of several concurrent calls for
    /// the same row, exactly one reports `transitioned`.
    async fn update_message_read(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ReadUpdate>, StoreError>;
}

/// [`MessageStore`] over a single SQLite connection.
///
/// Queries run on the blocking pool so the event loop never waits on disk.
#[derive(Clone)]
pub struct SqliteMessageStore {
    db: Arc<Mutex<MessageDatabase>>,
}

impl SqliteMessageStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Ok(Self::from_database(MessageDatabase::with_path(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::from_database(MessageDatabase::in_memory()?))
    }

    pub fn from_database(db: MessageDatabase) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn message_count(&self) -> Result<usize, StoreError> {
        Ok(self.db.lock().message_count()?)
    }

    async fn with_db<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&MessageDatabase) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db.lock();
            op(&*guard)
        })
        .await?
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn create_message(&self, new_message: NewMessage) -> Result<Message, StoreError> {
        self.with_db(move |db| db.create_message(&new_message, Utc::now()))
            .await
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>, StoreError> {
        let id = id.to_string();
        self.with_db(move |db| db.get_message(&id)).await
    }

    async fn get_messages(
        &self,
        filter: MessageFilter,
        page: Page,
    ) -> Result<Vec<Message>, StoreError> {
        self.with_db(move |db| db.get_messages(&filter, page)).await
    }

    async fn count_unread(&self, user_id: &str) -> Result<u64, StoreError> {
        let user_id = user_id.to_string();
        self.with_db(move |db| Ok(db.count_unread(&user_id)?)).await
    }

    async fn update_message_read(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ReadUpdate>, StoreError> {
        let id = id.to_string();
        self.with_db(move |db| db.mark_read(&id, at)).await
    }
}
