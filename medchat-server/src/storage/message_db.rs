use chrono::{DateTime, Utc};
use medchat_common::{Message, NewMessage};
use rusqlite::{OptionalExtension, Result as SqlResult, Row, params, params_from_iter};
use std::path::Path;
use uuid::Uuid;

use super::database::Database;
use super::models::{MessageFilter, MessageRow, Page, ReadUpdate};
use crate::error::StoreError;

const MESSAGE_COLUMNS: &str = "id, sender_id, recipient_id, content, created_at, read, read_at";

/// Synchronous SQLite access to the `messages` table.
pub struct MessageDatabase {
    db: Database,
}

impl MessageDatabase {
    /// Open (or create) the database file at `path`.
    pub fn with_path<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let message_db = Self {
            db: Database::open(path)?,
        };
        message_db.init_schema()?;
        Ok(message_db)
    }

    pub fn in_memory() -> SqlResult<Self> {
        let message_db = Self {
            db: Database::in_memory()?,
        };
        message_db.init_schema()?;
        Ok(message_db)
    }

    fn init_schema(&self) -> SqlResult<()> {
        let conn = self.db.connection();

        // `seq` breaks ties between rows persisted within the same millisecond.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                sender_id TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                read INTEGER NOT NULL DEFAULT 0,
                read_at INTEGER
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_inbox ON messages(recipient_id, read)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages(sender_id, recipient_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at)",
            [],
        )?;

        Ok(())
    }

    /// Persist a new message with a fresh id and return the stored row.
    pub fn create_message(
        &self,
        new_message: &NewMessage,
        now: DateTime<Utc>,
    ) -> Result<Message, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.db.connection().execute(
            "INSERT INTO messages (id, sender_id, recipient_id, content, created_at, read)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                id,
                new_message.sender_id,
                new_message.recipient_id,
                new_message.content,
                now.timestamp_millis()
            ],
        )?;

        self.get_message(&id)?
            .ok_or_else(|| StoreError::Corrupt(format!("message {id} vanished after insert")))
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>, StoreError> {
        let row = self
            .db
            .connection()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
                map_row,
            )
            .optional()?;

        row.map(MessageRow::into_message).transpose()
    }

    /// Filtered, paginated history in store order.
    pub fn get_messages(
        &self,
        filter: &MessageFilter,
        page: Page,
    ) -> Result<Vec<Message>, StoreError> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(sender_id) = &filter.sender_id {
            values.push(sender_id.clone());
            clauses.push(format!("sender_id = ?{}", values.len()));
        }
        if let Some(recipient_id) = &filter.recipient_id {
            values.push(recipient_id.clone());
            clauses.push(format!("recipient_id = ?{}", values.len()));
        }
        match (&filter.participant, &filter.counterpart) {
            (Some(a), Some(b)) => {
                values.push(a.clone());
                let a_idx = values.len();
                values.push(b.clone());
                let b_idx = values.len();
                clauses.push(format!(
                    "((sender_id = ?{a_idx} AND recipient_id = ?{b_idx}) \
                     OR (sender_id = ?{b_idx} AND recipient_id = ?{a_idx}))"
                ));
            }
            (Some(user), None) | (None, Some(user)) => {
                values.push(user.clone());
                let idx = values.len();
                clauses.push(format!("(sender_id = ?{idx} OR recipient_id = ?{idx})"));
            }
            (None, None) => {}
        }
        if filter.unread_only {
            clauses.push("read = 0".to_string());
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let Some(offset) = page.offset() else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages {where_clause}
             ORDER BY created_at ASC, seq ASC
             LIMIT {} OFFSET {}",
            page.limit, offset
        );

        let conn = self.db.connection();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), map_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    pub fn count_unread(&self, user_id: &str) -> SqlResult<u64> {
        let count: i64 = self.db.connection().query_row(
            "SELECT COUNT(*) FROM messages WHERE recipient_id = ?1 AND read = 0",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Flip `read` if it is still false, then return the row.
    ///
    /// `read_at` is written only on the false→true transition and never
    /// precedes `created_at`. Exactly one caller observes `transitioned`.
    pub fn mark_read(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ReadUpdate>, StoreError> {
        let changed = self.db.connection().execute(
            "UPDATE messages SET read = 1, read_at = MAX(?2, created_at)
             WHERE id = ?1 AND read = 0",
            params![id, at.timestamp_millis()],
        )?;
        Ok(self.get_message(id)?.map(|message| ReadUpdate {
            message,
            transitioned: changed > 0,
        }))
    }

    pub fn message_count(&self) -> SqlResult<usize> {
        let count: i64 =
            self.db
                .connection()
                .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn map_row(row: &Row<'_>) -> SqlResult<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        recipient_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        read: row.get::<_, i64>(5)? != 0,
        read_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn db() -> MessageDatabase {
        MessageDatabase::in_memory().unwrap()
    }

    fn send(db: &MessageDatabase, from: &str, to: &str, content: &str) -> Message {
        db.create_message(&NewMessage::new(from, to, content), Utc::now())
            .unwrap()
    }

    #[test]
    fn create_assigns_id_and_unread_state() {
        let db = db();
        let message = send(&db, "P1", "D1", "Hello");

        assert!(!message.id.is_empty());
        assert!(!message.read);
        assert!(message.read_at.is_none());
        assert_eq!(db.get_message(&message.id).unwrap(), Some(message));
        assert_eq!(db.message_count().unwrap(), 1);
    }

    #[test]
    fn conversation_filter_matches_both_directions() {
        let db = db();
        send(&db, "P1", "D1", "question");
        send(&db, "D1", "P1", "answer");
        send(&db, "P2", "D1", "other patient");

        let filter = MessageFilter {
            participant: Some("D1".to_string()),
            counterpart: Some("P1".to_string()),
            ..MessageFilter::default()
        };
        let conversation = db
            .get_messages(&filter, Page::default())
            .unwrap();
        let contents: Vec<_> = conversation.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["question", "answer"]);

        let all_for_d1 = db
            .get_messages(
                &MessageFilter {
                    participant: Some("D1".to_string()),
                    ..MessageFilter::default()
                },
                Page::default(),
            )
            .unwrap();
        assert_eq!(all_for_d1.len(), 3);
    }

    #[test]
    fn pagination_follows_store_order() {
        let db = db();
        let now = Utc::now();
        for i in 0..5 {
            db.create_message(&NewMessage::new("P1", "D1", format!("#{i}")), now)
                .unwrap();
        }

        let second_page = db
            .get_messages(&MessageFilter::default(), Page::new(2, 2))
            .unwrap();
        let contents: Vec<_> = second_page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["#2", "#3"]);

        let beyond = db
            .get_messages(&MessageFilter::default(), Page::new(usize::MAX, 2))
            .unwrap();
        assert!(beyond.is_empty());
    }

    #[test]
    fn mark_read_sets_timestamp_once() {
        let db = db();
        let message = send(&db, "P1", "D1", "Hello");
        let first_at = message.created_at + Duration::seconds(10);

        let first = db.mark_read(&message.id, first_at).unwrap().unwrap();
        let second = db
            .mark_read(&message.id, first_at + Duration::seconds(30))
            .unwrap()
            .unwrap();

        assert!(first.transitioned);
        assert!(!second.transitioned);
        assert!(first.message.read);
        assert_eq!(first.message.read_at, second.message.read_at);
        assert_eq!(db.count_unread("D1").unwrap(), 0);
    }

    #[test]
    fn read_timestamp_never_precedes_creation() {
        let db = db();
        let message = send(&db, "P1", "D1", "Hello");

        let read = db
            .mark_read(&message.id, message.created_at - Duration::hours(1))
            .unwrap()
            .unwrap()
            .message;
        assert!(read.read_at.unwrap() >= read.created_at);
    }

    #[test]
    fn unread_filter_and_count_agree() {
        let db = db();
        let first = send(&db, "P1", "D1", "one");
        send(&db, "P1", "D1", "two");
        send(&db, "D1", "P1", "reply");
        db.mark_read(&first.id, Utc::now()).unwrap();

        let filter = MessageFilter {
            recipient_id: Some("D1".to_string()),
            unread_only: true,
            ..MessageFilter::default()
        };
        let inbox = db
            .get_messages(&filter, Page::default())
            .unwrap();
        assert_eq!(inbox.len() as u64, db.count_unread("D1").unwrap());
        assert_eq!(inbox[0].content, "two");
    }

    #[test]
    fn missing_message_is_none() {
        let db = db();
        assert!(db.get_message("nope").unwrap().is_none());
        assert!(db.mark_read("nope", Utc::now()).unwrap().is_none());
    }
}
