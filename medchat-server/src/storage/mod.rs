pub mod database;
pub mod message_db;
pub mod models;
pub mod store;

pub use message_db::MessageDatabase;
pub use models::{MessageFilter, Page, ReadUpdate};
pub use store::{MessageStore, SqliteMessageStore};

use std::fs;
use std::path::Path;

/// Ensure the directory holding the database file exists.
pub fn ensure_data_dir(database_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = database_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
