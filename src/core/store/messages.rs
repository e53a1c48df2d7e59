use anyhow::Result;
use rusqlite::params;

use super::ConversationStore;
use super::types::{MessageRecord, NewMessage};

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let tools_used: String = row.get(6)?;
    let attachment_ids: String = row.get(7)?;
    Ok(MessageRecord {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        user_id: row.get(2)?,
        role: row.get(3)?,
        content: row.get(4)?,
        model: row.get(5)?,
        tools_used: serde_json::from_str(&tools_used).unwrap_or_default(),
        attachment_ids: serde_json::from_str(&attachment_ids).unwrap_or_default(),
        created_at: row.get(8)?,
    })
}

impl ConversationStore {
    /// Append-only: the AUTOINCREMENT id is the message order within a chat.
    pub async fn append_message(&self, msg: NewMessage) -> Result<MessageRecord> {
        let tools_used = serde_json::to_string(&msg.tools_used)?;
        let attachment_ids = serde_json::to_string(&msg.attachment_ids)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO messages (chat_id, user_id, role, content, model, tools_used, attachment_ids) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                msg.chat_id,
                msg.user_id,
                msg.role,
                msg.content,
                msg.model,
                tools_used,
                attachment_ids
            ],
        )?;
        let id = db.last_insert_rowid();
        let record = db.query_row(
            "SELECT id, chat_id, user_id, role, content, model, tools_used, attachment_ids, created_at \
             FROM messages WHERE id = ?1",
            params![id],
            row_to_message,
        )?;
        Ok(record)
    }

    pub async fn list_messages(&self, chat_id: &str) -> Result<Vec<MessageRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, chat_id, user_id, role, content, model, tools_used, attachment_ids, created_at \
             FROM messages WHERE chat_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![chat_id], row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}
