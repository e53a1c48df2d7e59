use anyhow::Result;
use rusqlite::params;

use super::ConversationStore;
use super::types::ChatRecord;

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRecord> {
    Ok(ChatRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

impl ConversationStore {
    pub async fn create_chat(&self, user_id: &str, title: &str) -> Result<ChatRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO chats (id, user_id, title) VALUES (?1, ?2, ?3)",
            params![id, user_id, title],
        )?;
        let chat = db.query_row(
            "SELECT id, user_id, title, created_at, updated_at FROM chats WHERE id = ?1",
            params![id],
            row_to_chat,
        )?;
        Ok(chat)
    }

    pub async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>> {
        let db = self.db.lock().await;
        let chat = db
            .query_row(
                "SELECT id, user_id, title, created_at, updated_at FROM chats WHERE id = ?1",
                params![chat_id],
                row_to_chat,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(chat)
    }

    /// Chats for one user, most recently updated first.
    pub async fn list_chats(&self, user_id: &str) -> Result<Vec<ChatRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, user_id, title, created_at, updated_at FROM chats \
             WHERE user_id = ?1 ORDER BY updated_at DESC, created_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id], row_to_chat)?;
        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }

    /// Advance `updated_at` to now. Called after every message append.
    pub async fn touch_chat(&self, chat_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE chats SET updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
            params![chat_id],
        )?;
        Ok(())
    }

    /// Delete a chat and everything hanging off it.
    pub async fn delete_chat(&self, chat_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        db.execute(
            "DELETE FROM attachments WHERE message_id IN \
             (SELECT id FROM messages WHERE chat_id = ?1)",
            params![chat_id],
        )?;
        db.execute("DELETE FROM messages WHERE chat_id = ?1", params![chat_id])?;
        let rows = db.execute("DELETE FROM chats WHERE id = ?1", params![chat_id])?;
        Ok(rows > 0)
    }
}
