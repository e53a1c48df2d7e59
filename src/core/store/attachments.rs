use anyhow::Result;
use rusqlite::params;

use super::ConversationStore;
use super::types::{AttachmentRecord, NewAttachment};

fn row_to_attachment(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttachmentRecord> {
    Ok(AttachmentRecord {
        id: row.get(0)?,
        message_id: row.get(1)?,
        user_id: row.get(2)?,
        filename: row.get(3)?,
        original_name: row.get(4)?,
        mime_type: row.get(5)?,
        file_size: row.get(6)?,
        storage_path: row.get(7)?,
        created_at: row.get(8)?,
    })
}

impl ConversationStore {
    /// Create an attachment row in the unlinked state (no owning message yet).
    pub async fn create_attachment(&self, att: NewAttachment) -> Result<AttachmentRecord> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO attachments (user_id, filename, original_name, mime_type, file_size, storage_path) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                att.user_id,
                att.filename,
                att.original_name,
                att.mime_type,
                att.file_size,
                att.storage_path
            ],
        )?;
        let id = db.last_insert_rowid();
        let record = db.query_row(
            "SELECT id, message_id, user_id, filename, original_name, mime_type, file_size, storage_path, created_at \
             FROM attachments WHERE id = ?1",
            params![id],
            row_to_attachment,
        )?;
        Ok(record)
    }

    /// Back-fill the owning message id, completing the two-phase creation.
    pub async fn link_attachment(&self, attachment_id: i64, message_id: i64) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE attachments SET message_id = ?2 WHERE id = ?1",
            params![attachment_id, message_id],
        )?;
        Ok(())
    }

    pub async fn get_attachment(&self, attachment_id: i64) -> Result<Option<AttachmentRecord>> {
        let db = self.db.lock().await;
        let record = db
            .query_row(
                "SELECT id, message_id, user_id, filename, original_name, mime_type, file_size, storage_path, created_at \
                 FROM attachments WHERE id = ?1",
                params![attachment_id],
                row_to_attachment,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(record)
    }
}
