use anyhow::Result;
use rusqlite::params;

use super::ConversationStore;
use super::types::FeedbackRecord;

impl ConversationStore {
    pub async fn create_feedback(
        &self,
        user_id: &str,
        user_name: &str,
        message: &str,
        rating: i64,
    ) -> Result<FeedbackRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO feedback (id, user_id, user_name, message, rating) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, user_id, user_name, message, rating],
        )?;
        let record = db.query_row(
            "SELECT id, user_id, user_name, message, rating, created_at FROM feedback WHERE id = ?1",
            params![id],
            row_to_feedback,
        )?;
        Ok(record)
    }

    pub async fn list_feedback(&self, limit: usize) -> Result<Vec<FeedbackRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, user_id, user_name, message, rating, created_at \
             FROM feedback ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_feedback)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

fn row_to_feedback(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeedbackRecord> {
    Ok(FeedbackRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        user_name: row.get(2)?,
        message: row.get(3)?,
        rating: row.get(4)?,
        created_at: row.get(5)?,
    })
}
