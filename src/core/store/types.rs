use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: i64,
    pub chat_id: String,
    pub user_id: String,
    pub role: String,
    pub content: String,
    pub model: Option<String>,
    pub tools_used: Vec<String>,
    pub attachment_ids: Vec<i64>,
    pub created_at: String,
}

/// `message_id` is None while the attachment row exists but its owning
/// message has not been created yet. Linking is mandatory before the chat
/// request that introduced the file responds.
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentRecord {
    pub id: i64,
    pub message_id: Option<i64>,
    pub user_id: String,
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub file_size: i64,
    pub storage_path: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub user_id: String,
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub file_size: i64,
    pub storage_path: String,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: String,
    pub user_id: String,
    pub role: String,
    pub content: String,
    pub model: Option<String>,
    pub tools_used: Vec<String>,
    pub attachment_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct GoogleTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackRecord {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub message: String,
    pub rating: i64,
    pub created_at: String,
}
