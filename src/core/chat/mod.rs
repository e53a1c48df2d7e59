mod attachments;
#[cfg(test)]
mod tests;

pub use attachments::{FileParser, FileStorage, LocalDiskStorage, TextFileParser, UploadedFile};

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::core::error::ChatError;
use crate::core::llm::{ChatMessage, CompletionClient, CompletionOutcome};
use crate::core::store::ConversationStore;
use crate::core::store::types::{ChatRecord, NewAttachment, NewMessage};
use crate::core::tools;
use crate::core::worker::ToolExecutor;

pub const DEFAULT_MODEL: &str = "gpt-4";
pub const MAX_ATTACHMENTS: usize = 5;
const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug)]
pub struct ChatTurnRequest {
    pub user_id: String,
    /// None, "" or "new" all mean "create a chat for this turn".
    pub chat_id: Option<String>,
    pub message: String,
    pub model: String,
    pub enabled_tools: Vec<String>,
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Clone)]
pub struct ChatTurnResponse {
    pub text: String,
    pub chat_id: String,
    pub model: String,
    pub tools_used: Vec<String>,
}

/// Drives one chat turn end-to-end: resolve the chat, fold attachments into
/// the user turn, call the completion model with the enabled tool schemas,
/// resolve requested tool calls against the worker, persist both turns.
///
/// Tool results are annotated into the assistant text in model order rather
/// than fed back for a second completion round-trip.
pub struct ChatOrchestrator {
    store: Arc<ConversationStore>,
    completions: Arc<dyn CompletionClient>,
    tools: Arc<dyn ToolExecutor>,
    storage: Arc<dyn FileStorage>,
    parser: Arc<dyn FileParser>,
    tool_timeout: Duration,
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<ConversationStore>,
        completions: Arc<dyn CompletionClient>,
        tools: Arc<dyn ToolExecutor>,
        storage: Arc<dyn FileStorage>,
        parser: Arc<dyn FileParser>,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            store,
            completions,
            tools,
            storage,
            parser,
            tool_timeout,
        }
    }

    pub async fn run(&self, req: ChatTurnRequest) -> Result<ChatTurnResponse, ChatError> {
        if req.message.trim().is_empty() && req.files.is_empty() {
            return Err(ChatError::InvalidInput("Message or files required".to_string()));
        }
        if req.files.len() > MAX_ATTACHMENTS {
            return Err(ChatError::InvalidInput(format!(
                "At most {} attachments per request",
                MAX_ATTACHMENTS
            )));
        }

        let chat = self.resolve_chat(&req).await?;
        info!("Chat turn for chat [{}] (user {})", chat.id, req.user_id);

        let (file_blocks, attachment_ids) = self.ingest_attachments(&req).await?;
        let full_message = format!("{}{}", req.message, file_blocks);

        let user_message = self
            .store
            .append_message(NewMessage {
                chat_id: chat.id.clone(),
                user_id: req.user_id.clone(),
                role: "user".to_string(),
                content: full_message.clone(),
                model: None,
                tools_used: vec![],
                attachment_ids: attachment_ids.clone(),
            })
            .await?;

        // Complete the two-phase attachment creation before any completion
        // work; no response is ever produced with a dangling attachment.
        for attachment_id in &attachment_ids {
            self.store
                .link_attachment(*attachment_id, user_message.id)
                .await?;
        }

        let transcript = vec![
            ChatMessage::system(build_system_directive(&req.enabled_tools)),
            ChatMessage::user(full_message),
        ];
        let tool_schemas = tools::filter_enabled(&req.enabled_tools);

        let outcome = self
            .completions
            .complete(&req.model, &transcript, &tool_schemas)
            .await
            .map_err(|e| ChatError::Completion(e.to_string()))?;

        let mut tools_used = Vec::new();
        let response_text = match outcome {
            CompletionOutcome::Text(text) => text,
            CompletionOutcome::ToolCalls { preamble, calls } => {
                let mut text = preamble.unwrap_or_default();
                for call in calls {
                    info!("Executing tool [{}] (call {})", call.name, call.call_id);
                    tools_used.push(call.name.clone());
                    match self
                        .tools
                        .execute(&call.name, &call.args, self.tool_timeout)
                        .await
                    {
                        Ok(result) => {
                            text.push_str(&format!("\n\n[Tool: {} result: {}]", call.name, result));
                        }
                        Err(e) => {
                            warn!("Tool [{}] failed: {}", call.name, e);
                            text.push_str(&format!("\n\n[Tool: {} failed: {}]", call.name, e));
                        }
                    }
                }
                text
            }
        };

        self.store
            .append_message(NewMessage {
                chat_id: chat.id.clone(),
                user_id: req.user_id.clone(),
                role: "assistant".to_string(),
                content: response_text.clone(),
                model: Some(req.model.clone()),
                tools_used: tools_used.clone(),
                attachment_ids: vec![],
            })
            .await?;
        self.store.touch_chat(&chat.id).await?;

        Ok(ChatTurnResponse {
            text: response_text,
            chat_id: chat.id,
            model: req.model,
            tools_used,
        })
    }

    /// Exactly one of create or fetch+authorize happens per request.
    async fn resolve_chat(&self, req: &ChatTurnRequest) -> Result<ChatRecord, ChatError> {
        match req.chat_id.as_deref() {
            None | Some("") | Some("new") => {
                let title = derive_title(&req.message);
                Ok(self.store.create_chat(&req.user_id, &title).await?)
            }
            Some(chat_id) => {
                let chat = self
                    .store
                    .get_chat(chat_id)
                    .await?
                    .ok_or(ChatError::NotFound)?;
                if chat.user_id != req.user_id {
                    return Err(ChatError::Forbidden);
                }
                Ok(chat)
            }
        }
    }

    /// Store, record and parse each file in request order. A fault in one
    /// file becomes its inline error block; the rest still go through.
    async fn ingest_attachments(
        &self,
        req: &ChatTurnRequest,
    ) -> Result<(String, Vec<i64>), ChatError> {
        let mut blocks = String::new();
        let mut attachment_ids = Vec::new();

        for file in &req.files {
            let stored = match self.storage.store(&file.name, &file.data).await {
                Ok(stored) => stored,
                Err(e) => {
                    warn!("Failed to store upload [{}]: {}", file.name, e);
                    blocks.push_str(&error_block(&file.name, &e.to_string()));
                    continue;
                }
            };

            let mime_type = file.mime_type.clone().unwrap_or_else(|| {
                mime_guess::from_path(&file.name)
                    .first_or_octet_stream()
                    .to_string()
            });

            let attachment = self
                .store
                .create_attachment(NewAttachment {
                    user_id: req.user_id.clone(),
                    filename: stored.filename.clone(),
                    original_name: file.name.clone(),
                    mime_type: mime_type.clone(),
                    file_size: stored.size as i64,
                    storage_path: stored.storage_path.display().to_string(),
                })
                .await?;
            attachment_ids.push(attachment.id);

            match self
                .parser
                .parse(&stored.storage_path, &mime_type, &file.name)
                .await
            {
                Ok(content) => {
                    blocks.push_str(&format!("\n\n--- File: {} ---\n{}", file.name, content));
                }
                Err(e) => {
                    warn!("Failed to parse upload [{}]: {}", file.name, e);
                    blocks.push_str(&error_block(&file.name, &e.to_string()));
                }
            }
        }

        Ok((blocks, attachment_ids))
    }
}

fn error_block(name: &str, error: &str) -> String {
    format!("\n\n--- File: {} ---\nError processing file: {}", name, error)
}

/// First 50 characters of the message, or a fixed title for file-only turns.
fn derive_title(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return "File Upload".to_string();
    }
    let truncated: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// The system directive enumerates exactly the tools enabled for this
/// request; the model must not be told about anything outside the allow-list.
fn build_system_directive(enabled_tools: &[String]) -> String {
    format!(
        "You are a helpful AI assistant with access to Google Workspace tools. \
         You can help users with Google Drive, Gmail, Calendar, and file analysis. \
         Always be helpful and provide detailed responses.\n\n\
         Available tools: {}\n\n\
         If the user uploads files, analyze them and provide insights based on their content.",
        enabled_tools.join(", ")
    )
}
