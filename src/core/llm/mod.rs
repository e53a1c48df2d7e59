mod openai;

pub use openai::OpenAiClient;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::core::tools::ToolSchema;

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One tool invocation requested by the model. `call_id` is the provider's
/// correlation id, carried for logging only.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub args: Value,
}

/// What one completion round-trip produced: either a final answer, or a set
/// of tool calls (possibly with text alongside them).
#[derive(Debug)]
pub enum CompletionOutcome {
    Text(String),
    ToolCalls {
        preamble: Option<String>,
        calls: Vec<ToolCallRequest>,
    },
}

/// Boundary to the completion-model API. Given a transcript and the tool
/// schemas enabled for this request, returns text or requested tool calls.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<CompletionOutcome>;
}
