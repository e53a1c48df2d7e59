use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use super::{ChatMessage, CompletionClient, CompletionOutcome, ToolCallRequest};
use crate::core::tools::ToolSchema;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    // The provider sends arguments as a JSON-encoded string.
    arguments: String,
}

pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<CompletionOutcome> {
        let wire_messages = messages
            .iter()
            .map(|m| WireMessage {
                role: &m.role,
                content: &m.content,
            })
            .collect();

        let wire_tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let req = CompletionRequest {
            model,
            messages: wire_messages,
            tools: (!wire_tools.is_empty()).then_some(wire_tools),
            tool_choice: (!tools.is_empty()).then_some("auto"),
            temperature: 0.7,
            max_tokens: 2000,
        };

        let res = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "Completion API error: {}",
                res.text().await.unwrap_or_default()
            ));
        }

        let parsed: CompletionResponse = res.json().await?;
        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| anyhow!("Completion API returned no choices"))?;

        match message.tool_calls {
            Some(raw_calls) if !raw_calls.is_empty() => {
                let calls = raw_calls
                    .into_iter()
                    .map(|c| {
                        let args = match serde_json::from_str(&c.function.arguments) {
                            Ok(v) => v,
                            Err(e) => {
                                warn!(
                                    "Unparseable arguments for tool call [{}]: {}",
                                    c.function.name, e
                                );
                                json!({})
                            }
                        };
                        ToolCallRequest {
                            call_id: c.id,
                            name: c.function.name,
                            args,
                        }
                    })
                    .collect();
                Ok(CompletionOutcome::ToolCalls {
                    preamble: message.content,
                    calls,
                })
            }
            _ => Ok(CompletionOutcome::Text(message.content.unwrap_or_default())),
        }
    }
}
