use super::*;
use crate::core::error::ToolCallError;
use crate::core::llm::ToolCallRequest;
use crate::core::store::test_store;
use crate::core::tools::ToolSchema;
use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct FakeCompletion {
    outcome: Mutex<Option<CompletionOutcome>>,
    fail: bool,
    offered_tools: Mutex<Vec<String>>,
    transcript: Mutex<Vec<ChatMessage>>,
}

impl FakeCompletion {
    fn text(text: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(Some(CompletionOutcome::Text(text.to_string()))),
            ..Default::default()
        })
    }

    fn tool_calls(calls: Vec<ToolCallRequest>) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(Some(CompletionOutcome::ToolCalls {
                preamble: Some("Working on it.".to_string()),
                calls,
            })),
            ..Default::default()
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    fn offered(&self) -> Vec<String> {
        self.offered_tools.lock().unwrap().clone()
    }

    fn system_directive(&self) -> String {
        self.transcript.lock().unwrap()[0].content.clone()
    }
}

#[async_trait]
impl CompletionClient for FakeCompletion {
    async fn complete(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<CompletionOutcome> {
        *self.transcript.lock().unwrap() = messages.to_vec();
        *self.offered_tools.lock().unwrap() = tools.iter().map(|t| t.name.clone()).collect();
        if self.fail {
            bail!("completion backend unavailable");
        }
        Ok(self
            .outcome
            .lock()
            .unwrap()
            .take()
            .expect("completion consumed twice"))
    }
}

enum ToolScript {
    Succeeds(Value),
    NotReady,
    Fails(String),
}

#[derive(Default)]
struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, ToolScript>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn with(name: &str, script: ToolScript) -> Arc<Self> {
        let executor = Self::default();
        executor
            .scripts
            .lock()
            .unwrap()
            .insert(name.to_string(), script);
        Arc::new(executor)
    }
}

#[async_trait]
impl ToolExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        name: &str,
        _args: &Value,
        _timeout: Duration,
    ) -> Result<Value, ToolCallError> {
        self.calls.lock().unwrap().push(name.to_string());
        match self.scripts.lock().unwrap().get(name) {
            Some(ToolScript::Succeeds(v)) => Ok(v.clone()),
            Some(ToolScript::NotReady) => Err(ToolCallError::WorkerNotReady),
            Some(ToolScript::Fails(msg)) => Err(ToolCallError::Invocation(msg.clone())),
            None => Err(ToolCallError::Invocation(format!("unknown tool {name}"))),
        }
    }
}

struct Harness {
    store: Arc<ConversationStore>,
    orchestrator: ChatOrchestrator,
    _uploads: tempfile::TempDir,
}

async fn harness_with(
    completion: Arc<FakeCompletion>,
    executor: Arc<ScriptedExecutor>,
) -> Harness {
    let store = Arc::new(test_store().await);
    let uploads = tempfile::tempdir().unwrap();
    let orchestrator = ChatOrchestrator::new(
        store.clone(),
        completion,
        executor,
        Arc::new(LocalDiskStorage::new(uploads.path().join("uploads"))),
        Arc::new(TextFileParser),
        Duration::from_secs(5),
    );
    Harness {
        store,
        orchestrator,
        _uploads: uploads,
    }
}

async fn harness(completion: Arc<FakeCompletion>) -> Harness {
    harness_with(completion, Arc::new(ScriptedExecutor::default())).await
}

fn request(message: &str) -> ChatTurnRequest {
    ChatTurnRequest {
        user_id: "user-1".to_string(),
        chat_id: Some("new".to_string()),
        message: message.to_string(),
        model: DEFAULT_MODEL.to_string(),
        enabled_tools: vec![],
        files: vec![],
    }
}

fn text_file(name: &str, content: &str) -> UploadedFile {
    UploadedFile {
        name: name.to_string(),
        mime_type: Some("text/plain".to_string()),
        data: content.as_bytes().to_vec(),
    }
}

#[tokio::test]
async fn empty_message_and_no_files_is_rejected_without_side_effects() {
    let h = harness(FakeCompletion::text("unused")).await;
    let err = h.orchestrator.run(request("   ")).await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(_)));
    assert!(h.store.list_chats("user-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn too_many_files_is_rejected() {
    let h = harness(FakeCompletion::text("unused")).await;
    let mut req = request("look at these");
    req.files = (0..6).map(|i| text_file(&format!("f{i}.txt"), "x")).collect();
    let err = h.orchestrator.run(req).await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(_)));
}

#[tokio::test]
async fn long_message_titles_truncate_at_fifty_chars() {
    let h = harness(FakeCompletion::text("ok")).await;
    let message = "a".repeat(60);
    let resp = h.orchestrator.run(request(&message)).await.unwrap();

    let chat = h.store.get_chat(&resp.chat_id).await.unwrap().unwrap();
    assert_eq!(chat.title, format!("{}...", "a".repeat(50)));
}

#[tokio::test]
async fn short_message_title_is_kept_verbatim() {
    let h = harness(FakeCompletion::text("ok")).await;
    let resp = h.orchestrator.run(request("Find Q1 proposal")).await.unwrap();
    let chat = h.store.get_chat(&resp.chat_id).await.unwrap().unwrap();
    assert_eq!(chat.title, "Find Q1 proposal");
}

#[tokio::test]
async fn file_only_request_gets_the_upload_title() {
    let h = harness(FakeCompletion::text("looked at it")).await;
    let mut req = request("");
    req.files = vec![text_file("report.txt", "numbers")];
    let resp = h.orchestrator.run(req).await.unwrap();

    let chat = h.store.get_chat(&resp.chat_id).await.unwrap().unwrap();
    assert_eq!(chat.title, "File Upload");
}

#[tokio::test]
async fn one_user_and_one_assistant_message_in_order() {
    let h = harness(FakeCompletion::text("the answer")).await;
    let resp = h.orchestrator.run(request("question")).await.unwrap();

    let chat = h.store.get_chat(&resp.chat_id).await.unwrap().unwrap();
    let messages = h.store.list_messages(&resp.chat_id).await.unwrap();
    let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["user", "assistant"]);
    assert_eq!(messages[1].content, "the answer");
    assert_eq!(messages[1].model.as_deref(), Some(DEFAULT_MODEL));
    assert!(chat.updated_at >= chat.created_at);
}

#[tokio::test]
async fn attachments_are_linked_before_the_response() {
    let h = harness(FakeCompletion::text("summarized")).await;
    let mut req = request("summarize these");
    req.files = vec![
        text_file("good.txt", "useful content"),
        UploadedFile {
            name: "scan.pdf".to_string(),
            mime_type: Some("application/pdf".to_string()),
            data: vec![0x25, 0x50, 0x44, 0x46],
        },
    ];
    let resp = h.orchestrator.run(req).await.unwrap();

    let messages = h.store.list_messages(&resp.chat_id).await.unwrap();
    let user_message = &messages[0];
    assert_eq!(user_message.attachment_ids.len(), 2);

    for attachment_id in &user_message.attachment_ids {
        let att = h.store.get_attachment(*attachment_id).await.unwrap().unwrap();
        assert_eq!(att.message_id, Some(user_message.id));
    }

    // One clean block, one inline error block, same message.
    assert!(user_message.content.contains("--- File: good.txt ---\nuseful content"));
    assert!(user_message.content.contains("--- File: scan.pdf ---\nError processing file:"));
}

#[tokio::test]
async fn tool_call_is_executed_annotated_and_audited() {
    let completion = FakeCompletion::tool_calls(vec![ToolCallRequest {
        call_id: "call_1".to_string(),
        name: "drive_search_files".to_string(),
        args: json!({"query": "Q1"}),
    }]);
    let executor = ScriptedExecutor::with(
        "drive_search_files",
        ToolScript::Succeeds(json!({"files": ["Q1 proposal.docx"]})),
    );
    let h = harness_with(completion, executor).await;

    let mut req = request("Find Q1 proposal");
    req.enabled_tools = vec!["drive_search_files".to_string()];
    let resp = h.orchestrator.run(req).await.unwrap();

    assert_eq!(resp.tools_used, vec!["drive_search_files"]);
    assert!(resp.text.starts_with("Working on it."));
    assert!(resp.text.contains("[Tool: drive_search_files result:"));
    assert!(resp.text.contains("Q1 proposal.docx"));

    let chat = h.store.get_chat(&resp.chat_id).await.unwrap().unwrap();
    assert_eq!(chat.title, "Find Q1 proposal");
    let messages = h.store.list_messages(&resp.chat_id).await.unwrap();
    assert_eq!(messages[1].tools_used, vec!["drive_search_files"]);
}

#[tokio::test]
async fn failed_tool_is_annotated_and_audited_but_request_succeeds() {
    let completion = FakeCompletion::tool_calls(vec![
        ToolCallRequest {
            call_id: "call_1".to_string(),
            name: "drive_search_files".to_string(),
            args: json!({"query": "Q1"}),
        },
        ToolCallRequest {
            call_id: "call_2".to_string(),
            name: "gmail_send_email".to_string(),
            args: json!({"to": "a@b.c", "subject": "s", "body": "b"}),
        },
    ]);
    let executor = ScriptedExecutor::with("gmail_send_email", ToolScript::NotReady);
    executor.scripts.lock().unwrap().insert(
        "drive_search_files".to_string(),
        ToolScript::Succeeds(json!({"files": []})),
    );
    let h = harness_with(completion, executor).await;

    let mut req = request("search then send");
    req.enabled_tools = vec![
        "drive_search_files".to_string(),
        "gmail_send_email".to_string(),
    ];
    let resp = h.orchestrator.run(req).await.unwrap();

    assert_eq!(resp.tools_used, vec!["drive_search_files", "gmail_send_email"]);
    assert!(resp.text.contains("[Tool: drive_search_files result:"));
    assert!(resp.text.contains("[Tool: gmail_send_email failed: tool worker is not ready]"));
}

#[tokio::test]
async fn only_allow_listed_tools_are_offered() {
    let completion = FakeCompletion::text("done");
    let h = harness(completion.clone()).await;

    let mut req = request("hello");
    req.enabled_tools = vec!["drive_search_files".to_string()];
    h.orchestrator.run(req).await.unwrap();

    assert_eq!(completion.offered(), vec!["drive_search_files"]);
    assert!(completion.system_directive().contains("Available tools: drive_search_files"));
}

#[tokio::test]
async fn empty_allow_list_offers_nothing() {
    let completion = FakeCompletion::text("done");
    let h = harness(completion.clone()).await;
    h.orchestrator.run(request("hello")).await.unwrap();
    assert!(completion.offered().is_empty());
}

#[tokio::test]
async fn missing_chat_is_not_found() {
    let h = harness(FakeCompletion::text("unused")).await;
    let mut req = request("hello");
    req.chat_id = Some("no-such-chat".to_string());
    let err = h.orchestrator.run(req).await.unwrap_err();
    assert!(matches!(err, ChatError::NotFound));
}

#[tokio::test]
async fn foreign_chat_is_forbidden() {
    let h = harness(FakeCompletion::text("unused")).await;
    let other = h.store.create_chat("someone-else", "theirs").await.unwrap();

    let mut req = request("hello");
    req.chat_id = Some(other.id);
    let err = h.orchestrator.run(req).await.unwrap_err();
    assert!(matches!(err, ChatError::Forbidden));
}

#[tokio::test]
async fn completion_failure_persists_no_assistant_message() {
    let h = harness(FakeCompletion::failing()).await;
    let err = h.orchestrator.run(request("hello")).await.unwrap_err();
    assert!(matches!(err, ChatError::Completion(_)));

    let chats = h.store.list_chats("user-1").await.unwrap();
    assert_eq!(chats.len(), 1);
    let messages = h.store.list_messages(&chats[0].id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, "user");
}

#[tokio::test]
async fn follow_up_turn_appends_to_the_existing_chat() {
    let h = harness(FakeCompletion::text("first answer")).await;
    let resp = h.orchestrator.run(request("first")).await.unwrap();

    let h2 = Harness {
        store: h.store.clone(),
        orchestrator: ChatOrchestrator::new(
            h.store.clone(),
            FakeCompletion::text("second answer"),
            Arc::new(ScriptedExecutor::default()),
            Arc::new(LocalDiskStorage::new(h._uploads.path().join("uploads"))),
            Arc::new(TextFileParser),
            Duration::from_secs(5),
        ),
        _uploads: tempfile::tempdir().unwrap(),
    };

    let mut req = request("second");
    req.chat_id = Some(resp.chat_id.clone());
    let resp2 = h2.orchestrator.run(req).await.unwrap();
    assert_eq!(resp2.chat_id, resp.chat_id);

    let messages = h.store.list_messages(&resp.chat_id).await.unwrap();
    let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["user", "assistant", "user", "assistant"]);
}

#[test]
fn derive_title_covers_the_edges() {
    assert_eq!(derive_title(""), "File Upload");
    assert_eq!(derive_title("short"), "short");
    let exactly_fifty = "b".repeat(50);
    assert_eq!(derive_title(&exactly_fifty), exactly_fifty);
    assert_eq!(derive_title(&"b".repeat(51)), format!("{}...", "b".repeat(50)));
}
