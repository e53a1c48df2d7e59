use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// One tool as offered to the completion model: name, description and a JSON
/// Schema for its arguments. The worker owns argument validation; this shape
/// only tells the model what it may call.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The built-in Workspace tool catalog. What the model is actually offered is
/// this list filtered through the request's allow-list.
pub fn builtin_tools() -> Vec<ToolSchema> {
    vec![
        ToolSchema {
            name: "drive_search_files".to_string(),
            description: "Search for files in Google Drive by name or content".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "limit": { "type": "number", "description": "Maximum number of results" }
                },
                "required": ["query"]
            }),
        },
        ToolSchema {
            name: "drive_read_file".to_string(),
            description: "Read the content of a file from Google Drive".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_id": { "type": "string", "description": "Drive file id" }
                },
                "required": ["file_id"]
            }),
        },
        ToolSchema {
            name: "gmail_send_email".to_string(),
            description: "Send an email via Gmail".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "to": { "type": "string", "description": "Recipient email address" },
                    "subject": { "type": "string", "description": "Email subject" },
                    "body": { "type": "string", "description": "Email body" }
                },
                "required": ["to", "subject", "body"]
            }),
        },
        ToolSchema {
            name: "gmail_list_messages".to_string(),
            description: "List recent Gmail messages".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Gmail search query" },
                    "limit": { "type": "number", "description": "Maximum number of messages" }
                }
            }),
        },
        ToolSchema {
            name: "calendar_create_event".to_string(),
            description: "Create a new calendar event".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Event title" },
                    "start": { "type": "string", "description": "Start time (ISO format)" },
                    "end": { "type": "string", "description": "End time (ISO format)" },
                    "attendees": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Attendee email addresses"
                    }
                },
                "required": ["title", "start", "end"]
            }),
        },
        ToolSchema {
            name: "calendar_list_events".to_string(),
            description: "List upcoming calendar events".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "time_min": { "type": "string", "description": "Earliest start time (ISO format)" },
                    "max_results": { "type": "number", "description": "Maximum number of events" }
                }
            }),
        },
    ]
}

/// Filter the catalog down to the caller's allow-list. An empty allow-list
/// offers nothing; names not in the catalog are silently ignored.
pub fn filter_enabled(enabled: &[String]) -> Vec<ToolSchema> {
    builtin_tools()
        .into_iter()
        .filter(|t| enabled.iter().any(|name| name == &t.name))
        .collect()
}
