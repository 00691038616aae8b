//! Messaging tools: direct sends, chat listing, and chat summarization.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::agent::tag_reply;
use crate::error::ToolError;
use crate::llm::{ChatTurn, CompletionRequest, LlmProvider};
use crate::tools::builtin::normalize_chat_id;
use crate::tools::{optional_u32, require_str, Tool};
use crate::transport::BridgePort;

/// Send a message through the bridge.
pub struct SendMessageTool {
    bridge: Arc<dyn BridgePort>,
}

impl SendMessageTool {
    pub fn new(bridge: Arc<dyn BridgePort>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        "send_message"
    }

    fn description(&self) -> &str {
        "Send a message to a phone number or group chat. For groups, use the \
         chat id from get_chats (ends with @g.us). For individuals, use digits \
         with country code. When the user refers to a contact by name, call \
         get_chats first to look up the id."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "phone_number": {
                    "type": "string",
                    "description": "Recipient phone number (digits with country code) or group chat id."
                },
                "message": {
                    "type": "string",
                    "description": "The message text to send."
                }
            },
            "required": ["phone_number", "message"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let phone_number = require_str(&params, "phone_number")?;
        let message = require_str(&params, "message")?;

        // Outbound text is bot-authored: tag it so a replayed copy is
        // recognized by the loop guard.
        self.bridge
            .send_message(phone_number, &tag_reply(message), None)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(serde_json::json!({
            "status": "sent",
            "to": phone_number,
            "message": message,
        }))
    }
}

/// List recent chats, individuals and groups.
pub struct ListChatsTool {
    bridge: Arc<dyn BridgePort>,
}

impl ListChatsTool {
    pub fn new(bridge: Arc<dyn BridgePort>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Tool for ListChatsTool {
    fn name(&self) -> &str {
        "get_chats"
    }

    fn description(&self) -> &str {
        "Get recent chats (individuals and groups), each with an id and name. \
         Call this first whenever the user refers to a chat by name instead of \
         a phone number."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "description": "Max number of chats to return.",
                    "default": 20
                }
            }
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let limit = optional_u32(&params, "limit", 20);

        let chats = self
            .bridge
            .get_chats(limit)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let formatted: Vec<serde_json::Value> = chats
            .iter()
            .map(|chat| {
                serde_json::json!({
                    "id": chat.id,
                    "name": chat.name,
                    "type": if chat.is_group { "group" } else { "individual" },
                    "unread": chat.unread_count,
                })
            })
            .collect();

        Ok(serde_json::json!({ "chats": formatted }))
    }
}

/// Fetch a chat's recent messages and summarize them with a one-shot,
/// tool-free provider call.
pub struct SummarizeChatTool {
    bridge: Arc<dyn BridgePort>,
    llm: Arc<dyn LlmProvider>,
}

impl SummarizeChatTool {
    pub fn new(bridge: Arc<dyn BridgePort>, llm: Arc<dyn LlmProvider>) -> Self {
        Self { bridge, llm }
    }
}

#[async_trait]
impl Tool for SummarizeChatTool {
    fn name(&self) -> &str {
        "summarize_chat"
    }

    fn description(&self) -> &str {
        "Fetch messages from a chat and produce a summary. Supports an \
         optional date range for summarizing older periods."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "chat_id": {
                    "type": "string",
                    "description": "Phone number or chat id of the chat to summarize."
                },
                "limit": {
                    "type": "integer",
                    "description": "Max number of messages to include.",
                    "default": 50
                },
                "start_date": {
                    "type": "string",
                    "description": "Earliest date to include, YYYY-MM-DD."
                },
                "end_date": {
                    "type": "string",
                    "description": "Latest date to include, YYYY-MM-DD."
                }
            },
            "required": ["chat_id"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let chat_id = normalize_chat_id(require_str(&params, "chat_id")?);
        let limit = optional_u32(&params, "limit", 50);
        let start_date = parse_date(&params, "start_date")?;
        let end_date = parse_date(&params, "end_date")?;

        let messages = self
            .bridge
            .get_messages(&chat_id, limit, start_date, end_date)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let transcript: Vec<String> = messages
            .iter()
            .filter(|msg| !msg.body.trim().is_empty())
            .map(|msg| format!("[{}] {}: {}", msg.timestamp.to_rfc3339(), msg.from, msg.body))
            .collect();

        if transcript.is_empty() {
            return Ok(serde_json::json!({
                "summary": serde_json::Value::Null,
                "message_count": 0,
                "note": format!("no messages found in chat {chat_id}"),
            }));
        }

        let prompt = format!(
            "Summarize the following conversation. Highlight key topics and \
             decisions, note action items and important dates, and keep it \
             concise.\n\n{}",
            transcript.join("\n")
        );

        let response = self
            .llm
            .complete(CompletionRequest {
                turns: vec![ChatTurn::user(prompt)],
                tools: Vec::new(),
            })
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let summary = response
            .content
            .ok_or_else(|| ToolError::ExecutionFailed("provider returned no summary".to_string()))?;

        Ok(serde_json::json!({
            "summary": summary,
            "message_count": transcript.len(),
        }))
    }
}

fn parse_date(params: &serde_json::Value, key: &str) -> Result<Option<NaiveDate>, ToolError> {
    match params.get(key).and_then(|v| v.as_str()) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ToolError::InvalidParameters(format!("'{key}' must be YYYY-MM-DD"))),
    }
}
