//! Reasoning provider port.
//!
//! The model is an opaque collaborator: it receives conversation turns plus
//! a tool schema and answers with terminal text, tool-call requests, or
//! both. The orchestrator never sees provider internals, so tests drive it
//! with scripted fakes.

mod openai;
mod session;

pub use openai::OpenAiProvider;
pub use session::{ConversationSession, SessionStore};

use async_trait::async_trait;

use crate::error::LlmError;

/// One conversation turn, shaped for tool-calling chat models.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatTurn {
    System { content: String },
    User { content: String },
    Assistant { content: String },
    /// The model requested tool invocations.
    AssistantToolCalls { calls: Vec<ToolCallRequest> },
    /// A tool's output, fed back to the model.
    ToolResult {
        call_id: String,
        name: String,
        content: String,
    },
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        output: &serde_json::Value,
    ) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            name: name.into(),
            content: output.to_string(),
        }
    }

    /// Approximate token footprint (about four characters per token).
    pub fn estimated_tokens(&self) -> usize {
        let chars = match self {
            ChatTurn::System { content }
            | ChatTurn::User { content }
            | ChatTurn::Assistant { content }
            | ChatTurn::ToolResult { content, .. } => content.len(),
            ChatTurn::AssistantToolCalls { calls } => calls
                .iter()
                .map(|c| c.name.len() + c.arguments.to_string().len())
                .sum(),
        };
        chars / 4 + 1
    }
}

/// A tool the model may call, described by a JSON schema.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One reasoning request: full turn history plus the available tools.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub turns: Vec<ChatTurn>,
    pub tools: Vec<ToolDefinition>,
}

/// The model's answer: terminal text, tool calls, or both.
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

/// Opaque reasoning provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}
