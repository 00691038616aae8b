//! Tools the reasoning model may invoke.
//!
//! Every tool failure — unknown name, bad parameters, execution error — is
//! rendered as structured result content and fed back to the model. A
//! misbehaving tool can never abort the conversation.

mod builtin;

pub use builtin::{
    CancelScheduledTaskTool, ListChatsTool, ListScheduledTasksTool, ScheduleMessageTool,
    SearchMessagesTool, SendMessageTool, SummarizeChatTool,
};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::ToolError;
use crate::llm::ToolDefinition;

/// A named action the model can request.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// Registry of available tools, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schema handed to the reasoning provider.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Execute one requested call. Never fails: errors come back as
    /// `{"error": ...}` result content.
    pub async fn dispatch(&self, name: &str, params: serde_json::Value) -> serde_json::Value {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "model requested unregistered tool");
            return ToolError::Unknown(name.to_string()).into_result();
        };

        match tool.execute(params).await {
            Ok(output) => {
                info!(tool = name, "tool executed");
                output
            }
            Err(e) => {
                warn!(tool = name, "tool failed: {e}");
                e.into_result()
            }
        }
    }
}

/// Pull a required string parameter.
pub(crate) fn require_str<'a>(
    params: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing '{key}' parameter")))
}

/// Pull an optional integer parameter with a default.
pub(crate) fn optional_u32(params: &serde_json::Value, key: &str, default: u32) -> u32 {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v.min(u64::from(u32::MAX)) as u32)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the input back."
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn execute(
            &self,
            params: serde_json::Value,
        ) -> Result<serde_json::Value, ToolError> {
            let text = require_str(&params, "text")?;
            Ok(serde_json::json!({"echo": text}))
        }
    }

    #[tokio::test]
    async fn dispatch_runs_registered_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let result = registry
            .dispatch("echo", serde_json::json!({"text": "hi"}))
            .await;
        assert_eq!(result["echo"], "hi");
    }

    #[tokio::test]
    async fn unknown_tool_yields_structured_error() {
        let registry = ToolRegistry::new();
        let result = registry.dispatch("nope", serde_json::json!({})).await;
        assert!(result["error"].as_str().unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn invalid_parameters_yield_structured_error() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let result = registry.dispatch("echo", serde_json::json!({})).await;
        assert!(result["error"].as_str().unwrap().contains("missing 'text'"));
    }

    #[test]
    fn definitions_are_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.definitions()[0].name, "echo");
        assert!(!registry.is_empty());
        assert_eq!(registry.len(), 1);
    }
}
