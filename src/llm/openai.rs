//! OpenAI-compatible chat-completions provider with function calling.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::{
    ChatTurn, CompletionRequest, CompletionResponse, LlmProvider, ToolCallRequest,
};

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    max_retries: u32,
    retry_base: Duration,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
            retry_base: Duration::from_secs(5),
        }
    }

    async fn complete_once(&self, body: &Value) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited {
                retry_after_secs: self.retry_base.as_secs(),
            });
        }
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        parse_response(&data)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut body = json!({
            "model": self.model,
            "messages": build_messages(&request.turns),
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }

        debug!(model = %self.model, tools = request.tools.len(), "calling reasoning provider");

        let mut attempt = 0;
        loop {
            match self.complete_once(&body).await {
                Ok(response) => return Ok(response),
                Err(LlmError::RateLimited { retry_after_secs }) if attempt < self.max_retries => {
                    let delay = Duration::from_secs(retry_after_secs) * 2u32.pow(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs(),
                        "provider rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Map conversation turns onto the chat-completions wire format.
fn build_messages(turns: &[ChatTurn]) -> Vec<Value> {
    turns
        .iter()
        .map(|turn| match turn {
            ChatTurn::System { content } => json!({"role": "system", "content": content}),
            ChatTurn::User { content } => json!({"role": "user", "content": content}),
            ChatTurn::Assistant { content } => json!({"role": "assistant", "content": content}),
            ChatTurn::AssistantToolCalls { calls } => json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": calls.iter().map(|call| json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    }
                })).collect::<Vec<_>>(),
            }),
            ChatTurn::ToolResult {
                call_id,
                name,
                content,
            } => json!({
                "role": "tool",
                "tool_call_id": call_id,
                "name": name,
                "content": content,
            }),
        })
        .collect()
}

fn parse_response(data: &Value) -> Result<CompletionResponse, LlmError> {
    let message = data["choices"]
        .get(0)
        .map(|choice| &choice["message"])
        .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

    let content = message["content"].as_str().map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let arguments = call["function"]["arguments"]
                .as_str()
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_else(|| json!({}));
            tool_calls.push(ToolCallRequest {
                id: call["id"].as_str().unwrap_or_default().to_string(),
                name: call["function"]["name"].as_str().unwrap_or_default().to_string(),
                arguments,
            });
        }
    }

    Ok(CompletionResponse {
        content,
        tool_calls,
    })
}
