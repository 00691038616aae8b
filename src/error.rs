//! Error types for all subsystems.

use thiserror::Error;

/// Errors from the bridge transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The bridge process is gone; all pending requests fail with this.
    #[error("transport closed")]
    Closed,

    /// A request did not receive its correlated response in time.
    #[error("request '{command}' timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    /// The bridge answered a request with `success: false`.
    #[error("bridge command '{command}' failed: {message}")]
    Command { command: String, message: String },

    /// A line on the channel could not be parsed. The read loop logs and
    /// skips these; the variant exists for callers that parse payloads.
    #[error("malformed bridge payload: {0}")]
    Malformed(String),

    #[error("bridge i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the task scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no scheduled task with id '{0}'")]
    NotFound(String),

    /// The task store could not durably record a mutation. New schedule
    /// requests are refused rather than acknowledged and lost.
    #[error("task store failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("unrecognized recurrence pattern '{0}'")]
    InvalidRecurrence(String),

    #[error("invalid schedule time: {0}")]
    InvalidTime(String),
}

/// Errors from the retrieval index. These never propagate into the
/// reasoning loop: indexing is best-effort and queries degrade to empty.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("index storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// Errors from the reasoning provider.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider rate limited (retry in {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Errors from tool execution. These are converted into structured
/// tool-result content before re-entering the reasoning loop.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("unknown tool '{0}'")]
    Unknown(String),
}

impl ToolError {
    /// Render this error as a tool result payload for the model.
    pub fn into_result(self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("unknown timezone '{0}'")]
    Timezone(String),
}
