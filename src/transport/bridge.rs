//! Typed command surface over the bridge process.
//!
//! `BridgeClient` owns the bridge subprocess and a [`Multiplexer`] over its
//! stdio. Components consume it through the [`BridgePort`] trait so tests
//! can substitute deterministic fakes.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::error::TransportError;
use crate::transport::mux::{EventHandler, Multiplexer};
use crate::transport::protocol::{Chat, Contact, Message};

/// Outbound command port to the messaging session.
#[async_trait]
pub trait BridgePort: Send + Sync {
    async fn get_messages(
        &self,
        chat_id: &str,
        limit: u32,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<Message>, TransportError>;

    async fn send_message(
        &self,
        phone_number: &str,
        message: &str,
        reply_to: Option<&str>,
    ) -> Result<Message, TransportError>;

    async fn get_chats(&self, limit: u32) -> Result<Vec<Chat>, TransportError>;

    async fn search_messages(
        &self,
        query: &str,
        chat_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Message>, TransportError>;

    async fn get_contact(&self, phone_number: &str) -> Result<Contact, TransportError>;
}

#[derive(serde::Deserialize)]
struct MessagesPayload {
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(serde::Deserialize)]
struct ChatsPayload {
    #[serde(default)]
    chats: Vec<Chat>,
}

/// Client for the external session bridge subprocess.
pub struct BridgeClient {
    mux: Arc<Multiplexer>,
    child: Mutex<Option<Child>>,
}

impl BridgeClient {
    /// Spawn the bridge process and start multiplexing its stdio.
    pub async fn spawn(config: &BridgeConfig) -> Result<Self, TransportError> {
        info!(program = %config.program, "spawning bridge process");

        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Io(std::io::Error::other("bridge stdin unavailable")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Io(std::io::Error::other("bridge stdout unavailable")))?;

        // The bridge logs session diagnostics (pairing codes included) on
        // stderr; forward them so the operator sees them.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "bridge", "{line}");
                }
            });
        }

        let mux = Multiplexer::start(
            stdout,
            stdin,
            Duration::from_secs(config.request_timeout_secs),
        );

        Ok(Self {
            mux,
            child: Mutex::new(Some(child)),
        })
    }

    /// Build a client over an already-running multiplexer.
    pub fn from_mux(mux: Arc<Multiplexer>) -> Self {
        Self {
            mux,
            child: Mutex::new(None),
        }
    }

    /// Wait for the bridge's READY line.
    pub async fn wait_ready(&self) {
        self.mux.wait_ready().await;
    }

    /// Register the handler for unsolicited bridge events.
    pub async fn set_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.mux.set_event_handler(handler).await;
    }

    /// Terminate the bridge process.
    pub async fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!("failed to terminate bridge process: {e}");
            }
            info!("bridge process terminated");
        }
    }
}

#[async_trait]
impl BridgePort for BridgeClient {
    async fn get_messages(
        &self,
        chat_id: &str,
        limit: u32,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<Message>, TransportError> {
        let mut params = serde_json::json!({
            "chat_id": chat_id,
            "limit": limit,
        });
        if let Some(start) = start_date {
            params["start_date"] = serde_json::json!(start.format("%Y-%m-%d").to_string());
        }
        if let Some(end) = end_date {
            params["end_date"] = serde_json::json!(end.format("%Y-%m-%d").to_string());
        }

        let data = self.mux.send("get_messages", params).await?;
        let payload: MessagesPayload =
            serde_json::from_value(data).map_err(|e| TransportError::Malformed(e.to_string()))?;
        Ok(payload.messages)
    }

    async fn send_message(
        &self,
        phone_number: &str,
        message: &str,
        reply_to: Option<&str>,
    ) -> Result<Message, TransportError> {
        let mut params = serde_json::json!({
            "phone_number": phone_number,
            "message": message,
        });
        if let Some(quoted) = reply_to {
            params["reply_to"] = serde_json::json!(quoted);
        }

        let data = self.mux.send("send_message", params).await?;

        // The bridge acks with the assigned id and addresses; the body is
        // what we just sent.
        Ok(Message {
            id: data["id"].as_str().unwrap_or_default().to_string(),
            from: data["from"].as_str().unwrap_or_default().to_string(),
            chat_id: data["chat_id"].as_str().unwrap_or_default().to_string(),
            body: message.to_string(),
            timestamp: Utc::now(),
            is_group: false,
            author: None,
            from_me: true,
        })
    }

    async fn get_chats(&self, limit: u32) -> Result<Vec<Chat>, TransportError> {
        let data = self
            .mux
            .send("get_chats", serde_json::json!({ "limit": limit }))
            .await?;
        let payload: ChatsPayload =
            serde_json::from_value(data).map_err(|e| TransportError::Malformed(e.to_string()))?;
        Ok(payload.chats)
    }

    async fn search_messages(
        &self,
        query: &str,
        chat_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Message>, TransportError> {
        let mut params = serde_json::json!({
            "query": query,
            "limit": limit,
        });
        if let Some(chat) = chat_id {
            params["chat_id"] = serde_json::json!(chat);
        }

        let data = self.mux.send("search_messages", params).await?;
        let payload: MessagesPayload =
            serde_json::from_value(data).map_err(|e| TransportError::Malformed(e.to_string()))?;
        Ok(payload.messages)
    }

    async fn get_contact(&self, phone_number: &str) -> Result<Contact, TransportError> {
        let data = self
            .mux
            .send("get_contact", serde_json::json!({ "phone_number": phone_number }))
            .await?;

        Ok(Contact {
            phone_number: phone_number.to_string(),
            name: data["name"].as_str().unwrap_or("Unknown").to_string(),
            is_business: data["is_business"].as_bool().unwrap_or(false),
            status: data["status"].as_str().unwrap_or_default().to_string(),
        })
    }
}
