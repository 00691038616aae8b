//! Routes bridge events into per-participant processing lanes.
//!
//! The transport dispatches events in arrival order. The router keeps that
//! order per participant — each participant gets one worker draining an
//! ordered queue — while different participants process concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::agent::Agent;
use crate::transport::{EventHandler, InboundEvent};

/// An inbound message lifted out of the wire event.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub sender: String,
    pub chat_id: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub from_me: bool,
}

/// Parse a `message_received` event payload. Returns `None` when the
/// required fields are missing.
pub fn parse_message_event(data: &serde_json::Value) -> Option<InboundMessage> {
    let sender = data["from"].as_str()?.to_string();
    let body = data["body"].as_str()?.to_string();

    let id = data["id"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    // The bridge reports either epoch seconds or an ISO timestamp.
    let timestamp = match &data["timestamp"] {
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now),
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        _ => Utc::now(),
    };

    let chat_id = data["chat_id"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| sender.clone());

    Some(InboundMessage {
        id,
        sender,
        chat_id,
        body,
        timestamp,
        from_me: data["fromMe"].as_bool().unwrap_or(false),
    })
}

/// The registered bridge event handler.
pub struct EventRouter {
    agent: Arc<Agent>,
    lanes: Mutex<HashMap<String, mpsc::UnboundedSender<InboundMessage>>>,
}

impl EventRouter {
    pub fn new(agent: Arc<Agent>) -> Arc<Self> {
        Arc::new(Self {
            agent,
            lanes: Mutex::new(HashMap::new()),
        })
    }

    async fn route(&self, message: InboundMessage) {
        let mut lanes = self.lanes.lock().await;
        let lane = lanes
            .entry(message.sender.clone())
            .or_insert_with(|| self.spawn_lane());
        if lane.send(message).is_err() {
            error!("participant lane worker died; message dropped");
        }
    }

    fn spawn_lane(&self) -> mpsc::UnboundedSender<InboundMessage> {
        let (tx, mut rx) = mpsc::unbounded_channel::<InboundMessage>();
        let agent = Arc::clone(&self.agent);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                agent.process_message(message).await;
            }
        });
        tx
    }
}

#[async_trait]
impl EventHandler for EventRouter {
    async fn handle(&self, event: InboundEvent) {
        match event.event.as_str() {
            "message_received" => match parse_message_event(&event.data) {
                Some(message) => self.route(message).await,
                None => warn!("message_received event missing required fields"),
            },
            InboundEvent::DISCONNECTED => {
                warn!("bridge disconnected; no further events will arrive");
            }
            other => debug!(event = other, "ignoring bridge event"),
        }
    }
}
