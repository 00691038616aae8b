//! Per-participant conversation sessions.
//!
//! Each counterpart gets one session holding the ordered turn history.
//! Histories are bounded by a turn cap and an approximate token budget;
//! trimming drops the oldest turns first and never touches the bootstrap
//! (system) turns. Sessions live for the process lifetime unless cleared.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::llm::ChatTurn;

/// Ordered turn history for one participant.
#[derive(Debug)]
pub struct ConversationSession {
    participant_id: String,
    turns: Vec<ChatTurn>,
    /// Leading turns that are never trimmed.
    bootstrap_len: usize,
    created_at: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(participant_id: impl Into<String>, system_instructions: &str) -> Self {
        Self {
            participant_id: participant_id.into(),
            turns: vec![ChatTurn::system(system_instructions)],
            bootstrap_len: 1,
            created_at: Utc::now(),
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn push(&mut self, turn: ChatTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// Number of turns beyond the bootstrap.
    pub fn history_len(&self) -> usize {
        self.turns.len() - self.bootstrap_len
    }

    /// Enforce the turn cap and token budget, oldest turns first. After
    /// trimming, the first retained history turn is realigned to a user
    /// turn so the model never sees a dangling tool exchange.
    pub fn trim(&mut self, max_turns: usize, max_tokens: usize) {
        let before = self.turns.len();

        while self.history_len() > max_turns {
            self.turns.remove(self.bootstrap_len);
        }

        while self.estimated_tokens() > max_tokens && self.history_len() > 2 {
            self.turns.remove(self.bootstrap_len);
        }

        while self
            .turns
            .get(self.bootstrap_len)
            .is_some_and(|turn| !matches!(turn, ChatTurn::User { .. }))
        {
            self.turns.remove(self.bootstrap_len);
        }

        if self.turns.len() < before {
            debug!(
                participant = %self.participant_id,
                dropped = before - self.turns.len(),
                "trimmed conversation history"
            );
        }
    }

    fn estimated_tokens(&self) -> usize {
        self.turns.iter().map(ChatTurn::estimated_tokens).sum()
    }
}

/// Map of participant id to session, owned by the orchestrator.
///
/// The entry-level lock is the per-participant serialization point: a
/// message holds its participant's session for its whole pipeline, while
/// other participants proceed concurrently.
pub struct SessionStore {
    system_instructions: String,
    max_turns: usize,
    max_tokens: usize,
    sessions: Mutex<HashMap<String, Arc<Mutex<ConversationSession>>>>,
}

impl SessionStore {
    pub fn new(system_instructions: impl Into<String>, max_turns: usize, max_tokens: usize) -> Self {
        Self {
            system_instructions: system_instructions.into(),
            max_turns,
            max_tokens,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch or create the session for a participant.
    pub async fn get_or_create(&self, participant_id: &str) -> Arc<Mutex<ConversationSession>> {
        let mut sessions = self.sessions.lock().await;
        Arc::clone(sessions.entry(participant_id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(ConversationSession::new(
                participant_id,
                &self.system_instructions,
            )))
        }))
    }

    /// Drop a participant's history. Returns false when none existed.
    pub async fn clear(&self, participant_id: &str) -> bool {
        self.sessions.lock().await.remove(participant_id).is_some()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Apply the configured bounds to one session.
    pub fn trim(&self, session: &mut ConversationSession) {
        session.trim(self.max_turns, self.max_tokens);
    }
}
