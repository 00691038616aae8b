//! Retrieval context provider.
//!
//! Message bodies are embedded and stored with their metadata; queries
//! return the top-K most similar prior messages. Failures here must never
//! reach the reasoning loop: indexing is best-effort and a failed query
//! yields an empty result set.

mod embeddings;

pub use embeddings::{EmbeddingProvider, HttpEmbeddings};

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, warn};

use crate::error::RetrievalError;

/// A message admitted to the index. Immutable once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedMessage {
    pub id: String,
    pub participant_id: String,
    pub chat_id: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// A query hit with its similarity score, in [0, 1] for unit-norm inputs.
#[derive(Debug, Clone)]
pub struct ScoredMessage {
    pub message: IndexedMessage,
    pub score: f32,
}

/// Optional metadata restrictions for a query.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub chat_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Index totals for `/stats`.
#[derive(Debug, Clone, Copy)]
pub struct IndexStats {
    pub total_messages: u64,
}

/// Sqlite-backed vector index over message bodies.
pub struct MessageIndex {
    conn: Mutex<Connection>,
    embeddings: Arc<dyn EmbeddingProvider>,
}

impl MessageIndex {
    pub fn open(path: &Path, embeddings: Arc<dyn EmbeddingProvider>) -> Result<Self, RetrievalError> {
        Self::bootstrap(Connection::open(path)?, embeddings)
    }

    pub fn open_in_memory(embeddings: Arc<dyn EmbeddingProvider>) -> Result<Self, RetrievalError> {
        Self::bootstrap(Connection::open_in_memory()?, embeddings)
    }

    fn bootstrap(
        conn: Connection,
        embeddings: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, RetrievalError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id             TEXT PRIMARY KEY,
                participant_id TEXT NOT NULL,
                chat_id        TEXT NOT NULL,
                body           TEXT NOT NULL,
                timestamp      TEXT NOT NULL,
                embedding      BLOB NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            embeddings,
        })
    }

    /// Index a message. Best-effort: embedding or storage failures are
    /// logged and swallowed so ingestion can never take down the pipeline.
    pub async fn index(&self, message: &IndexedMessage) {
        if message.body.trim().is_empty() {
            return;
        }

        let embedding = match self.embeddings.embed(&message.body).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(message_id = %message.id, "skipping message, embedding failed: {e}");
                return;
            }
        };

        let result = {
            let conn = self.conn.lock().expect("index lock poisoned");
            conn.execute(
                "INSERT OR REPLACE INTO messages
                    (id, participant_id, chat_id, body, timestamp, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.id,
                    message.participant_id,
                    message.chat_id,
                    message.body,
                    message.timestamp.to_rfc3339(),
                    encode_vector(&embedding),
                ],
            )
        };

        match result {
            Ok(_) => debug!(message_id = %message.id, "indexed message"),
            Err(e) => warn!(message_id = %message.id, "failed to store message: {e}"),
        }
    }

    /// Return the `top_k` stored messages most similar to `text`, most
    /// similar first. Any failure degrades to an empty result set.
    pub async fn query(&self, text: &str, top_k: usize, filter: &QueryFilter) -> Vec<ScoredMessage> {
        let query_vector = match self.embeddings.embed(text).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!("query embedding failed, returning no context: {e}");
                return Vec::new();
            }
        };

        let candidates = match self.candidates(filter) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("index scan failed, returning no context: {e}");
                return Vec::new();
            }
        };

        let mut scored: Vec<ScoredMessage> = candidates
            .into_iter()
            .map(|(message, embedding)| ScoredMessage {
                score: cosine_similarity(&query_vector, &embedding),
                message,
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        scored
    }

    fn candidates(
        &self,
        filter: &QueryFilter,
    ) -> Result<Vec<(IndexedMessage, Vec<f32>)>, RetrievalError> {
        let conn = self.conn.lock().expect("index lock poisoned");

        let mut sql = String::from(
            "SELECT id, participant_id, chat_id, body, timestamp, embedding
             FROM messages WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(ref chat_id) = filter.chat_id {
            sql.push_str(" AND chat_id = ?");
            args.push(chat_id.clone());
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND timestamp >= ?");
            args.push(since.to_rfc3339());
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND timestamp <= ?");
            args.push(until.to_rfc3339());
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            let timestamp: String = row.get(4)?;
            let blob: Vec<u8> = row.get(5)?;
            Ok((
                IndexedMessage {
                    id: row.get(0)?,
                    participant_id: row.get(1)?,
                    chat_id: row.get(2)?,
                    body: row.get(3)?,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(
                                4,
                                rusqlite::types::Type::Text,
                                Box::new(e),
                            )
                        })?,
                },
                decode_vector(&blob),
            ))
        })?;

        let mut candidates = Vec::new();
        for row in rows {
            candidates.push(row?);
        }
        Ok(candidates)
    }

    /// Index totals.
    pub fn stats(&self) -> Result<IndexStats, RetrievalError> {
        let conn = self.conn.lock().expect("index lock poisoned");
        let total: u64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(IndexStats {
            total_messages: total,
        })
    }

    /// Drop all messages from one chat.
    pub fn delete_chat(&self, chat_id: &str) -> Result<usize, RetrievalError> {
        let conn = self.conn.lock().expect("index lock poisoned");
        let deleted = conn.execute("DELETE FROM messages WHERE chat_id = ?1", params![chat_id])?;
        Ok(deleted)
    }

    /// Drop everything. Explicit resets only; nothing else deletes rows.
    pub fn reset(&self) -> Result<(), RetrievalError> {
        let conn = self.conn.lock().expect("index lock poisoned");
        conn.execute("DELETE FROM messages", [])?;
        Ok(())
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
