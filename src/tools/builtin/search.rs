//! Semantic search over indexed message history.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ToolError;
use crate::retrieval::{MessageIndex, QueryFilter};
use crate::tools::{optional_u32, require_str, Tool};

pub struct SearchMessagesTool {
    index: Arc<MessageIndex>,
}

impl SearchMessagesTool {
    pub fn new(index: Arc<MessageIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Tool for SearchMessagesTool {
    fn name(&self) -> &str {
        "search_messages"
    }

    fn description(&self) -> &str {
        "Search previously indexed messages by meaning, not exact words. Use \
         this to find what someone said about a topic."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for, in natural language."
                },
                "chat_id": {
                    "type": "string",
                    "description": "Restrict the search to one chat."
                },
                "limit": {
                    "type": "integer",
                    "description": "Max results to return.",
                    "default": 5,
                    "maximum": 20
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let query = require_str(&params, "query")?;
        let limit = optional_u32(&params, "limit", 5).min(20) as usize;

        let filter = QueryFilter {
            chat_id: params
                .get("chat_id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            ..QueryFilter::default()
        };

        let hits = self.index.query(query, limit, &filter).await;

        let results: Vec<serde_json::Value> = hits
            .iter()
            .map(|hit| {
                serde_json::json!({
                    "content": hit.message.body.chars().take(300).collect::<String>(),
                    "sender": hit.message.participant_id,
                    "chat_id": hit.message.chat_id,
                    "timestamp": hit.message.timestamp.to_rfc3339(),
                    "score": format!("{:.1}%", hit.score * 100.0),
                })
            })
            .collect();

        let total_indexed = self
            .index
            .stats()
            .map(|stats| stats.total_messages)
            .unwrap_or(0);

        Ok(serde_json::json!({
            "results": results,
            "total_indexed": total_indexed,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use chrono::{TimeZone, Utc};

    use crate::error::RetrievalError;
    use crate::retrieval::{EmbeddingProvider, IndexedMessage};

    struct StubEmbeddings {
        table: HashMap<&'static str, Vec<f32>>,
    }

    #[async_trait]
    impl EmbeddingProvider for StubEmbeddings {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
            self.table
                .get(text)
                .cloned()
                .ok_or_else(|| RetrievalError::Embedding("unknown".to_string()))
        }
    }

    fn index() -> Arc<MessageIndex> {
        let embeddings = Arc::new(StubEmbeddings {
            table: HashMap::from([
                ("lunch friday", vec![1.0, 0.0]),
                ("invoice overdue", vec![0.0, 1.0]),
                ("lunch plans", vec![0.9, 0.1]),
            ]),
        });
        Arc::new(MessageIndex::open_in_memory(embeddings).unwrap())
    }

    #[tokio::test]
    async fn search_returns_ranked_results() {
        let index = index();
        index
            .index(&IndexedMessage {
                id: "m1".to_string(),
                participant_id: "15550001111".to_string(),
                chat_id: "c1".to_string(),
                body: "lunch friday".to_string(),
                timestamp: Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap(),
            })
            .await;
        index
            .index(&IndexedMessage {
                id: "m2".to_string(),
                participant_id: "15550002222".to_string(),
                chat_id: "c2".to_string(),
                body: "invoice overdue".to_string(),
                timestamp: Utc.with_ymd_and_hms(2026, 6, 1, 13, 0, 0).unwrap(),
            })
            .await;

        let tool = SearchMessagesTool::new(index);
        let result = tool
            .execute(serde_json::json!({"query": "lunch plans"}))
            .await
            .unwrap();

        let results = result["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["content"], "lunch friday");
        assert_eq!(result["total_indexed"], 2);
    }

    #[tokio::test]
    async fn failed_query_embedding_degrades_to_no_results() {
        let tool = SearchMessagesTool::new(index());
        let result = tool
            .execute(serde_json::json!({"query": "never embedded"}))
            .await
            .unwrap();
        assert!(result["results"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_parameter_is_required() {
        let tool = SearchMessagesTool::new(index());
        let err = tool.execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }
}
