//! Finds groups whose text reads alike even when fingerprints differ

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use faultline_embeddings::{cosine_similarity, Embedding, Tokenizer, DEFAULT_EMBEDDING_SIZE};
use serde::Serialize;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::fingerprint::normalize_message;

use super::types::{ErrorEvent, ErrorGroup, ErrorTrackingError};

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SimilarGroup {
    pub group_id: i32,
    pub score: f32,
}

#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    async fn index_group(&self, group: &ErrorGroup, event: &ErrorEvent) -> Result<(), ErrorTrackingError>;

    /// Best matches first, excluding `group_id` itself
    async fn similar_to(
        &self,
        project_id: i32,
        group_id: i32,
        limit: usize,
    ) -> Result<Vec<SimilarGroup>, ErrorTrackingError>;
}

/// The text a group is embedded from
pub fn group_document(error_type: &str, message: &str) -> String {
    format!("{} {}", error_type, normalize_message(message))
}

/// In-process index of bag-of-token embeddings, one per group
pub struct EmbeddingSimilarityIndex {
    tokenizer: Arc<dyn Tokenizer>,
    dimensions: usize,
    min_score: f32,
    vectors: RwLock<HashMap<i32, HashMap<i32, Embedding>>>,
}

impl EmbeddingSimilarityIndex {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            tokenizer,
            dimensions: DEFAULT_EMBEDDING_SIZE,
            min_score: 0.5,
            vectors: RwLock::new(HashMap::new()),
        }
    }

    fn embed(&self, text: &str) -> Result<Embedding, ErrorTrackingError> {
        let tokens = self
            .tokenizer
            .encode(text)
            .map_err(|e| ErrorTrackingError::Storage(format!("tokenizer: {}", e)))?;
        Ok(Embedding::from_tokens(&tokens, self.dimensions))
    }
}

#[async_trait]
impl SimilarityIndex for EmbeddingSimilarityIndex {
    async fn index_group(&self, group: &ErrorGroup, event: &ErrorEvent) -> Result<(), ErrorTrackingError> {
        let embedding = self.embed(&group_document(&event.error_type, &event.message))?;
        self.vectors
            .write()
            .await
            .entry(group.project_id)
            .or_default()
            .insert(group.id, embedding);
        Ok(())
    }

    async fn similar_to(
        &self,
        project_id: i32,
        group_id: i32,
        limit: usize,
    ) -> Result<Vec<SimilarGroup>, ErrorTrackingError> {
        let vectors = self.vectors.read().await;
        let Some(project) = vectors.get(&project_id) else {
            return Ok(Vec::new());
        };
        let Some(target) = project.get(&group_id) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<SimilarGroup> = project
            .iter()
            .filter(|(id, _)| **id != group_id)
            .map(|(id, embedding)| SimilarGroup {
                group_id: *id,
                score: cosine_similarity(target, embedding),
            })
            .filter(|m| m.score >= self.min_score)
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.group_id.cmp(&b.group_id))
        });
        matches.truncate(limit);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::event_store::test_support::event;
    use crate::services::types::NewErrorGroup;
    use chrono::Utc;
    use faultline_embeddings::HashTokenizer;

    fn group_for(id: i32, project_id: i32, error_type: &str, message: &str) -> (ErrorGroup, ErrorEvent) {
        let mut e = event(&format!("e{}", id), project_id, "2024-01-15T10:00:00Z");
        e.error_type = error_type.to_string();
        e.message = message.to_string();
        let group = NewErrorGroup::from_event(&e, format!("h{}", id)).into_group(id, Utc::now());
        (group, e)
    }

    #[tokio::test]
    async fn test_similar_groups_rank_above_unrelated() {
        let index = EmbeddingSimilarityIndex::new(Arc::new(HashTokenizer::new(10000)));
        let entries = [
            group_for(1, 1, "TypeError", "Cannot read property 'id' of undefined"),
            group_for(2, 1, "TypeError", "Cannot read property 'name' of undefined"),
            group_for(3, 1, "IOError", "disk quota exceeded on volume"),
            group_for(4, 2, "TypeError", "Cannot read property 'id' of undefined"),
        ];
        for (group, e) in &entries {
            index.index_group(group, e).await.unwrap();
        }

        let similar = index.similar_to(1, 1, 5).await.unwrap();
        assert_eq!(similar.first().map(|m| m.group_id), Some(2));
        assert!(similar.iter().all(|m| m.group_id != 4));
        assert!(similar.iter().all(|m| m.group_id != 3));
    }

    #[tokio::test]
    async fn test_unknown_group_has_no_matches() {
        let index = EmbeddingSimilarityIndex::new(Arc::new(HashTokenizer::new(10000)));
        assert!(index.similar_to(1, 42, 5).await.unwrap().is_empty());
    }
}
