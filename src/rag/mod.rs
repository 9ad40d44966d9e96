pub mod embeddings;
pub mod vector_store;

use std::sync::Arc;

use anyhow::Result;
use self::embeddings::Embedder;
use crate::config::RetrievalSettings;
use crate::models::SearchHit;
use crate::store::KnowledgeStore;

/// Query side of the knowledge table.
pub struct KnowledgeBase {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn KnowledgeStore>,
    default_top_k: usize,
    max_top_k: usize,
}

impl KnowledgeBase {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn KnowledgeStore>,
        settings: &RetrievalSettings,
    ) -> Self {
        Self {
            embedder,
            store,
            default_top_k: settings.default_top_k,
            max_top_k: settings.max_top_k,
        }
    }

    pub fn effective_top_k(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_top_k)
            .clamp(1, self.max_top_k)
    }

    pub async fn search(
        &self,
        query: &str,
        clinic_id: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        let query_embedding = self.embedder.embed(query).await?;
        let limit = self.effective_top_k(top_k) as i64;
        self.store.search(query_embedding, clinic_id, limit).await
    }

    pub async fn retrieve_context(&self, query: &str, clinic_id: Option<&str>) -> Result<String> {
        let hits = self.search(query, clinic_id, None).await?;
        Ok(render_context(&hits))
    }
}

pub fn render_context(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let context = hits
        .iter()
        .map(|hit| hit.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("Relevant clinic information:\n{}\n\n", context)
}
