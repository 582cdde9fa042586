//! Query-time retrieval.
//!
//! Embeds the query once, then runs a scoped nearest-neighbour search.
//! Embedding failures abort the query; store failures are logged and
//! reported as "no hits" so the answerer can still respond.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::embedding::Embedder;
use crate::error::EmbedError;
use crate::models::{RetrievalHit, Scope};
use crate::store::VectorStore;

#[derive(Clone)]
pub struct Retriever {
    embedder: Embedder,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(embedder: Embedder, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        scope: &Scope,
        k: usize,
    ) -> Result<Vec<RetrievalHit>, EmbedError> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await?;

        match self.store.search(scope, &vector, k).await {
            Ok(hits) => {
                debug!(
                    owner = %scope.owner,
                    course = %scope.course,
                    hits = hits.len(),
                    "retrieved chunks"
                );
                Ok(hits)
            }
            Err(e) => {
                warn!(
                    owner = %scope.owner,
                    course = %scope.course,
                    error = %e,
                    "vector search failed; continuing without course materials"
                );
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{DisabledModel, EmbeddingModel, HashingModel};
    use crate::error::StoreError;
    use crate::models::{DocumentInfo, DocumentRef, NewChunk, SourceType};
    use crate::store::InMemoryVectorStore;
    use async_trait::async_trait;
    use std::time::Duration;

    fn embedder(model: Arc<dyn EmbeddingModel>) -> Embedder {
        Embedder::new(model, 16, Duration::from_secs(5))
    }

    struct FailingStore;

    #[async_trait]
    impl VectorStore for FailingStore {
        fn dims(&self) -> usize {
            32
        }
        async fn insert_chunk(&self, _: &DocumentRef, _: &NewChunk) -> Result<i64, StoreError> {
            Err(StoreError::Transient("down".into()))
        }
        async fn insert_document(
            &self,
            _: &DocumentRef,
            _: &[NewChunk],
        ) -> Result<Vec<i64>, StoreError> {
            Err(StoreError::Transient("down".into()))
        }
        async fn search(
            &self,
            _: &Scope,
            _: &[f32],
            _: usize,
        ) -> Result<Vec<RetrievalHit>, StoreError> {
            Err(StoreError::Transient("down".into()))
        }
        async fn delete_document(&self, _: &Scope, _: &str) -> Result<u64, StoreError> {
            Err(StoreError::Transient("down".into()))
        }
        async fn count_documents(&self, _: &Scope) -> Result<i64, StoreError> {
            Err(StoreError::Transient("down".into()))
        }
        async fn list_documents(&self, _: &Scope) -> Result<Vec<DocumentInfo>, StoreError> {
            Err(StoreError::Transient("down".into()))
        }
        async fn find_document(
            &self,
            _: &Scope,
            _: &str,
        ) -> Result<Option<DocumentInfo>, StoreError> {
            Err(StoreError::Transient("down".into()))
        }
        async fn blob_locators(&self, _: &Scope, _: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Transient("down".into()))
        }
        async fn chunk_indices(&self, _: &Scope, _: &str) -> Result<Vec<i64>, StoreError> {
            Err(StoreError::Transient("down".into()))
        }
    }

    #[tokio::test]
    async fn store_failure_degrades_to_no_hits() {
        let retriever = Retriever::new(
            embedder(Arc::new(HashingModel::new(32))),
            Arc::new(FailingStore),
        );
        let hits = retriever
            .retrieve("anything", &Scope::new("u1", "c1"), 5)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn embed_failure_surfaces() {
        let retriever = Retriever::new(
            embedder(Arc::new(DisabledModel::new(32))),
            Arc::new(InMemoryVectorStore::new(32)),
        );
        let err = retriever
            .retrieve("anything", &Scope::new("u1", "c1"), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::Disabled));
    }

    #[tokio::test]
    async fn returns_stored_text() {
        let model = Arc::new(HashingModel::new(32));
        let store = Arc::new(InMemoryVectorStore::new(32));
        let text = "Mitochondria produce ATP.".to_string();
        let vector = model.embed(&text).await.unwrap();
        store
            .insert_chunk(
                &DocumentRef {
                    scope: Scope::new("u1", "c1"),
                    name: "bio.txt".into(),
                    source_type: SourceType::Txt,
                    blob_locator: "u1/c1/x/bio.txt".into(),
                },
                &NewChunk {
                    index: 0,
                    text: text.clone(),
                    vector,
                    metadata: serde_json::json!({}),
                },
            )
            .await
            .unwrap();

        let retriever = Retriever::new(embedder(model), store);
        let hits = retriever
            .retrieve("mitochondria ATP", &Scope::new("u1", "c1"), 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, text);
        assert_eq!(hits[0].document_name, "bio.txt");
    }
}
