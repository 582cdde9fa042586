//! Scoped vector storage.
//!
//! The [`VectorStore`] trait owns every chunk row and its embedding. All
//! reads and writes take the `(owner, course)` [`Scope`] explicitly; a
//! search never returns rows from another scope.
//!
//! # Implementations
//!
//! - [`SqliteVectorStore`]: persistent, backed by the `document_embeddings`
//!   table, with an in-process [`ann`] index per scope.
//! - [`InMemoryVectorStore`]: non-persistent, exact scan; used in tests.

pub mod ann;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{DocumentInfo, DocumentRef, NewChunk, RetrievalHit, Scope};

pub use memory::InMemoryVectorStore;
pub use sqlite::SqliteVectorStore;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embedding dimension every stored vector must have.
    fn dims(&self) -> usize;

    /// Insert one chunk row and return its id.
    async fn insert_chunk(&self, doc: &DocumentRef, chunk: &NewChunk) -> Result<i64, StoreError>;

    /// Insert all chunks of a document atomically, in the given order.
    ///
    /// Either every row becomes visible or none does.
    async fn insert_document(
        &self,
        doc: &DocumentRef,
        chunks: &[NewChunk],
    ) -> Result<Vec<i64>, StoreError>;

    /// Up to `k` rows of `scope` nearest to `query`, ascending by cosine
    /// distance.
    async fn search(
        &self,
        scope: &Scope,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievalHit>, StoreError>;

    /// Remove every row of one document. Returns the number removed.
    async fn delete_document(&self, scope: &Scope, name: &str) -> Result<u64, StoreError>;

    /// Number of distinct documents in `scope`.
    async fn count_documents(&self, scope: &Scope) -> Result<i64, StoreError>;

    async fn list_documents(&self, scope: &Scope) -> Result<Vec<DocumentInfo>, StoreError>;

    async fn find_document(
        &self,
        scope: &Scope,
        name: &str,
    ) -> Result<Option<DocumentInfo>, StoreError>;

    /// Distinct blob locators referenced by one document's rows.
    async fn blob_locators(&self, scope: &Scope, name: &str) -> Result<Vec<String>, StoreError>;

    /// Stored chunk indices of one document, ascending.
    async fn chunk_indices(&self, scope: &Scope, name: &str) -> Result<Vec<i64>, StoreError>;
}

/// Check a chunk against the row pre-conditions before it is written.
pub(crate) fn validate_chunk(dims: usize, chunk: &NewChunk) -> Result<(), StoreError> {
    if chunk.vector.len() != dims {
        return Err(StoreError::DimensionMismatch {
            expected: dims,
            actual: chunk.vector.len(),
        });
    }
    if chunk.text.trim().is_empty() {
        return Err(StoreError::InvalidChunk(format!(
            "chunk {} has empty text",
            chunk.index
        )));
    }
    if chunk.index < 0 {
        return Err(StoreError::InvalidChunk(format!(
            "negative chunk index {}",
            chunk.index
        )));
    }
    Ok(())
}

pub(crate) fn check_query(dims: usize, query: &[f32]) -> Result<(), StoreError> {
    if query.len() != dims {
        return Err(StoreError::DimensionMismatch {
            expected: dims,
            actual: query.len(),
        });
    }
    Ok(())
}
