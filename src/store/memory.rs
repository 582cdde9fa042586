//! In-memory [`VectorStore`] implementation for tests.
//!
//! Rows live in a `Vec` behind `std::sync::RwLock`. Search is an exact
//! cosine scan over the rows of the requested scope.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::error::StoreError;
use crate::models::{DocumentInfo, DocumentRef, NewChunk, RetrievalHit, Scope, SourceType};

use super::ann::rank;
use super::{check_query, validate_chunk, VectorStore};

struct Row {
    id: i64,
    scope: Scope,
    document_name: String,
    source_type: SourceType,
    blob_locator: String,
    chunk_index: i64,
    text: String,
    vector: Vec<f32>,
    created_at: i64,
}

#[derive(Default)]
struct Rows {
    next_id: i64,
    rows: Vec<Row>,
}

pub struct InMemoryVectorStore {
    dims: usize,
    inner: RwLock<Rows>,
}

impl InMemoryVectorStore {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            inner: RwLock::new(Rows::default()),
        }
    }

    fn push(rows: &mut Rows, doc: &DocumentRef, chunk: &NewChunk, now: i64) -> i64 {
        rows.next_id += 1;
        let id = rows.next_id;
        rows.rows.push(Row {
            id,
            scope: doc.scope.clone(),
            document_name: doc.name.clone(),
            source_type: doc.source_type,
            blob_locator: doc.blob_locator.clone(),
            chunk_index: chunk.index,
            text: chunk.text.clone(),
            vector: chunk.vector.clone(),
            created_at: now,
        });
        id
    }

    fn summarize<'a>(rows: impl Iterator<Item = &'a Row>) -> Vec<DocumentInfo> {
        let mut docs: BTreeMap<&str, DocumentInfo> = BTreeMap::new();
        for row in rows {
            docs.entry(row.document_name.as_str())
                .and_modify(|info| {
                    info.chunk_count += 1;
                    info.created_at = info.created_at.min(row.created_at);
                })
                .or_insert_with(|| DocumentInfo {
                    name: row.document_name.clone(),
                    source_type: row.source_type,
                    blob_locator: row.blob_locator.clone(),
                    chunk_count: 1,
                    created_at: row.created_at,
                });
        }
        docs.into_values().collect()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn insert_chunk(&self, doc: &DocumentRef, chunk: &NewChunk) -> Result<i64, StoreError> {
        validate_chunk(self.dims, chunk)?;
        let now = chrono::Utc::now().timestamp();
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        Ok(Self::push(&mut inner, doc, chunk, now))
    }

    async fn insert_document(
        &self,
        doc: &DocumentRef,
        chunks: &[NewChunk],
    ) -> Result<Vec<i64>, StoreError> {
        for chunk in chunks {
            validate_chunk(self.dims, chunk)?;
        }
        let now = chrono::Utc::now().timestamp();
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        Ok(chunks
            .iter()
            .map(|chunk| Self::push(&mut inner, doc, chunk, now))
            .collect())
    }

    async fn search(
        &self,
        scope: &Scope,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievalHit>, StoreError> {
        check_query(self.dims, query)?;
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let in_scope: Vec<&Row> = inner.rows.iter().filter(|r| &r.scope == scope).collect();
        let ranked = rank(
            in_scope
                .iter()
                .map(|r| (r.id, cosine_distance(query, &r.vector)))
                .collect(),
            k,
        );

        Ok(ranked
            .into_iter()
            .filter_map(|(id, distance)| {
                in_scope.iter().find(|r| r.id == id).map(|r| RetrievalHit {
                    chunk_id: r.id,
                    chunk_index: r.chunk_index,
                    text: r.text.clone(),
                    distance,
                    document_name: r.document_name.clone(),
                })
            })
            .collect())
    }

    async fn delete_document(&self, scope: &Scope, name: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = inner.rows.len();
        inner
            .rows
            .retain(|r| !(&r.scope == scope && r.document_name == name));
        Ok((before - inner.rows.len()) as u64)
    }

    async fn count_documents(&self, scope: &Scope) -> Result<i64, StoreError> {
        Ok(self.list_documents(scope).await?.len() as i64)
    }

    async fn list_documents(&self, scope: &Scope) -> Result<Vec<DocumentInfo>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(Self::summarize(
            inner.rows.iter().filter(|r| &r.scope == scope),
        ))
    }

    async fn find_document(
        &self,
        scope: &Scope,
        name: &str,
    ) -> Result<Option<DocumentInfo>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(Self::summarize(
            inner
                .rows
                .iter()
                .filter(|r| &r.scope == scope && r.document_name == name),
        )
        .into_iter()
        .next())
    }

    async fn blob_locators(&self, scope: &Scope, name: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut locators: Vec<String> = inner
            .rows
            .iter()
            .filter(|r| &r.scope == scope && r.document_name == name)
            .map(|r| r.blob_locator.clone())
            .collect();
        locators.sort();
        locators.dedup();
        Ok(locators)
    }

    async fn chunk_indices(&self, scope: &Scope, name: &str) -> Result<Vec<i64>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut indices: Vec<i64> = inner
            .rows
            .iter()
            .filter(|r| &r.scope == scope && r.document_name == name)
            .map(|r| r.chunk_index)
            .collect();
        indices.sort_unstable();
        Ok(indices)
    }
}
