//! Ingestion pipeline orchestration.
//!
//! Turns one uploaded file into stored chunks:
//! extract → clean → chunk → re-clean → embed (batch) → blob put → insert.
//!
//! Ingestion is all-or-nothing per document. Nothing is written until the
//! text has been extracted and embedded; the chunk rows are inserted in one
//! transaction, and if that insert fails the freshly written blob is removed
//! again.

use std::sync::Arc;

use tracing::{info, warn};

use crate::blob::{blob_locator, BlobStore};
use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::embedding::Embedder;
use crate::error::{Error, ExtractError, Result};
use crate::extract::{clean_text, extract_text};
use crate::models::{DocumentRef, NewChunk, Scope, SourceType};
use crate::store::VectorStore;

/// Result of a successful ingestion.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct IngestOutcome {
    pub chunks_stored: usize,
    /// `None` when the file produced no text and nothing was stored.
    pub blob_locator: Option<String>,
}

/// The canonical form of a user-supplied document name: surrounding
/// whitespace removed, never empty. Every operation keyed by document name
/// goes through this.
pub fn document_name(raw: &str) -> Result<&str> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(Error::InvalidRequest(
            "document name must not be empty".to_string(),
        ));
    }
    Ok(name)
}

#[derive(Clone)]
pub struct Ingestor {
    embedder: Embedder,
    store: Arc<dyn VectorStore>,
    blobs: Arc<dyn BlobStore>,
    chunking: ChunkingConfig,
}

impl Ingestor {
    pub fn new(
        embedder: Embedder,
        store: Arc<dyn VectorStore>,
        blobs: Arc<dyn BlobStore>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            blobs,
            chunking,
        }
    }

    /// Ingest `bytes` as document `display_name` of `source_type`.
    pub async fn ingest(
        &self,
        scope: &Scope,
        display_name: &str,
        source_type: &str,
        bytes: Vec<u8>,
    ) -> Result<IngestOutcome> {
        let source_type: SourceType = source_type.parse()?;
        let display_name = document_name(display_name)?;

        let (bytes, text) = tokio::task::spawn_blocking(move || {
            let text = extract_text(&bytes, source_type);
            (bytes, text)
        })
        .await
        .map_err(|e| ExtractError::decode(source_type.as_str(), e))?;
        let text = text?;

        let chunks = self.prepare_chunks(&text);
        if chunks.is_empty() {
            info!(
                owner = %scope.owner,
                course = %scope.course,
                document = display_name,
                "no text extracted; nothing stored"
            );
            return Ok(IngestOutcome {
                chunks_stored: 0,
                blob_locator: None,
            });
        }

        let vectors = self.embedder.embed_batch(&chunks).await?;

        let locator = blob_locator(scope, display_name);
        self.blobs.put(&locator, &bytes).await?;

        let doc = DocumentRef {
            scope: scope.clone(),
            name: display_name.to_string(),
            source_type,
            blob_locator: locator.clone(),
        };
        let total = chunks.len();
        let new_chunks: Vec<NewChunk> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (text, vector))| NewChunk {
                index: i as i64,
                metadata: serde_json::json!({
                    "chars": text.chars().count(),
                    "total_chunks": total,
                    "model": self.embedder.model_name(),
                }),
                text,
                vector,
            })
            .collect();

        if let Err(e) = self.store.insert_document(&doc, &new_chunks).await {
            warn!(
                owner = %scope.owner,
                course = %scope.course,
                document = display_name,
                error = %e,
                "chunk insert failed; rolling back upload"
            );
            if let Err(blob_err) = self.blobs.delete(&locator).await {
                warn!(
                    blob = %locator,
                    error = %blob_err,
                    "failed to remove blob after aborted ingestion"
                );
            }
            return Err(e.into());
        }

        info!(
            owner = %scope.owner,
            course = %scope.course,
            document = display_name,
            chunks = total,
            "document ingested"
        );
        Ok(IngestOutcome {
            chunks_stored: total,
            blob_locator: Some(locator),
        })
    }

    /// Chunk cleaned text and clean each chunk again, dropping empties.
    fn prepare_chunks(&self, text: &str) -> Vec<String> {
        chunk_text(text, &self.chunking)
            .into_iter()
            .map(|chunk| clean_text(&chunk).trim().to_string())
            .filter(|chunk| !chunk.is_empty())
            .collect()
    }
}
