//! The tutor core's public operations.
//!
//! [`TutorService`] wires the ingestion pipeline, the answerer, the vector
//! store and the blob store together and exposes the operations the web
//! layer and CLI call: ingest, delete, count, list, presign and answer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tracing::{info, warn};

use crate::answer::{AnswerOptions, Answerer};
use crate::blob::{BlobStore, LocalBlobStore};
use crate::completion::{create_completion_model, CompletionModel};
use crate::config::Config;
use crate::db;
use crate::embedding::Embedder;
use crate::error::{BlobError, Result};
use crate::ingest::{document_name, IngestOutcome, Ingestor};
use crate::models::{AnswerResult, DocumentInfo, Scope, Turn};
use crate::retrieve::Retriever;
use crate::store::ann::AnnParams;
use crate::store::{SqliteVectorStore, VectorStore};

const SIGNING_KEY_ENV: &str = "TUTOR_BLOB_SIGNING_KEY";

/// Result of deleting a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteOutcome {
    pub chunks_removed: u64,
    /// Set when the chunk rows were removed but a blob could not be.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_warning: Option<String>,
}

pub struct TutorService {
    ingestor: Ingestor,
    answerer: Answerer,
    store: Arc<dyn VectorStore>,
    blobs: Arc<dyn BlobStore>,
    presign_ttl: Duration,
}

impl TutorService {
    /// Assemble a service from explicit collaborators.
    pub fn new(
        config: &Config,
        embedder: Embedder,
        completion: Arc<dyn CompletionModel>,
        store: Arc<dyn VectorStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let ingestor = Ingestor::new(
            embedder.clone(),
            store.clone(),
            blobs.clone(),
            config.chunking.clone(),
        );
        let answerer = Answerer::new(
            Retriever::new(embedder, store.clone()),
            completion,
            AnswerOptions::from_config(config),
        );
        Self {
            ingestor,
            answerer,
            store,
            blobs,
            presign_ttl: Duration::from_secs(config.blobs.presign_ttl_secs),
        }
    }

    /// Open the configured SQLite store and providers.
    pub async fn open(config: &Config, blobs: Arc<dyn BlobStore>) -> anyhow::Result<Self> {
        let embedder = Embedder::from_config(&config.embedding)?;
        let completion = create_completion_model(&config.completion)?;
        let pool = db::connect(config).await?;
        let store = SqliteVectorStore::open(
            pool,
            config.embedding.dims,
            AnnParams::from(&config.retrieval),
        )
        .await
        .context("Failed to open vector store")?;
        Ok(Self::new(
            config,
            embedder,
            completion,
            Arc::new(store),
            blobs,
        ))
    }

    pub async fn ingest_document(
        &self,
        scope: &Scope,
        display_name: &str,
        source_type: &str,
        bytes: Vec<u8>,
    ) -> Result<IngestOutcome> {
        self.ingestor
            .ingest(scope, display_name, source_type, bytes)
            .await
    }

    /// Remove a document's chunk rows, then its blobs.
    ///
    /// Idempotent: deleting a missing document removes 0 rows. A blob that
    /// cannot be removed is logged and reported in `blob_warning`.
    pub async fn delete_document(&self, scope: &Scope, name: &str) -> Result<DeleteOutcome> {
        let name = document_name(name)?;
        let locators = self.store.blob_locators(scope, name).await?;
        let chunks_removed = self.store.delete_document(scope, name).await?;

        let mut failures = Vec::new();
        for locator in &locators {
            if let Err(e) = self.blobs.delete(locator).await {
                warn!(
                    owner = %scope.owner,
                    course = %scope.course,
                    document = name,
                    blob = %locator,
                    error = %e,
                    "blob deletion failed; metadata already removed"
                );
                failures.push(format!("{}: {}", locator, e));
            }
        }

        info!(
            owner = %scope.owner,
            course = %scope.course,
            document = name,
            chunks = chunks_removed,
            "document deleted"
        );
        Ok(DeleteOutcome {
            chunks_removed,
            blob_warning: (!failures.is_empty()).then(|| failures.join("; ")),
        })
    }

    pub async fn count_documents(&self, scope: &Scope) -> Result<i64> {
        Ok(self.store.count_documents(scope).await?)
    }

    pub async fn list_documents(&self, scope: &Scope) -> Result<Vec<DocumentInfo>> {
        Ok(self.store.list_documents(scope).await?)
    }

    /// Chunk indices stored for a document, ascending.
    pub async fn chunk_indices(&self, scope: &Scope, name: &str) -> Result<Vec<i64>> {
        let name = document_name(name)?;
        Ok(self.store.chunk_indices(scope, name).await?)
    }

    /// A time-limited download URL for a document, or `None` if the
    /// document does not exist in `scope`.
    pub async fn document_url(&self, scope: &Scope, name: &str) -> Result<Option<String>> {
        let name = document_name(name)?;
        let Some(info) = self.store.find_document(scope, name).await? else {
            return Ok(None);
        };
        match self.blobs.presign(&info.blob_locator, self.presign_ttl).await {
            Ok(url) => Ok(Some(url)),
            Err(BlobError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn answer(
        &self,
        scope: &Scope,
        question: &str,
        prior_turns: &[Turn],
    ) -> Result<AnswerResult> {
        self.answerer.answer(scope, question, prior_turns).await
    }
}

/// Build the filesystem blob store described by `config`.
///
/// The signing key comes from `[blobs] signing_key`, then the
/// `TUTOR_BLOB_SIGNING_KEY` environment variable; without either, a random
/// per-process key is used and URLs stop verifying after a restart.
pub fn local_blob_store(config: &Config) -> anyhow::Result<LocalBlobStore> {
    let key = config
        .blobs
        .signing_key
        .clone()
        .or_else(|| std::env::var(SIGNING_KEY_ENV).ok())
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| {
            warn!("no blob signing key configured; using a per-process random key");
            format!("{}{}", uuid::Uuid::new_v4(), uuid::Uuid::new_v4())
        });
    LocalBlobStore::new(
        &config.blobs.root,
        key.as_bytes(),
        format!("http://{}", config.server.bind),
    )
}
