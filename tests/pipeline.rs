//! End-to-end tests of the tutor core against both vector stores.
//!
//! Uses deterministic fake embedding and completion models so every
//! assertion is about the pipeline, not about a remote provider.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use course_tutor::blob::{BlobStore, LocalBlobStore};
use course_tutor::completion::{ChatMessage, ChatRole, CompletionModel, CompletionParams};
use course_tutor::config::{parse_config, Config};
use course_tutor::db;
use course_tutor::embedding::{Embedder, EmbeddingModel};
use course_tutor::error::{
    BlobError, CompletionError, EmbedError, Error, ErrorKind, ExtractError, StoreError,
};
use course_tutor::models::{DocumentRef, NewChunk, Scope, SourceType, Turn};
use course_tutor::prompt::APOLOGY;
use course_tutor::service::TutorService;
use course_tutor::store::ann::AnnParams;
use course_tutor::store::{InMemoryVectorStore, SqliteVectorStore, VectorStore};

const DIMS: usize = 8;

const PHOTO_SENTENCE: &str = "Photosynthesis converts light into chemical energy.";

// ============ Fakes ============

/// Maps words onto a handful of topic axes.
struct TopicEmbedder {
    dims: usize,
}

impl TopicEmbedder {
    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let axis = match word.to_lowercase().as_str() {
                "photosynthesis" | "light" | "chemical" | "energy" | "converts" | "plants" => 0,
                "mitosis" | "cell" | "cells" | "divide" | "division" => 1,
                "revolution" | "french" | "1789" | "king" => 2,
                "entropy" | "thermodynamics" | "heat" => 3,
                _ => self.dims - 1,
            };
            v[axis] += if axis == self.dims - 1 { 0.1 } else { 1.0 };
        }
        v
    }
}

#[async_trait]
impl EmbeddingModel for TopicEmbedder {
    fn model_name(&self) -> &str {
        "topic-fake"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }
}

/// Records every prompt and answers with a fixed string.
#[derive(Default)]
struct RecordingCompletion {
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl RecordingCompletion {
    fn last_user_message(&self) -> String {
        let prompts = self.prompts.lock().unwrap();
        let last = prompts.last().expect("no prompt recorded");
        last.iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CompletionModel for RecordingCompletion {
    fn model_name(&self) -> &str {
        "recording-fake"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _params: CompletionParams,
    ) -> Result<String, CompletionError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        Ok("Here is what your course materials say.".to_string())
    }
}

struct FailingCompletion;

#[async_trait]
impl CompletionModel for FailingCompletion {
    fn model_name(&self) -> &str {
        "failing-fake"
    }

    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _params: CompletionParams,
    ) -> Result<String, CompletionError> {
        Err(CompletionError::Transport("connection reset".to_string()))
    }
}

/// Stores blobs on disk but fails every delete.
struct UndeletableBlobs {
    inner: LocalBlobStore,
}

#[async_trait]
impl BlobStore for UndeletableBlobs {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), BlobError> {
        self.inner.put(path, bytes).await
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        self.inner.get(path).await
    }

    async fn delete(&self, _path: &str) -> Result<(), BlobError> {
        Err(BlobError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only volume",
        )))
    }

    async fn presign(&self, path: &str, ttl: Duration) -> Result<String, BlobError> {
        self.inner.presign(path, ttl).await
    }
}

// ============ Harness ============

#[derive(Clone, Copy, Debug)]
enum StoreKind {
    Sqlite,
    Memory,
}

const STORES: [StoreKind; 2] = [StoreKind::Sqlite, StoreKind::Memory];

struct Harness {
    _tmp: TempDir,
    blob_root: std::path::PathBuf,
    store: Arc<dyn VectorStore>,
    service: TutorService,
}

fn test_config(root: &Path) -> Config {
    parse_config(&format!(
        r#"
[db]
path = "{}/tutor.sqlite"

[blobs]
root = "{}/blobs"

[embedding]
dims = {}
"#,
        root.display(),
        root.display(),
        DIMS
    ))
    .unwrap()
}

async fn open_store(kind: StoreKind, config: &Config, dims: usize) -> Arc<dyn VectorStore> {
    match kind {
        StoreKind::Sqlite => {
            let pool = db::connect(config).await.unwrap();
            Arc::new(
                SqliteVectorStore::open(pool, dims, AnnParams::from(&config.retrieval))
                    .await
                    .unwrap(),
            )
        }
        StoreKind::Memory => Arc::new(InMemoryVectorStore::new(dims)),
    }
}

async fn harness_with(
    kind: StoreKind,
    model: Arc<dyn EmbeddingModel>,
    completion: Arc<dyn CompletionModel>,
) -> Harness {
    harness_with_blobs(kind, model, completion, |local| {
        Arc::new(local) as Arc<dyn BlobStore>
    })
    .await
}

async fn harness_with_blobs<F>(
    kind: StoreKind,
    model: Arc<dyn EmbeddingModel>,
    completion: Arc<dyn CompletionModel>,
    wrap_blobs: F,
) -> Harness
where
    F: FnOnce(LocalBlobStore) -> Arc<dyn BlobStore>,
{
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let store = open_store(kind, &config, DIMS).await;
    let blob_root = config.blobs.root.clone();
    let blobs = wrap_blobs(
        LocalBlobStore::new(&blob_root, b"test-signing-key", "http://127.0.0.1:7340").unwrap(),
    );
    let embedder = Embedder::new(model, 16, Duration::from_secs(10));
    let service = TutorService::new(&config, embedder, completion, store.clone(), blobs);
    Harness {
        _tmp: tmp,
        blob_root,
        store,
        service,
    }
}

async fn harness(kind: StoreKind, completion: Arc<dyn CompletionModel>) -> Harness {
    harness_with(kind, Arc::new(TopicEmbedder { dims: DIMS }), completion).await
}

fn blob_files(root: &Path) -> usize {
    fn walk(dir: &Path) -> usize {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };
        entries
            .flatten()
            .map(|e| {
                let path = e.path();
                if path.is_dir() {
                    walk(&path)
                } else {
                    1
                }
            })
            .sum()
    }
    walk(root)
}

fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
        body
    );
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

// ============ Scenarios ============

#[tokio::test]
async fn ingested_document_grounds_the_answer() {
    for kind in STORES {
        let h = harness(kind, Arc::new(RecordingCompletion::default())).await;
        let scope = Scope::new("u1", "bio101");
        let body = format!("{} ", PHOTO_SENTENCE).repeat(60);

        let outcome = h
            .service
            .ingest_document(&scope, "photo.txt", "txt", body.into_bytes())
            .await
            .unwrap();
        assert!(outcome.chunks_stored >= 2, "{:?}", kind);

        let result = h
            .service
            .answer(&scope, "What does photosynthesis do?", &[])
            .await
            .unwrap();
        assert!(result.context_used >= 1, "{:?}", kind);
        assert_eq!(result.sources, vec!["photo.txt".to_string()], "{:?}", kind);
        assert!(result.confidence > 0.5, "{:?}: {}", kind, result.confidence);
        assert!(result.confidence <= 1.0);
    }
}

#[tokio::test]
async fn other_owner_gets_no_context() {
    for kind in STORES {
        let h = harness(kind, Arc::new(RecordingCompletion::default())).await;
        h.service
            .ingest_document(
                &Scope::new("u1", "c1"),
                "A.txt",
                "txt",
                PHOTO_SENTENCE.as_bytes().to_vec(),
            )
            .await
            .unwrap();

        let result = h
            .service
            .answer(&Scope::new("u2", "c1"), "What does photosynthesis do?", &[])
            .await
            .unwrap();
        assert_eq!(result.context_used, 0, "{:?}", kind);
        assert!(result.sources.is_empty(), "{:?}", kind);
    }
}

#[tokio::test]
async fn deleted_document_is_no_longer_cited() {
    for kind in STORES {
        let h = harness(kind, Arc::new(RecordingCompletion::default())).await;
        let scope = Scope::new("u1", "c1");
        h.service
            .ingest_document(&scope, "keep.txt", "txt", b"The French revolution began in 1789.".to_vec())
            .await
            .unwrap();
        let stored = h
            .service
            .ingest_document(&scope, "photo.txt", "txt", PHOTO_SENTENCE.repeat(30).into_bytes())
            .await
            .unwrap();
        assert!(stored.chunks_stored > 0);
        assert_eq!(h.service.count_documents(&scope).await.unwrap(), 2);

        let outcome = h.service.delete_document(&scope, "photo.txt").await.unwrap();
        assert_eq!(outcome.chunks_removed as usize, stored.chunks_stored);
        assert!(outcome.blob_warning.is_none());
        assert_eq!(h.service.count_documents(&scope).await.unwrap(), 1);

        let result = h
            .service
            .answer(&scope, "photosynthesis", &[])
            .await
            .unwrap();
        assert!(!result.sources.contains(&"photo.txt".to_string()), "{:?}", kind);
        assert_eq!(blob_files(&h.blob_root), 1, "{:?}", kind);
    }
}

#[tokio::test]
async fn deleting_only_document_leaves_no_context() {
    for kind in STORES {
        let h = harness(kind, Arc::new(RecordingCompletion::default())).await;
        let scope = Scope::new("u1", "c1");
        h.service
            .ingest_document(&scope, "photo.txt", "txt", PHOTO_SENTENCE.as_bytes().to_vec())
            .await
            .unwrap();
        h.service.delete_document(&scope, "photo.txt").await.unwrap();

        let result = h
            .service
            .answer(&scope, "What does photosynthesis do?", &[])
            .await
            .unwrap();
        assert_eq!(result.context_used, 0, "{:?}", kind);
        assert_eq!(result.confidence, 0.5, "{:?}", kind);
    }
}

#[tokio::test]
async fn unsupported_type_stores_nothing() {
    for kind in STORES {
        let h = harness(kind, Arc::new(RecordingCompletion::default())).await;
        let scope = Scope::new("u1", "c1");
        let err = h
            .service
            .ingest_document(&scope, "slides.pptx", "pptx", b"PK\x03\x04".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extract(ExtractError::UnsupportedType(_))));
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        assert_eq!(h.service.count_documents(&scope).await.unwrap(), 0);
        assert_eq!(blob_files(&h.blob_root), 0);
    }
}

#[tokio::test]
async fn completion_failure_apologizes() {
    for kind in STORES {
        let h = harness(kind, Arc::new(FailingCompletion)).await;
        let scope = Scope::new("u1", "c1");
        let body = format!("{} ", PHOTO_SENTENCE).repeat(60);
        h.service
            .ingest_document(&scope, "photo.txt", "txt", body.into_bytes())
            .await
            .unwrap();
        let stored = h.service.chunk_indices(&scope, "photo.txt").await.unwrap().len();

        let result = h
            .service
            .answer(&scope, "What does photosynthesis do?", &[])
            .await
            .unwrap();
        assert_eq!(result.answer, APOLOGY);
        assert!(!result.answer.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert!(result.sources.is_empty());
        assert_eq!(result.context_used, stored.min(5), "{:?}", kind);
    }
}

// ============ Properties ============

#[tokio::test]
async fn scope_isolation_across_owners_and_courses() {
    for kind in STORES {
        let h = harness(kind, Arc::new(RecordingCompletion::default())).await;
        let scopes = [
            (Scope::new("u1", "c1"), "u1-c1.txt"),
            (Scope::new("u1", "c2"), "u1-c2.txt"),
            (Scope::new("u2", "c1"), "u2-c1.txt"),
        ];
        for (scope, name) in &scopes {
            h.service
                .ingest_document(scope, name, "txt", PHOTO_SENTENCE.repeat(10).into_bytes())
                .await
                .unwrap();
        }

        let query = TopicEmbedder { dims: DIMS }.vectorize("photosynthesis");
        for (scope, name) in &scopes {
            let hits = h.store.search(scope, &query, 50).await.unwrap();
            assert!(!hits.is_empty());
            assert!(
                hits.iter().all(|hit| hit.document_name == *name),
                "{:?}: scope {} leaked",
                kind,
                scope
            );
        }
    }
}

#[tokio::test]
async fn dimension_uniformity() {
    for kind in STORES {
        let h = harness(kind, Arc::new(RecordingCompletion::default())).await;
        let doc = DocumentRef {
            scope: Scope::new("u1", "c1"),
            name: "bad.txt".to_string(),
            source_type: SourceType::Txt,
            blob_locator: "u1/c1/x/bad.txt".to_string(),
        };
        let err = h
            .store
            .insert_chunk(
                &doc,
                &NewChunk {
                    index: 0,
                    text: "text".to_string(),
                    vector: vec![1.0; DIMS + 1],
                    metadata: serde_json::json!({}),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }), "{:?}", kind);
    }
}

#[tokio::test]
async fn mismatched_embedder_rolls_back_ingestion() {
    for kind in STORES {
        // The store expects DIMS; the model produces fewer.
        let h = harness_with(
            kind,
            Arc::new(TopicEmbedder { dims: DIMS - 2 }),
            Arc::new(RecordingCompletion::default()),
        )
        .await;
        let scope = Scope::new("u1", "c1");
        let err = h
            .service
            .ingest_document(&scope, "photo.txt", "txt", PHOTO_SENTENCE.as_bytes().to_vec())
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::Store(StoreError::DimensionMismatch { .. })),
            "{:?}: {}",
            kind,
            err
        );
        assert_eq!(err.kind(), ErrorKind::PermanentInternalError);
        assert_eq!(h.service.count_documents(&scope).await.unwrap(), 0);
        // The uploaded blob was removed again.
        assert_eq!(blob_files(&h.blob_root), 0, "{:?}", kind);
    }
}

#[tokio::test]
async fn chunk_indices_are_contiguous_and_text_is_clean() {
    for kind in STORES {
        let h = harness(kind, Arc::new(RecordingCompletion::default())).await;
        let scope = Scope::new("u1", "c1");
        let noisy = format!(
            "{}\u{0}\u{7}\t\t  Cells divide by mitosis!\r\n\r\n",
            PHOTO_SENTENCE
        )
        .repeat(40);
        let outcome = h
            .service
            .ingest_document(&scope, "noisy.txt", "txt", noisy.into_bytes())
            .await
            .unwrap();
        assert!(outcome.chunks_stored > 1);

        let indices = h.service.chunk_indices(&scope, "noisy.txt").await.unwrap();
        let expected: Vec<i64> = (0..outcome.chunks_stored as i64).collect();
        assert_eq!(indices, expected, "{:?}", kind);

        let query = TopicEmbedder { dims: DIMS }.vectorize("mitosis");
        for hit in h.store.search(&scope, &query, 100).await.unwrap() {
            assert!(!hit.text.is_empty());
            assert!(!hit.text.contains('\0'));
            assert!(!hit.text.chars().any(|c| (c as u32) < 32));
            assert!(!hit.text.contains("  "));
        }
    }
}

#[tokio::test]
async fn deletion_is_complete_and_idempotent() {
    for kind in STORES {
        let h = harness(kind, Arc::new(RecordingCompletion::default())).await;
        let scope = Scope::new("u1", "c1");
        h.service
            .ingest_document(&scope, "photo.txt", "txt", PHOTO_SENTENCE.repeat(40).into_bytes())
            .await
            .unwrap();

        let first = h.service.delete_document(&scope, "photo.txt").await.unwrap();
        assert!(first.chunks_removed > 0);
        assert!(h.service.chunk_indices(&scope, "photo.txt").await.unwrap().is_empty());
        assert!(h.service.list_documents(&scope).await.unwrap().is_empty());

        let second = h.service.delete_document(&scope, "photo.txt").await.unwrap();
        assert_eq!(second.chunks_removed, 0, "{:?}", kind);
        let missing = h.service.delete_document(&scope, "never.txt").await.unwrap();
        assert_eq!(missing.chunks_removed, 0);
    }
}

#[tokio::test]
async fn blob_delete_failure_still_removes_document() {
    for kind in STORES {
        let h = harness_with_blobs(
            kind,
            Arc::new(TopicEmbedder { dims: DIMS }),
            Arc::new(RecordingCompletion::default()),
            |local| Arc::new(UndeletableBlobs { inner: local }) as Arc<dyn BlobStore>,
        )
        .await;
        let scope = Scope::new("u1", "c1");
        h.service
            .ingest_document(&scope, "keep.txt", "txt", b"Cells divide by mitosis.".to_vec())
            .await
            .unwrap();
        let stored = h
            .service
            .ingest_document(&scope, "photo.txt", "txt", PHOTO_SENTENCE.repeat(30).into_bytes())
            .await
            .unwrap();
        assert_eq!(h.service.count_documents(&scope).await.unwrap(), 2);

        let outcome = h.service.delete_document(&scope, "photo.txt").await.unwrap();
        assert_eq!(outcome.chunks_removed as usize, stored.chunks_stored, "{:?}", kind);
        let warning = outcome.blob_warning.expect("blob failure reported");
        assert!(warning.contains("read-only volume"), "{:?}: {}", kind, warning);

        assert!(h.service.chunk_indices(&scope, "photo.txt").await.unwrap().is_empty());
        assert_eq!(h.service.count_documents(&scope).await.unwrap(), 1, "{:?}", kind);
        // The blob is orphaned, not resurrected as a document.
        assert_eq!(blob_files(&h.blob_root), 2, "{:?}", kind);
    }
}

#[tokio::test]
async fn document_names_are_trimmed_everywhere() {
    for kind in STORES {
        let h = harness(kind, Arc::new(RecordingCompletion::default())).await;
        let scope = Scope::new("u1", "c1");
        let stored = h
            .service
            .ingest_document(&scope, "  notes.txt  ", "txt", PHOTO_SENTENCE.repeat(30).into_bytes())
            .await
            .unwrap();

        let docs = h.service.list_documents(&scope).await.unwrap();
        assert_eq!(docs[0].name, "notes.txt");
        let expected: Vec<i64> = (0..stored.chunks_stored as i64).collect();
        assert_eq!(
            h.service.chunk_indices(&scope, "notes.txt ").await.unwrap(),
            expected,
            "{:?}",
            kind
        );
        assert!(h
            .service
            .document_url(&scope, "\tnotes.txt")
            .await
            .unwrap()
            .is_some());

        let outcome = h.service.delete_document(&scope, " notes.txt\n").await.unwrap();
        assert_eq!(outcome.chunks_removed as usize, stored.chunks_stored, "{:?}", kind);
        assert_eq!(h.service.count_documents(&scope).await.unwrap(), 0);

        let err = h.service.delete_document(&scope, "   ").await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)), "{:?}: {}", kind, err);
    }
}

#[tokio::test]
async fn search_results_sorted_without_duplicates() {
    for kind in STORES {
        let h = harness(kind, Arc::new(RecordingCompletion::default())).await;
        let scope = Scope::new("u1", "c1");
        let mixed = [
            "Photosynthesis converts light into chemical energy in plants.",
            "Cells divide by mitosis during cell division.",
            "The French revolution began in 1789 against the king.",
            "Entropy measures heat dispersal in thermodynamics.",
        ];
        for (i, text) in mixed.iter().enumerate() {
            h.service
                .ingest_document(&scope, &format!("doc{}.txt", i), "txt", text.as_bytes().to_vec())
                .await
                .unwrap();
        }

        let query = TopicEmbedder { dims: DIMS }.vectorize("photosynthesis and mitosis");
        let hits = h.store.search(&scope, &query, 3).await.unwrap();
        assert_eq!(hits.len(), 3, "{:?}", kind);
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance, "{:?}", kind);
        }
        let mut ids: Vec<i64> = hits.iter().map(|h| h.chunk_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), hits.len());
        assert!(hits.iter().all(|h| (0.0..=2.0).contains(&h.distance)));
    }
}

#[tokio::test]
async fn general_prompt_acknowledges_missing_materials() {
    for kind in STORES {
        let completion = Arc::new(RecordingCompletion::default());
        let h = harness(kind, completion.clone()).await;
        let result = h
            .service
            .answer(&Scope::new("u1", "empty"), "What is entropy?", &[])
            .await
            .unwrap();
        assert_eq!(result.context_used, 0);
        assert_eq!(result.confidence, 0.5);
        assert!(result.sources.is_empty());

        let prompt = completion.last_user_message();
        assert!(prompt.contains("no relevant course materials were found"), "{:?}", kind);
        assert!(prompt.contains("upload"));
    }
}

#[tokio::test]
async fn grounded_prompt_carries_history_and_materials() {
    let completion = Arc::new(RecordingCompletion::default());
    let h = harness(StoreKind::Memory, completion.clone()).await;
    let scope = Scope::new("u1", "c1");
    h.service
        .ingest_document(&scope, "photo.txt", "txt", PHOTO_SENTENCE.as_bytes().to_vec())
        .await
        .unwrap();

    let turns = vec![
        Turn::user("Hi, I have a biology exam."),
        Turn::assistant("Happy to help you prepare."),
        Turn::user("What does photosynthesis do?"),
    ];
    h.service
        .answer(&scope, "What does photosynthesis do?", &turns)
        .await
        .unwrap();

    let prompt = completion.last_user_message();
    assert!(prompt.contains("Previous conversation:"));
    assert!(prompt.contains("Human: Hi, I have a biology exam."));
    assert!(prompt.contains("Assistant: Happy to help you prepare."));
    assert_eq!(prompt.matches("What does photosynthesis do?").count(), 1);
    assert!(prompt.contains(PHOTO_SENTENCE));
    assert!(prompt.contains("found relevant information"));
}

#[tokio::test]
async fn confidence_always_in_unit_range() {
    for kind in STORES {
        let h = harness(kind, Arc::new(RecordingCompletion::default())).await;
        let scope = Scope::new("u1", "c1");
        h.service
            .ingest_document(&scope, "photo.txt", "txt", PHOTO_SENTENCE.repeat(20).into_bytes())
            .await
            .unwrap();
        for question in [
            "What does photosynthesis do?",
            "Explain mitosis.",
            "zzz qqq",
            "What happened in 1789?",
        ] {
            let result = h.service.answer(&scope, question, &[]).await.unwrap();
            assert!(
                (0.0..=1.0).contains(&result.confidence),
                "{:?}: {} -> {}",
                kind,
                question,
                result.confidence
            );
        }
    }
}

// ============ Formats and URLs ============

#[tokio::test]
async fn docx_ingestion_and_presigned_url() {
    for kind in STORES {
        let h = harness(kind, Arc::new(RecordingCompletion::default())).await;
        let scope = Scope::new("u1", "c1");
        let docx = docx_with_paragraphs(&[
            "Cells divide by mitosis.",
            "Photosynthesis converts light into chemical energy.",
        ]);
        let outcome = h
            .service
            .ingest_document(&scope, "lecture.docx", "docx", docx)
            .await
            .unwrap();
        assert_eq!(outcome.chunks_stored, 1);

        let docs = h.service.list_documents(&scope).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source_type, SourceType::Docx);

        let url = h
            .service
            .document_url(&scope, "lecture.docx")
            .await
            .unwrap()
            .expect("url for existing document");
        assert!(url.starts_with("http://127.0.0.1:7340/blobs/u1/c1/"));
        assert!(url.contains("lecture.docx?expires="));
        assert!(h
            .service
            .document_url(&scope, "missing.docx")
            .await
            .unwrap()
            .is_none());
    }
}

#[tokio::test]
async fn corrupt_docx_is_decode_failure() {
    let h = harness(StoreKind::Sqlite, Arc::new(RecordingCompletion::default())).await;
    let scope = Scope::new("u1", "c1");
    let err = h
        .service
        .ingest_document(&scope, "broken.docx", "docx", b"not a zip".to_vec())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DecodeFailed);
    assert_eq!(h.service.count_documents(&scope).await.unwrap(), 0);
    assert_eq!(blob_files(&h.blob_root), 0);
}
