//! SQLite-backed [`VectorStore`] implementation.
//!
//! One row per chunk in `document_embeddings`, vectors stored as
//! little-endian `f32` BLOBs. Nearest-neighbour search runs against a
//! per-scope [`ScopeIndex`] built from that scope's rows on first use.
//! Every write bumps the scope's row in `scope_versions` inside the same
//! transaction, and a cached index is only reused while its version still
//! matches, so writers in other processes invalidate it too.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::StoreError;
use crate::migrate::migrate_pool;
use crate::models::{DocumentInfo, DocumentRef, NewChunk, RetrievalHit, Scope, SourceType};

use super::ann::{AnnParams, ScopeIndex, ScopeIndexCache};
use super::{check_query, validate_chunk, VectorStore};

pub struct SqliteVectorStore {
    pool: SqlitePool,
    dims: usize,
    params: AnnParams,
    indexes: ScopeIndexCache,
}

impl SqliteVectorStore {
    /// Migrate the schema and open the store for `dims`-dimensional vectors.
    pub async fn open(pool: SqlitePool, dims: usize, params: AnnParams) -> Result<Self, StoreError> {
        migrate_pool(&pool, dims).await?;
        Ok(Self {
            pool,
            dims,
            params,
            indexes: ScopeIndexCache::new(params.cache_bytes),
        })
    }

    async fn scope_index(&self, scope: &Scope) -> Result<Arc<ScopeIndex>, StoreError> {
        // Version and rows are read from one snapshot.
        let mut tx = self.pool.begin().await?;
        let version = scope_version(&mut tx, scope).await?;
        if let Some(index) = self.indexes.get(scope, version) {
            tx.commit().await?;
            return Ok(index);
        }

        let rows = sqlx::query(
            "SELECT id, embedding FROM document_embeddings WHERE owner_id = ? AND course_id = ? ORDER BY id",
        )
        .bind(&scope.owner)
        .bind(&scope.course)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut vectors = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            let blob: Vec<u8> = row.try_get("embedding")?;
            if blob.len() != self.dims * 4 {
                return Err(StoreError::Permanent(format!(
                    "row {} has a {}-byte embedding, expected {}",
                    id,
                    blob.len(),
                    self.dims * 4
                )));
            }
            vectors.push((id, blob_to_vec(&blob)));
        }

        let index = ScopeIndex::build(self.dims, vectors, &self.params)?;
        debug!(
            owner = %scope.owner,
            course = %scope.course,
            version,
            rows = index.len(),
            graph = index.is_graph(),
            "built scope index"
        );
        Ok(self.indexes.store(scope, version, index))
    }
}

async fn scope_version(conn: &mut SqliteConnection, scope: &Scope) -> Result<i64, StoreError> {
    let version: Option<i64> = sqlx::query_scalar(
        "SELECT version FROM scope_versions WHERE owner_id = ? AND course_id = ?",
    )
    .bind(&scope.owner)
    .bind(&scope.course)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(version.unwrap_or(0))
}

async fn bump_scope_version(conn: &mut SqliteConnection, scope: &Scope) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO scope_versions (owner_id, course_id, version) VALUES (?, ?, 1)
        ON CONFLICT (owner_id, course_id) DO UPDATE SET version = version + 1
        "#,
    )
    .bind(&scope.owner)
    .bind(&scope.course)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn document_info(row: &SqliteRow) -> Result<DocumentInfo, StoreError> {
    let source_type: String = row.try_get("source_type")?;
    Ok(DocumentInfo {
        name: row.try_get("document_name")?,
        source_type: source_type
            .parse::<SourceType>()
            .map_err(|e| StoreError::Permanent(e.to_string()))?,
        blob_locator: row.try_get("blob_locator")?,
        chunk_count: row.try_get("chunk_count")?,
        created_at: row.try_get("created_at")?,
    })
}

const DOCUMENT_SUMMARY: &str = r#"
    SELECT document_name,
           MIN(source_type) AS source_type,
           MIN(blob_locator) AS blob_locator,
           COUNT(*) AS chunk_count,
           MIN(created_at) AS created_at
    FROM document_embeddings
    WHERE owner_id = ? AND course_id = ?
"#;

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn insert_chunk(&self, doc: &DocumentRef, chunk: &NewChunk) -> Result<i64, StoreError> {
        let ids = self.insert_document(doc, std::slice::from_ref(chunk)).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| StoreError::Permanent("insert returned no row id".to_string()))
    }

    async fn insert_document(
        &self,
        doc: &DocumentRef,
        chunks: &[NewChunk],
    ) -> Result<Vec<i64>, StoreError> {
        for chunk in chunks {
            validate_chunk(self.dims, chunk)?;
        }
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let now = chrono::Utc::now().timestamp();
        let mut ids = Vec::with_capacity(chunks.len());
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            let result = sqlx::query(
                r#"
                INSERT INTO document_embeddings
                    (owner_id, course_id, document_name, source_type, blob_locator,
                     chunk_index, chunk_text, embedding, metadata_json, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&doc.scope.owner)
            .bind(&doc.scope.course)
            .bind(&doc.name)
            .bind(doc.source_type.as_str())
            .bind(&doc.blob_locator)
            .bind(chunk.index)
            .bind(&chunk.text)
            .bind(vec_to_blob(&chunk.vector))
            .bind(chunk.metadata.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;
            ids.push(result.last_insert_rowid());
        }

        bump_scope_version(&mut tx, &doc.scope).await?;
        tx.commit().await?;
        self.indexes.evict(&doc.scope);
        Ok(ids)
    }

    async fn search(
        &self,
        scope: &Scope,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievalHit>, StoreError> {
        check_query(self.dims, query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let index = self.scope_index(scope).await?;
        let ranked = index.search(query, k);
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ranked.len()].join(", ");
        let sql = format!(
            "SELECT id, document_name, chunk_index, chunk_text FROM document_embeddings \
             WHERE owner_id = ? AND course_id = ? AND id IN ({})",
            placeholders
        );
        let mut q = sqlx::query(&sql).bind(&scope.owner).bind(&scope.course);
        for (id, _) in &ranked {
            q = q.bind(*id);
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut hits = Vec::with_capacity(ranked.len());
        for (id, distance) in ranked {
            // A row deleted after the index was built is simply skipped.
            let Some(row) = rows
                .iter()
                .find(|r| r.try_get::<i64, _>("id").map(|v| v == id).unwrap_or(false))
            else {
                continue;
            };
            hits.push(RetrievalHit {
                chunk_id: id,
                chunk_index: row.try_get("chunk_index")?,
                text: row.try_get("chunk_text")?,
                distance,
                document_name: row.try_get("document_name")?,
            });
        }
        Ok(hits)
    }

    async fn delete_document(&self, scope: &Scope, name: &str) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "DELETE FROM document_embeddings WHERE owner_id = ? AND course_id = ? AND document_name = ?",
        )
        .bind(&scope.owner)
        .bind(&scope.course)
        .bind(name)
        .execute(&mut *tx)
        .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            bump_scope_version(&mut tx, scope).await?;
        }
        tx.commit().await?;
        if removed > 0 {
            self.indexes.evict(scope);
        }
        Ok(removed)
    }

    async fn count_documents(&self, scope: &Scope) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT document_name) FROM document_embeddings WHERE owner_id = ? AND course_id = ?",
        )
        .bind(&scope.owner)
        .bind(&scope.course)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn list_documents(&self, scope: &Scope) -> Result<Vec<DocumentInfo>, StoreError> {
        let sql = format!(
            "{} GROUP BY document_name ORDER BY document_name",
            DOCUMENT_SUMMARY
        );
        let rows = sqlx::query(&sql)
            .bind(&scope.owner)
            .bind(&scope.course)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(document_info).collect()
    }

    async fn find_document(
        &self,
        scope: &Scope,
        name: &str,
    ) -> Result<Option<DocumentInfo>, StoreError> {
        let sql = format!(
            "{} AND document_name = ? GROUP BY document_name",
            DOCUMENT_SUMMARY
        );
        let row = sqlx::query(&sql)
            .bind(&scope.owner)
            .bind(&scope.course)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document_info).transpose()
    }

    async fn blob_locators(&self, scope: &Scope, name: &str) -> Result<Vec<String>, StoreError> {
        let locators: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT blob_locator FROM document_embeddings
            WHERE owner_id = ? AND course_id = ? AND document_name = ?
            ORDER BY blob_locator
            "#,
        )
        .bind(&scope.owner)
        .bind(&scope.course)
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(locators)
    }

    async fn chunk_indices(&self, scope: &Scope, name: &str) -> Result<Vec<i64>, StoreError> {
        let indices: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT chunk_index FROM document_embeddings
            WHERE owner_id = ? AND course_id = ? AND document_name = ?
            ORDER BY chunk_index
            "#,
        )
        .bind(&scope.owner)
        .bind(&scope.course)
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(indices)
    }
}
