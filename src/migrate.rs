use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::error::StoreError;

const DIMS_KEY: &str = "embedding_dims";

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool, config.embedding.dims).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema if needed and pin the embedding dimension.
///
/// The first migration records `dims`; later runs fail with
/// [`StoreError::DimensionMismatch`] if the configured dimension differs.
pub async fn migrate_pool(pool: &SqlitePool, dims: usize) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_embeddings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            document_name TEXT NOT NULL,
            source_type TEXT NOT NULL CHECK (source_type IN ('pdf', 'docx', 'doc', 'txt')),
            blob_locator TEXT NOT NULL,
            chunk_index INTEGER NOT NULL CHECK (chunk_index >= 0),
            chunk_text TEXT NOT NULL CHECK (length(chunk_text) > 0),
            embedding BLOB NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Bumped by every committed write to a scope; processes sharing the
    // database compare it against their cached index before searching.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scope_versions (
            owner_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            PRIMARY KEY (owner_id, course_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_scope ON document_embeddings(owner_id, course_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_document ON document_embeddings(owner_id, course_id, document_name)",
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO store_meta (key, value) VALUES (?, ?)")
        .bind(DIMS_KEY)
        .bind(dims.to_string())
        .execute(pool)
        .await?;

    let stored: String = sqlx::query_scalar("SELECT value FROM store_meta WHERE key = ?")
        .bind(DIMS_KEY)
        .fetch_one(pool)
        .await?;
    let stored: usize = stored
        .parse()
        .map_err(|_| StoreError::Permanent(format!("corrupt {} value: {}", DIMS_KEY, stored)))?;

    if stored != dims {
        return Err(StoreError::DimensionMismatch {
            expected: stored,
            actual: dims,
        });
    }
    Ok(())
}
