//! Object storage for uploaded files.
//!
//! The core only needs the narrow [`BlobStore`] interface: put, get,
//! delete, and time-limited URLs. [`LocalBlobStore`] keeps blobs under a
//! directory and signs URLs with HMAC-SHA256 over `path|expires`, which the
//! HTTP server redeems at `GET /blobs/{path}`.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::BlobError;
use crate::models::Scope;

type HmacSha256 = Hmac<Sha256>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), BlobError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, BlobError>;

    /// Remove a blob. Removing a missing blob succeeds.
    async fn delete(&self, path: &str) -> Result<(), BlobError>;

    /// Return a URL that grants read access to `path` for `ttl`.
    async fn presign(&self, path: &str, ttl: Duration) -> Result<String, BlobError>;
}

/// Build the locator for a newly uploaded document.
///
/// Each ingestion gets its own random segment so a re-upload never
/// overwrites a blob that metadata still points at.
pub fn blob_locator(scope: &Scope, display_name: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        sanitize_segment(&scope.owner),
        sanitize_segment(&scope.course),
        uuid::Uuid::new_v4(),
        sanitize_segment(display_name)
    )
}

fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Filesystem-backed blob store.
pub struct LocalBlobStore {
    root: PathBuf,
    keyed_mac: HmacSha256,
    base_url: String,
}

impl LocalBlobStore {
    pub fn new(
        root: impl Into<PathBuf>,
        signing_key: &[u8],
        base_url: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let keyed_mac = HmacSha256::new_from_slice(signing_key)
            .map_err(|e| anyhow::anyhow!("Invalid blob signing key: {}", e))?;
        Ok(Self {
            root: root.into(),
            keyed_mac,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(path);
        let valid = !path.is_empty()
            && !path.contains('\\')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(BlobError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn sign(&self, path: &str, expires: i64) -> String {
        hex::encode(self.mac(path, expires).finalize().into_bytes())
    }

    fn mac(&self, path: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.keyed_mac.clone();
        mac.update(path.as_bytes());
        mac.update(b"|");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    /// Check a presigned URL's parameters at time `now` (unix seconds).
    pub fn verify(&self, path: &str, expires: i64, signature: &str, now: i64) -> bool {
        if now > expires {
            return false;
        }
        let Ok(sig) = hex::decode(signature) else {
            return false;
        };
        self.mac(path, expires).verify_slice(&sig).is_ok()
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), BlobError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes).await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn presign(&self, path: &str, ttl: Duration) -> Result<String, BlobError> {
        let full = self.resolve(path)?;
        if !tokio::fs::try_exists(&full).await? {
            return Err(BlobError::NotFound(path.to_string()));
        }
        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        Ok(format!(
            "{}/blobs/{}?expires={}&signature={}",
            self.base_url,
            path,
            expires,
            self.sign(path, expires)
        ))
    }
}
