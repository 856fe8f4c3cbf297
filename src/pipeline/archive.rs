use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Datelike;
use tracing::{debug, info};

use crate::data_model::Document;
use crate::error::{IngestError, Result};
use crate::retry::RetryPolicy;
use crate::utils::{md5_hex, trim_to_bytes};

/// Object-storage seam. Implementations must be safe for concurrent use;
/// workers share one instance behind an `Arc`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Move an object to a new key. Returns false when the source is absent.
    async fn rename(&self, from: &str, to: &str) -> Result<bool>;
}

/// Filesystem-backed store: one bucket maps to one directory tree. Writes go
/// to a sibling temp file first and are renamed into place, so readers never
/// observe a partially written object.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsObjectStore { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let clean = key.trim_start_matches('/');
        if clean.is_empty() || Path::new(clean).components().any(|c| c.as_os_str() == "..") {
            return Err(IngestError::Storage(format!("invalid object key '{key}'")));
        }
        Ok(self.root.join(clean))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| IngestError::Storage(format!("key '{key}' has no parent")))?;
        tokio::fs::create_dir_all(parent).await?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| IngestError::Storage(format!("key '{key}' has no file name")))?;
        let tmp = parent.join(format!(".{file_name}.tmp-{}", std::process::id()));
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<bool> {
        let source = self.resolve(from)?;
        if !tokio::fs::try_exists(&source).await? {
            return Ok(false);
        }
        let target = self.resolve(to)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&source, &target).await?;
        Ok(true)
    }
}

/// In-memory store for tests and dry runs. Counts uploads so idempotence
/// can be asserted directly.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    put_count: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        MemoryObjectStore::default()
    }

    pub fn put_count(&self) -> usize {
        self.put_count.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.put_count.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<bool> {
        let mut objects = self.objects.lock().unwrap();
        match objects.remove(from) {
            Some(data) => {
                objects.insert(to.to_string(), data);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Outcome of archiving one canonical artifact.
#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    pub key: String,
    pub md5_sum: String,
    /// False when the object was already present (content-hash cache hit).
    pub uploaded: bool,
}

/// Content-addressed cache over the document store.
pub struct Archiver {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
}

// S3 rejects keys longer than 1024 bytes, and the scratch filesystems the
// backends run on cap file names at 255 bytes; the slug carries all the
// variable length, so it gets trimmed first.
const MAX_KEY_BYTES: usize = 1024;
const MAX_SLUG_BYTES: usize = 200;

impl Archiver {
    pub fn new(store: Arc<dyn ObjectStore>, retry: RetryPolicy) -> Self {
        Archiver { store, retry }
    }

    /// Deterministic key of the canonical artifact:
    /// `<geography>/<year>/<slug>_<hash>.pdf`.
    pub fn object_key(document: &Document, hash: &str) -> String {
        let geography = document
            .metadata
            .geography
            .clone()
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let year = document
            .metadata
            .publication_ts
            .map(|ts| ts.year())
            .unwrap_or(1900);
        let prefix = format!("{geography}/{year}");

        let slug = document.slug();
        let slug = trim_to_bytes(&slug, MAX_SLUG_BYTES);
        let budget = MAX_KEY_BYTES
            .saturating_sub(prefix.len() + hash.len() + ".pdf".len() + "/_".len());
        let slug = trim_to_bytes(slug, budget);

        format!("{prefix}/{slug}_{hash}.pdf")
    }

    /// Store canonical bytes, deduplicating against prior runs.
    ///
    /// The upload is skipped when the recomputed hash matches the prior
    /// run's recorded hash, or when an object already exists under the
    /// derived key. Upload failures are retried; exhaustion escalates to
    /// `ArchiveFailed` for this document only.
    pub async fn store_canonical(
        &self,
        document: &Document,
        canonical: &[u8],
        prior_hash: Option<&str>,
    ) -> Result<ArchiveOutcome> {
        let md5_sum = md5_hex(canonical);
        let key = Self::object_key(document, &md5_sum);

        if prior_hash == Some(md5_sum.as_str()) {
            debug!(document_id = %document.id, %key, "content hash unchanged since prior run");
            return Ok(ArchiveOutcome {
                key,
                md5_sum,
                uploaded: false,
            });
        }

        if self.store.exists(&key).await? {
            debug!(document_id = %document.id, %key, "object already archived, reusing key");
            return Ok(ArchiveOutcome {
                key,
                md5_sum,
                uploaded: false,
            });
        }

        self.retry
            .run(
                "archive_upload",
                |e: &IngestError| matches!(e, IngestError::Storage(_) | IngestError::Io { .. }),
                || self.store.put(&key, canonical),
            )
            .await
            .map_err(|e| IngestError::ArchiveFailed {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        info!(document_id = %document.id, %key, bytes = canonical.len(), "archived canonical artifact");
        Ok(ArchiveOutcome {
            key,
            md5_sum,
            uploaded: true,
        })
    }
}
