//! Build cache - per-job snapshots of build output keyed by job identity

use crate::core::{Job, JobId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Error types for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("cache entry contains unsafe path '{0}'")]
    UnsafePath(String),

    #[error("cache walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Cache key derived only from a job's identity and the cache version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// `<version>-<slug>-<hash>` where the hash covers every axis value
    pub fn for_job(version: &str, id: &JobId) -> Self {
        let identity = serde_json::to_string(id).unwrap_or_else(|_| id.to_string());
        let mut hasher = Sha256::new();
        hasher.update(version.as_bytes());
        hasher.update([0u8]);
        hasher.update(identity.as_bytes());
        let digest = hasher.finalize();
        let hash: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();

        CacheKey(format!("{}-{}-{}", version, id.slug(), hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque cache entry: a zip archive of a build directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheContents {
    bytes: Vec<u8>,
}

impl CacheContents {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Trait for cache storage backends
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheContents>, CacheError>;

    /// Store an entry; readers see the old entry or the complete new one
    async fn put(&self, key: &CacheKey, contents: CacheContents) -> Result<(), CacheError>;
}

/// Cache entries stored as files under a root directory
pub struct FsCacheStore {
    root: PathBuf,
}

impl FsCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store under the user cache directory
    pub fn with_default_path() -> Self {
        let cache_dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(cache_dir.join("buildmatrix"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.zip", key))
    }
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheContents>, CacheError> {
        match tokio::fs::read(self.entry_path(key)).await {
            Ok(bytes) => Ok(Some(CacheContents::from_bytes(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &CacheKey, contents: CacheContents) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.root).await?;

        // Same directory as the entry so the rename stays on one filesystem
        let temp = self
            .root
            .join(format!(".{}.{}.tmp", key, Uuid::new_v4().simple()));
        tokio::fs::write(&temp, contents.as_bytes()).await?;

        if let Err(e) = tokio::fs::rename(&temp, self.entry_path(key)).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// In-memory cache store (for testing or dry runs)
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<CacheKey, CacheContents>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn contains(&self, key: &CacheKey) -> bool {
        self.entries.read().await.contains_key(key)
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheContents>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &CacheKey, contents: CacheContents) -> Result<(), CacheError> {
        self.entries.write().await.insert(key.clone(), contents);
        Ok(())
    }
}

/// Keys, restores and saves per-job build caches
pub struct CacheManager {
    store: Box<dyn CacheStore>,
    version: String,
}

impl CacheManager {
    pub fn new(store: impl CacheStore + 'static, version: impl Into<String>) -> Self {
        Self {
            store: Box::new(store),
            version: version.into(),
        }
    }

    pub fn key_for(&self, job: &Job) -> CacheKey {
        CacheKey::for_job(&self.version, &job.id)
    }

    pub async fn restore(&self, key: &CacheKey) -> Result<Option<CacheContents>, CacheError> {
        let contents = self.store.get(key).await?;
        match &contents {
            Some(c) => debug!("Cache hit for {} ({} bytes)", key, c.len()),
            None => debug!("Cache miss for {}", key),
        }
        Ok(contents)
    }

    pub async fn save(&self, key: &CacheKey, contents: CacheContents) -> Result<(), CacheError> {
        let size = contents.len();
        self.store.put(key, contents).await?;
        info!("Saved cache {} ({} bytes)", key, size);
        Ok(())
    }

    /// Zip a directory tree; `None` when there is nothing to cache
    pub async fn snapshot(&self, dir: &Path) -> Result<Option<CacheContents>, CacheError> {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || snapshot_dir(&dir))
            .await
            .map_err(|e| CacheError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    /// Extract an entry into `dir`, returning the number of files written
    pub async fn unpack(&self, contents: &CacheContents, dir: &Path) -> Result<usize, CacheError> {
        let contents = contents.clone();
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || unpack_into(&contents, &dir))
            .await
            .map_err(|e| CacheError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }
}

fn snapshot_dir(dir: &Path) -> Result<Option<CacheContents>, CacheError> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut files = 0usize;

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|_| CacheError::UnsafePath(entry.path().display().to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        writer.start_file(name, options)?;
        let mut file = fs::File::open(entry.path())?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        writer.write_all(&buffer)?;
        files += 1;
    }

    if files == 0 {
        return Ok(None);
    }

    let cursor = writer.finish()?;
    Ok(Some(CacheContents::from_bytes(cursor.into_inner())))
}

fn unpack_into(contents: &CacheContents, dir: &Path) -> Result<usize, CacheError> {
    let mut archive = ZipArchive::new(Cursor::new(contents.as_bytes()))?;
    fs::create_dir_all(dir)?;
    let mut files = 0usize;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| CacheError::UnsafePath(entry.name().to_string()))?;
        let target = dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        files += 1;
    }

    Ok(files)
}
