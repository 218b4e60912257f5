//! Blob storage for deposit proofs and request result artifacts
//!
//! The core never inspects content; it only records references and counts.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BlobError {
    #[error("Invalid blob path: {0}")]
    InvalidPath(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Blob I/O error: {0}")]
    Io(String),
}

/// Opaque pointer to a stored blob
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<BlobRef, BlobError>;
    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError>;
    /// Deleting a missing blob is not an error
    async fn delete(&self, blob: &BlobRef) -> Result<(), BlobError>;
}

/// Accept only relative paths made of normal components
fn check_path(path: &str) -> Result<(), BlobError> {
    let p = Path::new(path);
    if path.is_empty() || !p.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(BlobError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Build a blob path segment from a user-supplied file name
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.chars().take(96).collect()
    }
}

// ============================================================================
// Memory
// ============================================================================

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<BlobRef, BlobError> {
        check_path(path)?;
        self.blobs.insert(path.to_string(), bytes);
        Ok(BlobRef(path.to_string()))
    }

    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .get(blob.as_str())
            .map(|b| b.value().clone())
            .ok_or_else(|| BlobError::NotFound(blob.to_string()))
    }

    async fn delete(&self, blob: &BlobRef) -> Result<(), BlobError> {
        self.blobs.remove(blob.as_str());
        Ok(())
    }
}

// ============================================================================
// Filesystem
// ============================================================================

/// Blobs as files under a root directory
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, BlobError> {
        check_path(path)?;
        Ok(self.root.join(path))
    }
}

fn io_error(e: std::io::Error, blob: &str) -> BlobError {
    if e.kind() == std::io::ErrorKind::NotFound {
        BlobError::NotFound(blob.to_string())
    } else {
        BlobError::Io(e.to_string())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<BlobRef, BlobError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobError::Io(e.to_string()))?;
        }
        // Write then rename so readers never observe a partial file
        let tmp = target.with_extension("partial");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| BlobError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| BlobError::Io(e.to_string()))?;
        Ok(BlobRef(path.to_string()))
    }

    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError> {
        let target = self.resolve(blob.as_str())?;
        tokio::fs::read(&target)
            .await
            .map_err(|e| io_error(e, blob.as_str()))
    }

    async fn delete(&self, blob: &BlobRef) -> Result<(), BlobError> {
        let target = self.resolve(blob.as_str())?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobError::Io(e.to_string())),
        }
    }
}
