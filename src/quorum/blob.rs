//! Blob stores holding configuration copies
//!
//! One blob store per storage account. Reads and writes are whole-document;
//! a write replaces the document at its path atomically.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::thread;
use std::time::Duration;

use thiserror::Error;

/// Result type for blob operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Blob store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Blob store unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Backend for one configuration location
pub trait BlobStore: Send + Sync + fmt::Debug {
    /// Read the document at `path`
    fn read(&self, path: &str) -> BlobResult<Vec<u8>>;

    /// Write (create or replace) the document at `path`
    fn write(&self, path: &str, data: &[u8]) -> BlobResult<()>;

    /// Check if `path` exists
    fn exists(&self, path: &str) -> BlobResult<bool>;

    /// List documents whose path starts with `prefix`
    fn list(&self, prefix: &str) -> BlobResult<Vec<String>>;
}

/// Filesystem-backed blob store
#[derive(Debug)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl BlobStore for LocalBlobStore {
    fn read(&self, path: &str) -> BlobResult<Vec<u8>> {
        fs::read(self.full_path(path)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BlobError::NotFound(path.to_string())
            } else {
                BlobError::Io(e.to_string())
            }
        })
    }

    // Write-then-rename so readers never see a torn document.
    fn write(&self, path: &str, data: &[u8]) -> BlobResult<()> {
        let full_path = self.full_path(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BlobError::Io(e.to_string()))?;
        }
        let staging = full_path.with_extension("staging");
        fs::write(&staging, data).map_err(|e| BlobError::Io(e.to_string()))?;
        fs::rename(&staging, &full_path).map_err(|e| BlobError::Io(e.to_string()))
    }

    fn exists(&self, path: &str) -> BlobResult<bool> {
        Ok(self.full_path(path).is_file())
    }

    fn list(&self, prefix: &str) -> BlobResult<Vec<String>> {
        let dir = self.full_path(prefix);
        let mut results = Vec::new();
        if dir.is_dir() {
            for entry in fs::read_dir(&dir).map_err(|e| BlobError::Io(e.to_string()))? {
                let entry = entry.map_err(|e| BlobError::Io(e.to_string()))?;
                if let Some(name) = entry.file_name().to_str() {
                    if !name.ends_with(".staging") {
                        results.push(format!("{}/{}", prefix, name));
                    }
                }
            }
        }
        results.sort();
        Ok(results)
    }
}

/// In-memory blob store with outage and latency switches.
#[derive(Debug)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    fn enter(&self) -> BlobResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            thread::sleep(Duration::from_millis(latency));
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BlobError::Unavailable("store is offline".to_string()))
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn read(&self, path: &str) -> BlobResult<Vec<u8>> {
        self.enter()?;
        let blobs = self.blobs.read().map_err(|e| BlobError::Io(e.to_string()))?;
        blobs
            .get(path)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(path.to_string()))
    }

    fn write(&self, path: &str, data: &[u8]) -> BlobResult<()> {
        self.enter()?;
        let mut blobs = self.blobs.write().map_err(|e| BlobError::Io(e.to_string()))?;
        blobs.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn exists(&self, path: &str) -> BlobResult<bool> {
        self.enter()?;
        let blobs = self.blobs.read().map_err(|e| BlobError::Io(e.to_string()))?;
        Ok(blobs.contains_key(path))
    }

    fn list(&self, prefix: &str) -> BlobResult<Vec<String>> {
        self.enter()?;
        let blobs = self.blobs.read().map_err(|e| BlobError::Io(e.to_string()))?;
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        Ok(blobs
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_write_read() {
        let temp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp.path());

        store.write("cfg/current.json", b"hello").unwrap();
        assert_eq!(store.read("cfg/current.json").unwrap(), b"hello");
        assert!(store.exists("cfg/current.json").unwrap());

        store.write("cfg/current.json", b"again").unwrap();
        assert_eq!(store.read("cfg/current.json").unwrap(), b"again");
    }

    #[test]
    fn test_local_not_found() {
        let temp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp.path());
        assert!(matches!(store.read("missing"), Err(BlobError::NotFound(_))));
        assert!(!store.exists("missing").unwrap());
    }

    #[test]
    fn test_local_list() {
        let temp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp.path());
        store.write("cfg/history/b.json", b"2").unwrap();
        store.write("cfg/history/a.json", b"1").unwrap();
        assert_eq!(
            store.list("cfg/history").unwrap(),
            vec!["cfg/history/a.json", "cfg/history/b.json"]
        );
    }

    #[test]
    fn test_memory_outage() {
        let store = MemoryBlobStore::new();
        store.write("p", b"x").unwrap();
        store.set_available(false);
        assert!(matches!(store.read("p"), Err(BlobError::Unavailable(_))));
        store.set_available(true);
        assert_eq!(store.read("p").unwrap(), b"x");
    }

    #[test]
    fn test_memory_list_prefix() {
        let store = MemoryBlobStore::new();
        store.write("cfg/history/1", b"1").unwrap();
        store.write("cfg/current.json", b"c").unwrap();
        store.write("cfgx/history/1", b"1").unwrap();
        assert_eq!(store.list("cfg/history").unwrap(), vec!["cfg/history/1"]);
    }
}
