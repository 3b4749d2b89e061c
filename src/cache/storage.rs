// =============================================================================
// Storage backends — durable string key/value store behind the cache
// =============================================================================
//
// `MemoryStorage` keeps everything in a map (optionally byte-capped).
// `FileStorage` writes one JSON record per key under a directory. File names
// are the SHA-256 hex digest of the key so arbitrary request URLs map to safe
// names; the original key is stored inside the record so `keys()` can list
// them. Writes go through a tmp file + rename so a crash never leaves a torn
// record behind.
//
// Both backends enforce an optional byte quota and fail with
// `StorageError::QuotaExceeded` when a write would exceed it.
// =============================================================================

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::StorageError;

/// String key/value store. Values are whole serialized records; every write
/// replaces the previous value for that key entirely.
pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

// =============================================================================
// MemoryStorage
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
    quota_bytes: Option<u64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the total of key + value bytes.
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn used_bytes(&self) -> u64 {
        self.items
            .read()
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum()
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.items.write();

        if let Some(quota) = self.quota_bytes {
            let others: u64 = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| (k.len() + v.len()) as u64)
                .sum();
            let needed = others + (key.len() + value.len()) as u64;
            if needed > quota {
                return Err(StorageError::QuotaExceeded { needed, quota });
            }
        }

        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.items.read().keys().cloned().collect())
    }
}

// =============================================================================
// FileStorage
// =============================================================================

/// On-disk record: the original key plus its value.
#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    key: String,
    value: String,
}

#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    quota_bytes: Option<u64>,
    /// Serialises writers so the quota check and the write are one step.
    write_lock: parking_lot::Mutex<()>,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory.
    pub fn open(dir: impl AsRef<Path>, quota_bytes: Option<u64>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), ?quota_bytes, "file storage opened");
        Ok(Self {
            dir,
            quota_bytes,
            write_lock: parking_lot::Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }

    fn record_files(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        Ok(files)
    }

    fn used_bytes_excluding(&self, skip: &Path) -> Result<u64, StorageError> {
        let mut total = 0;
        for path in self.record_files()? {
            if path == skip {
                continue;
            }
            // A file removed concurrently simply does not count.
            if let Ok(meta) = fs::metadata(&path) {
                total += meta.len();
            }
        }
        Ok(total)
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: FileRecord = serde_json::from_str(&content)?;
        Ok(Some(record.value))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let content = serde_json::to_string(&FileRecord {
            key: key.to_string(),
            value: value.to_string(),
        })?;

        let _guard = self.write_lock.lock();

        if let Some(quota) = self.quota_bytes {
            let needed = self.used_bytes_excluding(&path)? + content.len() as u64;
            if needed > quota {
                return Err(StorageError::QuotaExceeded { needed, quota });
            }
        }

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &content)?;
        if let Err(e) = fs::rename(&tmp_path, &path) {
            warn!(path = %path.display(), error = %e, "rename of storage record failed");
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for path in self.record_files()? {
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<FileRecord>(&content) {
                Ok(record) => keys.push(record.key),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable storage record removed");
                    let _ = fs::remove_file(&path);
                }
            }
        }
        Ok(keys)
    }
}
