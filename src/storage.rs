//! Key-slot persistence for sessions and the consent decision.
//!
//! The session store only ever talks to the [`Storage`] trait, so the
//! state machine does not care whether slots live on disk or in memory.
//! Session arrays are written as deflated JSON, base64 encoded.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::StorageError;
use crate::types::ChatSession;

/// Slot holding the compressed session collection.
pub const SESSIONS_KEY: &str = "chat-sessions";
/// Slot holding the consent decision (`"true"` / `"false"`).
pub const CONSENT_KEY: &str = "chat-consent";

/// Default per-slot size bound, mirroring typical browser storage quotas.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// A string-keyed store of string slots.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a slot. Values above the storage quota are rejected.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// --- File storage ---

/// One file per slot inside a data directory.
pub struct FileStorage {
    dir: PathBuf,
    quota_bytes: usize,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>, quota_bytes: usize) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, quota_bytes })
    }

    fn slot_path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.slot", name))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(self.slot_path(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if value.len() > self.quota_bytes {
            return Err(StorageError::QuotaExceeded {
                size: value.len(),
                limit: self.quota_bytes,
            });
        }
        let path = self.slot_path(key);
        let tmp = path.with_extension("slot.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.slot_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// --- In-memory storage ---

/// Volatile slots, used for `--ephemeral` runs and in tests.
pub struct MemoryStorage {
    slots: Mutex<HashMap<String, String>>,
    quota_bytes: usize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA_BYTES)
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            quota_bytes,
        }
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.slots().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if value.len() > self.quota_bytes {
            return Err(StorageError::QuotaExceeded {
                size: value.len(),
                limit: self.quota_bytes,
            });
        }
        self.slots().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.slots().remove(key);
        Ok(())
    }
}

// --- Session codec ---

/// Serialize and compress the session collection into a printable string.
pub fn encode_sessions(sessions: &[ChatSession]) -> Result<String, StorageError> {
    let json = serde_json::to_vec(sessions)?;
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

/// Reverse of [`encode_sessions`]. Any malformed layer yields `Corrupt`.
pub fn decode_sessions(encoded: &str) -> Result<Vec<ChatSession>, StorageError> {
    let compressed = STANDARD
        .decode(encoded.trim())
        .map_err(|e| StorageError::Corrupt(format!("base64: {}", e)))?;
    let mut json = Vec::new();
    DeflateDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .map_err(|e| StorageError::Corrupt(format!("deflate: {}", e)))?;
    serde_json::from_slice(&json).map_err(|e| StorageError::Corrupt(format!("json: {}", e)))
}
