//! Key-value persistence backends for the message and friend stores.
//!
//! Stores never mutate a backend in place: every operation builds a [`Batch`]
//! and hands it to [`KeyValueStore::commit`], which applies all edits or none.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A stored value. Mirrors the value kinds of a platform preference file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Float(f64),
    Int(i64),
    Text(String),
    Set(BTreeSet<String>),
}

impl Value {
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_set(self) -> Option<BTreeSet<String>> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }
}

/// One pending edit.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    Put(String, Value),
    Remove(String),
}

/// Ordered list of edits committed atomically. Later edits to the same key win.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    edits: Vec<Edit>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.edits.push(Edit::Put(key.into(), value));
        self
    }

    pub fn put_float(&mut self, key: impl Into<String>, value: f64) -> &mut Self {
        self.put(key, Value::Float(value))
    }

    pub fn put_set(&mut self, key: impl Into<String>, value: BTreeSet<String>) -> &mut Self {
        self.put(key, Value::Set(value))
    }

    pub fn remove(&mut self, key: impl Into<String>) -> &mut Self {
        self.edits.push(Edit::Remove(key.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    fn apply_to(&self, map: &mut BTreeMap<String, Value>) {
        for edit in &self.edits {
            match edit {
                Edit::Put(k, v) => {
                    map.insert(k.clone(), v.clone());
                }
                Edit::Remove(k) => {
                    map.remove(k);
                }
            }
        }
    }
}

/// Storage-layer failure. Stores surface this unchanged inside `StoreError::Storage`.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("corrupt value for key {0}")]
    Corrupt(String),
}

/// Minimal key-value backend. Implementations synchronize internally.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StorageError>;

    /// Apply every edit in `batch` or none of them.
    fn commit(&self, batch: &Batch) -> Result<(), StorageError>;
}

fn scan(map: &BTreeMap<String, Value>, prefix: &str) -> Vec<(String, Value)> {
    map.range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Volatile backend for tests and hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    map: RwLock<BTreeMap<String, Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StorageError> {
        Ok(scan(&self.map.read(), prefix))
    }

    fn commit(&self, batch: &Batch) -> Result<(), StorageError> {
        batch.apply_to(&mut self.map.write());
        Ok(())
    }
}

/// JSON file backend. The whole map is rewritten on every commit: written to a
/// sibling temp file, then renamed over the original. The in-memory copy is
/// only replaced after the rename succeeds.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    map: RwLock<BTreeMap<String, Value>>,
}

impl FileBackend {
    /// Open (or create on first commit) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let map = if path.exists() {
            let raw = fs::read(&path)?;
            if raw.is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_slice(&raw)?
            }
        } else {
            BTreeMap::new()
        };
        tracing::debug!(path = %path.display(), entries = map.len(), "opened file store");
        Ok(Self {
            path,
            map: RwLock::new(map),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self, map: &BTreeMap<String, Value>) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(map)?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileBackend {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StorageError> {
        Ok(scan(&self.map.read(), prefix))
    }

    fn commit(&self, batch: &Batch) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut guard = self.map.write();
        let mut next = guard.clone();
        batch.apply_to(&mut next);
        self.write_file(&next)?;
        *guard = next;
        Ok(())
    }
}
