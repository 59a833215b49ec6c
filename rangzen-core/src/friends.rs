//! Friend store: a persistent set of opaque binary friend IDs, kept as base64
//! strings under a single key.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::storage::{Batch, KeyValueStore, StorageError};

const FRIENDS_KEY: &str = "friends";

/// Error from the friend ID text codec.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid argument: missing input")]
    InvalidArgument,
    #[error("malformed base64: {0}")]
    Malformed(String),
}

/// Encode a friend ID as text. `None` is an error, not an empty string.
pub fn encode(bytes: Option<&[u8]>) -> Result<String, CodecError> {
    let bytes = bytes.ok_or(CodecError::InvalidArgument)?;
    Ok(STANDARD.encode(bytes))
}

/// Decode text produced by [`encode`].
pub fn decode(text: Option<&str>) -> Result<Vec<u8>, CodecError> {
    let text = text.ok_or(CodecError::InvalidArgument)?;
    STANDARD
        .decode(text)
        .map_err(|e| CodecError::Malformed(e.to_string()))
}

pub struct FriendStore {
    kv: Arc<dyn KeyValueStore>,
    lock: Mutex<()>,
}

impl FriendStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            lock: Mutex::new(()),
        }
    }

    fn encoded(&self) -> Result<BTreeSet<String>, StoreError> {
        match self.kv.get(FRIENDS_KEY)? {
            None => Ok(BTreeSet::new()),
            Some(v) => v
                .into_set()
                .ok_or_else(|| StoreError::Storage(StorageError::Corrupt(FRIENDS_KEY.into()))),
        }
    }

    fn save(&self, set: BTreeSet<String>) -> Result<(), StoreError> {
        let mut batch = Batch::new();
        batch.put_set(FRIENDS_KEY, set);
        self.kv.commit(&batch)?;
        Ok(())
    }

    /// Add a friend. Returns false if already present.
    pub fn add(&self, id: &[u8]) -> Result<bool, StoreError> {
        if id.is_empty() {
            return Err(StoreError::invalid("empty friend id"));
        }
        let key = STANDARD.encode(id);
        let _guard = self.lock.lock();
        let mut set = self.encoded()?;
        if !set.insert(key) {
            return Ok(false);
        }
        self.save(set)?;
        Ok(true)
    }

    /// Remove a friend. Returns false if it was not present.
    pub fn remove(&self, id: &[u8]) -> Result<bool, StoreError> {
        let key = STANDARD.encode(id);
        let _guard = self.lock.lock();
        let mut set = self.encoded()?;
        if !set.remove(&key) {
            return Ok(false);
        }
        self.save(set)?;
        Ok(true)
    }

    pub fn contains(&self, id: &[u8]) -> Result<bool, StoreError> {
        let key = STANDARD.encode(id);
        let _guard = self.lock.lock();
        Ok(self.encoded()?.contains(&key))
    }

    pub fn all(&self) -> Result<HashSet<Vec<u8>>, StoreError> {
        let _guard = self.lock.lock();
        let mut out = HashSet::new();
        for text in self.encoded()? {
            match decode(Some(&text)) {
                Ok(id) => {
                    out.insert(id);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping undecodable friend entry");
                }
            }
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let _guard = self.lock.lock();
        Ok(self.encoded()?.len())
    }
}
