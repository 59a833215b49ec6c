//! The pair of stores an exchange reads from and merges into, plus the
//! calls UI hosts use to show the feed and friend list.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::error::StoreError;
use crate::friends::FriendStore;
use crate::messages::{BinnedMessageStore, PriorityStore};
use crate::storage::{FileBackend, KeyValueStore, MemoryBackend, StorageError};

pub const MESSAGES_FILE: &str = "messages.json";
pub const FRIENDS_FILE: &str = "friends.json";

#[derive(Clone)]
pub struct Stores {
    pub messages: Arc<dyn PriorityStore>,
    pub friends: Arc<FriendStore>,
}

impl Stores {
    pub fn new(messages: Arc<dyn PriorityStore>, friends: Arc<FriendStore>) -> Self {
        Self { messages, friends }
    }

    /// Binned message store and friend store over volatile backends.
    pub fn in_memory() -> Self {
        let messages: Arc<dyn KeyValueStore> = Arc::new(MemoryBackend::new());
        let friends: Arc<dyn KeyValueStore> = Arc::new(MemoryBackend::new());
        Self::over(messages, friends)
    }

    /// Binned message store and friend store persisted as JSON files in `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let messages: Arc<dyn KeyValueStore> = Arc::new(FileBackend::open(dir.join(MESSAGES_FILE))?);
        let friends: Arc<dyn KeyValueStore> = Arc::new(FileBackend::open(dir.join(FRIENDS_FILE))?);
        Ok(Self::over(messages, friends))
    }

    fn over(messages: Arc<dyn KeyValueStore>, friends: Arc<dyn KeyValueStore>) -> Self {
        Self {
            messages: Arc::new(BinnedMessageStore::new(messages)),
            friends: Arc::new(FriendStore::new(friends)),
        }
    }

    pub fn add_message(&self, body: &str, priority: f64) -> Result<(), StoreError> {
        self.messages.insert(body, priority)
    }

    pub fn top_k(&self, k: usize) -> Result<Vec<(f64, String)>, StoreError> {
        self.messages.top_k(k)
    }

    pub fn all_friends(&self) -> Result<HashSet<Vec<u8>>, StoreError> {
        self.friends.all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_persists_both_stores() {
        let dir = tempfile::tempdir().unwrap();
        {
            let s = Stores::open(dir.path()).unwrap();
            s.add_message("persisted", 1.1).unwrap();
            s.friends.add(b"friend").unwrap();
        }
        let s = Stores::open(dir.path()).unwrap();
        assert_eq!(s.top_k(5).unwrap(), vec![(1.1, "persisted".to_string())]);
        assert!(s.all_friends().unwrap().contains(&b"friend".to_vec()));
    }
}
