//! Table-shaped message store: one row per message, unique by message text.
//! Same operation contracts as the binned store; adds substring search.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::messages::{check_body, check_priority, sort_ranked, PriorityStore};
use crate::storage::{Batch, KeyValueStore, StorageError, Value};

const ROW_PREFIX: &str = "message:";

/// One stored row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRow {
    pub message: String,
    pub priority: f64,
    pub id: Uuid,
    /// Millis since epoch when the message was first stored.
    pub time_stored: u64,
}

pub struct TableMessageStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
}

fn row_key(message: &str) -> String {
    format!("{}{}", ROW_PREFIX, message)
}

fn decode_row(key: String, value: Value) -> Result<MessageRow, StoreError> {
    let text = value
        .as_text()
        .ok_or_else(|| StoreError::Storage(StorageError::Corrupt(key.clone())))?;
    serde_json::from_str(text).map_err(|e| StoreError::Storage(StorageError::Serialize(e)))
}

impl TableMessageStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            kv,
            clock,
            lock: Mutex::new(()),
        }
    }

    fn row(&self, message: &str) -> Result<Option<MessageRow>, StoreError> {
        let key = row_key(message);
        match self.kv.get(&key)? {
            None => Ok(None),
            Some(v) => decode_row(key, v).map(Some),
        }
    }

    fn rows(&self) -> Result<Vec<MessageRow>, StoreError> {
        self.kv
            .scan_prefix(ROW_PREFIX)?
            .into_iter()
            .map(|(k, v)| decode_row(k, v))
            .collect()
    }

    fn put_row(&self, row: &MessageRow) -> Result<(), StoreError> {
        let text = serde_json::to_string(row).map_err(StorageError::Serialize)?;
        let mut batch = Batch::new();
        batch.put(row_key(&row.message), Value::Text(text));
        self.kv.commit(&batch)?;
        Ok(())
    }

    /// Full row for `message`, including its id and storage time.
    pub fn get(&self, message: &str) -> Result<MessageRow, StoreError> {
        let _guard = self.lock.lock();
        self.row(message)?.ok_or(StoreError::NotFound)
    }

    /// Rows whose message contains `needle`, case-insensitively, ranked like `top_k`.
    pub fn search(&self, needle: &str) -> Result<Vec<MessageRow>, StoreError> {
        let needle = needle.to_lowercase();
        let _guard = self.lock.lock();
        let mut hits: Vec<MessageRow> = self
            .rows()?
            .into_iter()
            .filter(|r| r.message.to_lowercase().contains(&needle))
            .collect();
        hits.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then_with(|| a.message.cmp(&b.message))
        });
        Ok(hits)
    }
}

impl PriorityStore for TableMessageStore {
    fn insert(&self, body: &str, priority: f64) -> Result<(), StoreError> {
        check_priority(priority)?;
        check_body(body)?;
        let _guard = self.lock.lock();
        let row = match self.row(body)? {
            Some(mut existing) => {
                existing.priority = priority;
                existing
            }
            None => MessageRow {
                message: body.to_string(),
                priority,
                id: Uuid::new_v4(),
                time_stored: self.clock.now_millis(),
            },
        };
        self.put_row(&row)
    }

    fn lookup_priority(&self, body: &str) -> Result<f64, StoreError> {
        let _guard = self.lock.lock();
        self.row(body)?.map(|r| r.priority).ok_or(StoreError::NotFound)
    }

    fn update_priority(&self, body: &str, priority: f64) -> Result<(), StoreError> {
        check_priority(priority)?;
        let _guard = self.lock.lock();
        let mut row = self.row(body)?.ok_or(StoreError::NotFound)?;
        row.priority = priority;
        self.put_row(&row)
    }

    fn delete(&self, body: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        if self.row(body)?.is_none() {
            return Err(StoreError::NotFound);
        }
        let mut batch = Batch::new();
        batch.remove(row_key(body));
        self.kv.commit(&batch)?;
        Ok(())
    }

    fn top_k(&self, k: usize) -> Result<Vec<(f64, String)>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let _guard = self.lock.lock();
        let mut ranked: Vec<(f64, String)> = self
            .rows()?
            .into_iter()
            .map(|r| (r.priority, r.message))
            .collect();
        sort_ranked(&mut ranked);
        ranked.truncate(k);
        Ok(ranked)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let _guard = self.lock.lock();
        Ok(self.kv.scan_prefix(ROW_PREFIX)?.len())
    }
}
