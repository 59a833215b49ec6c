//! Priority-ranked message store.
//!
//! Messages are keyed by body. Each carries a priority in
//! [`MIN_PRIORITY`, `MAX_PRIORITY`]; the binned store partitions that range into
//! [`NUM_BINS`] equal-width bins so top-K retrieval can walk bins from the top
//! and stop early.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::StoreError;
use crate::storage::{Batch, KeyValueStore, StorageError};

pub const MIN_PRIORITY: f64 = 0.0;
pub const MAX_PRIORITY: f64 = 2.0;
pub const NUM_BINS: usize = 5;
/// Maximum message body length, in characters.
pub const MAX_BODY_CHARS: usize = 140;

const PRIORITY_PREFIX: &str = "priority:";
const BIN_PREFIX: &str = "bin:";

/// Operations every message store variant supports with identical contracts.
pub trait PriorityStore: Send + Sync {
    /// Insert `body` with `priority`, replacing the priority of an existing body.
    fn insert(&self, body: &str, priority: f64) -> Result<(), StoreError>;

    fn lookup_priority(&self, body: &str) -> Result<f64, StoreError>;

    fn update_priority(&self, body: &str, priority: f64) -> Result<(), StoreError>;

    fn delete(&self, body: &str) -> Result<(), StoreError>;

    /// Up to `k` `(priority, body)` pairs, highest priority first. Equal
    /// priorities come out in ascending body order.
    fn top_k(&self, k: usize) -> Result<Vec<(f64, String)>, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;

    /// Insert every valid `(body, priority)` pair, skipping invalid ones. Later
    /// pairs win over earlier ones with the same body. Returns how many were stored.
    fn insert_many(&self, items: &[(String, f64)]) -> Result<usize, StoreError> {
        let mut stored = 0;
        for (body, priority) in items {
            match self.insert(body, *priority) {
                Ok(()) => stored += 1,
                Err(StoreError::InvalidArgument(reason)) => {
                    tracing::debug!(%reason, "skipping invalid message");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(stored)
    }

    fn contains(&self, body: &str) -> Result<bool, StoreError> {
        match self.lookup_priority(body) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Reject out-of-domain and NaN priorities. Never clamps.
pub fn check_priority(priority: f64) -> Result<(), StoreError> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(StoreError::invalid(format!(
            "priority {} outside [{}, {}]",
            priority, MIN_PRIORITY, MAX_PRIORITY
        )));
    }
    Ok(())
}

pub fn check_body(body: &str) -> Result<(), StoreError> {
    if body.is_empty() {
        return Err(StoreError::invalid("empty message body"));
    }
    let chars = body.chars().count();
    if chars > MAX_BODY_CHARS {
        return Err(StoreError::invalid(format!(
            "message body is {} chars, limit {}",
            chars, MAX_BODY_CHARS
        )));
    }
    Ok(())
}

/// Bin index for a valid priority. The top of the domain lands in the last bin.
pub fn bin_for(priority: f64) -> usize {
    let width = (MAX_PRIORITY - MIN_PRIORITY) / NUM_BINS as f64;
    let bin = ((priority - MIN_PRIORITY) / width).floor() as usize;
    bin.min(NUM_BINS - 1)
}

/// Descending priority, then ascending body.
pub(crate) fn sort_ranked(rows: &mut [(f64, String)]) {
    rows.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
}

fn priority_key(body: &str) -> String {
    format!("{}{}", PRIORITY_PREFIX, body)
}

fn bin_key(bin: usize) -> String {
    format!("{}{}", BIN_PREFIX, bin)
}

/// Flat key-value store: `priority:<body> -> float` and `bin:<n> -> set<body>`.
pub struct BinnedMessageStore {
    kv: Arc<dyn KeyValueStore>,
    // Serializes read-modify-write sequences against the backend.
    lock: Mutex<()>,
}

impl BinnedMessageStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            lock: Mutex::new(()),
        }
    }

    fn stored_priority(&self, body: &str) -> Result<Option<f64>, StoreError> {
        let key = priority_key(body);
        match self.kv.get(&key)? {
            None => Ok(None),
            Some(v) => v
                .as_float()
                .map(Some)
                .ok_or_else(|| StoreError::Storage(StorageError::Corrupt(key))),
        }
    }

    fn load_bin(&self, bin: usize) -> Result<BTreeSet<String>, StoreError> {
        let key = bin_key(bin);
        match self.kv.get(&key)? {
            None => Ok(BTreeSet::new()),
            Some(v) => v
                .into_set()
                .ok_or_else(|| StoreError::Storage(StorageError::Corrupt(key))),
        }
    }

    fn bin_mut<'m>(
        &self,
        bins: &'m mut BTreeMap<usize, BTreeSet<String>>,
        bin: usize,
    ) -> Result<&'m mut BTreeSet<String>, StoreError> {
        if !bins.contains_key(&bin) {
            let set = self.load_bin(bin)?;
            bins.insert(bin, set);
        }
        Ok(bins.entry(bin).or_default())
    }

    /// Commit one batch moving each body from its current bin (if any) to the
    /// bin for its new priority. Caller holds the lock and has validated inputs.
    fn write_locked(&self, items: &[(&str, f64)]) -> Result<(), StoreError> {
        let mut bins: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
        let mut written: BTreeMap<&str, f64> = BTreeMap::new();
        for &(body, priority) in items {
            let old = match written.get(body) {
                Some(p) => Some(*p),
                None => self.stored_priority(body)?,
            };
            if let Some(old) = old {
                self.bin_mut(&mut bins, bin_for(old))?.remove(body);
            }
            self.bin_mut(&mut bins, bin_for(priority))?.insert(body.to_string());
            written.insert(body, priority);
        }

        let mut batch = Batch::new();
        for (bin, set) in bins {
            if set.is_empty() {
                batch.remove(bin_key(bin));
            } else {
                batch.put_set(bin_key(bin), set);
            }
        }
        for (body, priority) in written {
            batch.put_float(priority_key(body), priority);
        }
        self.kv.commit(&batch)?;
        Ok(())
    }
}

impl PriorityStore for BinnedMessageStore {
    fn insert(&self, body: &str, priority: f64) -> Result<(), StoreError> {
        check_priority(priority)?;
        check_body(body)?;
        let _guard = self.lock.lock();
        self.write_locked(&[(body, priority)])
    }

    fn lookup_priority(&self, body: &str) -> Result<f64, StoreError> {
        let _guard = self.lock.lock();
        self.stored_priority(body)?.ok_or(StoreError::NotFound)
    }

    fn update_priority(&self, body: &str, priority: f64) -> Result<(), StoreError> {
        check_priority(priority)?;
        let _guard = self.lock.lock();
        if self.stored_priority(body)?.is_none() {
            return Err(StoreError::NotFound);
        }
        self.write_locked(&[(body, priority)])
    }

    fn delete(&self, body: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let old = self.stored_priority(body)?.ok_or(StoreError::NotFound)?;
        let bin = bin_for(old);
        let mut set = self.load_bin(bin)?;
        set.remove(body);

        let mut batch = Batch::new();
        if set.is_empty() {
            batch.remove(bin_key(bin));
        } else {
            batch.put_set(bin_key(bin), set);
        }
        batch.remove(priority_key(body));
        self.kv.commit(&batch)?;
        Ok(())
    }

    fn top_k(&self, k: usize) -> Result<Vec<(f64, String)>, StoreError> {
        let mut out = Vec::new();
        if k == 0 {
            return Ok(out);
        }
        let _guard = self.lock.lock();
        for bin in (0..NUM_BINS).rev() {
            let set = self.load_bin(bin)?;
            if set.is_empty() {
                continue;
            }
            let mut ranked = Vec::with_capacity(set.len());
            for body in set {
                let p = self
                    .stored_priority(&body)?
                    .ok_or_else(|| StoreError::Storage(StorageError::Corrupt(priority_key(&body))))?;
                ranked.push((p, body));
            }
            sort_ranked(&mut ranked);
            for entry in ranked {
                out.push(entry);
                if out.len() == k {
                    return Ok(out);
                }
            }
        }
        Ok(out)
    }

    /// All valid pairs go to the backend in a single commit.
    fn insert_many(&self, items: &[(String, f64)]) -> Result<usize, StoreError> {
        let valid: Vec<(&str, f64)> = items
            .iter()
            .filter(|(body, priority)| match check_priority(*priority).and_then(|_| check_body(body)) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping invalid message");
                    false
                }
            })
            .map(|(body, priority)| (body.as_str(), *priority))
            .collect();
        if valid.is_empty() {
            return Ok(0);
        }
        let _guard = self.lock.lock();
        self.write_locked(&valid)?;
        Ok(valid.len())
    }

    fn count(&self) -> Result<usize, StoreError> {
        let _guard = self.lock.lock();
        let mut n = 0;
        for (key, value) in self.kv.scan_prefix(BIN_PREFIX)? {
            let set = value
                .into_set()
                .ok_or(StoreError::Storage(StorageError::Corrupt(key)))?;
            n += set.len();
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::FlakyBackend;
    use crate::storage::MemoryBackend;

    fn store() -> BinnedMessageStore {
        BinnedMessageStore::new(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn insert_same_body_replaces_priority() {
        let s = store();
        s.insert("hello", 0.3).unwrap();
        s.insert("hello", 1.7).unwrap();
        assert_eq!(s.lookup_priority("hello").unwrap(), 1.7);
        assert_eq!(s.count().unwrap(), 1);
        assert_eq!(s.top_k(10).unwrap(), vec![(1.7, "hello".to_string())]);
    }

    #[test]
    fn priority_range_enforced() {
        let s = store();
        assert!(matches!(s.insert("a", -0.01), Err(StoreError::InvalidArgument(_))));
        assert!(matches!(s.insert("a", 2.01), Err(StoreError::InvalidArgument(_))));
        assert!(matches!(s.insert("a", f64::NAN), Err(StoreError::InvalidArgument(_))));
        s.insert("low", 0.0).unwrap();
        s.insert("high", 2.0).unwrap();
        assert_eq!(s.count().unwrap(), 2);
        assert_eq!(bin_for(2.0), NUM_BINS - 1);
        assert_eq!(bin_for(0.0), 0);
    }

    #[test]
    fn body_validation() {
        let s = store();
        assert!(matches!(s.insert("", 1.0), Err(StoreError::InvalidArgument(_))));
        let long: String = "x".repeat(MAX_BODY_CHARS + 1);
        assert!(matches!(s.insert(&long, 1.0), Err(StoreError::InvalidArgument(_))));
        let exact: String = "é".repeat(MAX_BODY_CHARS);
        s.insert(&exact, 1.0).unwrap();
    }

    #[test]
    fn top_k_ordering() {
        let s = store();
        s.insert("A", 1.0).unwrap();
        s.insert("B", 0.2).unwrap();
        s.insert("C", 0.9).unwrap();
        assert!(s.top_k(0).unwrap().is_empty());
        assert_eq!(s.top_k(1).unwrap(), vec![(1.0, "A".to_string())]);
        assert_eq!(
            s.top_k(2).unwrap(),
            vec![(1.0, "A".to_string()), (0.9, "C".to_string())]
        );
        let all = s.top_k(3).unwrap();
        assert_eq!(
            all,
            vec![
                (1.0, "A".to_string()),
                (0.9, "C".to_string()),
                (0.2, "B".to_string())
            ]
        );
        assert_eq!(s.top_k(4).unwrap(), all);
    }

    #[test]
    fn top_k_orders_within_a_bin_and_breaks_ties_by_body() {
        let s = store();
        s.insert("b", 0.5).unwrap();
        s.insert("a", 0.5).unwrap();
        s.insert("c", 0.79).unwrap();
        assert_eq!(bin_for(0.5), bin_for(0.79));
        let got: Vec<String> = s.top_k(3).unwrap().into_iter().map(|(_, b)| b).collect();
        assert_eq!(got, vec!["c", "a", "b"]);
    }

    #[test]
    fn update_moves_between_bins() {
        let s = store();
        s.insert("m", 0.1).unwrap();
        s.insert("n", 1.0).unwrap();
        s.update_priority("m", 1.9).unwrap();
        assert_eq!(s.top_k(1).unwrap(), vec![(1.9, "m".to_string())]);
        assert_eq!(s.count().unwrap(), 2);
        assert!(matches!(s.update_priority("missing", 1.0), Err(StoreError::NotFound)));
        assert!(matches!(s.update_priority("m", 3.0), Err(StoreError::InvalidArgument(_))));
        assert_eq!(s.lookup_priority("m").unwrap(), 1.9);
    }

    #[test]
    fn delete_and_not_found() {
        let s = store();
        s.insert("gone", 1.2).unwrap();
        s.delete("gone").unwrap();
        assert!(matches!(s.delete("gone"), Err(StoreError::NotFound)));
        assert!(matches!(s.lookup_priority("gone"), Err(StoreError::NotFound)));
        assert!(!s.contains("gone").unwrap());
        assert_eq!(s.count().unwrap(), 0);
        assert!(s.top_k(5).unwrap().is_empty());
    }

    #[test]
    fn failed_commit_leaves_store_unchanged() {
        let kv = Arc::new(FlakyBackend::default());
        let s = BinnedMessageStore::new(kv.clone());
        s.insert("kept", 0.4).unwrap();

        kv.set_failing(true);
        assert!(matches!(s.insert("new", 1.0), Err(StoreError::Storage(_))));
        assert!(matches!(s.insert("kept", 1.9), Err(StoreError::Storage(_))));
        assert!(matches!(s.delete("kept"), Err(StoreError::Storage(_))));
        kv.set_failing(false);

        assert_eq!(s.count().unwrap(), 1);
        assert_eq!(s.lookup_priority("kept").unwrap(), 0.4);
        assert_eq!(s.top_k(5).unwrap(), vec![(0.4, "kept".to_string())]);
    }

    #[test]
    fn insert_many_commits_once_and_skips_invalid() {
        let kv = Arc::new(FlakyBackend::default());
        let s = BinnedMessageStore::new(kv.clone());
        s.insert("old", 0.1).unwrap();
        let before = kv.commits.load(std::sync::atomic::Ordering::SeqCst);

        let items = vec![
            ("old".to_string(), 1.5),
            ("fresh".to_string(), 0.9),
            ("too hot".to_string(), 4.0),
            (String::new(), 1.0),
            ("fresh".to_string(), 1.1),
        ];
        assert_eq!(s.insert_many(&items).unwrap(), 3);
        assert_eq!(kv.commits.load(std::sync::atomic::Ordering::SeqCst), before + 1);
        assert_eq!(
            s.top_k(10).unwrap(),
            vec![(1.5, "old".to_string()), (1.1, "fresh".to_string())]
        );
        assert_eq!(s.count().unwrap(), 2);
    }

    #[test]
    fn failed_insert_many_stores_nothing() {
        let kv = Arc::new(FlakyBackend::default());
        let s = BinnedMessageStore::new(kv.clone());
        s.insert("kept", 0.4).unwrap();
        kv.set_failing(true);
        let items = vec![("a".to_string(), 1.0), ("kept".to_string(), 1.8)];
        assert!(matches!(s.insert_many(&items), Err(StoreError::Storage(_))));
        kv.set_failing(false);
        assert_eq!(s.top_k(5).unwrap(), vec![(0.4, "kept".to_string())]);
    }

    #[test]
    fn many_random_messages_come_out_sorted() {
        use rand::Rng;
        let s = store();
        let mut rng = rand::thread_rng();
        for i in 0..200 {
            let p: f64 = rng.gen_range(MIN_PRIORITY..=MAX_PRIORITY);
            s.insert(&format!("msg {}", i), p).unwrap();
        }
        let all = s.top_k(usize::MAX).unwrap();
        assert_eq!(all.len(), 200);
        assert!(all.windows(2).all(|w| w[0].0 >= w[1].0));
        let top = s.top_k(17).unwrap();
        assert_eq!(top[..], all[..17]);
    }
}
