//! Exchange completion callback for the daemon: logs each exchange and, when
//! enabled, appends an `ExchangeRecord` JSON line to the data dir.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use rangzen_core::{ExchangeCallback, ExchangeError, ExchangeInfo, ExchangeRecord};
use tracing::{info, warn};

pub const JOURNAL_FILE: &str = "exchanges.jsonl";

pub struct Journal {
    path: Option<PathBuf>,
    protocol: &'static str,
}

impl Journal {
    /// `path` of `None` logs only.
    pub fn new(path: Option<PathBuf>, protocol: &'static str) -> Self {
        Self { path, protocol }
    }

    fn append(&self, info: &ExchangeInfo) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let Some(record) = ExchangeRecord::from_info(info, self.protocol) else {
            return Ok(());
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        f.write_all(line.as_bytes())
    }
}

impl ExchangeCallback for Journal {
    fn success(&self, info: &ExchangeInfo) {
        info!(
            remote = info.remote_address.as_deref().unwrap_or("?"),
            initiator = info.initiator,
            sent = info.messages_sent,
            merged = info.messages_merged,
            friends_added = info.friends_added,
            "exchange succeeded"
        );
        if let Err(e) = self.append(info) {
            warn!(error = %e, "failed to record exchange");
        }
    }

    fn failure(&self, info: &ExchangeInfo, reason: &ExchangeError) {
        warn!(
            remote = info.remote_address.as_deref().unwrap_or("?"),
            initiator = info.initiator,
            error = %reason,
            "exchange failed"
        );
    }
}
