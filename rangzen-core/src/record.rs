//! Exchange records for audit and evaluation.

use serde::{Deserialize, Serialize};

use crate::exchange::ExchangeInfo;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// One completed exchange. Two records are equal when they describe the same
/// exchange with the same remote, regardless of which local device logged them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub local_id: String,
    pub remote_id: String,
    pub protocol: String,
    pub start_time: u64,
    pub end_time: u64,
    pub start_location: Option<Location>,
    pub end_location: Option<Location>,
}

impl PartialEq for ExchangeRecord {
    fn eq(&self, other: &Self) -> bool {
        self.remote_id == other.remote_id
            && self.start_time == other.start_time
            && self.end_time == other.end_time
            && self.start_location == other.start_location
            && self.end_location == other.end_location
    }
}

impl ExchangeRecord {
    /// Record for a finished exchange. `None` until the remote is known and the exchange has ended.
    pub fn from_info(info: &ExchangeInfo, protocol: &str) -> Option<Self> {
        Some(Self {
            local_id: info.local_address.clone(),
            remote_id: info.remote_address.clone()?,
            protocol: protocol.to_string(),
            start_time: info.started_at,
            end_time: info.finished_at?,
            start_location: None,
            end_location: None,
        })
    }
}
