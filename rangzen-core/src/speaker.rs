//! Transport speakers: the platform side that listens for and opens the
//! byte streams exchanges run over.

use std::io::{self, Read, Write};
use std::time::Duration;

use uuid::Uuid;

use crate::peer::NetworkHandle;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("transport disabled")]
    Disabled,
    #[error("peer unreachable: {0}")]
    Unreachable(String),
}

/// Platform transport. All calls block.
pub trait TransportSpeaker: Send + Sync + 'static {
    type Stream: Read + Write + Send + 'static;

    /// Short protocol name for logs and exchange records, e.g. "bluetooth".
    fn protocol(&self) -> &'static str;

    /// Open a stream to `peer`. `timeout` bounds the connect and every later
    /// read and write on the returned stream.
    fn connect(&self, peer: &NetworkHandle, timeout: Option<Duration>) -> Result<Self::Stream, TransportError>;

    /// Wait for the next inbound stream.
    fn accept(&self) -> Result<(Self::Stream, NetworkHandle), TransportError>;

    /// Whether the underlying radio or interface is up.
    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);
}

/// Platform notifications, delivered to the coordinator over a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    RadioEnabled,
    RadioDisabled,
    PeerDiscovered(NetworkHandle),
    PeerLost(NetworkHandle),
}

fn mac_bytes(address: &str) -> Option<Vec<u8>> {
    let parts: Vec<&str> = address.split(':').collect();
    if parts.len() != 6 {
        return None;
    }
    parts
        .iter()
        .map(|p| u8::from_str_radix(p, 16).ok())
        .collect()
}

/// Name-based (version 3) service UUID for a device. Both ends derive the same
/// UUID from the listening device's MAC address. Addresses that are not
/// MAC-shaped are hashed as UTF-8 text.
pub fn service_uuid(address: &str) -> Uuid {
    let name = mac_bytes(address).unwrap_or_else(|| address.as_bytes().to_vec());
    Uuid::new_v3(&Uuid::NAMESPACE_OID, &name)
}
