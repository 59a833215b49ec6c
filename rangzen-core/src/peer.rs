//! Peer registry: the set of devices currently in range.
//!
//! One canonical [`Peer`] per physical device. Sightings touch the canonical
//! instance; peers not seen for longer than the timeout are dropped by
//! [`PeerRegistry::garbage_collect`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::Clock;

/// Peers not seen for this long are forgotten.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(300);

/// Transport-specific identity of a device. Equality and hashing use only the
/// device address; the endpoint is how to reach it right now.
#[derive(Debug, Clone)]
pub enum NetworkHandle {
    /// Bluetooth device, MAC address.
    Bluetooth { address: String },
    /// Device on a shared link (Wifi Direct group, LAN), reachable over TCP.
    Lan { address: String, endpoint: SocketAddr },
}

impl NetworkHandle {
    pub fn bluetooth(address: impl Into<String>) -> Self {
        NetworkHandle::Bluetooth {
            address: address.into(),
        }
    }

    pub fn lan(address: impl Into<String>, endpoint: SocketAddr) -> Self {
        NetworkHandle::Lan {
            address: address.into(),
            endpoint,
        }
    }

    /// Public device identifier, as fed to the initiator rule.
    pub fn address(&self) -> &str {
        match self {
            NetworkHandle::Bluetooth { address } | NetworkHandle::Lan { address, .. } => address,
        }
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        match self {
            NetworkHandle::Bluetooth { .. } => None,
            NetworkHandle::Lan { endpoint, .. } => Some(*endpoint),
        }
    }
}

impl PartialEq for NetworkHandle {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for NetworkHandle {}

impl Hash for NetworkHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl fmt::Display for NetworkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkHandle::Bluetooth { address } => write!(f, "bt:{}", address),
            NetworkHandle::Lan { address, endpoint } => write!(f, "lan:{}@{}", address, endpoint),
        }
    }
}

/// A device in range. Shared as `Arc<Peer>`; `last_seen` is updated in place.
#[derive(Debug)]
pub struct Peer {
    handle: NetworkHandle,
    last_seen: AtomicU64,
}

impl Peer {
    pub fn new(handle: NetworkHandle, seen_at_millis: u64) -> Self {
        Self {
            handle,
            last_seen: AtomicU64::new(seen_at_millis),
        }
    }

    pub fn handle(&self) -> &NetworkHandle {
        &self.handle
    }

    pub fn address(&self) -> &str {
        self.handle.address()
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen.load(Ordering::SeqCst)
    }

    pub fn touch(&self, now_millis: u64) {
        self.last_seen.store(now_millis, Ordering::SeqCst);
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for Peer {}

/// Registry of visible peers. One coarse lock; sizes are tens of peers.
pub struct PeerRegistry {
    peers: Mutex<Vec<Arc<Peer>>>,
    clock: Arc<dyn Clock>,
    timeout_millis: u64,
}

impl PeerRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_timeout(clock, PEER_TIMEOUT)
    }

    pub fn with_timeout(clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            peers: Mutex::new(Vec::new()),
            clock,
            timeout_millis: timeout.as_millis() as u64,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }

    pub fn is_known(&self, peer: &Peer) -> bool {
        self.peers.lock().iter().any(|p| **p == *peer)
    }

    /// Canonical instance for `peer`, touched to now. Unknown peers are
    /// registered and become their own canonical instance.
    pub fn get_canonical(&self, peer: Peer) -> Arc<Peer> {
        let now = self.clock.now_millis();
        let mut peers = self.peers.lock();
        if let Some(existing) = peers.iter().find(|p| ***p == peer) {
            existing.touch(now);
            return existing.clone();
        }
        peer.touch(now);
        let peer = Arc::new(peer);
        tracing::debug!(peer = %peer.handle(), "new peer");
        peers.push(peer.clone());
        peer
    }

    /// Register `peer`. Returns false, touching the existing entry, if already known.
    pub fn add(&self, peer: Peer) -> bool {
        let now = self.clock.now_millis();
        let mut peers = self.peers.lock();
        if let Some(existing) = peers.iter().find(|p| ***p == peer) {
            existing.touch(now);
            return false;
        }
        peer.touch(now);
        tracing::debug!(peer = %peer.handle(), "new peer");
        peers.push(Arc::new(peer));
        true
    }

    /// Returns how many of `peers` were new.
    pub fn add_all(&self, peers: impl IntoIterator<Item = Peer>) -> usize {
        peers.into_iter().map(|p| self.add(p)).filter(|added| *added).count()
    }

    pub fn remove(&self, handle: &NetworkHandle) -> bool {
        let mut peers = self.peers.lock();
        let before = peers.len();
        peers.retain(|p| p.handle() != handle);
        peers.len() != before
    }

    /// Copy of the current peer list.
    pub fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.lock().clone()
    }

    /// Drop every peer with `now - last_seen > timeout`.
    pub fn garbage_collect(&self, now_millis: u64) {
        let timeout = self.timeout_millis;
        let mut peers = self.peers.lock();
        peers.retain(|p| {
            let keep = now_millis.saturating_sub(p.last_seen()) <= timeout;
            if !keep {
                tracing::debug!(peer = %p.handle(), "peer timed out");
            }
            keep
        });
    }

    pub fn forget_all(&self) {
        self.peers.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }
}
