//! LAN discovery: UDP multicast beacon carrying this device's address and exchange port.
//! Every beacon heard from another device becomes a `PeerDiscovered` event; the
//! registry's timeout takes care of devices that go quiet.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rangzen_core::wire::{decode_frame, encode_frame};
use rangzen_core::{Message, NetworkHandle, TransportEvent, PROTOCOL_VERSION};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 60, 61);
const BEACON_INTERVAL: Duration = Duration::from_secs(4);
/// A peer heard again after this long gets another direct reply.
const ANSWER_TTL: Duration = Duration::from_secs(16);
const MAX_ANSWERED: usize = 1024;

/// Peers recently answered with a unicast beacon.
#[derive(Default)]
struct Answered {
    at: HashMap<String, Instant>,
}

impl Answered {
    /// Whether `address` should get a direct reply now. Records the reply if so.
    fn should_answer(&mut self, address: &str, now: Instant) -> bool {
        self.at.retain(|_, t| now.duration_since(*t) < ANSWER_TTL);
        if self.at.contains_key(address) || self.at.len() >= MAX_ANSWERED {
            return false;
        }
        self.at.insert(address.to_string(), now);
        true
    }
}

pub async fn run_discovery(
    address: String,
    discovery_port: u16,
    exchange_port: u16,
    events: UnboundedSender<TransportEvent>,
) -> std::io::Result<()> {
    let socket = Arc::new(make_multicast_socket(discovery_port)?);
    let beacon = beacon_frame(&address, exchange_port)?;

    let mut beacon_task = tokio::spawn(beacon_loop(socket.clone(), beacon.clone(), discovery_port));
    let mut recv_task = tokio::spawn(recv_loop(socket, beacon, address, events));

    let first = tokio::select! {
        r = &mut beacon_task => r,
        r = &mut recv_task => r,
    };
    beacon_task.abort();
    recv_task.abort();
    first?
}

fn make_multicast_socket(discovery_port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, discovery_port))?;
    std_sock.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

fn beacon_frame(address: &str, exchange_port: u16) -> std::io::Result<Vec<u8>> {
    encode_frame(&Message::Beacon {
        protocol_version: PROTOCOL_VERSION,
        address: address.to_string(),
        listen_port: exchange_port,
    })
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

async fn beacon_loop(socket: Arc<UdpSocket>, beacon: Vec<u8>, discovery_port: u16) -> std::io::Result<()> {
    let dest = SocketAddr::from((MULTICAST_GROUP, discovery_port));
    loop {
        if let Err(e) = socket.send_to(&beacon, dest).await {
            warn!(error = %e, "beacon send failed");
        }
        tokio::time::sleep(BEACON_INTERVAL).await;
    }
}

/// Peer handle announced by a datagram, or `None` for our own beacons, other
/// protocol versions, and anything that is not a beacon.
fn parse_beacon(datagram: &[u8], from: SocketAddr, own_address: &str) -> Option<NetworkHandle> {
    let (msg, _) = decode_frame(datagram).ok()?;
    match msg {
        Message::Beacon {
            protocol_version,
            address,
            listen_port,
        } if protocol_version == PROTOCOL_VERSION && address != own_address => {
            Some(NetworkHandle::lan(address, SocketAddr::new(from.ip(), listen_port)))
        }
        _ => None,
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    beacon: Vec<u8>,
    own_address: String,
    events: UnboundedSender<TransportEvent>,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; 65536];
    let mut answered = Answered::default();
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        let Some(handle) = parse_beacon(&buf[..n], from, &own_address) else {
            continue;
        };
        // Answer a newcomer directly so it need not wait a full interval for us.
        if answered.should_answer(handle.address(), Instant::now()) {
            debug!(peer = %handle, "answering peer on LAN");
            if let Err(e) = socket.send_to(&beacon, from).await {
                debug!(peer = %handle, error = %e, "beacon reply failed");
            }
        }
        if events.send(TransportEvent::PeerDiscovered(handle)).is_err() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beacon_names_peer_endpoint() {
        let frame = beacon_frame("11:22:33:44:55:66", 5000).unwrap();
        let from: SocketAddr = "192.168.1.20:45688".parse().unwrap();
        let handle = parse_beacon(&frame, from, "AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(handle.address(), "11:22:33:44:55:66");
        assert_eq!(handle.endpoint(), Some("192.168.1.20:5000".parse().unwrap()));
    }

    #[test]
    fn own_and_foreign_datagrams_ignored() {
        let from: SocketAddr = "10.0.0.2:1".parse().unwrap();
        let own = beacon_frame("AA", 1).unwrap();
        assert!(parse_beacon(&own, from, "AA").is_none());
        assert!(parse_beacon(b"garbage", from, "AA").is_none());

        let other_version = encode_frame(&Message::Beacon {
            protocol_version: PROTOCOL_VERSION + 1,
            address: "BB".into(),
            listen_port: 1,
        })
        .unwrap();
        assert!(parse_beacon(&other_version, from, "AA").is_none());

        let not_beacon = encode_frame(&Message::Messages { messages: vec![] }).unwrap();
        assert!(parse_beacon(&not_beacon, from, "AA").is_none());
    }

    #[test]
    fn answers_once_per_ttl_and_forgets_quiet_peers() {
        let mut answered = Answered::default();
        let t0 = Instant::now();
        assert!(answered.should_answer("BB", t0));
        assert!(!answered.should_answer("BB", t0 + Duration::from_secs(1)));
        assert!(answered.should_answer("CC", t0 + Duration::from_secs(2)));
        assert!(answered.should_answer("BB", t0 + ANSWER_TTL));
        assert_eq!(answered.at.len(), 2);
        answered.should_answer("DD", t0 + ANSWER_TTL * 3);
        assert_eq!(answered.at.len(), 1);
    }

    #[test]
    fn answered_set_is_capped() {
        let mut answered = Answered::default();
        let now = Instant::now();
        for i in 0..MAX_ANSWERED {
            assert!(answered.should_answer(&format!("peer-{}", i), now));
        }
        assert!(!answered.should_answer("one too many", now));
        assert_eq!(answered.at.len(), MAX_ANSWERED);
    }
}
