//! Rangzen exchange protocol: message types and version.

use serde::{Deserialize, Serialize};

/// Current protocol version. Carried in the first frame of every exchange and in discovery beacons.
pub const PROTOCOL_VERSION: u8 = 1;

/// A message as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub body: String,
    pub priority: f64,
}

/// All wire message types. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// First round: sender's address and friend list.
    Friends {
        protocol_version: u8,
        sender: String,
        friends: Vec<Vec<u8>>,
    },
    /// Second round: sender's top-priority messages.
    Messages { messages: Vec<WireMessage> },
    /// LAN discovery: advertise presence and the TCP port exchanges are accepted on.
    Beacon {
        protocol_version: u8,
        address: String,
        listen_port: u16,
    },
}
