//! Rangzen exchange core.
//! Priority message store, friend store, peer registry, initiator rule, and the
//! exchange protocol run between two devices in range. Transports are supplied
//! by the host through [`speaker::TransportSpeaker`].

pub mod arbiter;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod exchange;
pub mod ffi;
pub mod friends;
pub mod identity;
pub mod messages;
pub mod peer;
pub mod protocol;
pub mod record;
pub mod speaker;
pub mod storage;
pub mod stores;
pub mod table;
pub mod wire;

pub use arbiter::{concat_and_hash, starts_with_one_bit, which_initiates};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{Coordinator, TickReport};
pub use error::StoreError;
pub use exchange::{
    run_exchange, Exchange, ExchangeCallback, ExchangeConfig, ExchangeError, ExchangeInfo,
    ExchangeState, Role,
};
pub use friends::FriendStore;
pub use identity::{Keypair, PublicKey};
pub use messages::{BinnedMessageStore, PriorityStore};
pub use peer::{NetworkHandle, Peer, PeerRegistry, PEER_TIMEOUT};
pub use protocol::{Message, PROTOCOL_VERSION};
pub use record::ExchangeRecord;
pub use speaker::{TransportError, TransportEvent, TransportSpeaker};
pub use stores::Stores;
pub use table::TableMessageStore;
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError, EXCHANGE_SIZE};
