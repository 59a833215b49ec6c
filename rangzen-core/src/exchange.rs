//! One exchange with one peer over a connected byte stream.
//!
//! [`Exchange`] is the I/O-free state machine: the host feeds it received
//! payloads and writes out whatever it returns. [`run_exchange`] drives it over
//! any blocking `Read + Write` stream.
//!
//! Rounds alternate strictly; the responder never sends before it has received:
//!
//! ```text
//! initiator  -- Friends  -->  responder
//! initiator  <-- Friends --   responder
//! initiator  -- Messages -->  responder
//! initiator  <-- Messages --  responder
//! ```

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::protocol::{Message, WireMessage, PROTOCOL_VERSION};
use crate::speaker::TransportError;
use crate::stores::Stores;
use crate::wire::{self, FrameDecodeError, FrameEncodeError};

/// Messages sent per exchange unless configured otherwise.
pub const DEFAULT_MAX_MESSAGES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    SendingOrAwaitingFirstMessage,
    Exchanged,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Friends,
    Messages,
    Nothing,
}

#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// How many top-priority messages to send.
    pub max_messages: usize,
    /// Whole-exchange bound. `None` waits as long as the transport does.
    pub timeout: Option<Duration>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            timeout: None,
        }
    }
}

/// What happened during an exchange; handed to the completion callback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeInfo {
    pub local_address: String,
    /// Learned from the peer's first frame.
    pub remote_address: Option<String>,
    pub initiator: bool,
    pub started_at: u64,
    pub finished_at: Option<u64>,
    pub messages_sent: usize,
    pub messages_received: usize,
    /// Received messages that passed validation and were stored.
    pub messages_merged: usize,
    pub friends_received: usize,
    pub friends_added: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage {
        expected: &'static str,
        got: &'static str,
    },
    #[error("peer speaks protocol version {0}")]
    VersionMismatch(u8),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("exchange timed out")]
    Timeout,
    #[error("local store error: {0}")]
    Storage(#[from] StoreError),
    #[error("exchange with {0} already in progress")]
    Busy(String),
    #[error("exchange already {0:?}")]
    InvalidState(ExchangeState),
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

impl From<io::Error> for ExchangeError {
    fn from(e: io::Error) -> Self {
        if is_timeout(&e) {
            ExchangeError::Timeout
        } else {
            ExchangeError::Transport(TransportError::Io(e))
        }
    }
}

impl From<FrameDecodeError> for ExchangeError {
    fn from(e: FrameDecodeError) -> Self {
        match e {
            FrameDecodeError::Io(e) => e.into(),
            other => ExchangeError::Protocol(other.to_string()),
        }
    }
}

impl From<FrameEncodeError> for ExchangeError {
    fn from(e: FrameEncodeError) -> Self {
        ExchangeError::Protocol(e.to_string())
    }
}

/// Completion callback. Exactly one of the two is called per exchange.
pub trait ExchangeCallback: Send + Sync {
    fn success(&self, info: &ExchangeInfo);
    fn failure(&self, info: &ExchangeInfo, reason: &ExchangeError);
}

/// Payloads to write, in order, and whether the exchange is complete.
#[derive(Debug, Default)]
pub struct Step {
    pub send: Vec<Vec<u8>>,
    pub done: bool,
}

fn kind(msg: &Message) -> &'static str {
    match msg {
        Message::Friends { .. } => "friends",
        Message::Messages { .. } => "messages",
        Message::Beacon { .. } => "beacon",
    }
}

pub struct Exchange {
    role: Role,
    stores: Stores,
    config: ExchangeConfig,
    clock: Arc<dyn Clock>,
    state: ExchangeState,
    expect: Expect,
    info: ExchangeInfo,
    /// Responder's messages, taken before anything from the initiator is merged.
    pending_messages: Option<Vec<u8>>,
}

impl Exchange {
    pub fn new(role: Role, local_address: impl Into<String>, stores: Stores, config: ExchangeConfig) -> Self {
        Self {
            role,
            stores,
            config,
            clock: Arc::new(SystemClock),
            state: ExchangeState::Idle,
            expect: Expect::Nothing,
            info: ExchangeInfo {
                local_address: local_address.into(),
                initiator: role == Role::Initiator,
                ..Default::default()
            },
            pending_messages: None,
        }
    }

    /// Timestamp the exchange with `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn info(&self) -> &ExchangeInfo {
        &self.info
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, ExchangeState::Exchanged | ExchangeState::Closed)
    }

    /// Begin the exchange. The initiator gets its friend list to send; the
    /// responder gets nothing and waits.
    pub fn start(&mut self) -> Result<Step, ExchangeError> {
        if self.state != ExchangeState::Idle {
            return Err(ExchangeError::InvalidState(self.state));
        }
        self.info.started_at = self.clock.now_millis();
        self.state = ExchangeState::SendingOrAwaitingFirstMessage;
        self.expect = Expect::Friends;
        let mut step = Step::default();
        if self.role == Role::Initiator {
            match self.friends_payload() {
                Ok(p) => step.send.push(p),
                Err(e) => return Err(self.fail(e)),
            }
        }
        Ok(step)
    }

    /// Handle one received payload.
    pub fn on_payload(&mut self, payload: &[u8]) -> Result<Step, ExchangeError> {
        if self.state != ExchangeState::SendingOrAwaitingFirstMessage {
            return Err(ExchangeError::InvalidState(self.state));
        }
        match self.handle(payload) {
            Ok(step) => Ok(step),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn handle(&mut self, payload: &[u8]) -> Result<Step, ExchangeError> {
        let msg = wire::decode_payload(payload)?;
        let mut step = Step::default();
        match (self.expect, msg) {
            (
                Expect::Friends,
                Message::Friends {
                    protocol_version,
                    sender,
                    friends,
                },
            ) => {
                if protocol_version != PROTOCOL_VERSION {
                    return Err(ExchangeError::VersionMismatch(protocol_version));
                }
                self.info.remote_address = Some(sender);
                // Both outbound rounds carry only what this device held before the exchange.
                match self.role {
                    Role::Initiator => step.send.push(self.messages_payload()?),
                    Role::Responder => {
                        step.send.push(self.friends_payload()?);
                        self.pending_messages = Some(self.messages_payload()?);
                    }
                }
                self.merge_friends(friends);
                self.expect = Expect::Messages;
            }
            (Expect::Messages, Message::Messages { messages }) => {
                self.merge_messages(messages)?;
                if let Some(reply) = self.pending_messages.take() {
                    step.send.push(reply);
                }
                self.expect = Expect::Nothing;
                self.state = ExchangeState::Exchanged;
                self.info.finished_at = Some(self.clock.now_millis());
                step.done = true;
            }
            (expect, other) => {
                return Err(ExchangeError::UnexpectedMessage {
                    expected: match expect {
                        Expect::Friends => "friends",
                        Expect::Messages => "messages",
                        Expect::Nothing => "nothing",
                    },
                    got: kind(&other),
                });
            }
        }
        Ok(step)
    }

    /// Mark a completed exchange closed. The stream is discarded by the caller.
    pub fn close(&mut self) {
        if self.state == ExchangeState::Exchanged {
            self.state = ExchangeState::Closed;
        }
    }

    /// Move to `Failed` and hand the error back.
    pub fn fail(&mut self, e: ExchangeError) -> ExchangeError {
        self.state = ExchangeState::Failed;
        self.expect = Expect::Nothing;
        self.pending_messages = None;
        if self.info.finished_at.is_none() {
            self.info.finished_at = Some(self.clock.now_millis());
        }
        e
    }

    /// Friend list, sorted and cut to what fits in one frame.
    fn friends_payload(&self) -> Result<Vec<u8>, ExchangeError> {
        let mut friends: Vec<Vec<u8>> = self.stores.friends.all()?.into_iter().collect();
        friends.sort();
        let total = friends.len();
        let mut msg = Message::Friends {
            protocol_version: PROTOCOL_VERSION,
            sender: self.info.local_address.clone(),
            friends: Vec::new(),
        };
        let overhead = bincode::serialized_size(&msg).map_err(FrameEncodeError::Encode)?;
        let friends = wire::fitting_prefix(overhead, friends)?;
        if friends.len() < total {
            tracing::debug!(sent = friends.len(), total, "friend list cut to frame size");
        }
        if let Message::Friends { friends: slot, .. } = &mut msg {
            *slot = friends;
        }
        Ok(bincode::serialize(&msg).map_err(FrameEncodeError::Encode)?)
    }

    /// Top messages, dropping the lowest-priority ones that do not fit in one frame.
    fn messages_payload(&mut self) -> Result<Vec<u8>, ExchangeError> {
        let messages: Vec<WireMessage> = self
            .stores
            .messages
            .top_k(self.config.max_messages)?
            .into_iter()
            .map(|(priority, body)| WireMessage { body, priority })
            .collect();
        let overhead = bincode::serialized_size(&Message::Messages { messages: Vec::new() })
            .map_err(FrameEncodeError::Encode)?;
        let messages = wire::fitting_prefix(overhead, messages)?;
        self.info.messages_sent = messages.len();
        let msg = Message::Messages { messages };
        Ok(bincode::serialize(&msg).map_err(FrameEncodeError::Encode)?)
    }

    fn merge_friends(&mut self, friends: Vec<Vec<u8>>) {
        self.info.friends_received = friends.len();
        for id in friends {
            match self.stores.friends.add(&id) {
                Ok(true) => self.info.friends_added += 1,
                Ok(false) => {}
                Err(e) => tracing::debug!(error = %e, "skipping remote friend"),
            }
        }
    }

    /// Invalid remote messages are skipped; the rest land in one store write.
    fn merge_messages(&mut self, messages: Vec<WireMessage>) -> Result<(), ExchangeError> {
        self.info.messages_received = messages.len();
        let items: Vec<(String, f64)> = messages.into_iter().map(|m| (m.body, m.priority)).collect();
        self.info.messages_merged = self.stores.messages.insert_many(&items)?;
        Ok(())
    }
}

fn check_deadline(deadline: Option<Instant>) -> Result<(), ExchangeError> {
    match deadline {
        Some(d) if Instant::now() >= d => Err(ExchangeError::Timeout),
        _ => Ok(()),
    }
}

fn drive<S: Read + Write>(
    exchange: &mut Exchange,
    stream: &mut S,
    deadline: Option<Instant>,
) -> Result<(), ExchangeError> {
    let mut step = exchange.start()?;
    loop {
        for payload in &step.send {
            check_deadline(deadline)?;
            wire::write_frame(stream, payload)?;
        }
        if step.done {
            return Ok(());
        }
        check_deadline(deadline)?;
        let payload = wire::read_frame(stream)?;
        step = exchange.on_payload(&payload)?;
    }
}

/// Run `exchange` to completion over `stream` and report through `callback`.
///
/// The deadline is checked between frames; a read blocked inside the
/// transport is bounded by the transport's own timeouts.
pub fn run_exchange<S: Read + Write>(
    exchange: &mut Exchange,
    stream: &mut S,
    callback: &dyn ExchangeCallback,
) -> Result<ExchangeInfo, ExchangeError> {
    let deadline = exchange.config.timeout.map(|t| Instant::now() + t);
    match drive(exchange, stream, deadline) {
        Ok(()) => {
            exchange.close();
            callback.success(exchange.info());
            Ok(exchange.info().clone())
        }
        Err(e) => {
            let e = if exchange.state() == ExchangeState::Failed {
                e
            } else {
                exchange.fail(e)
            };
            tracing::debug!(error = %e, remote = ?exchange.info().remote_address, "exchange failed");
            callback.failure(exchange.info(), &e);
            Err(e)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    #[derive(Default)]
    pub(crate) struct Recorder {
        pub(crate) successes: Mutex<Vec<ExchangeInfo>>,
        pub(crate) failures: Mutex<Vec<String>>,
    }

    impl ExchangeCallback for Recorder {
        fn success(&self, info: &ExchangeInfo) {
            self.successes.lock().push(info.clone());
        }
        fn failure(&self, _info: &ExchangeInfo, reason: &ExchangeError) {
            self.failures.lock().push(reason.to_string());
        }
    }

    fn seeded(messages: &[(&str, f64)], friends: &[&[u8]]) -> Stores {
        let s = Stores::in_memory();
        for (b, p) in messages {
            s.add_message(b, *p).unwrap();
        }
        for f in friends {
            s.friends.add(f).unwrap();
        }
        s
    }

    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn snapshot(s: &Stores) -> (Vec<(f64, String)>, Vec<Vec<u8>>) {
        let mut friends: Vec<Vec<u8>> = s.all_friends().unwrap().into_iter().collect();
        friends.sort();
        (s.top_k(usize::MAX).unwrap(), friends)
    }

    #[test]
    fn two_devices_converge_over_tcp() {
        let a = seeded(&[("from a", 1.5), ("shared", 0.3)], &[b"friend-a"]);
        let b = seeded(&[("from b", 0.7), ("shared", 0.3)], &[b"friend-b"]);
        let (mut ca, mut cb) = tcp_pair();

        let b_stores = b.clone();
        let responder = thread::spawn(move || {
            let mut ex = Exchange::new(Role::Responder, "BB", b_stores, ExchangeConfig::default());
            let rec = Recorder::default();
            run_exchange(&mut ex, &mut cb, &rec).unwrap()
        });
        let rec = Recorder::default();
        let mut ex = Exchange::new(Role::Initiator, "AA", a.clone(), ExchangeConfig::default());
        let info_a = run_exchange(&mut ex, &mut ca, &rec).unwrap();
        let info_b = responder.join().unwrap();

        assert_eq!(ex.state(), ExchangeState::Closed);
        assert_eq!(rec.successes.lock().len(), 1);
        assert_eq!(info_a.remote_address.as_deref(), Some("BB"));
        assert_eq!(info_b.remote_address.as_deref(), Some("AA"));
        assert_eq!(info_a.messages_received, 2);
        assert_eq!(info_b.friends_added, 1);
        assert_eq!(snapshot(&a), snapshot(&b));
        assert_eq!(a.messages.count().unwrap(), 3);
        assert_eq!(a.friends.count().unwrap(), 2);
    }

    #[test]
    fn state_machine_without_io() {
        let a = seeded(&[("x", 1.0)], &[b"fa"]);
        let b = seeded(&[("y", 0.5)], &[]);
        let mut ini = Exchange::new(Role::Initiator, "A", a, ExchangeConfig::default());
        let mut res = Exchange::new(Role::Responder, "B", b.clone(), ExchangeConfig::default());

        assert!(res.start().unwrap().send.is_empty());
        let s1 = ini.start().unwrap();
        assert_eq!(ini.state(), ExchangeState::SendingOrAwaitingFirstMessage);
        let s2 = res.on_payload(&s1.send[0]).unwrap();
        let s3 = ini.on_payload(&s2.send[0]).unwrap();
        let s4 = res.on_payload(&s3.send[0]).unwrap();
        assert!(s4.done);
        assert_eq!(res.state(), ExchangeState::Exchanged);
        let s5 = ini.on_payload(&s4.send[0]).unwrap();
        assert!(s5.done && s5.send.is_empty());
        assert!(b.messages.contains("x").unwrap());
        assert!(matches!(ini.on_payload(&s4.send[0]), Err(ExchangeError::InvalidState(_))));
    }

    #[test]
    fn invalid_remote_messages_are_skipped() {
        let local = Stores::in_memory();
        let mut ex = Exchange::new(Role::Responder, "L", local.clone(), ExchangeConfig::default());
        ex.start().unwrap();
        let friends = bincode::serialize(&Message::Friends {
            protocol_version: PROTOCOL_VERSION,
            sender: "R".into(),
            friends: vec![vec![], vec![5; 32]],
        })
        .unwrap();
        ex.on_payload(&friends).unwrap();
        let msgs = bincode::serialize(&Message::Messages {
            messages: vec![
                WireMessage { body: "ok".into(), priority: 1.0 },
                WireMessage { body: "too hot".into(), priority: 9.0 },
                WireMessage { body: String::new(), priority: 1.0 },
                WireMessage { body: "also ok".into(), priority: 0.0 },
            ],
        })
        .unwrap();
        let step = ex.on_payload(&msgs).unwrap();
        assert!(step.done);
        assert_eq!(ex.info().messages_received, 4);
        assert_eq!(ex.info().messages_merged, 2);
        assert_eq!(local.messages.count().unwrap(), 2);
        assert_eq!(local.friends.count().unwrap(), 1);
    }

    #[test]
    fn merge_is_idempotent() {
        let remote = Message::Messages {
            messages: vec![
                WireMessage { body: "m1".into(), priority: 1.2 },
                WireMessage { body: "m2".into(), priority: 0.1 },
            ],
        };
        let friends = Message::Friends {
            protocol_version: PROTOCOL_VERSION,
            sender: "R".into(),
            friends: vec![vec![1; 32], vec![2; 32]],
        };
        let local = seeded(&[("mine", 0.6)], &[b"me"]);
        let apply = |stores: &Stores| {
            let mut ex = Exchange::new(Role::Responder, "L", stores.clone(), ExchangeConfig::default());
            ex.start().unwrap();
            ex.on_payload(&bincode::serialize(&friends).unwrap()).unwrap();
            ex.on_payload(&bincode::serialize(&remote).unwrap()).unwrap();
        };
        apply(&local);
        let once = snapshot(&local);
        apply(&local);
        assert_eq!(snapshot(&local), once);
        assert_eq!(once.0.len(), 3);
        assert_eq!(once.1.len(), 3);
    }

    #[test]
    fn wrong_first_message_fails() {
        let mut ex = Exchange::new(Role::Responder, "L", Stores::in_memory(), ExchangeConfig::default());
        ex.start().unwrap();
        let msgs = bincode::serialize(&Message::Messages { messages: vec![] }).unwrap();
        assert!(matches!(
            ex.on_payload(&msgs),
            Err(ExchangeError::UnexpectedMessage { .. })
        ));
        assert_eq!(ex.state(), ExchangeState::Failed);
    }

    #[test]
    fn version_mismatch_fails() {
        let mut ex = Exchange::new(Role::Responder, "L", Stores::in_memory(), ExchangeConfig::default());
        ex.start().unwrap();
        let friends = bincode::serialize(&Message::Friends {
            protocol_version: PROTOCOL_VERSION + 1,
            sender: "R".into(),
            friends: vec![],
        })
        .unwrap();
        assert!(matches!(ex.on_payload(&friends), Err(ExchangeError::VersionMismatch(_))));
    }

    #[test]
    fn peer_hanging_up_is_reported() {
        let (mut ca, cb) = tcp_pair();
        drop(cb);
        let rec = Recorder::default();
        let mut ex = Exchange::new(Role::Initiator, "A", Stores::in_memory(), ExchangeConfig::default());
        assert!(run_exchange(&mut ex, &mut ca, &rec).is_err());
        assert_eq!(ex.state(), ExchangeState::Failed);
        assert_eq!(rec.failures.lock().len(), 1);
        assert!(rec.successes.lock().is_empty());
    }

    #[test]
    fn silent_peer_times_out() {
        let (mut ca, _cb) = tcp_pair();
        ca.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
        let rec = Recorder::default();
        let config = ExchangeConfig {
            timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let mut ex = Exchange::new(Role::Initiator, "A", Stores::in_memory(), config);
        assert!(matches!(
            run_exchange(&mut ex, &mut ca, &rec),
            Err(ExchangeError::Timeout)
        ));
        assert_eq!(rec.failures.lock().clone(), vec!["exchange timed out".to_string()]);
    }

    #[test]
    fn top_k_limits_what_is_sent() {
        let a = seeded(&[("p1", 2.0), ("p2", 1.0), ("p3", 0.5)], &[]);
        let config = ExchangeConfig {
            max_messages: 2,
            ..Default::default()
        };
        let mut ini = Exchange::new(Role::Initiator, "A", a, config);
        let b = Stores::in_memory();
        let mut res = Exchange::new(Role::Responder, "B", b.clone(), ExchangeConfig::default());
        res.start().unwrap();
        let s1 = ini.start().unwrap();
        let s2 = res.on_payload(&s1.send[0]).unwrap();
        let s3 = ini.on_payload(&s2.send[0]).unwrap();
        res.on_payload(&s3.send[0]).unwrap();
        assert_eq!(ini.info().messages_sent, 2);
        assert!(!b.messages.contains("p3").unwrap());
        assert_eq!(b.messages.count().unwrap(), 2);
    }

    /// Run all four rounds in memory and return both finished exchanges.
    fn drive_pair(ini: &mut Exchange, res: &mut Exchange) {
        assert!(res.start().unwrap().send.is_empty());
        let mut pending = ini.start().unwrap().send;
        let mut to_responder = true;
        while let Some(payload) = pending.pop() {
            let target = if to_responder { &mut *res } else { &mut *ini };
            pending = target.on_payload(&payload).unwrap().send;
            to_responder = !to_responder;
        }
        ini.close();
        res.close();
        assert_eq!(ini.state(), ExchangeState::Closed);
        assert_eq!(res.state(), ExchangeState::Closed);
    }

    #[test]
    fn responder_sends_its_own_messages_when_outranked() {
        let a = seeded(&[("a1", 2.0), ("a2", 1.9)], &[b"fa"]);
        let b = seeded(&[("b-own", 0.5)], &[b"fb"]);
        let small = || ExchangeConfig {
            max_messages: 2,
            ..Default::default()
        };
        let mut ini = Exchange::new(Role::Initiator, "A", a.clone(), small());
        let mut res = Exchange::new(Role::Responder, "B", b.clone(), small());
        drive_pair(&mut ini, &mut res);

        assert!(a.messages.contains("b-own").unwrap());
        assert_eq!(ini.info().messages_received, 1);
        assert_eq!(res.info().messages_sent, 1);
        assert_eq!(b.messages.count().unwrap(), 3);
        // Friend replies carry only the sender's own list.
        assert_eq!(ini.info().friends_received, 1);
        assert_eq!(res.info().friends_received, 1);
    }

    #[test]
    fn oversized_friend_list_is_cut_to_one_frame() {
        let a = Stores::in_memory();
        for i in 0..7000u32 {
            a.friends.add(&i.to_be_bytes().repeat(8)).unwrap();
        }
        let mut ini = Exchange::new(Role::Initiator, "A", a, ExchangeConfig::default());
        let first = ini.start().unwrap().send.remove(0);
        assert!(first.len() <= wire::EXCHANGE_SIZE as usize);
        let mut out = Vec::new();
        wire::write_frame(&mut out, &first).unwrap();
        match wire::decode_payload(&first).unwrap() {
            Message::Friends { friends, .. } => {
                assert!(friends.len() > 6000 && friends.len() < 7000);
                assert!(friends.windows(2).all(|w| w[0] < w[1]));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn large_message_limit_still_fits_one_frame() {
        let body = "m".repeat(140);
        let a = Stores::in_memory();
        for i in 0..2000 {
            a.add_message(&format!("{:04}{}", i, &body[4..]), 1.0).unwrap();
        }
        let config = ExchangeConfig {
            max_messages: 10_000,
            ..Default::default()
        };
        let mut ini = Exchange::new(Role::Initiator, "A", a, config);
        let mut res = Exchange::new(Role::Responder, "B", Stores::in_memory(), ExchangeConfig::default());
        res.start().unwrap();
        let s1 = ini.start().unwrap();
        let s2 = res.on_payload(&s1.send[0]).unwrap();
        let s3 = ini.on_payload(&s2.send[0]).unwrap();
        assert!(s3.send[0].len() <= wire::EXCHANGE_SIZE as usize);
        assert!(ini.info().messages_sent > 0 && ini.info().messages_sent < 2000);
        res.on_payload(&s3.send[0]).unwrap();
        assert_eq!(res.info().messages_merged, ini.info().messages_sent);
    }

    #[test]
    fn injected_clock_stamps_the_exchange() {
        use crate::clock::ManualClock;
        let clock = Arc::new(ManualClock::new(1_000));
        let mut ini = Exchange::new(Role::Initiator, "A", seeded(&[("x", 1.0)], &[]), ExchangeConfig::default())
            .with_clock(clock.clone());
        let mut res = Exchange::new(Role::Responder, "B", Stores::in_memory(), ExchangeConfig::default())
            .with_clock(clock.clone());
        res.start().unwrap();
        let s1 = ini.start().unwrap();
        clock.advance(250);
        let s2 = res.on_payload(&s1.send[0]).unwrap();
        let s3 = ini.on_payload(&s2.send[0]).unwrap();
        let s4 = res.on_payload(&s3.send[0]).unwrap();
        ini.on_payload(&s4.send[0]).unwrap();
        assert_eq!(ini.info().started_at, 1_000);
        assert_eq!(ini.info().finished_at, Some(1_250));
        assert_eq!(res.info().started_at, 1_000);
    }
}
