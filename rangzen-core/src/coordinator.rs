//! Periodic exchange driver: expires stale peers, picks the peers this device
//! should initiate with, and runs one exchange per peer. Also owns the
//! listener thread that answers inbound exchanges.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::arbiter;
use crate::exchange::{
    run_exchange, Exchange, ExchangeCallback, ExchangeConfig, ExchangeError, ExchangeInfo, Role,
};
use crate::peer::{NetworkHandle, Peer, PeerRegistry};
use crate::speaker::{TransportEvent, TransportSpeaker};
use crate::stores::Stores;

/// Pause after a failed accept while the transport is still enabled.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(500);

/// Outcome counts for one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Peers skipped because an exchange with them was already running.
    pub busy: usize,
}

/// Removes its key from the in-flight set when dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

pub struct Coordinator<T: TransportSpeaker> {
    local_address: String,
    registry: Arc<PeerRegistry>,
    stores: Stores,
    speaker: Arc<T>,
    callback: Arc<dyn ExchangeCallback>,
    config: ExchangeConfig,
    in_flight: Mutex<HashSet<String>>,
    listener_running: AtomicBool,
    stopped: AtomicBool,
}

impl<T: TransportSpeaker> Coordinator<T> {
    pub fn new(
        local_address: impl Into<String>,
        registry: Arc<PeerRegistry>,
        stores: Stores,
        speaker: Arc<T>,
        callback: Arc<dyn ExchangeCallback>,
        config: ExchangeConfig,
    ) -> Self {
        Self {
            local_address: local_address.into(),
            registry,
            stores,
            speaker,
            callback,
            config,
            in_flight: Mutex::new(HashSet::new()),
            listener_running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn speaker(&self) -> &Arc<T> {
        &self.speaker
    }

    pub fn listener_running(&self) -> bool {
        self.listener_running.load(Ordering::SeqCst)
    }

    fn claim(&self, address: &str) -> Option<InFlight<'_>> {
        if !self.in_flight.lock().insert(address.to_string()) {
            return None;
        }
        Some(InFlight {
            set: &self.in_flight,
            key: address.to_string(),
        })
    }

    fn new_exchange(&self, role: Role) -> Exchange {
        Exchange::new(role, self.local_address.clone(), self.stores.clone(), self.config.clone())
            .with_clock(self.registry.clock().clone())
    }

    /// One pass: expire stale peers, then exchange with every peer this device
    /// initiates with, one after another. A failure with one peer does not stop
    /// the others.
    pub fn tick(&self) -> TickReport {
        let now = self.registry.clock().now_millis();
        self.registry.garbage_collect(now);
        let mut report = TickReport::default();
        if !self.speaker.is_enabled() {
            return report;
        }
        for peer in self.registry.snapshot() {
            if !arbiter::local_initiates(&self.local_address, peer.address()) {
                continue;
            }
            let Some(_guard) = self.claim(peer.address()) else {
                report.busy += 1;
                continue;
            };
            report.attempted += 1;
            match self.initiate(&peer) {
                Ok(_) => report.succeeded += 1,
                Err(_) => report.failed += 1,
            }
        }
        if report.attempted > 0 {
            debug!(?report, "tick done");
        }
        report
    }

    fn initiate(&self, peer: &Peer) -> Result<ExchangeInfo, ExchangeError> {
        let mut exchange = self.new_exchange(Role::Initiator);
        let mut stream = match self.speaker.connect(peer.handle(), self.config.timeout) {
            Ok(s) => s,
            Err(e) => {
                let mut info = exchange.info().clone();
                info.remote_address = Some(peer.address().to_string());
                info.started_at = self.registry.clock().now_millis();
                let e = ExchangeError::from(e);
                warn!(peer = %peer.handle(), error = %e, "connect failed");
                self.callback.failure(&info, &e);
                return Err(e);
            }
        };
        let info = run_exchange(&mut exchange, &mut stream, self.callback.as_ref())?;
        info!(
            peer = %peer.handle(),
            received = info.messages_received,
            merged = info.messages_merged,
            friends_added = info.friends_added,
            "exchange complete"
        );
        Ok(info)
    }

    /// Answer an inbound connection. The stream is used for this one exchange only.
    pub fn handle_inbound(&self, mut stream: T::Stream, handle: NetworkHandle) -> Result<ExchangeInfo, ExchangeError> {
        let Some(_guard) = self.claim(handle.address()) else {
            debug!(peer = %handle, "inbound while busy with peer, dropping");
            return Err(ExchangeError::Busy(handle.address().to_string()));
        };
        let mut exchange = self.new_exchange(Role::Responder);
        let info = run_exchange(&mut exchange, &mut stream, self.callback.as_ref())?;
        info!(
            peer = %handle,
            remote = ?info.remote_address,
            received = info.messages_received,
            merged = info.messages_merged,
            "inbound exchange complete"
        );
        Ok(info)
    }

    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::RadioEnabled => {
                info!(protocol = self.speaker.protocol(), "transport enabled");
                self.speaker.set_enabled(true);
            }
            TransportEvent::RadioDisabled => {
                info!(protocol = self.speaker.protocol(), "transport disabled");
                self.speaker.set_enabled(false);
            }
            TransportEvent::PeerDiscovered(handle) => {
                if handle.address() == self.local_address {
                    return;
                }
                let now = self.registry.clock().now_millis();
                self.registry.get_canonical(Peer::new(handle, now));
            }
            TransportEvent::PeerLost(handle) => {
                self.registry.remove(&handle);
            }
        }
    }

    /// Periodic upkeep: restart the listener if it has stopped and the transport is up.
    pub fn tasks(self: &Arc<Self>) {
        if self.stopped.load(Ordering::SeqCst) || !self.speaker.is_enabled() {
            return;
        }
        if self.listener_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("rangzen-listener".into())
            .spawn(move || this.listen());
        if let Err(e) = spawned {
            warn!(error = %e, "failed to start listener");
            self.listener_running.store(false, Ordering::SeqCst);
        }
    }

    /// Stop restarting the listener. A running listener exits after its current accept.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn listen(self: Arc<Self>) {
        info!(protocol = self.speaker.protocol(), "listener started");
        while !self.stopped.load(Ordering::SeqCst) {
            match self.speaker.accept() {
                Ok((stream, handle)) => {
                    if let Err(e) = self.handle_inbound(stream, handle) {
                        debug!(error = %e, "inbound exchange failed");
                    }
                }
                Err(e) => {
                    if !self.speaker.is_enabled() {
                        info!("transport disabled, listener exiting");
                        break;
                    }
                    warn!(error = %e, "accept failed");
                    thread::sleep(ACCEPT_BACKOFF);
                }
            }
        }
        self.listener_running.store(false, Ordering::SeqCst);
    }
}
