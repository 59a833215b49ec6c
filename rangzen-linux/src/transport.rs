//! LAN transport: exchanges run over plain TCP on the configured exchange port.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use rangzen_core::{NetworkHandle, TransportError, TransportSpeaker};

/// How often a pending accept rechecks the enabled flag.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

pub struct TcpSpeaker {
    listener: TcpListener,
    io_timeout: Option<Duration>,
    enabled: AtomicBool,
}

impl TcpSpeaker {
    /// Bind the exchange listener on all interfaces. `io_timeout` bounds reads
    /// and writes on accepted streams.
    pub fn bind(port: u16, io_timeout: Option<Duration>) -> io::Result<Self> {
        Self::bind_addr(SocketAddr::from(([0, 0, 0, 0], port)), io_timeout)
    }

    pub fn bind_addr(addr: SocketAddr, io_timeout: Option<Duration>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            io_timeout,
            enabled: AtomicBool::new(true),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn prepare(&self, stream: &TcpStream, timeout: Option<Duration>) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)
    }
}

impl TransportSpeaker for TcpSpeaker {
    type Stream = TcpStream;

    fn protocol(&self) -> &'static str {
        "lan"
    }

    fn connect(&self, peer: &NetworkHandle, timeout: Option<Duration>) -> Result<TcpStream, TransportError> {
        if !self.is_enabled() {
            return Err(TransportError::Disabled);
        }
        let addr = peer
            .endpoint()
            .ok_or_else(|| TransportError::Unreachable(peer.to_string()))?;
        let stream = match timeout {
            Some(t) => TcpStream::connect_timeout(&addr, t)?,
            None => TcpStream::connect(addr)?,
        };
        self.prepare(&stream, timeout)?;
        Ok(stream)
    }

    /// The remote is identified by its socket address until its first frame names it.
    fn accept(&self) -> Result<(TcpStream, NetworkHandle), TransportError> {
        loop {
            if !self.is_enabled() {
                return Err(TransportError::Disabled);
            }
            match self.listener.accept() {
                Ok((stream, from)) => {
                    self.prepare(&stream, self.io_timeout)?;
                    return Ok((stream, NetworkHandle::lan(from.to_string(), from)));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}
