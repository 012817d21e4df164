//! # Acceptors
//!
//! The hook invoked when a peer opens an inbound stream. The fabric reader
//! asks the acceptor to decide; on acceptance the returned handler runs on
//! its own thread with the established stream, so handler I/O never races
//! stream setup. On refusal the peer's dial fails with the returned code
//! and nothing is registered.

#![forbid(unsafe_code)]

use std::io;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ErrorCode;
use crate::stream::Stream;
use crate::types::StreamId;

/// Application-side handler for one accepted stream, run on a dedicated
/// thread once the stream is established.
pub type StreamHandler = Box<dyn FnOnce(Stream) + Send>;

/// Decides the fate of peer-initiated streams.
pub trait Acceptor: Send + Sync {
    /// Called from the fabric reader for each inbound SYN, before the
    /// stream exists locally. Blocking here stalls the whole fabric; keep
    /// the decision as quick as the use case allows.
    fn accept(
        &self,
        network: &str,
        address: &str,
        id: StreamId,
    ) -> Result<StreamHandler, ErrorCode>;
}

/// Refuses every inbound stream.
///
/// The acceptor for purely client-side fabrics that only dial out.
pub struct RefuseAcceptor;

impl Acceptor for RefuseAcceptor {
    fn accept(
        &self,
        _network: &str,
        _address: &str,
        id: StreamId,
    ) -> Result<StreamHandler, ErrorCode> {
        debug!(stream = %id, "inbound stream refused by policy");
        Err(ErrorCode::Refused)
    }
}

/// Accepts inbound streams by dialing the requested TCP address and
/// relaying bytes in both directions — the tunneling-relay role of the
/// transport.
pub struct TcpRelayAcceptor {
    /// Bound on the outbound TCP connect. `None` uses the OS default.
    pub connect_timeout: Option<Duration>,
}

impl TcpRelayAcceptor {
    pub fn new() -> Self {
        Self {
            connect_timeout: None,
        }
    }

    fn connect(&self, address: &str) -> io::Result<TcpStream> {
        match self.connect_timeout {
            None => TcpStream::connect(address),
            Some(timeout) => {
                let mut last_err = io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "address resolved to nothing",
                );
                for addr in address.to_socket_addrs()? {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(sock) => return Ok(sock),
                        Err(err) => last_err = err,
                    }
                }
                Err(last_err)
            }
        }
    }
}

impl Default for TcpRelayAcceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Acceptor for TcpRelayAcceptor {
    fn accept(
        &self,
        network: &str,
        address: &str,
        id: StreamId,
    ) -> Result<StreamHandler, ErrorCode> {
        if network != "tcp" {
            warn!(stream = %id, network, "relay only handles tcp");
            return Err(ErrorCode::Refused);
        }
        let sock = match self.connect(address) {
            Ok(sock) => sock,
            Err(err) => {
                warn!(stream = %id, address, ?err, "relay target unreachable");
                return Err(ErrorCode::Refused);
            }
        };
        debug!(stream = %id, address, "relay connected");
        Ok(Box::new(move |stream| relay(stream, sock)))
    }
}

/// Pump bytes between an established stream and a TCP socket until both
/// directions have closed, propagating half-closes in each direction.
pub fn relay(stream: Stream, sock: TcpStream) {
    let mut stream_rx = stream.clone();
    let mut sock_tx = match sock.try_clone() {
        Ok(sock) => sock,
        Err(err) => {
            warn!(stream = %stream.id(), ?err, "relay socket clone failed");
            return;
        }
    };

    let uplink = thread::Builder::new()
        .name(format!("weft-relay-up-{}", stream.id()))
        .spawn(move || {
            match io::copy(&mut stream_rx, &mut sock_tx) {
                Ok(bytes) => debug!(bytes, "relay uplink finished"),
                Err(err) => debug!(?err, "relay uplink failed"),
            }
            // Stream side saw EOF (or died); stop feeding the socket.
            let _ = sock_tx.shutdown(Shutdown::Write);
        });

    let mut sock_rx = sock;
    let mut stream_tx = stream;
    match io::copy(&mut sock_rx, &mut stream_tx) {
        Ok(bytes) => debug!(bytes, "relay downlink finished"),
        Err(err) => debug!(?err, "relay downlink failed"),
    }
    let _ = stream_tx.close();

    if let Ok(handle) = uplink {
        let _ = handle.join();
    }
}
