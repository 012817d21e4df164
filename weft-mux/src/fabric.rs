//! # Fabric
//!
//! The session object owning one reliable, ordered byte channel and the
//! streams multiplexed over it. A single reader task decodes frames and
//! dispatches them by stream id; outbound frames from any thread serialize
//! on the fabric write lock so frames are never interleaved on the wire.
//!
//! Peer-caused faults terminate only the affected stream. Codec faults and
//! I/O faults on the channel itself tear the whole fabric down.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use crate::accept::Acceptor;
use crate::error::{Error, ErrorCode, Result};
use crate::frame::{self, Frame};
use crate::stream::{Stream, StreamShared, StreamState};
use crate::types::{FabricConfig, StreamId};

struct StreamTable {
    streams: HashMap<u16, Arc<StreamShared>>,
    /// Rolling cursor for id allocation; advanced past every handed-out id.
    next_id: u16,
}

/// State shared between the fabric handle, its reader loop, and every
/// stream: the write half, the stream table, and the closed flag.
pub(crate) struct FabricShared {
    config: FabricConfig,
    /// The write lock: one frame at a time, never interleaved.
    writer: Mutex<Box<dyn Write + Send>>,
    table: Mutex<StreamTable>,
    closed: AtomicBool,
}

impl FabricShared {
    fn new(writer: Box<dyn Write + Send>, config: FabricConfig) -> Self {
        Self {
            config,
            writer: Mutex::new(writer),
            table: Mutex::new(StreamTable {
                streams: HashMap::new(),
                next_id: 0,
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Emit one frame under the write lock.
    pub(crate) fn send_frame(&self, frame: &Frame) -> Result<()> {
        if self.is_closed() {
            return Err(Error::FabricClosed);
        }
        let mut writer = self.writer.lock().unwrap();
        frame::write_frame(&mut *writer, frame)
    }

    pub(crate) fn lookup(&self, id: StreamId) -> Option<Arc<StreamShared>> {
        self.table.lock().unwrap().streams.get(&id.value()).cloned()
    }

    /// Register a stream at its id. Fails when the id is already live.
    pub(crate) fn register(&self, stream: Arc<StreamShared>) -> bool {
        let mut table = self.table.lock().unwrap();
        let id = stream.id().value();
        if table.streams.contains_key(&id) {
            return false;
        }
        table.streams.insert(id, stream);
        true
    }

    /// Remove a stream from the table, releasing its id.
    pub(crate) fn unregister(&self, id: StreamId) {
        self.table.lock().unwrap().streams.remove(&id.value());
    }

    /// Allocate the next free id and register a dialing stream under it,
    /// atomically with respect to other dials and accepts.
    fn register_dial(
        self: &Arc<Self>,
        syn_tx: Sender<u32>,
    ) -> Result<Arc<StreamShared>> {
        let mut table = self.table.lock().unwrap();
        let start = table.next_id;
        loop {
            let id = table.next_id;
            table.next_id = table.next_id.wrapping_add(1);
            if !table.streams.contains_key(&id) {
                let stream = Arc::new(StreamShared::new(
                    StreamId(id),
                    Arc::clone(self),
                    StreamState::SynSent,
                    Some(syn_tx),
                ));
                table.streams.insert(id, Arc::clone(&stream));
                return Ok(stream);
            }
            if table.next_id == start {
                return Err(Error::IdExhausted);
            }
        }
    }

    fn stream_count(&self) -> usize {
        self.table.lock().unwrap().streams.len()
    }

    /// Tear down: mark closed and reset every registered stream. Idempotent.
    pub(crate) fn teardown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let streams: Vec<Arc<StreamShared>> = {
            let mut table = self.table.lock().unwrap();
            table.streams.drain().map(|(_, stream)| stream).collect()
        };
        if !streams.is_empty() {
            info!(streams = streams.len(), "fabric teardown resets live streams");
        }
        for stream in streams {
            stream.reset();
        }
    }
}

/// A multiplexing session over one reliable byte channel.
///
/// Construct with the channel's two halves and an [`Acceptor`] for
/// peer-initiated streams, [`run`](Fabric::run) the reader loop on its own
/// thread, and [`dial`](Fabric::dial) outbound streams from any thread.
pub struct Fabric {
    shared: Arc<FabricShared>,
    reader: Mutex<Option<Box<dyn Read + Send>>>,
    acceptor: Arc<dyn Acceptor>,
}

impl Fabric {
    /// Create a fabric over `reader`/`writer` with default configuration.
    pub fn new(
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
        acceptor: Arc<dyn Acceptor>,
    ) -> Self {
        Self::with_config(reader, writer, acceptor, FabricConfig::default())
    }

    /// Create a fabric with explicit configuration.
    pub fn with_config(
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
        acceptor: Arc<dyn Acceptor>,
        config: FabricConfig,
    ) -> Self {
        Self {
            shared: Arc::new(FabricShared::new(writer, config)),
            reader: Mutex::new(Some(reader)),
            acceptor,
        }
    }

    /// Number of streams currently registered.
    pub fn stream_count(&self) -> usize {
        self.shared.stream_count()
    }

    /// Whether the fabric has been torn down.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Open a stream toward `network`/`address` on the peer.
    ///
    /// Allocates an id, sends SYN, and waits for the peer's RESULT up to
    /// the dial timeout. On success the returned stream is established.
    ///
    /// # Errors
    /// [`Error::Timeout`] when the peer never answers, [`Error::Refused`]
    /// (or the peer's reported code) on refusal, [`Error::IdExhausted`]
    /// when no stream id is free, [`Error::FabricClosed`] after teardown.
    pub fn dial(&self, network: &str, address: &str) -> Result<Stream> {
        if self.shared.is_closed() {
            return Err(Error::FabricClosed);
        }
        if network.len() > usize::from(u8::MAX) || address.len() > usize::from(u16::MAX) {
            return Err(Error::Malformed("dial target too long"));
        }

        let (syn_tx, syn_rx) = bounded(1);
        let stream = self.shared.register_dial(syn_tx)?;
        let id = stream.id();
        debug!(stream = %id, network, address, "dialing");

        if let Err(err) = self.shared.send_frame(&Frame::Syn {
            stream_id: id,
            network: network.to_string(),
            address: address.to_string(),
        }) {
            stream.reset();
            return Err(err);
        }

        match syn_rx.recv_timeout(self.shared.config.dial_timeout) {
            Ok(errno) => match ErrorCode::from_wire(errno) {
                ErrorCode::None => {
                    if let Err(err) = stream.establish() {
                        // A reset raced the RESULT; the stream is gone.
                        stream.reset();
                        return Err(err);
                    }
                    debug!(stream = %id, "dial established");
                    Ok(Stream::new(stream))
                }
                code => {
                    debug!(stream = %id, errno, "dial rejected");
                    stream.reset();
                    Err(code.into_error())
                }
            },
            Err(RecvTimeoutError::Timeout) => {
                warn!(stream = %id, "dial timed out");
                stream.reset();
                Err(Error::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => {
                stream.reset();
                Err(Error::FabricClosed)
            }
        }
    }

    /// Run the reader loop until the fabric closes or fails.
    ///
    /// Exactly one call may run; it owns the read half. Returns `Ok` after
    /// a local [`close`](Fabric::close), `Err` on a codec or I/O fault
    /// (after tearing everything down).
    pub fn run(&self) -> Result<()> {
        let mut reader = self
            .reader
            .lock()
            .unwrap()
            .take()
            .ok_or(Error::State)?;
        let max_payload = self.shared.config.max_frame_payload;

        loop {
            if self.shared.is_closed() {
                return Ok(());
            }
            let frame = match frame::read_frame(&mut reader, max_payload) {
                Ok(frame) => frame,
                Err(err) => {
                    let local_close = self.shared.is_closed();
                    self.shared.teardown();
                    if local_close {
                        return Ok(());
                    }
                    error!(?err, "fabric reader failed; tearing down");
                    return Err(err);
                }
            };
            if let Err(err) = self.dispatch(frame) {
                if matches!(err, Error::FabricClosed) {
                    // A local close raced this dispatch.
                    return Ok(());
                }
                self.shared.teardown();
                error!(?err, "fabric write failed; tearing down");
                return Err(err);
            }
        }
    }

    /// Reset every stream and tear the fabric down.
    ///
    /// A reader blocked in the underlying transport keeps blocking until
    /// the embedder closes that transport; the loop exits at the next
    /// frame boundary either way.
    pub fn close(&self) {
        self.shared.teardown();
    }

    /// Dispatch one inbound frame. An `Err` here is a fabric-fatal write
    /// fault; per-stream faults are handled in place with a reset.
    fn dispatch(&self, frame: Frame) -> Result<()> {
        let stream_id = frame.stream_id();
        let existing = self.shared.lookup(stream_id);

        match frame {
            Frame::Syn {
                network, address, ..
            } => match existing {
                Some(stream) => {
                    warn!(stream = %stream_id, "SYN for a live stream");
                    self.reset_stream(&stream)
                }
                None => self.handle_syn(stream_id, &network, &address),
            },
            Frame::Result { errno, .. } => match existing {
                Some(stream) => match stream.deliver_result(errno) {
                    Ok(()) => Ok(()),
                    Err(Error::State) => {
                        warn!(stream = %stream_id, "RESULT outside dial");
                        self.reset_stream(&stream)
                    }
                    Err(err) => Err(err),
                },
                None => self.reset_unknown(stream_id),
            },
            Frame::Data { payload, .. } => match existing {
                Some(stream) => {
                    if !payload.is_empty() {
                        stream.push_data(payload);
                    }
                    Ok(())
                }
                None => self.reset_unknown(stream_id),
            },
            Frame::Wnd { credit, .. } => match existing {
                Some(stream) => {
                    stream.grow_window(credit);
                    Ok(())
                }
                None => self.reset_unknown(stream_id),
            },
            Frame::Fin { .. } => match existing {
                Some(stream) => match stream.close_read() {
                    Ok(()) => Ok(()),
                    Err(Error::State) => {
                        warn!(stream = %stream_id, "FIN in unexpected state");
                        self.reset_stream(&stream)
                    }
                    Err(err) => Err(err),
                },
                None => self.reset_unknown(stream_id),
            },
            // A reset for an unknown id is ignored: answering it would let
            // two peers volley RSTs forever.
            Frame::Rst { .. } => {
                if let Some(stream) = existing {
                    stream.reset();
                }
                Ok(())
            }
        }
    }

    /// Peer-initiated stream: ask the acceptor, then either establish and
    /// hand the stream to the returned handler, or answer the refusal.
    fn handle_syn(&self, stream_id: StreamId, network: &str, address: &str) -> Result<()> {
        debug!(stream = %stream_id, network, address, "inbound stream");
        match self.acceptor.accept(network, address, stream_id) {
            Ok(handler) => {
                let shared = Arc::new(StreamShared::new(
                    stream_id,
                    Arc::clone(&self.shared),
                    StreamState::Est,
                    None,
                ));
                if !self.shared.register(Arc::clone(&shared)) {
                    // A dial raced us onto this id after the table lookup.
                    warn!(stream = %stream_id, "accepted stream collides with live id");
                    return self.shared.send_frame(&Frame::Rst { stream_id });
                }
                self.shared.send_frame(&Frame::Result {
                    stream_id,
                    errno: ErrorCode::None.to_wire(),
                })?;

                let stream = Stream::new(shared);
                let spawned = thread::Builder::new()
                    .name(format!("weft-stream-{stream_id}"))
                    .spawn(move || handler(stream));
                if let Err(err) = spawned {
                    // The handle just dropped inside the failed spawn,
                    // which already reset the stream and told the peer.
                    error!(stream = %stream_id, ?err, "stream handler spawn failed");
                }
                Ok(())
            }
            Err(code) => {
                debug!(stream = %stream_id, errno = code.to_wire(), "stream refused");
                self.shared.send_frame(&Frame::Result {
                    stream_id,
                    errno: code.to_wire(),
                })
            }
        }
    }

    /// Protocol fault on a live stream: tell the peer and reset locally.
    fn reset_stream(&self, stream: &Arc<StreamShared>) -> Result<()> {
        let result = self.shared.send_frame(&Frame::Rst {
            stream_id: stream.id(),
        });
        stream.reset();
        result
    }

    /// Sequenced frame for an id nobody owns: tell the peer it is dead.
    fn reset_unknown(&self, stream_id: StreamId) -> Result<()> {
        debug!(stream = %stream_id, "frame for unknown stream");
        self.shared.send_frame(&Frame::Rst { stream_id })
    }
}

impl std::fmt::Debug for Fabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fabric")
            .field("local", &self.shared.config.local_endpoint)
            .field("remote", &self.shared.config.remote_endpoint)
            .field("streams", &self.stream_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
