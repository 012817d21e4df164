//! # Streams
//!
//! One logical byte-oriented channel multiplexed on a fabric. A [`Stream`]
//! satisfies `std::io::Read` and `std::io::Write`, half-closes independently
//! in each direction, and carries its own sliding send window driven by the
//! peer's credits.
//!
//! ## Locking
//!
//! `state` and `send_window` live under one stream mutex; the send condvar
//! is paired with that mutex and writers release it while waiting for
//! window. Lock order is stream mutex, then fabric write lock — never the
//! reverse.

#![forbid(unsafe_code)]

mod state;

pub use state::StreamState;

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use bytes::{Buf, Bytes};
use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::error::{Error, ErrorCode, Result};
use crate::fabric::FabricShared;
use crate::frame::Frame;
use crate::queue::{ChunkQueue, QueueClosed};
use crate::types::{StreamAddr, StreamId, MIN_WRITE_CHUNK};

/// Fields guarded by the stream mutex.
struct Guarded {
    state: StreamState,
    /// Bytes the peer is currently willing to receive. Signed: a reset can
    /// be observed by a writer that already debited optimistically.
    send_window: i64,
}

/// Shared per-stream state: the fabric reader, writer threads, and reader
/// threads all land here.
pub(crate) struct StreamShared {
    id: StreamId,
    fabric: Arc<FabricShared>,

    guarded: Mutex<Guarded>,
    /// Wakes blocked writers on window growth and on any state change that
    /// makes writing impossible.
    send_ready: Condvar,

    /// Receive buffer; producer is the fabric reader, which never blocks.
    rqueue: ChunkQueue,

    /// One-shot rendezvous carrying the peer's RESULT code during a dial.
    /// The dialer may have timed out and gone away; delivery never blocks.
    syn_tx: Mutex<Option<Sender<u32>>>,

    /// Live `Stream` handles over this state.
    handles: AtomicUsize,

    /// Set once a handle close() succeeded; suppresses the reset-on-drop.
    user_closed: AtomicBool,
}

impl StreamShared {
    pub(crate) fn new(
        id: StreamId,
        fabric: Arc<FabricShared>,
        state: StreamState,
        syn_tx: Option<Sender<u32>>,
    ) -> Self {
        let window = i64::from(fabric.config().window_size);
        Self {
            id,
            fabric,
            guarded: Mutex::new(Guarded {
                state,
                send_window: window,
            }),
            send_ready: Condvar::new(),
            rqueue: ChunkQueue::new(),
            syn_tx: Mutex::new(syn_tx),
            handles: AtomicUsize::new(0),
            user_closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> StreamId {
        self.id
    }

    pub(crate) fn state(&self) -> StreamState {
        self.guarded.lock().unwrap().state
    }

    /// Complete a dial: the peer answered success.
    pub(crate) fn establish(&self) -> Result<()> {
        let mut guarded = self.guarded.lock().unwrap();
        guarded
            .state
            .transition(StreamState::SynSent, StreamState::Est)
    }

    /// Emit one DATA frame worth of `chunk`, blocking while the window is
    /// too small. The stream mutex is held across the emission so bytes of
    /// one write stay ordered relative to other writes on this stream.
    pub(crate) fn write_chunk(&self, chunk: &[u8]) -> Result<()> {
        let mut guarded = self.guarded.lock().unwrap();
        loop {
            if guarded.state != StreamState::Est {
                return Err(Error::BrokenPipe);
            }
            if guarded.send_window >= chunk.len() as i64 {
                break;
            }
            guarded = self.send_ready.wait(guarded).unwrap();
        }

        self.fabric.send_frame(&Frame::Data {
            stream_id: self.id,
            payload: Bytes::copy_from_slice(chunk),
        })?;
        guarded.send_window -= chunk.len() as i64;
        Ok(())
    }

    /// Credit the peer for `amount` consumed bytes.
    pub(crate) fn send_credit(&self, amount: u32) -> Result<()> {
        self.fabric.send_frame(&Frame::Wnd {
            stream_id: self.id,
            credit: amount,
        })
    }

    /// Inbound WND: grow the window and wake blocked writers.
    pub(crate) fn grow_window(&self, credit: u32) {
        let mut guarded = self.guarded.lock().unwrap();
        guarded.send_window = guarded.send_window.saturating_add(i64::from(credit));
        self.send_ready.notify_all();
    }

    /// Inbound DATA: enqueue for the consumer. Data for a closed queue is
    /// dropped silently.
    pub(crate) fn push_data(&self, payload: Bytes) {
        if self.rqueue.push(payload).is_err() {
            debug!(stream = %self.id, "data after read close dropped");
        }
    }

    /// Inbound RESULT during a dial.
    ///
    /// # Errors
    /// `Error::State` when no dial is in flight; the fabric converts that
    /// to a reset.
    pub(crate) fn deliver_result(&self, errno: u32) -> Result<()> {
        {
            let guarded = self.guarded.lock().unwrap();
            if guarded.state != StreamState::SynSent {
                return Err(Error::State);
            }
        }
        if let Some(tx) = self.syn_tx.lock().unwrap().as_ref() {
            // Capacity-1 channel; the dialer may already have timed out and
            // dropped the receiver. Either way delivery must not block.
            let _ = tx.try_send(errno);
        }
        Ok(())
    }

    /// Local write-half close.
    ///
    /// Est moves to FinSent; FinRecv completes the teardown. Closing an
    /// already-closed or already-reset stream is a no-op.
    pub(crate) fn close_write(&self) -> Result<()> {
        let mut guarded = self.guarded.lock().unwrap();
        match guarded.state {
            StreamState::Est => {
                guarded.state = StreamState::FinSent;
                debug!(stream = %self.id, "write half closed");
                // Emission under the stream mutex keeps the FIN ordered
                // after any in-flight chunk of a concurrent writer.
                self.fabric.send_frame(&Frame::Fin { stream_id: self.id })
            }
            StreamState::FinRecv => {
                guarded.state = StreamState::Unknown;
                drop(guarded);
                self.send_ready.notify_all();
                let result = self.fabric.send_frame(&Frame::Fin { stream_id: self.id });
                self.finalize();
                result
            }
            StreamState::FinSent | StreamState::Unknown => Ok(()),
            StreamState::SynSent | StreamState::SynRecv => Err(Error::State),
        }
    }

    /// Peer FIN: close the read half.
    ///
    /// # Errors
    /// `Error::State` when the stream is still being established; the
    /// fabric converts that to a reset.
    pub(crate) fn close_read(&self) -> Result<()> {
        let mut guarded = self.guarded.lock().unwrap();
        match guarded.state {
            StreamState::Est => {
                guarded.state = StreamState::FinRecv;
                drop(guarded);
                debug!(stream = %self.id, "read half closed");
                // Writers blocked on window must observe the state change.
                self.send_ready.notify_all();
                self.rqueue.close();
                Ok(())
            }
            StreamState::FinSent => {
                guarded.state = StreamState::Unknown;
                drop(guarded);
                self.send_ready.notify_all();
                self.rqueue.close();
                self.finalize();
                Ok(())
            }
            StreamState::FinRecv | StreamState::Unknown => Ok(()),
            StreamState::SynSent | StreamState::SynRecv => Err(Error::State),
        }
    }

    /// Abrupt teardown: peer RST, local abort, or fabric teardown.
    pub(crate) fn reset(&self) {
        {
            let mut guarded = self.guarded.lock().unwrap();
            if guarded.state == StreamState::Unknown && self.rqueue.is_closed() {
                return;
            }
            guarded.state = StreamState::Unknown;
        }
        debug!(stream = %self.id, "stream reset");
        self.finalize();
    }

    /// Final: unregister, close the receive queue, wake every waiter.
    fn finalize(&self) {
        self.fabric.unregister(self.id);
        self.rqueue.close();
        self.send_ready.notify_all();
        if let Some(tx) = self.syn_tx.lock().unwrap().take() {
            let _ = tx.try_send(ErrorCode::Closed.to_wire());
        }
    }
}

/// Pick the next chunk length for a write.
///
/// Large writes are sliced into randomized chunks so frame lengths do not
/// mirror application write sizes, and so window credits interleave with a
/// long transfer. Falls back to the range midpoint when entropy is
/// unavailable.
fn chunk_len(remaining: usize) -> usize {
    // Below 1.5x the minimum a single exact chunk costs less than two.
    if remaining <= MIN_WRITE_CHUNK + MIN_WRITE_CHUNK / 2 {
        return remaining;
    }
    let mut seed = [0u8; 2];
    let len = match getrandom::getrandom(&mut seed) {
        Ok(()) => MIN_WRITE_CHUNK + usize::from(u16::from_ne_bytes(seed)) % MIN_WRITE_CHUNK,
        Err(err) => {
            warn!(?err, "entropy unavailable; using fixed chunk size");
            MIN_WRITE_CHUNK + MIN_WRITE_CHUNK / 2
        }
    };
    // The drawn length can overshoot what is left to write when
    // `remaining` sits between the threshold and the range's top.
    len.min(remaining)
}

/// One logical byte stream over a fabric.
///
/// Reading returns data in the order the peer wrote it and yields
/// end-of-stream (`Ok(0)`) once the peer's write half is closed and the
/// receive buffer is drained. Writing delivers everything or fails with
/// broken-pipe once the stream is no longer established.
///
/// Cloning produces another handle over the same stream (both directions
/// included), like a cloned socket; reads should stay with one consumer at
/// a time. Dropping the last handle without [`Stream::close`] resets the
/// stream so the peer never waits on an abandoned channel.
pub struct Stream {
    shared: Arc<StreamShared>,
    /// Leftover bytes of a popped chunk that did not fit the caller's buffer.
    carry: Option<Bytes>,
}

impl Stream {
    pub(crate) fn new(shared: Arc<StreamShared>) -> Self {
        shared.handles.fetch_add(1, Ordering::AcqRel);
        Self {
            shared,
            carry: None,
        }
    }

    /// Identifier of this stream within its fabric.
    pub fn id(&self) -> StreamId {
        self.shared.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// Address of the local end: the fabric's local endpoint plus the
    /// stream id, rendered `endpoint(id)`.
    pub fn local_addr(&self) -> StreamAddr {
        StreamAddr {
            endpoint: self.shared.fabric.config().local_endpoint.clone(),
            stream_id: self.shared.id,
        }
    }

    /// Address of the remote end.
    pub fn remote_addr(&self) -> StreamAddr {
        StreamAddr {
            endpoint: self.shared.fabric.config().remote_endpoint.clone(),
            stream_id: self.shared.id,
        }
    }

    /// Close the write half.
    ///
    /// Returns once the FIN is handed to the fabric. Reads continue until
    /// the peer closes its own write half. Idempotent: closing again (or
    /// closing a reset stream) succeeds without effect.
    pub fn close(&mut self) -> io::Result<()> {
        self.shared.close_write()?;
        self.shared.user_closed.store(true, Ordering::Release);
        Ok(())
    }

    /// Read deadlines are not supported at this layer; accepted as a no-op.
    /// Unblock a pending read by closing the stream or the fabric.
    pub fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    /// Write deadlines are not supported at this layer; accepted as a no-op.
    pub fn set_write_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

impl Read for Stream {
    /// Return some prefix of the peer's byte stream.
    ///
    /// Blocks only while no bytes at all are available for this call; once
    /// anything has been copied the call returns rather than filling `buf`.
    /// Every delivered byte is credited back to the peer with a window
    /// update.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        {
            let guarded = self.shared.guarded.lock().unwrap();
            if guarded.state == StreamState::Unknown && !self.shared.rqueue.is_closed() {
                return Err(Error::State.into());
            }
        }

        let mut filled = 0;
        loop {
            match self.carry.take() {
                Some(mut chunk) => {
                    let take = chunk.len().min(buf.len() - filled);
                    buf[filled..filled + take].copy_from_slice(&chunk[..take]);
                    chunk.advance(take);
                    filled += take;
                    if !chunk.is_empty() {
                        self.carry = Some(chunk);
                    }
                    if filled == buf.len() {
                        break;
                    }
                }
                None => match self.shared.rqueue.pop(filled == 0) {
                    Ok(Some(chunk)) => {
                        if !chunk.is_empty() {
                            self.carry = Some(chunk);
                        }
                    }
                    Ok(None) | Err(QueueClosed) => break,
                },
            }
        }

        if filled > 0 {
            // Credit emission is ordered after the bytes it accounts for.
            // A dead fabric cannot carry the credit, but then the peer is
            // past caring; the data still belongs to the caller.
            if let Err(err) = self.shared.send_credit(filled as u32) {
                debug!(stream = %self.shared.id, ?err, "window credit dropped");
            }
        }
        Ok(filled)
    }
}

impl Write for Stream {
    /// Deliver all of `buf`, or as much as the stream accepted before
    /// failing; the next call surfaces the failure.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            let len = chunk_len(buf.len() - written);
            match self.shared.write_chunk(&buf[written..written + len]) {
                Ok(()) => written += len,
                Err(err) => {
                    if written > 0 {
                        debug!(stream = %self.shared.id, ?err, "write stopped short");
                        return Ok(written);
                    }
                    return Err(err.into());
                }
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Frames are flushed to the fabric as they are emitted.
        Ok(())
    }
}

impl Clone for Stream {
    fn clone(&self) -> Self {
        Stream::new(Arc::clone(&self.shared))
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.shared.handles.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if self.shared.user_closed.load(Ordering::Acquire) {
            return;
        }
        if self.shared.state() == StreamState::Unknown {
            return;
        }
        // Abandoned without close: abort so the peer is not left waiting.
        debug!(stream = %self.shared.id, "handle dropped without close; resetting");
        let _ = self.shared.fabric.send_frame(&Frame::Rst {
            stream_id: self.shared.id,
        });
        self.shared.reset();
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .finish()
    }
}
