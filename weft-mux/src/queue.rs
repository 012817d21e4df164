//! # Chunk Queue
//!
//! The per-stream receive buffer: a closable FIFO of byte chunks. The
//! producer is the fabric reader, which must never block; back-pressure
//! toward the peer is expressed with window credits, not by blocking here.
//! The consumer is the stream's read path, which may block for the first
//! chunk of a call.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use bytes::Bytes;

/// Error returned once the queue is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

struct QueueInner {
    chunks: VecDeque<Bytes>,
    closed: bool,
}

/// Closable FIFO of opaque byte chunks.
///
/// After `close`, producers observe [`QueueClosed`] and consumers drain the
/// remaining chunks before observing it; a blocked consumer is woken by
/// `close`.
pub struct ChunkQueue {
    inner: Mutex<QueueInner>,
    ready: Condvar,
}

impl ChunkQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                chunks: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append a chunk. Never blocks.
    ///
    /// # Errors
    /// [`QueueClosed`] once the queue has been closed; the chunk is dropped.
    pub fn push(&self, chunk: Bytes) -> Result<(), QueueClosed> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(QueueClosed);
        }
        inner.chunks.push_back(chunk);
        self.ready.notify_one();
        Ok(())
    }

    /// Remove the oldest chunk.
    ///
    /// With `blocking` set, waits until a chunk arrives or the queue closes.
    /// Without it, an empty open queue yields `Ok(None)`.
    ///
    /// Buffered chunks always drain before [`QueueClosed`] is observed.
    pub fn pop(&self, blocking: bool) -> Result<Option<Bytes>, QueueClosed> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(chunk) = inner.chunks.pop_front() {
                return Ok(Some(chunk));
            }
            if inner.closed {
                return Err(QueueClosed);
            }
            if !blocking {
                return Ok(None);
            }
            inner = self.ready.wait(inner).unwrap();
        }
    }

    /// Close the queue, waking any blocked consumer. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.closed {
            inner.closed = true;
            self.ready.notify_all();
        }
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}

impl Default for ChunkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_push_pop_fifo() {
        let queue = ChunkQueue::new();
        queue.push(Bytes::from_static(b"a")).unwrap();
        queue.push(Bytes::from_static(b"b")).unwrap();

        assert_eq!(queue.pop(false).unwrap().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(queue.pop(false).unwrap().unwrap(), Bytes::from_static(b"b"));
        assert_eq!(queue.pop(false).unwrap(), None);
    }

    #[test]
    fn test_nonblocking_pop_empty() {
        let queue = ChunkQueue::new();
        assert_eq!(queue.pop(false).unwrap(), None);
    }

    #[test]
    fn test_push_after_close_fails() {
        let queue = ChunkQueue::new();
        queue.close();
        assert_eq!(queue.push(Bytes::from_static(b"x")), Err(QueueClosed));
    }

    #[test]
    fn test_drain_before_closed_error() {
        let queue = ChunkQueue::new();
        queue.push(Bytes::from_static(b"tail")).unwrap();
        queue.close();

        // Buffered data still comes out, then the closed error.
        assert_eq!(
            queue.pop(true).unwrap().unwrap(),
            Bytes::from_static(b"tail")
        );
        assert_eq!(queue.pop(true), Err(QueueClosed));
        assert_eq!(queue.pop(false), Err(QueueClosed));
    }

    #[test]
    fn test_close_idempotent() {
        let queue = ChunkQueue::new();
        queue.close();
        queue.close();
        assert!(queue.is_closed());
    }

    #[test]
    fn test_blocking_pop_woken_by_push() {
        let queue = Arc::new(ChunkQueue::new());
        let producer = Arc::clone(&queue);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(Bytes::from_static(b"late")).unwrap();
        });

        let chunk = queue.pop(true).unwrap().unwrap();
        assert_eq!(chunk, Bytes::from_static(b"late"));
        handle.join().unwrap();
    }

    #[test]
    fn test_blocking_pop_woken_by_close() {
        let queue = Arc::new(ChunkQueue::new());
        let closer = Arc::clone(&queue);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.close();
        });

        assert_eq!(queue.pop(true), Err(QueueClosed));
        handle.join().unwrap();
    }
}
