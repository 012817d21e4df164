//! # weft-mux: Stream-Multiplexing Transport
//!
//! This crate multiplexes many independent logical byte streams over a
//! single reliable, ordered, bidirectional byte channel — the **fabric**,
//! typically one TCP connection. Each stream behaves like a byte-oriented
//! connection with its own flow control, independent half-close semantics,
//! and an addressable endpoint; a peer may accept an inbound stream by
//! dialing a TCP address on its behalf, which makes the transport a
//! tunneling relay.
//!
//! ## Architecture Overview
//!
//! ```text
//! weft-mux/
//! ├── error    - error enums and the wire error-code mapping
//! ├── types    - stream ids, stream addresses, configuration, constants
//! ├── frame    - wire format and the frame codec
//! ├── queue    - closable chunk FIFO (per-stream receive buffer)
//! ├── stream   - per-stream state machine, window, Read/Write handle
//! ├── fabric   - session object: stream table, reader loop, dial
//! └── accept   - acceptor hook and the TCP tunneling relay
//! ```
//!
//! ## Design Principles
//!
//! 1. **One reader, many writers**: exactly one thread runs the fabric
//!    reader loop and is the only network-side driver of stream state.
//!    Outbound frames from any thread serialize on the fabric write lock,
//!    so frames never interleave mid-payload.
//!
//! 2. **Credit-based flow control**: a sender may have at most one window
//!    of unacknowledged bytes in flight per stream. Receivers credit back
//!    exactly what their consumers have taken.
//!
//! 3. **Peer faults are stream faults**: a misbehaving frame resets the
//!    one stream it addresses. Only codec violations and I/O faults on the
//!    shared channel tear down the fabric.
//!
//! 4. **External collaborators stay external**: the reliable transport
//!    below, authentication, and the embedding daemon are all pluggable —
//!    the fabric consumes a reader/writer pair and an acceptor callback.
//!
//! ## Example
//!
//! ```no_run
//! use std::net::TcpStream;
//! use std::io::{Read, Write};
//! use std::sync::Arc;
//! use weft_mux::{Fabric, TcpRelayAcceptor};
//!
//! # fn main() -> std::io::Result<()> {
//! let conn = TcpStream::connect("203.0.113.5:7000")?;
//! let fabric = Arc::new(Fabric::new(
//!     Box::new(conn.try_clone()?),
//!     Box::new(conn),
//!     Arc::new(TcpRelayAcceptor::new()),
//! ));
//!
//! let runner = Arc::clone(&fabric);
//! std::thread::spawn(move || runner.run());
//!
//! let mut stream = fabric.dial("tcp", "198.51.100.20:80")?;
//! stream.write_all(b"GET / HTTP/1.0\r\n\r\n")?;
//! let mut response = Vec::new();
//! stream.read_to_end(&mut response)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod accept;
pub mod error;
pub mod fabric;
pub mod frame;
pub mod queue;
pub mod stream;
pub mod types;

pub use accept::{relay, Acceptor, RefuseAcceptor, StreamHandler, TcpRelayAcceptor};
pub use error::{Error, ErrorCode, Result};
pub use fabric::Fabric;
pub use frame::Frame;
pub use queue::{ChunkQueue, QueueClosed};
pub use stream::{Stream, StreamState};
pub use types::{
    FabricConfig, StreamAddr, StreamId, DIAL_TIMEOUT, MAX_FRAME_PAYLOAD, WINDOW_SIZE,
};
