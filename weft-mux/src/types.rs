//! # Core Types and Constants
//!
//! Fundamental identifiers, addresses, and the tunable configuration shared
//! by the fabric and its streams.

#![forbid(unsafe_code)]

use core::fmt;
use std::time::Duration;

// ============================================================================
// Stream Identifier
// ============================================================================

/// Stream Identifier
///
/// Uniquely identifies one logical stream within a fabric. Allocated by the
/// dialing side; the accepting side adopts the identifier chosen by the peer.
/// An identifier is never reused while its stream is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u16);

impl StreamId {
    /// Create a new StreamId.
    pub fn new(id: u16) -> Self {
        Self(id)
    }

    /// Get the raw value.
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Stream Address
// ============================================================================

/// Address of one end of a stream.
///
/// A composite of the fabric's endpoint label and the stream identifier,
/// rendered as `endpoint(id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAddr {
    /// Endpoint label of the underlying fabric (for a TCP fabric, the
    /// socket address).
    pub endpoint: String,

    /// Stream identifier within the fabric.
    pub stream_id: StreamId,
}

impl fmt::Display for StreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.endpoint, self.stream_id)
    }
}

// ============================================================================
// Normative Constants
// ============================================================================

/// Initial per-stream send window in bytes (256 KiB).
pub const WINDOW_SIZE: u32 = 256 * 1024;

/// How long a dial waits for the peer's RESULT before failing (30 s).
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on a frame payload; longer frames are malformed (32 KiB).
pub const MAX_FRAME_PAYLOAD: usize = 32 * 1024;

/// Lower bound of the randomized write-chunk range (16 KiB).
pub const MIN_WRITE_CHUNK: usize = 16 * 1024;

// ============================================================================
// Fabric Configuration
// ============================================================================

/// Configuration for a fabric and the streams it carries.
///
/// Defaults match the protocol's normative values. Window size and frame
/// payload cap are part of the compatibility surface: both peers must agree
/// on them by static configuration.
#[derive(Debug, Clone)]
pub struct FabricConfig {
    /// Initial send window granted to each direction of a stream, in bytes
    /// (default: 256 KiB). Any power of two between 64 KiB and 1 MiB is
    /// acceptable so long as both peers use the same value.
    pub window_size: u32,

    /// Deadline for a dial's RESULT rendezvous (default: 30 s).
    pub dial_timeout: Duration,

    /// Maximum accepted frame payload length (default: 32 KiB). Inbound
    /// frames exceeding this are malformed and tear down the fabric.
    pub max_frame_payload: usize,

    /// Endpoint label for the local end of the fabric, used in stream
    /// addresses (default: empty).
    pub local_endpoint: String,

    /// Endpoint label for the remote end of the fabric (default: empty).
    pub remote_endpoint: String,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            window_size: WINDOW_SIZE,
            dial_timeout: DIAL_TIMEOUT,
            max_frame_payload: MAX_FRAME_PAYLOAD,
            local_endpoint: String::new(),
            remote_endpoint: String::new(),
        }
    }
}
