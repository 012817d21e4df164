//! # Frame Types
//!
//! Every message on the fabric is one frame: a fixed 5-byte header followed
//! by a typed payload. Control frames (SYN/RESULT/FIN/RST/WND) travel in-band
//! with DATA frames.
//!
//! ## Wire layout (all multi-byte fields big-endian)
//!
//! ```text
//!  0        1        2        3        4               4+L
//! +--------+--------+--------+--------+----- payload -----+
//! |  type  |      length     |   stream id (u16) |  ...   |
//! +--------+--------+--------+--------+-------------------+
//!    u8          u16                u16
//! ```
//!
//! `length` counts payload bytes only, excluding the header.

#![forbid(unsafe_code)]

use crate::types::StreamId;
use bytes::Bytes;

/// Frame Type Constants
///
/// The first header byte identifies the frame type. The numeric values are
/// part of the compatibility surface.
pub const FRAME_TYPE_SYN: u8 = 0x01;
pub const FRAME_TYPE_RESULT: u8 = 0x02;
pub const FRAME_TYPE_DATA: u8 = 0x03;
pub const FRAME_TYPE_WND: u8 = 0x04;
pub const FRAME_TYPE_FIN: u8 = 0x05;
pub const FRAME_TYPE_RST: u8 = 0x06;

/// Unified Frame Type
///
/// Discriminated union of every frame the fabric carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Open a stream toward `network`/`address` (0x01).
    ///
    /// Payload: u8-length-prefixed UTF-8 network tag, then u16-length-prefixed
    /// UTF-8 address.
    Syn {
        stream_id: StreamId,
        network: String,
        address: String,
    },

    /// Answer to SYN carrying an error code, 0 for success (0x02).
    Result { stream_id: StreamId, errno: u32 },

    /// Opaque stream bytes (0x03).
    Data { stream_id: StreamId, payload: Bytes },

    /// Window credit: the peer may send `credit` more bytes (0x04).
    Wnd { stream_id: StreamId, credit: u32 },

    /// Write-half close; empty payload (0x05).
    Fin { stream_id: StreamId },

    /// Abrupt stream reset; empty payload (0x06).
    Rst { stream_id: StreamId },
}

impl Frame {
    /// The stream this frame addresses.
    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::Syn { stream_id, .. }
            | Frame::Result { stream_id, .. }
            | Frame::Data { stream_id, .. }
            | Frame::Wnd { stream_id, .. }
            | Frame::Fin { stream_id }
            | Frame::Rst { stream_id } => *stream_id,
        }
    }

    /// The wire type code for this frame.
    pub fn type_code(&self) -> u8 {
        match self {
            Frame::Syn { .. } => FRAME_TYPE_SYN,
            Frame::Result { .. } => FRAME_TYPE_RESULT,
            Frame::Data { .. } => FRAME_TYPE_DATA,
            Frame::Wnd { .. } => FRAME_TYPE_WND,
            Frame::Fin { .. } => FRAME_TYPE_FIN,
            Frame::Rst { .. } => FRAME_TYPE_RST,
        }
    }
}
