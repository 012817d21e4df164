//! Error types for fabric and stream operations.

use std::io;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by fabric and stream operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A state transition was attempted from an unexpected stream state.
    #[error("stream state error")]
    State,

    /// Write on a stream whose write half is not established.
    #[error("write on broken pipe")]
    BrokenPipe,

    /// The peer did not answer a dial within the dial timeout.
    #[error("dial timed out")]
    Timeout,

    /// The peer's acceptor refused the dial.
    #[error("remote refused stream")]
    Refused,

    /// The remote endpoint reported an unrecognized error code.
    #[error("remote error code {0:#x}")]
    Remote(u32),

    /// Every stream identifier is in use on this fabric.
    #[error("stream id space exhausted")]
    IdExhausted,

    /// The fabric has been torn down; no further operations are possible.
    #[error("fabric closed")]
    FabricClosed,

    /// A frame on the wire violated the framing rules.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    /// I/O fault on the underlying byte channel.
    #[error("fabric i/o error")]
    Io(#[from] io::Error),
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::BrokenPipe => io::Error::new(io::ErrorKind::BrokenPipe, err.to_string()),
            Error::Timeout => io::Error::new(io::ErrorKind::TimedOut, err.to_string()),
            Error::Refused => io::Error::new(io::ErrorKind::ConnectionRefused, err.to_string()),
            Error::State | Error::Malformed(_) => {
                io::Error::new(io::ErrorKind::InvalidData, err.to_string())
            }
            Error::FabricClosed => io::Error::new(io::ErrorKind::NotConnected, err.to_string()),
            Error::Remote(_) | Error::IdExhausted => {
                io::Error::new(io::ErrorKind::Other, err.to_string())
            }
        }
    }
}

/// Result codes carried in RESULT frames.
///
/// The numeric values are part of the compatibility surface; both peers must
/// agree on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Success (0).
    None,

    /// Dial timed out (1).
    Timeout,

    /// Endpoint or stream closed (2).
    Closed,

    /// Acceptor refused the stream (3).
    Refused,

    /// No free stream identifier (4).
    IdExhausted,

    /// Unrecognized code received from the peer.
    Unknown(u32),
}

impl ErrorCode {
    /// Convert to the wire representation.
    pub fn to_wire(self) -> u32 {
        match self {
            ErrorCode::None => 0,
            ErrorCode::Timeout => 1,
            ErrorCode::Closed => 2,
            ErrorCode::Refused => 3,
            ErrorCode::IdExhausted => 4,
            ErrorCode::Unknown(code) => code,
        }
    }

    /// Convert from the wire representation.
    pub fn from_wire(code: u32) -> Self {
        match code {
            0 => ErrorCode::None,
            1 => ErrorCode::Timeout,
            2 => ErrorCode::Closed,
            3 => ErrorCode::Refused,
            4 => ErrorCode::IdExhausted,
            other => ErrorCode::Unknown(other),
        }
    }

    /// Map a non-success code to the error a dialer observes.
    ///
    /// Calling this with `ErrorCode::None` is a logic error; it maps to
    /// `Error::State` rather than panicking.
    pub fn into_error(self) -> Error {
        match self {
            ErrorCode::None => Error::State,
            ErrorCode::Timeout => Error::Timeout,
            ErrorCode::Closed => Error::FabricClosed,
            ErrorCode::Refused => Error::Refused,
            ErrorCode::IdExhausted => Error::IdExhausted,
            ErrorCode::Unknown(code) => Error::Remote(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_format() {
        assert_eq!(ErrorCode::None.to_wire(), 0);
        assert_eq!(ErrorCode::Timeout.to_wire(), 1);
        assert_eq!(ErrorCode::Closed.to_wire(), 2);
        assert_eq!(ErrorCode::Refused.to_wire(), 3);
        assert_eq!(ErrorCode::IdExhausted.to_wire(), 4);
        assert_eq!(ErrorCode::Unknown(0x2a).to_wire(), 0x2a);

        assert_eq!(ErrorCode::from_wire(0), ErrorCode::None);
        assert_eq!(ErrorCode::from_wire(3), ErrorCode::Refused);
        assert_eq!(ErrorCode::from_wire(99), ErrorCode::Unknown(99));
    }

    #[test]
    fn test_error_code_roundtrip() {
        for code in [0u32, 1, 2, 3, 4, 7, 0xffff_ffff] {
            assert_eq!(ErrorCode::from_wire(code).to_wire(), code);
        }
    }

    #[test]
    fn test_into_io_error_kinds() {
        let io_err: io::Error = Error::BrokenPipe.into();
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);

        let io_err: io::Error = Error::Timeout.into();
        assert_eq!(io_err.kind(), io::ErrorKind::TimedOut);

        let io_err: io::Error = Error::Refused.into();
        assert_eq!(io_err.kind(), io::ErrorKind::ConnectionRefused);
    }
}
