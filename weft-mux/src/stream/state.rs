//! # Stream State Machine
//!
//! Per-stream lifecycle state. A stream is created by a local dial
//! (Unknown → SynSent → Est) or by a peer's SYN (Unknown → SynRecv → Est),
//! half-closes independently in each direction, and returns to Unknown when
//! both halves have closed or on reset. Unknown is both the initial and the
//! terminal state; a stream in Unknown is never registered in the fabric's
//! stream table.

#![forbid(unsafe_code)]

use crate::error::{Error, Result};

/// Stream State
///
/// States and transitions:
///
/// ```text
/// Unknown --dial--> SynSent --RESULT(ok)--> Est
/// Unknown --peer SYN + accept--> Est
/// Est --local close--> FinSent --peer FIN--> Unknown
/// Est --peer FIN--> FinRecv --local close--> Unknown
/// any --reset--> Unknown
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Initial and terminal state; not registered.
    Unknown,

    /// Local dial sent, awaiting the peer's RESULT.
    SynSent,

    /// Peer dial received, local setup in progress.
    SynRecv,

    /// Both halves open.
    Est,

    /// Local write half closed; reads continue.
    FinSent,

    /// Peer write half closed; writes continue.
    FinRecv,
}

impl StreamState {
    /// Move `self` from `from` to `to`, or fail with the state error.
    ///
    /// Every transition in the protocol goes through this check; an
    /// unexpected source state is surfaced to local callers and converted
    /// to a reset for peer-driven transitions.
    pub fn transition(&mut self, from: StreamState, to: StreamState) -> Result<()> {
        if *self != from {
            return Err(Error::State);
        }
        *self = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_path() {
        let mut state = StreamState::Unknown;
        state
            .transition(StreamState::Unknown, StreamState::SynSent)
            .unwrap();
        state
            .transition(StreamState::SynSent, StreamState::Est)
            .unwrap();
        assert_eq!(state, StreamState::Est);
    }

    #[test]
    fn test_half_close_paths() {
        // Local closes first.
        let mut state = StreamState::Est;
        state
            .transition(StreamState::Est, StreamState::FinSent)
            .unwrap();
        state
            .transition(StreamState::FinSent, StreamState::Unknown)
            .unwrap();

        // Peer closes first.
        let mut state = StreamState::Est;
        state
            .transition(StreamState::Est, StreamState::FinRecv)
            .unwrap();
        state
            .transition(StreamState::FinRecv, StreamState::Unknown)
            .unwrap();
    }

    #[test]
    fn test_unexpected_source_rejected() {
        let mut state = StreamState::Unknown;
        let err = state
            .transition(StreamState::Est, StreamState::FinSent)
            .unwrap_err();
        assert!(matches!(err, Error::State));
        // State untouched on failure.
        assert_eq!(state, StreamState::Unknown);
    }

    #[test]
    fn test_double_establish_rejected() {
        let mut state = StreamState::Est;
        assert!(state
            .transition(StreamState::SynSent, StreamState::Est)
            .is_err());
    }
}
