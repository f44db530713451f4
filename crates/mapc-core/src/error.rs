//! Error types for the session layer.
//!
//! Errors split into two families:
//! - [`SessionError`]: fatal. The session moves to `Closed` and every caller
//!   waiting on an action sees the failure.
//! - [`ActionError`]: scoped to one `perform` call. Apart from
//!   [`ActionError::Fatal`] and [`ActionError::ConnectionClosed`] the session
//!   stays usable.

use std::{io, time::Duration};

use mapc_proto::{DecodeError, EncodeError};
use thiserror::Error;

use crate::connection::ConnectionState;

/// A peer broke the protocol contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Message kind not valid in the current state
    #[error("unexpected {message} message in state {state:?}")]
    UnexpectedMessage {
        /// State the session was in
        state: ConnectionState,
        /// Wire tag of the offending message
        message: &'static str,
    },

    /// The percept following an action is not for the next step
    #[error("action sent at step {issued} was followed by a percept for step {observed}")]
    StepMismatch {
        /// Step the action was sent for
        issued: u64,
        /// Step of the percept that should have reported its outcome
        observed: u64,
    },

    /// Steps must strictly increase within one simulation
    #[error("step went backwards from {previous} to {observed}")]
    StepRegressed {
        /// Previously received step
        previous: u64,
        /// Newly received step
        observed: u64,
    },

    /// The server reports a different action than the one that was sent
    #[error("sent {sent} action but the server reported {echoed}")]
    ActionMismatch {
        /// Verb that was sent
        sent: String,
        /// Verb found in `lastAction`
        echoed: String,
    },
}

/// Fatal session error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Transport unreachable, broken or closed by the peer
    #[error("connection error: {0}")]
    Connection(String),

    /// A frame could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// The server rejected the credentials
    #[error("authentication rejected (result: {result})")]
    Authentication {
        /// Result value sent by the server
        result: String,
    },

    /// Protocol contract violation
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Operation not valid in the current state
    #[error("cannot {operation} in state {state:?}")]
    InvalidState {
        /// Current state
        state: ConnectionState,
        /// Attempted operation
        operation: &'static str,
    },
}

/// Failure of a single `perform` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// Another action is still waiting for its outcome
    #[error("an action is already outstanding (sent for step {outstanding:?})")]
    Sequencing {
        /// Step the outstanding action was sent for, if it was sent yet
        outstanding: Option<u64>,
    },

    /// No outcome arrived in time
    #[error("{action} action timed out after {timeout:?}")]
    Timeout {
        /// Verb of the action
        action: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// The server executed the action and reported it did not succeed
    #[error("{action} action failed: {reason}")]
    Failed {
        /// Verb of the action
        action: String,
        /// `lastActionResult` reported by the server
        reason: String,
    },

    /// The simulation ended before the outcome was reported
    #[error("simulation ended before the {action} action resolved")]
    SimulationEnded {
        /// Verb of the action
        action: String,
    },

    /// The session is closed
    #[error("connection closed")]
    ConnectionClosed,

    /// The session failed while the action was outstanding
    #[error(transparent)]
    Fatal(SessionError),
}

/// Failure reading or writing frames.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying stream failed
    #[error("transport i/o error: {0}")]
    Io(#[from] io::Error),

    /// Received frame is malformed
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Outgoing message could not be encoded
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The peer closed the stream between two frames
    #[error("peer closed the connection")]
    Eof,
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Decode(err) => Self::Decode(err.to_string()),
            other => Self::Connection(other.to_string()),
        }
    }
}
