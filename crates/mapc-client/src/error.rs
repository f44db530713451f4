//! Caller-facing errors.

use std::{io, time::Duration};

use mapc_core::{ActionError, CloseReason, ConnectionState, ProtocolError, SessionError};
use thiserror::Error;

/// Error returned by the agent facade.
///
/// Recoverable kinds ([`AgentError::is_recoverable`]) only affect the call
/// that returned them. Every other kind means the session is closed.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Server unreachable, or the connection broke
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed frame from the server
    #[error("decode error: {0}")]
    Decode(String),

    /// The server rejected the credentials
    #[error("authentication rejected (result: {result})")]
    Authentication {
        /// Result value sent by the server
        result: String,
    },

    /// Protocol contract violation
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Operation attempted in the wrong state
    #[error("cannot {operation} in state {state:?}")]
    InvalidState {
        /// Current state
        state: ConnectionState,
        /// Attempted operation
        operation: &'static str,
    },

    /// Another action is still outstanding
    #[error("an action is already outstanding (sent for step {outstanding:?})")]
    Sequencing {
        /// Step the outstanding action was sent for, if sent yet
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

    /// The server reported the action did not succeed
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

    /// The background runtime could not be started
    #[error("runtime error: {0}")]
    Runtime(#[from] io::Error),
}

impl AgentError {
    /// Whether the session is still usable after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Sequencing { .. }
                | Self::Timeout { .. }
                | Self::Failed { .. }
                | Self::SimulationEnded { .. }
        )
    }

    /// `lastActionResult` of a failed action.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

impl From<SessionError> for AgentError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Connection(reason) => Self::Connection(reason),
            SessionError::Decode(reason) => Self::Decode(reason),
            SessionError::Authentication { result } => Self::Authentication { result },
            SessionError::Protocol(err) => Self::Protocol(err),
            SessionError::InvalidState { state, operation } => {
                Self::InvalidState { state, operation }
            },
        }
    }
}

impl From<ActionError> for AgentError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::Sequencing { outstanding } => Self::Sequencing { outstanding },
            ActionError::Timeout { action, timeout } => Self::Timeout { action, timeout },
            ActionError::Failed { action, reason } => Self::Failed { action, reason },
            ActionError::SimulationEnded { action } => Self::SimulationEnded { action },
            ActionError::ConnectionClosed => Self::ConnectionClosed,
            ActionError::Fatal(err) => err.into(),
        }
    }
}

impl From<CloseReason> for AgentError {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::Fatal(err) => err.into(),
            CloseReason::Requested | CloseReason::Bye => Self::ConnectionClosed,
        }
    }
}
