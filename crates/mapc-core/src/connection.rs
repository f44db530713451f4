//! Session state machine for the MAPC agent protocol.
//!
//! # Architecture: Action-Based State Machine
//!
//! - Methods accept time as parameter (no clock inside)
//! - Methods return the [`SessionAction`]s to execute
//! - The driver sends frames, wakes callers and closes the stream
//!
//! Fatal errors come back as `Err(SessionError)`. The driver answers them by
//! calling [`Session::close`] with [`CloseReason::Fatal`], which fails every
//! waiting caller with the same error.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐  open   ┌────────────────┐  auth ok  ┌──────────────────┐
//! │ Disconnected │────────>│ Authenticating │──────────>│ AwaitingSimStart │<──┐
//! └──────────────┘         └────────────────┘           └──────────────────┘   │
//!                                  │                      │ sim-start          │ sim-end
//!                                  │ rejected             ↓                    │
//!                                  │                    ┌────────┐             │
//!                                  │                    │ Active │─────────────┘
//!                                  │                    └────────┘
//!                                  ↓                      │ bye / error / close
//!                             ┌────────┐                  │
//!                             │ Closed │<─────────────────┘
//!                             └────────┘
//! ```
//!
//! `Closed` is permanent. There is no reconnection.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use mapc_proto::{
    AuthRequest, DynamicPercept, Message, RequestAction, SimEnd, SimResult, SimStart, StaticPercept,
};
use tracing::{debug, info, trace, warn};

use crate::{
    correlator::{ActionCorrelator, ActionReport, ActionRequest},
    error::{ActionError, ProtocolError, SessionError},
    store::{PerceptStore, PerceptView},
};

/// Actions returned by the session state machine.
///
/// The driver executes these in order:
/// - `Send`: encode and write the message
/// - `Authenticated`: the server accepted the credentials
/// - `Complete`: wake the caller waiting on the outstanding action
/// - `Close`: shut the transport down
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Send this message to the server
    Send(Message),

    /// Authentication succeeded
    Authenticated,

    /// The outstanding action resolved
    Complete(Result<ActionReport, ActionError>),

    /// Close the connection
    Close {
        /// Why the session closed
        reason: CloseReason,
    },
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, nothing sent yet
    Disconnected,
    /// AuthRequest sent, waiting for AuthResponse
    Authenticating,
    /// Authenticated, between simulations
    AwaitingSimStart,
    /// A simulation is running
    Active,
    /// Terminated (graceful or error)
    Closed,
}

/// Why a session closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The local agent asked to close
    Requested,
    /// The server said bye
    Bye,
    /// A fatal error ended the session
    Fatal(SessionError),
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How often an action that reached the server after its step closed is
    /// resent for the following step
    pub late_action_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { late_action_retries: 1 }
    }
}

/// Agent account on the simulation server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Agent name
    pub user: String,
    /// Password
    pub pw: String,
}

impl Credentials {
    /// Bundle a user name and password.
    pub fn new(user: impl Into<String>, pw: impl Into<String>) -> Self {
        Self { user: user.into(), pw: pw.into() }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("user", &self.user).finish_non_exhaustive()
    }
}

/// Session state machine
///
/// Owns the connection lifecycle, the action correlator and the write side of
/// the percept store. Pure: no I/O, no clock.
#[derive(Debug)]
pub struct Session {
    state: ConnectionState,
    credentials: Credentials,
    correlator: ActionCorrelator,
    store: PerceptStore,
    close_reason: Option<CloseReason>,
}

impl Session {
    /// Create a session in `Disconnected` state, with a view of its percepts.
    pub fn new(credentials: Credentials, config: SessionConfig) -> (Self, PerceptView) {
        let (store, view) = PerceptStore::new();
        let session = Self {
            state: ConnectionState::Disconnected,
            credentials,
            correlator: ActionCorrelator::new(config.late_action_retries),
            store,
            close_reason: None,
        };
        (session, view)
    }

    /// Get current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Why the session closed, once it has.
    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// Another read-only view of the percepts.
    pub fn view(&self) -> PerceptView {
        self.store.view()
    }

    /// Step of the latest `request-action` in the running simulation.
    pub fn step(&self) -> Option<u64> {
        self.store.step()
    }

    /// Start authenticating once the transport is connected.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the session is `Disconnected`.
    pub fn open(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        if self.state != ConnectionState::Disconnected {
            return Err(SessionError::InvalidState { state: self.state, operation: "open" });
        }

        self.state = ConnectionState::Authenticating;
        debug!(user = %self.credentials.user, "authenticating");

        Ok(vec![SessionAction::Send(Message::AuthRequest(AuthRequest {
            user: self.credentials.user.clone(),
            pw: self.credentials.pw.clone(),
        }))])
    }

    /// Process a message from the server.
    ///
    /// # Errors
    ///
    /// - `Authentication` if the server rejects the credentials
    /// - `Protocol` if the message is not valid in the current state or breaks
    ///   step correlation
    /// - `InvalidState` if the session is already closed
    pub fn handle_message(
        &mut self,
        message: Message,
        now: Instant,
    ) -> Result<Vec<SessionAction>, SessionError> {
        trace!(state = ?self.state, kind = message.kind(), "handling message");

        match (self.state, message) {
            (ConnectionState::Closed, _) => {
                Err(SessionError::InvalidState { state: self.state, operation: "handle_message" })
            },

            (ConnectionState::Authenticating, Message::AuthResponse(response)) => {
                if !response.is_ok() {
                    return Err(SessionError::Authentication { result: response.result });
                }
                self.state = ConnectionState::AwaitingSimStart;
                info!(user = %self.credentials.user, "authenticated");
                Ok(vec![SessionAction::Authenticated])
            },

            (ConnectionState::AwaitingSimStart, Message::SimStart(start)) => {
                Ok(self.start_simulation(start))
            },

            (ConnectionState::Active, Message::RequestAction(request)) => {
                self.request_action(request, now)
            },

            (ConnectionState::Active, Message::SimEnd(end)) => Ok(self.end_simulation(end)),

            (ConnectionState::AwaitingSimStart | ConnectionState::Active, Message::Bye(_)) => {
                Ok(self.close(CloseReason::Bye))
            },

            (state, message) => {
                Err(ProtocolError::UnexpectedMessage { state, message: message.kind() }.into())
            },
        }
    }

    fn start_simulation(&mut self, start: SimStart) -> Vec<SessionAction> {
        let percept = StaticPercept::from(start);
        info!(
            name = percept.name().unwrap_or_default(),
            steps = percept.steps(),
            "simulation started"
        );

        self.correlator.reset_steps();
        self.store.begin_simulation(percept);
        self.state = ConnectionState::Active;
        Vec::new()
    }

    fn request_action(
        &mut self,
        request: RequestAction,
        now: Instant,
    ) -> Result<Vec<SessionAction>, SessionError> {
        let percept = Arc::new(DynamicPercept::from(request));
        debug!(step = percept.step(), id = percept.request_id(), "request-action");

        let actions = self.correlator.on_step(&percept, now)?;
        self.store.replace_dynamic(percept);
        Ok(actions)
    }

    fn end_simulation(&mut self, end: SimEnd) -> Vec<SessionAction> {
        let pending = self.correlator.pending().map(|pending| pending.request().action_type.clone());
        let actions = match pending {
            Some(action) => {
                warn!(%action, "simulation ended with an action outstanding");
                self.correlator.abort(ActionError::SimulationEnded { action })
            },
            None => Vec::new(),
        };

        let result = SimResult::from(end);
        info!(ranking = result.ranking(), score = result.score(), "simulation ended");

        self.correlator.reset_steps();
        self.store.record_result(result);
        self.state = ConnectionState::AwaitingSimStart;
        actions
    }

    /// Issue an action.
    ///
    /// Sent right away if the current step has no action yet, otherwise
    /// queued for the next `request-action`. Its outcome arrives later as
    /// [`SessionAction::Complete`]. `timeout` bounds the wait from `now`, and
    /// restarts when a queued action is actually sent.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` if the session is closed
    /// - `Sequencing` if another action is outstanding
    pub fn perform(
        &mut self,
        request: ActionRequest,
        timeout: Duration,
        now: Instant,
    ) -> Result<Vec<SessionAction>, ActionError> {
        if self.state == ConnectionState::Closed {
            return Err(ActionError::ConnectionClosed);
        }
        self.correlator.perform(request, timeout, now)
    }

    /// Fail the outstanding action if its deadline has passed.
    pub fn poll_timeout(&mut self, now: Instant) -> Vec<SessionAction> {
        self.correlator.poll_timeout(now)
    }

    /// When [`Self::poll_timeout`] next needs to run.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.correlator.next_deadline()
    }

    /// Close the session.
    ///
    /// Idempotent: closing a closed session does nothing.
    pub fn close(&mut self, reason: CloseReason) -> Vec<SessionAction> {
        if self.state == ConnectionState::Closed {
            return Vec::new();
        }

        match &reason {
            CloseReason::Fatal(err) => warn!(state = ?self.state, %err, "session failed"),
            reason => info!(state = ?self.state, ?reason, "session closed"),
        }

        let err = match &reason {
            CloseReason::Fatal(err) => ActionError::Fatal(err.clone()),
            CloseReason::Requested | CloseReason::Bye => ActionError::ConnectionClosed,
        };

        self.state = ConnectionState::Closed;
        self.close_reason = Some(reason.clone());

        let mut actions = self.correlator.abort(err);
        actions.push(SessionAction::Close { reason });
        actions
    }
}
