//! MAPC agent protocol core logic
//!
//! Pure state machine logic for an agent session, decoupled from sockets,
//! clocks and task scheduling. Time is passed in by the caller and every
//! transition returns the effects it wants executed as [`SessionAction`]s,
//! which a runtime (or a test) carries out.
//!
//! # Components
//!
//! - [`connection`]: Session lifecycle (authentication, simulation start/end,
//!   step loop, shutdown)
//! - [`correlator`]: Binds an action sent at step N to the outcome reported in
//!   the percept for step N+1
//! - [`store`]: Latest static and dynamic percept snapshots
//! - [`transport`]: Transport abstraction and frame-level stream I/O
//! - [`error`]: Error taxonomy

pub mod connection;
pub mod correlator;
pub mod error;
pub mod store;
pub mod transport;

pub use connection::{CloseReason, ConnectionState, Credentials, Session, SessionAction, SessionConfig};
pub use correlator::{ActionCorrelator, ActionReport, ActionRequest, PendingAction};
pub use error::{ActionError, ProtocolError, SessionError, TransportError};
pub use store::{PerceptStore, PerceptView};
pub use transport::{FrameReader, FrameWriter, Transport, split};
