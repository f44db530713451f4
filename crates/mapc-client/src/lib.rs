//! MAPC agent client
//!
//! Connects an agent to a MAPC simulation server and exposes the protocol as
//! one call per action verb. Each call resolves once the server has reported
//! the outcome of that action, which happens one step after it was sent.
//!
//! # Components
//!
//! - [`Agent`]: async facade, for callers already on a tokio runtime
//! - [`BlockingAgent`]: synchronous facade with its own runtime
//! - [`TcpTransport`]: production transport
//!
//! The protocol logic lives in `mapc-core`; this crate only drives it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod action;
mod agent;
mod blocking;
pub mod config;
mod driver;
pub mod error;
mod tcp;

pub use action::{Direction, Rotation};
pub use agent::Agent;
pub use blocking::BlockingAgent;
pub use config::ClientConfig;
pub use error::AgentError;
pub use mapc_core::{ActionReport, ActionRequest, ConnectionState, Credentials, PerceptView, SessionConfig};
pub use mapc_proto::{DynamicPercept, SimResult, StaticPercept};
pub use tcp::TcpTransport;
