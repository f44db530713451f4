//! Protocol message records.
//!
//! The set is closed: a frame whose `type` is not one of the tags below is a
//! decode error rather than something to skip over.
//!
//! # Protocol Flow
//!
//! ```text
//! agent                                   server
//!   │ ── auth-request {user, pw} ──────────> │
//!   │ <──────────── auth-response {result} ─ │
//!   │ <───────────── sim-start {percept} ─── │
//!   │ <── request-action {id, step, ...} ─── │  ┐
//!   │ ── action {id, type, p} ─────────────> │  │ once per step
//!   │ <── request-action {id, step+1, ...} ─ │  ┘ (reports outcome of step)
//!   │ <──────────────── sim-end {...} ────── │
//!   │ <──────────────────── bye {} ───────── │
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::percept::Percept;

/// A single protocol message, tagged by its wire `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "kebab-case")]
pub enum Message {
    /// Agent credentials, sent once right after connecting.
    AuthRequest(AuthRequest),
    /// Server verdict on the credentials.
    AuthResponse(AuthResponse),
    /// A simulation begins; carries the static percept.
    SimStart(SimStart),
    /// A new step begins; carries the dynamic percept.
    RequestAction(RequestAction),
    /// The agent's action for the current step.
    Action(Action),
    /// The simulation is over.
    SimEnd(SimEnd),
    /// The server is shutting down the session.
    Bye(Bye),
}

impl Message {
    /// Wire tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthRequest(_) => "auth-request",
            Self::AuthResponse(_) => "auth-response",
            Self::SimStart(_) => "sim-start",
            Self::RequestAction(_) => "request-action",
            Self::Action(_) => "action",
            Self::SimEnd(_) => "sim-end",
            Self::Bye(_) => "bye",
        }
    }
}

/// Credentials for one agent account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Account name
    pub user: String,
    /// Account password
    pub pw: String,
}

/// Server verdict on an [`AuthRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// `"ok"` on success; any other value is a rejection.
    pub result: String,
}

impl AuthResponse {
    /// Result value the server uses for accepted credentials.
    pub const OK: &'static str = "ok";

    /// Accepting response.
    pub fn ok() -> Self {
        Self { result: Self::OK.to_string() }
    }

    /// Whether the credentials were accepted.
    pub fn is_ok(&self) -> bool {
        self.result == Self::OK
    }
}

/// Start of a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimStart {
    /// Server timestamp in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
    /// Static percept: identity, team and simulation parameters
    pub percept: Percept,
}

/// Request for the agent's action in a new step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestAction {
    /// Identifier the matching [`Action`] must carry
    pub id: u64,
    /// Server timestamp in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
    /// Wall-clock deadline (milliseconds since the epoch) for the action
    pub deadline: u64,
    /// Simulation step this request belongs to
    pub step: u64,
    /// Dynamic percept, including the outcome of the previous step's action
    pub percept: Percept,
}

/// The agent's action for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Identifier copied from the [`RequestAction`] being answered
    pub id: u64,
    /// Action verb such as `move` or `clear`
    #[serde(rename = "type")]
    pub action_type: String,
    /// Positional parameters of the verb
    #[serde(rename = "p", default)]
    pub params: Vec<Value>,
}

/// End of a simulation.
///
/// The content (ranking, score, ...) is scenario-defined and kept open.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SimEnd {
    /// Result fields as sent by the server
    #[serde(flatten)]
    pub result: Percept,
}

/// Session shutdown notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bye {}
