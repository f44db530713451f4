//! Percept snapshots.
//!
//! Percepts are scenario-defined, so fields are kept in an open mapping and
//! only the handful the protocol depends on get typed accessors. Missing or
//! differently-typed fields read as `None`.

use serde_json::{Map, Value};

use crate::message::{RequestAction, SimEnd, SimStart};

/// Open mapping from field name to value.
pub type Percept = Map<String, Value>;

/// `lastAction` field of the dynamic percept.
pub const LAST_ACTION: &str = "lastAction";
/// `lastActionResult` field of the dynamic percept.
pub const LAST_ACTION_RESULT: &str = "lastActionResult";
/// `lastActionParams` field of the dynamic percept.
pub const LAST_ACTION_PARAMS: &str = "lastActionParams";
/// Result reported for an action that took effect.
pub const SUCCESS: &str = "success";
/// Action the server records when nothing arrived in time for a step.
pub const NO_ACTION: &str = "no_action";

fn text<'a>(fields: &'a Percept, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str)
}

fn int(fields: &Percept, key: &str) -> Option<i64> {
    fields.get(key).and_then(Value::as_i64)
}

fn uint(fields: &Percept, key: &str) -> Option<u64> {
    fields.get(key).and_then(Value::as_u64)
}

fn seq<'a>(fields: &'a Percept, key: &str) -> &'a [Value] {
    fields.get(key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

/// Percept received once per simulation in `sim-start`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StaticPercept {
    time: Option<u64>,
    fields: Percept,
}

impl StaticPercept {
    /// Wrap raw percept fields.
    pub fn new(fields: Percept) -> Self {
        Self { time: None, fields }
    }

    /// Server timestamp of the `sim-start` message.
    pub fn time(&self) -> Option<u64> {
        self.time
    }

    /// Raw field lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All fields.
    pub fn fields(&self) -> &Percept {
        &self.fields
    }

    /// Agent name as assigned by the server.
    pub fn name(&self) -> Option<&str> {
        text(&self.fields, "name")
    }

    /// Team the agent belongs to.
    pub fn team(&self) -> Option<&str> {
        text(&self.fields, "team")
    }

    /// Number of agents per team.
    pub fn team_size(&self) -> Option<u64> {
        uint(&self.fields, "teamSize")
    }

    /// Number of steps in the simulation.
    pub fn steps(&self) -> Option<u64> {
        uint(&self.fields, "steps")
    }

    /// Vision radius in cells.
    pub fn vision(&self) -> Option<u64> {
        uint(&self.fields, "vision")
    }

    /// Role of the agent, for scenarios that assign one.
    pub fn role(&self) -> Option<&str> {
        text(&self.fields, "role")
    }
}

impl From<SimStart> for StaticPercept {
    fn from(start: SimStart) -> Self {
        Self { time: start.time, fields: start.percept }
    }
}

/// Percept received with every `request-action`.
///
/// Besides the percept fields it keeps the request envelope, since the step
/// index and request id are what actions are correlated against.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicPercept {
    request_id: u64,
    step: u64,
    deadline: u64,
    time: Option<u64>,
    fields: Percept,
}

impl DynamicPercept {
    /// Identifier an action for this step must carry.
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Simulation step index.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Server deadline for this step's action, in epoch milliseconds.
    pub fn deadline(&self) -> u64 {
        self.deadline
    }

    /// Server timestamp of the request.
    pub fn time(&self) -> Option<u64> {
        self.time
    }

    /// Raw field lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All fields.
    pub fn fields(&self) -> &Percept {
        &self.fields
    }

    /// Team score.
    pub fn score(&self) -> Option<i64> {
        int(&self.fields, "score")
    }

    /// Remaining energy of the agent.
    pub fn energy(&self) -> Option<i64> {
        int(&self.fields, "energy")
    }

    /// Whether the agent is currently disabled.
    pub fn disabled(&self) -> Option<bool> {
        self.fields.get("disabled").and_then(Value::as_bool)
    }

    /// Verb of the action the server executed in the previous step.
    pub fn last_action(&self) -> Option<&str> {
        text(&self.fields, LAST_ACTION)
    }

    /// Outcome of the previous step's action.
    pub fn last_action_result(&self) -> Option<&str> {
        text(&self.fields, LAST_ACTION_RESULT)
    }

    /// Parameters of the previous step's action.
    pub fn last_action_params(&self) -> &[Value] {
        seq(&self.fields, LAST_ACTION_PARAMS)
    }

    /// Open tasks.
    pub fn tasks(&self) -> &[Value] {
        seq(&self.fields, "tasks")
    }

    /// Things within vision.
    pub fn things(&self) -> &[Value] {
        seq(&self.fields, "things")
    }

    /// Positions of things attached to the agent.
    pub fn attached(&self) -> &[Value] {
        seq(&self.fields, "attached")
    }
}

impl From<RequestAction> for DynamicPercept {
    fn from(request: RequestAction) -> Self {
        Self {
            request_id: request.id,
            step: request.step,
            deadline: request.deadline,
            time: request.time,
            fields: request.percept,
        }
    }
}

/// Result reported in `sim-end`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimResult {
    fields: Percept,
}

impl SimResult {
    /// Raw field lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All fields.
    pub fn fields(&self) -> &Percept {
        &self.fields
    }

    /// Final ranking of the team.
    pub fn ranking(&self) -> Option<i64> {
        int(&self.fields, "ranking")
    }

    /// Final score of the team.
    pub fn score(&self) -> Option<i64> {
        int(&self.fields, "score")
    }

    /// Server timestamp.
    pub fn time(&self) -> Option<u64> {
        uint(&self.fields, "time")
    }
}

impl From<SimEnd> for SimResult {
    fn from(end: SimEnd) -> Self {
        Self { fields: end.result }
    }
}
