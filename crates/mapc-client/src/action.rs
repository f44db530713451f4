//! Action verbs.
//!
//! Builders for the [`ActionRequest`]s behind the agent's verb methods. The
//! parameter layout follows what the server expects for each verb.

use std::fmt;

use mapc_core::ActionRequest;
use serde_json::{Value, json};

/// Cardinal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// `n`
    North,
    /// `s`
    South,
    /// `e`
    East,
    /// `w`
    West,
}

impl Direction {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::North => "n",
            Self::South => "s",
            Self::East => "e",
            Self::West => "w",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rotation sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rotation {
    /// `cw`
    Clockwise,
    /// `ccw`
    CounterClockwise,
}

impl Rotation {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clockwise => "cw",
            Self::CounterClockwise => "ccw",
        }
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn directed(verb: &str, direction: Direction) -> ActionRequest {
    ActionRequest::new(verb, vec![Value::from(direction.as_str())])
}

/// Do nothing this step.
pub fn skip() -> ActionRequest {
    ActionRequest::new("skip", Vec::new())
}

/// Move one cell.
pub fn move_in(direction: Direction) -> ActionRequest {
    directed("move", direction)
}

/// Rotate in place.
pub fn rotate(rotation: Rotation) -> ActionRequest {
    ActionRequest::new("rotate", vec![Value::from(rotation.as_str())])
}

/// Attach the thing next to the agent.
pub fn attach(direction: Direction) -> ActionRequest {
    directed("attach", direction)
}

/// Detach an attached thing.
pub fn detach(direction: Direction) -> ActionRequest {
    directed("detach", direction)
}

/// Request a block from an adjacent dispenser.
pub fn request(direction: Direction) -> ActionRequest {
    directed("request", direction)
}

/// Submit the named task.
pub fn submit(task: &str) -> ActionRequest {
    ActionRequest::new("submit", vec![json!(task)])
}

/// Accept the named task.
pub fn accept(task: &str) -> ActionRequest {
    ActionRequest::new("accept", vec![json!(task)])
}

/// Connect the attachment at `(x, y)` with one of `agent`'s.
pub fn connect(agent: &str, (x, y): (i64, i64)) -> ActionRequest {
    ActionRequest::new("connect", vec![json!(agent), json!(x), json!(y)])
}

/// Break the link between two attachments.
pub fn disconnect((x1, y1): (i64, i64), (x2, y2): (i64, i64)) -> ActionRequest {
    ActionRequest::new("disconnect", vec![json!(x1), json!(y1), json!(x2), json!(y2)])
}

/// Clear the area around `(x, y)`, relative to the agent.
pub fn clear((x, y): (i64, i64)) -> ActionRequest {
    ActionRequest::new("clear", vec![json!(x), json!(y)])
}
