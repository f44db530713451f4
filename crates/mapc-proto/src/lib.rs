//! Wire format for the MAPC agent protocol.
//!
//! Every message is a single JSON document of the form
//! `{"type": "<kind>", "content": {...}}`, terminated by one NUL byte. The
//! server and the agent exchange these frames in order over one persistent
//! TCP stream.
//!
//! Percept payloads are deliberately left open: the scenario decides which
//! fields exist, so they are kept as a JSON mapping with typed accessors for
//! the fields the protocol engine relies on (step, `lastAction`,
//! `lastActionResult`) and the ones agents commonly read.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod errors;
pub mod message;
pub mod percept;

pub use codec::{DEFAULT_MAX_FRAME_LEN, FRAME_DELIMITER, FrameBuffer, decode, encode};
pub use errors::{DecodeError, EncodeError};
pub use message::{Action, AuthRequest, AuthResponse, Bye, Message, RequestAction, SimEnd, SimStart};
pub use percept::{DynamicPercept, Percept, SimResult, StaticPercept};
