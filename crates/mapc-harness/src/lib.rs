//! Deterministic simulation harness for MAPC agent protocol testing.
//!
//! Turmoil-based implementations of the transport and a scripted simulation
//! server, for reproducible end-to-end tests of the agent against faults a
//! real server would rarely produce on demand (late actions, skipped steps,
//! stalls, wrong echoes).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sim_server;
pub mod sim_transport;

pub use sim_server::{ActionRecord, SimServer};
pub use sim_transport::SimTransport;

/// Install a test log subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
