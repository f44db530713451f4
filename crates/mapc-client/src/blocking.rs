//! Synchronous agent facade.
//!
//! [`BlockingAgent`] owns a small tokio runtime. The session driver runs on its
//! worker thread, so percepts keep arriving and action deadlines keep running
//! between calls. Each verb blocks the calling thread until the action
//! resolves.

use std::{sync::Arc, time::Duration};

use mapc_core::{ActionReport, ActionRequest, ConnectionState, Credentials, Transport};
use mapc_proto::{DynamicPercept, SimResult, StaticPercept};
use tokio::runtime::{Builder, Handle, Runtime};

use crate::{
    action::{Direction, Rotation},
    agent::Agent,
    config::ClientConfig,
    error::AgentError,
    tcp::TcpTransport,
};

/// How long dropping a blocking agent waits for the driver to close.
const DROP_GRACE: Duration = Duration::from_secs(1);

/// Blocking counterpart of [`Agent`].
///
/// `Sync`: [`BlockingAgent::close`] may be called from another thread while a
/// verb is blocked, which fails that verb with `ConnectionClosed`.
///
/// Must not be used from inside an async context.
#[derive(Debug)]
pub struct BlockingAgent {
    agent: Agent,
    runtime: Runtime,
}

impl BlockingAgent {
    /// Connect over TCP and authenticate.
    pub fn open(
        user: impl Into<String>,
        pw: impl Into<String>,
        config: ClientConfig,
    ) -> Result<Self, AgentError> {
        Self::open_with(&TcpTransport, Credentials::new(user, pw), config)
    }

    /// Connect through `transport` and authenticate.
    pub fn open_with<T: Transport>(
        transport: &T,
        credentials: Credentials,
        config: ClientConfig,
    ) -> Result<Self, AgentError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("mapc-agent")
            .enable_all()
            .build()?;

        let agent = runtime.block_on(Agent::open_with(transport, credentials, config))?;
        Ok(Self { agent, runtime })
    }

    /// Account name the agent authenticated with.
    pub fn user(&self) -> &str {
        self.agent.user()
    }

    /// Send `request` and block up to `timeout` for its outcome.
    pub fn perform(
        &self,
        request: ActionRequest,
        timeout: Duration,
    ) -> Result<ActionReport, AgentError> {
        self.runtime.block_on(self.agent.perform(request, timeout))
    }

    /// Do nothing this step.
    pub fn skip(&self) -> Result<ActionReport, AgentError> {
        self.runtime.block_on(self.agent.skip())
    }

    /// Move one cell.
    pub fn move_in(&self, direction: Direction) -> Result<ActionReport, AgentError> {
        self.runtime.block_on(self.agent.move_in(direction))
    }

    /// Rotate in place.
    pub fn rotate(&self, rotation: Rotation) -> Result<ActionReport, AgentError> {
        self.runtime.block_on(self.agent.rotate(rotation))
    }

    /// Attach the thing next to the agent.
    pub fn attach(&self, direction: Direction) -> Result<ActionReport, AgentError> {
        self.runtime.block_on(self.agent.attach(direction))
    }

    /// Detach an attached thing.
    pub fn detach(&self, direction: Direction) -> Result<ActionReport, AgentError> {
        self.runtime.block_on(self.agent.detach(direction))
    }

    /// Request a block from an adjacent dispenser.
    pub fn request(&self, direction: Direction) -> Result<ActionReport, AgentError> {
        self.runtime.block_on(self.agent.request(direction))
    }

    /// Submit the named task.
    pub fn submit(&self, task: &str) -> Result<ActionReport, AgentError> {
        self.runtime.block_on(self.agent.submit(task))
    }

    /// Accept the named task.
    pub fn accept(&self, task: &str) -> Result<ActionReport, AgentError> {
        self.runtime.block_on(self.agent.accept(task))
    }

    /// Connect the attachment at `pos` with one of `agent`'s.
    pub fn connect(&self, agent: &str, pos: (i64, i64)) -> Result<ActionReport, AgentError> {
        self.runtime.block_on(self.agent.connect(agent, pos))
    }

    /// Break the link between two attachments.
    pub fn disconnect(
        &self,
        first: (i64, i64),
        second: (i64, i64),
    ) -> Result<ActionReport, AgentError> {
        self.runtime.block_on(self.agent.disconnect(first, second))
    }

    /// Clear the area around `pos`.
    pub fn clear(&self, pos: (i64, i64)) -> Result<ActionReport, AgentError> {
        self.runtime.block_on(self.agent.clear(pos))
    }

    /// Step of the latest percept.
    pub fn step(&self) -> Option<u64> {
        self.agent.step()
    }

    /// Static percept of the current simulation.
    pub fn static_percept(&self) -> Option<Arc<StaticPercept>> {
        self.agent.static_percept()
    }

    /// Latest dynamic percept.
    pub fn dynamic_percept(&self) -> Option<Arc<DynamicPercept>> {
        self.agent.dynamic_percept()
    }

    /// Result of the last finished simulation.
    pub fn sim_result(&self) -> Option<Arc<SimResult>> {
        self.agent.sim_result()
    }

    /// Block until the running simulation has a dynamic percept.
    ///
    /// Returns at once if one is already published. Fails with
    /// `ConnectionClosed` if the session closes before that.
    pub fn ready(&self) -> Result<Arc<DynamicPercept>, AgentError> {
        self.runtime.block_on(self.agent.ready())
    }

    /// Block until the next dynamic percept arrives.
    ///
    /// Returns `None` once the session is closed.
    pub fn wait_step(&self) -> Option<Arc<DynamicPercept>> {
        let mut view = self.agent.percepts();
        self.runtime.block_on(view.next_step())
    }

    /// Current session state.
    pub fn state(&self) -> ConnectionState {
        self.agent.state()
    }

    /// Close the session without waiting.
    pub fn close(&self) {
        self.agent.close();
    }
}

impl Drop for BlockingAgent {
    fn drop(&mut self) {
        self.agent.close();
        if Handle::try_current().is_err() {
            // the timer must be created inside the runtime
            let agent = &self.agent;
            let _ = self
                .runtime
                .block_on(async { tokio::time::timeout(DROP_GRACE, agent.closed()).await });
        }
    }
}
