//! Async agent facade.

use std::{sync::Arc, time::Duration};

use mapc_core::{
    ActionReport, ActionRequest, ConnectionState, Credentials, PerceptView, Session, Transport,
    split,
};
use mapc_proto::{DynamicPercept, SimResult, StaticPercept};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::{
    action::{self, Direction, Rotation},
    config::ClientConfig,
    driver::{Command, Driver},
    error::AgentError,
    tcp::TcpTransport,
};

/// A connected, authenticated agent.
///
/// Each verb sends one action and resolves once the server reports its
/// outcome in the following step's percept. One action may be outstanding at
/// a time; a concurrent call fails with [`AgentError::Sequencing`].
///
/// Percept accessors read the latest snapshot without touching the network.
/// Dropping the agent closes the session.
#[derive(Debug)]
pub struct Agent {
    user: String,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    view: PerceptView,
    action_timeout: Duration,
}

impl Agent {
    /// Connect over TCP and authenticate.
    ///
    /// # Errors
    ///
    /// - `Connection` if the server is unreachable within the connect timeout
    ///   or no auth-response arrives within the auth timeout
    /// - `Authentication` if the server rejects the credentials
    pub async fn open(
        user: impl Into<String>,
        pw: impl Into<String>,
        config: ClientConfig,
    ) -> Result<Self, AgentError> {
        Self::open_with(&TcpTransport, Credentials::new(user, pw), config).await
    }

    /// Connect through `transport` and authenticate.
    ///
    /// Spawns the session driver on the current tokio runtime.
    pub async fn open_with<T: Transport>(
        transport: &T,
        credentials: Credentials,
        config: ClientConfig,
    ) -> Result<Self, AgentError> {
        let ClientConfig { host, port, connect_timeout, auth_timeout, .. } = &config;

        let stream = tokio::time::timeout(*connect_timeout, transport.connect(host, *port))
            .await
            .map_err(|_| {
                AgentError::Connection(format!("connecting to {host}:{port} timed out"))
            })?
            .map_err(|err| AgentError::Connection(format!("connecting to {host}:{port}: {err}")))?;
        debug!(%host, port, "connected");

        let user = credentials.user.clone();
        let (session, view) = Session::new(credentials, config.session.clone());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(session.state());
        let (auth_tx, auth_rx) = oneshot::channel();

        let driver = Driver::new(
            session,
            split(stream, config.max_frame_len),
            commands_rx,
            state_tx,
            auth_tx,
        );
        tokio::spawn(driver.run());

        let agent = Self {
            user,
            commands: commands_tx,
            state: state_rx,
            view,
            action_timeout: config.action_timeout,
        };

        match tokio::time::timeout(*auth_timeout, auth_rx).await {
            Ok(Ok(Ok(()))) => {
                info!(user = %agent.user, "agent ready");
                Ok(agent)
            },
            Ok(Ok(Err(reason))) => Err(reason.into()),
            Ok(Err(_)) => Err(AgentError::ConnectionClosed),
            Err(_) => Err(AgentError::Connection(format!(
                "no auth-response within {auth_timeout:?}"
            ))),
        }
    }

    /// Account name the agent authenticated with.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Send `request` and wait up to `timeout` for its outcome.
    ///
    /// # Errors
    ///
    /// - `Sequencing` if another action is outstanding
    /// - `Timeout` if no outcome arrives in time
    /// - `Failed` if the server reports the action did not succeed
    /// - `SimulationEnded` if the simulation ends first
    /// - `ConnectionClosed` or a fatal kind if the session closes first
    pub async fn perform(
        &self,
        request: ActionRequest,
        timeout: Duration,
    ) -> Result<ActionReport, AgentError> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Perform { request, timeout, reply })
            .map_err(|_| AgentError::ConnectionClosed)?;

        match outcome.await {
            Ok(result) => result.map_err(AgentError::from),
            Err(_) => Err(AgentError::ConnectionClosed),
        }
    }

    async fn act(&self, request: ActionRequest) -> Result<ActionReport, AgentError> {
        self.perform(request, self.action_timeout).await
    }

    /// Do nothing this step.
    pub async fn skip(&self) -> Result<ActionReport, AgentError> {
        self.act(action::skip()).await
    }

    /// Move one cell.
    pub async fn move_in(&self, direction: Direction) -> Result<ActionReport, AgentError> {
        self.act(action::move_in(direction)).await
    }

    /// Rotate in place.
    pub async fn rotate(&self, rotation: Rotation) -> Result<ActionReport, AgentError> {
        self.act(action::rotate(rotation)).await
    }

    /// Attach the thing next to the agent.
    pub async fn attach(&self, direction: Direction) -> Result<ActionReport, AgentError> {
        self.act(action::attach(direction)).await
    }

    /// Detach an attached thing.
    pub async fn detach(&self, direction: Direction) -> Result<ActionReport, AgentError> {
        self.act(action::detach(direction)).await
    }

    /// Request a block from an adjacent dispenser.
    pub async fn request(&self, direction: Direction) -> Result<ActionReport, AgentError> {
        self.act(action::request(direction)).await
    }

    /// Submit the named task.
    pub async fn submit(&self, task: &str) -> Result<ActionReport, AgentError> {
        self.act(action::submit(task)).await
    }

    /// Accept the named task.
    pub async fn accept(&self, task: &str) -> Result<ActionReport, AgentError> {
        self.act(action::accept(task)).await
    }

    /// Connect the attachment at `pos` with one of `agent`'s.
    pub async fn connect(&self, agent: &str, pos: (i64, i64)) -> Result<ActionReport, AgentError> {
        self.act(action::connect(agent, pos)).await
    }

    /// Break the link between two attachments.
    pub async fn disconnect(
        &self,
        first: (i64, i64),
        second: (i64, i64),
    ) -> Result<ActionReport, AgentError> {
        self.act(action::disconnect(first, second)).await
    }

    /// Clear the area around `pos`.
    pub async fn clear(&self, pos: (i64, i64)) -> Result<ActionReport, AgentError> {
        self.act(action::clear(pos)).await
    }

    /// Step of the latest percept.
    pub fn step(&self) -> Option<u64> {
        self.view.step()
    }

    /// Static percept of the current simulation.
    pub fn static_percept(&self) -> Option<Arc<StaticPercept>> {
        self.view.static_percept()
    }

    /// Latest dynamic percept.
    pub fn dynamic_percept(&self) -> Option<Arc<DynamicPercept>> {
        self.view.dynamic_percept()
    }

    /// Result of the last finished simulation.
    pub fn sim_result(&self) -> Option<Arc<SimResult>> {
        self.view.sim_result()
    }

    /// Wait until the running simulation has a dynamic percept.
    ///
    /// [`Self::open`] returns as soon as the server accepts the credentials,
    /// before `sim-start`. Call this to wait for the first `request-action`.
    /// Returns at once if a percept is already published.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` if the session closes first.
    pub async fn ready(&self) -> Result<Arc<DynamicPercept>, AgentError> {
        let mut view = self.view.clone();
        view.current().await.ok_or(AgentError::ConnectionClosed)
    }

    /// A view for waiting on new percepts.
    pub fn percepts(&self) -> PerceptView {
        self.view.clone()
    }

    /// Current session state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Close the session.
    ///
    /// An action in progress fails with `ConnectionClosed`. Does not wait for
    /// the driver to finish; see [`Self::closed`].
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Wait until the session is closed, for whatever reason.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // Err means the driver is gone, which only happens once closed
        let _ = state.wait_for(|state| *state == ConnectionState::Closed).await;
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.close();
    }
}
