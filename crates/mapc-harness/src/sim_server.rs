//! Scripted simulation server.
//!
//! Speaks the server side of the protocol for a single agent: authenticate,
//! run each configured simulation step by step, then say bye. Per step it sends
//! a `request-action`, waits up to the step timeout for the agent's action and
//! reports the outcome in the next step's percept, the way the real server
//! does.
//!
//! Faults are injected by step index so tests can reproduce protocol edge
//! cases deterministically.
//!
//! # Energy model
//!
//! Agents start every simulation with 100 energy. A successful `clear` costs
//! [`CLEAR_COST`]; nothing else changes it.

use std::{
    collections::HashMap,
    fmt,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use mapc_core::{FrameReader, FrameWriter, TransportError, split};
use mapc_proto::{
    Action, AuthResponse, Bye, DEFAULT_MAX_FRAME_LEN, Message, Percept, RequestAction, SimEnd, SimStart,
    percept::{NO_ACTION, SUCCESS},
};
use serde_json::{Value, json};
use tokio::{
    io::{ReadHalf, WriteHalf},
    time::Instant,
};
use tracing::{debug, info, warn};
use turmoil::net::{TcpListener, TcpStream};

/// Port the server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 12300;

/// Energy every agent starts a simulation with.
pub const INITIAL_ENERGY: i64 = 100;

/// Energy a successful `clear` costs.
pub const CLEAR_COST: i64 = 10;

type Reader = FrameReader<ReadHalf<TcpStream>>;
type Writer = FrameWriter<WriteHalf<TcpStream>>;
type OutcomeFn = Arc<dyn Fn(&ActionRecord) -> String + Send + Sync>;

/// An action the server received for a step.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    /// Index of the simulation, from 0
    pub simulation: usize,
    /// Step the action arrived in
    pub step: u64,
    /// Request id the action carried
    pub request_id: u64,
    /// Verb
    pub action_type: String,
    /// Parameters
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
struct Faults {
    /// Pause before sending the request for a step
    stalls: HashMap<u64, Duration>,
    /// After this step, the next one reported skips an index
    skip_after: Option<u64>,
    /// The percept for this step names a different verb than was executed
    misreport: Option<(u64, String)>,
    /// Actions arriving in these steps count as too late
    late: Vec<u64>,
}

/// Scripted single-agent simulation server.
///
/// Cheap to clone: the action log is shared between clones, so a test can
/// keep one and read what the server received after the run.
#[derive(Clone)]
pub struct SimServer {
    port: u16,
    accounts: Vec<(String, String)>,
    simulations: Vec<u64>,
    step_timeout: Duration,
    outcome: OutcomeFn,
    faults: Faults,
    bye: bool,
    received: Arc<Mutex<Vec<ActionRecord>>>,
}

impl fmt::Debug for SimServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimServer")
            .field("port", &self.port)
            .field("simulations", &self.simulations)
            .field("step_timeout", &self.step_timeout)
            .field("faults", &self.faults)
            .field("bye", &self.bye)
            .finish_non_exhaustive()
    }
}

impl Default for SimServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimServer {
    /// Accept any credentials, run one 5-step simulation, every action
    /// succeeds.
    pub fn new() -> Self {
        Self {
            port: DEFAULT_PORT,
            accounts: Vec::new(),
            simulations: Vec::new(),
            step_timeout: Duration::from_secs(4),
            outcome: Arc::new(|_| SUCCESS.to_string()),
            faults: Faults::default(),
            bye: true,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Listen on `port`.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Only accept the listed accounts.
    #[must_use]
    pub fn account(mut self, user: impl Into<String>, pw: impl Into<String>) -> Self {
        self.accounts.push((user.into(), pw.into()));
        self
    }

    /// Append a simulation of `steps` steps.
    #[must_use]
    pub fn simulation(mut self, steps: u64) -> Self {
        self.simulations.push(steps);
        self
    }

    /// How long each step waits for the agent's action.
    #[must_use]
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Decide the `lastActionResult` of each executed action.
    #[must_use]
    pub fn outcome(mut self, outcome: impl Fn(&ActionRecord) -> String + Send + Sync + 'static) -> Self {
        self.outcome = Arc::new(outcome);
        self
    }

    /// Wait `pause` before sending the request for `step`.
    #[must_use]
    pub fn stall_before(mut self, step: u64, pause: Duration) -> Self {
        self.faults.stalls.insert(step, pause);
        self
    }

    /// Skip one step index after `step`.
    #[must_use]
    pub fn skip_step_after(mut self, step: u64) -> Self {
        self.faults.skip_after = Some(step);
        self
    }

    /// Report `verb` as the last action in the percept for `step`.
    #[must_use]
    pub fn misreport_at(mut self, step: u64, verb: impl Into<String>) -> Self {
        self.faults.misreport = Some((step, verb.into()));
        self
    }

    /// Treat the action arriving in `step` as having missed the step.
    #[must_use]
    pub fn late_at(mut self, step: u64) -> Self {
        self.faults.late.push(step);
        self
    }

    /// Keep the connection open after the last simulation instead of saying
    /// bye.
    #[must_use]
    pub fn without_bye(mut self) -> Self {
        self.bye = false;
        self
    }

    /// Actions received so far, in arrival order.
    pub fn received(&self) -> Vec<ActionRecord> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Accept one agent and play the script with it.
    pub async fn serve(self) -> turmoil::Result {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))).await?;
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "agent connected");

        let (mut reader, mut writer) = split(stream, DEFAULT_MAX_FRAME_LEN);
        let started = Instant::now();

        let user = match reader.receive().await? {
            Message::AuthRequest(auth) if self.accepts(&auth.user, &auth.pw) => auth.user,
            Message::AuthRequest(auth) => {
                info!(user = %auth.user, "rejecting credentials");
                writer.send(&Message::AuthResponse(AuthResponse { result: "fail".into() })).await?;
                return Ok(());
            },
            other => return Err(format!("expected auth-request, got {}", other.kind()).into()),
        };
        writer.send(&Message::AuthResponse(AuthResponse::ok())).await?;

        let simulations = if self.simulations.is_empty() { vec![5] } else { self.simulations.clone() };
        let mut next_id = 0;
        for (index, steps) in simulations.into_iter().enumerate() {
            let mut run = Run {
                server: &self,
                reader: &mut reader,
                writer: &mut writer,
                started,
                simulation: index,
                next_id: &mut next_id,
            };
            if !run.play(&user, steps).await? {
                debug!("agent left mid-simulation");
                return Ok(());
            }
        }

        if self.bye {
            writer.send(&Message::Bye(Bye {})).await?;
        }

        // drain until the agent hangs up
        while reader.receive().await.is_ok() {}
        Ok(())
    }

    fn accepts(&self, user: &str, pw: &str) -> bool {
        self.accounts.is_empty() || self.accounts.iter().any(|(u, p)| u == user && p == pw)
    }

    fn record(&self, record: ActionRecord) {
        self.received.lock().unwrap_or_else(PoisonError::into_inner).push(record);
    }
}

/// Outcome of the previous step, as reported in the next percept.
struct LastAction {
    action_type: String,
    params: Vec<Value>,
    result: String,
}

impl LastAction {
    fn none() -> Self {
        Self { action_type: NO_ACTION.to_string(), params: Vec::new(), result: SUCCESS.to_string() }
    }
}

struct Run<'a> {
    server: &'a SimServer,
    reader: &'a mut Reader,
    writer: &'a mut Writer,
    started: Instant,
    simulation: usize,
    next_id: &'a mut u64,
}

impl Run<'_> {
    fn millis(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Play one simulation. `Ok(false)` if the agent disconnected.
    async fn play(&mut self, user: &str, steps: u64) -> turmoil::Result<bool> {
        let server = self.server;
        let faults = &server.faults;
        info!(simulation = self.simulation, steps, "simulation start");

        let time = self.millis();
        self.writer
            .send(&Message::SimStart(SimStart {
                time: Some(time),
                percept: fields(json!({
                    "name": user,
                    "team": "A",
                    "teamSize": 1,
                    "steps": steps,
                    "vision": 5,
                })),
            }))
            .await?;

        let mut energy = INITIAL_ENERGY;
        let mut last: Option<LastAction> = None;
        let mut step = 0;

        for _ in 0..steps {
            if let Some(pause) = faults.stalls.get(&step) {
                debug!(step, ?pause, "stalling");
                tokio::time::sleep(*pause).await;
            }

            let id = *self.next_id;
            *self.next_id += 1;

            let mut percept = fields(json!({
                "energy": energy,
                "score": 0,
                "disabled": false,
                "things": [],
                "tasks": [],
                "attached": [],
                "lastAction": "",
                "lastActionResult": "",
                "lastActionParams": [],
            }));
            if let Some(last) = &last {
                percept.insert("lastAction".into(), json!(last.action_type));
                percept.insert("lastActionResult".into(), json!(last.result));
                percept.insert("lastActionParams".into(), Value::Array(last.params.clone()));
            }
            if let Some((at, verb)) = &faults.misreport
                && *at == step
            {
                percept.insert("lastAction".into(), json!(verb));
            }

            let deadline = Instant::now() + server.step_timeout;
            let time = self.millis();
            self.writer
                .send(&Message::RequestAction(RequestAction {
                    id,
                    time: Some(time),
                    deadline: time + server.step_timeout.as_millis() as u64,
                    step,
                    percept,
                }))
                .await?;

            let Some(action) = self.await_action(id, deadline).await? else {
                return Ok(false);
            };

            last = Some(match action {
                Some(action) => {
                    let record = ActionRecord {
                        simulation: self.simulation,
                        step,
                        request_id: action.id,
                        action_type: action.action_type,
                        params: action.params,
                    };
                    server.record(record.clone());

                    if faults.late.contains(&step) {
                        warn!(step, "treating action as late");
                        LastAction::none()
                    } else {
                        let result = (server.outcome)(&record);
                        if record.action_type == "clear" && result == SUCCESS {
                            energy -= CLEAR_COST;
                        }
                        LastAction { action_type: record.action_type, params: record.params, result }
                    }
                },
                None => LastAction::none(),
            });

            step += 1;
            if faults.skip_after == Some(step - 1) {
                step += 1;
            }
        }

        let time = self.millis();
        self.writer
            .send(&Message::SimEnd(SimEnd {
                result: fields(json!({"ranking": 1, "score": 0, "time": time})),
            }))
            .await?;
        info!(simulation = self.simulation, "simulation end");
        Ok(true)
    }

    /// Wait for the action answering request `id`.
    ///
    /// `Ok(None)` if the agent disconnected, `Ok(Some(None))` if the step
    /// closed without an action. Actions for older requests are ignored.
    async fn await_action(
        &mut self,
        id: u64,
        deadline: Instant,
    ) -> turmoil::Result<Option<Option<Action>>> {
        loop {
            match tokio::time::timeout_at(deadline, self.reader.receive()).await {
                Ok(Ok(Message::Action(action))) if action.id == id => return Ok(Some(Some(action))),
                Ok(Ok(Message::Action(action))) => {
                    debug!(expected = id, got = action.id, "ignoring stale action");
                },
                Ok(Ok(other)) => return Err(format!("unexpected {} from agent", other.kind()).into()),
                Ok(Err(TransportError::Eof)) => return Ok(None),
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => return Ok(Some(None)),
            }
        }
    }
}

fn fields(value: Value) -> Percept {
    match value {
        Value::Object(map) => map,
        _ => Percept::new(),
    }
}
