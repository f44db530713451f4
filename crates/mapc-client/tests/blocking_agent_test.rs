//! Blocking facade over real localhost TCP.
//!
//! The server side is a plain thread speaking the wire format by hand, one
//! scripted connection per test.

use std::{
    io::{BufRead, BufReader, Write},
    net::{TcpListener, TcpStream},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use mapc_client::{AgentError, BlockingAgent, ClientConfig, ConnectionState, Direction};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Peer {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Peer {
    fn recv(&mut self) -> Option<Value> {
        let mut frame = Vec::new();
        let read = self.reader.read_until(0, &mut frame).expect("read frame");
        if read == 0 {
            return None;
        }
        assert_eq!(frame.pop(), Some(0), "frame must be NUL-terminated");
        Some(serde_json::from_slice(&frame).expect("valid json frame"))
    }

    fn send(&mut self, message: Value) {
        let mut frame = serde_json::to_vec(&message).expect("encode");
        frame.push(0);
        self.writer.write_all(&frame).expect("write frame");
    }

    fn authenticate(&mut self, user: &str) {
        let auth = self.recv().expect("auth-request");
        assert_eq!(auth["type"], "auth-request");
        assert_eq!(auth["content"]["user"], user);
        self.send(json!({"type": "auth-response", "content": {"result": "ok"}}));
    }

    fn step(&mut self, step: u64, percept: Value) {
        self.send(json!({
            "type": "request-action",
            "content": {"id": 100 + step, "time": 0, "deadline": 4000, "step": step, "percept": percept},
        }));
    }
}

fn serve(script: impl FnOnce(&mut Peer) + Send + 'static) -> (ClientConfig, JoinHandle<()>) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let writer = stream.try_clone().expect("clone stream");
        let mut peer = Peer { reader: BufReader::new(stream), writer };
        script(&mut peer);
    });

    let config = ClientConfig::new("127.0.0.1", port).with_action_timeout(Duration::from_secs(5));
    (config, server)
}

#[test]
fn verbs_resolve_one_step_later() {
    let (config, server) = serve(|peer| {
        peer.authenticate("agentA1");
        peer.send(json!({
            "type": "sim-start",
            "content": {"time": 1, "percept": {"name": "agentA1", "team": "A", "steps": 10}},
        }));
        peer.step(0, json!({"energy": 100}));

        let action = peer.recv().expect("move");
        assert_eq!(action["content"], json!({"id": 100, "type": "move", "p": ["n"]}));
        peer.step(1, json!({"energy": 100, "lastAction": "move", "lastActionResult": "success"}));

        let action = peer.recv().expect("clear");
        assert_eq!(action["content"], json!({"id": 101, "type": "clear", "p": [-1, -2]}));
        peer.step(2, json!({"energy": 100, "lastAction": "clear", "lastActionResult": "failed_target"}));

        let action = peer.recv().expect("skip");
        assert_eq!(action["content"]["type"], "skip");
        peer.send(json!({"type": "sim-end", "content": {"ranking": 2, "score": 40}}));
        peer.send(json!({"type": "bye", "content": {}}));
    });

    let agent = BlockingAgent::open("agentA1", "1", config).expect("open");
    assert_eq!(agent.user(), "agentA1");

    let report = agent.move_in(Direction::North).expect("move succeeds");
    assert_eq!(report.step, 0);
    assert_eq!(agent.step(), Some(1));
    assert_eq!(agent.static_percept().and_then(|p| p.steps()), Some(10));

    let err = agent.clear((-1, -2)).unwrap_err();
    assert!(err.is_recoverable());
    assert_eq!(err.failure_reason(), Some("failed_target"));
    assert_eq!(agent.dynamic_percept().map(|p| p.step()), Some(2));

    let err = agent.skip().unwrap_err();
    assert!(matches!(err, AgentError::SimulationEnded { ref action } if action == "skip"));
    assert_eq!(agent.sim_result().and_then(|r| r.ranking()), Some(2));

    drop(agent);
    server.join().expect("server thread");
}

#[test]
fn close_from_another_thread_releases_blocked_call() {
    let (config, server) = serve(|peer| {
        peer.authenticate("agentA2");
        peer.send(json!({"type": "sim-start", "content": {"percept": {}}}));
        peer.step(0, json!({}));
        assert!(peer.recv().is_some());
        // hold the step open until the client goes away
        while peer.recv().is_some() {}
    });

    let agent = Arc::new(BlockingAgent::open("agentA2", "1", config).expect("open"));

    let closer = {
        let agent = Arc::clone(&agent);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            agent.close();
        })
    };

    let err = agent.skip().unwrap_err();
    assert!(matches!(err, AgentError::ConnectionClosed));

    closer.join().expect("closer thread");
    assert_eq!(agent.state(), ConnectionState::Closed);
    drop(agent);
    server.join().expect("server thread");
}

#[test]
fn rejected_credentials() {
    let (config, server) = serve(|peer| {
        assert!(peer.recv().is_some());
        peer.send(json!({"type": "auth-response", "content": {"result": "fail"}}));
    });

    let err = BlockingAgent::open("agentA1", "wrong", config).unwrap_err();
    assert!(matches!(err, AgentError::Authentication { ref result } if result == "fail"));
    server.join().expect("server thread");
}

#[test]
fn unreachable_server() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);

    let err = BlockingAgent::open("agentA1", "1", ClientConfig::new("127.0.0.1", port)).unwrap_err();
    assert!(matches!(err, AgentError::Connection(_)));
}

#[test]
fn drop_closes_the_connection() {
    let (config, server) = serve(|peer| {
        peer.authenticate("agentA3");
        // returns once the agent hangs up
        while peer.recv().is_some() {}
    });

    let agent = BlockingAgent::open("agentA3", "1", config).expect("open");
    assert_eq!(agent.state(), ConnectionState::AwaitingSimStart);
    drop(agent);
    server.join().expect("server thread");
}

#[test]
fn wait_step_follows_the_simulation() {
    let (config, server) = serve(|peer| {
        peer.authenticate("agentA4");
        peer.send(json!({"type": "sim-start", "content": {"percept": {"steps": 3}}}));
        for step in 0..3 {
            thread::sleep(Duration::from_millis(300));
            peer.step(step, json!({"energy": 100 - step * 10}));
        }
        thread::sleep(Duration::from_millis(300));
        peer.send(json!({"type": "bye", "content": {}}));
        while peer.recv().is_some() {}
    });

    let agent = BlockingAgent::open("agentA4", "1", config).expect("open");

    let first = agent.ready().expect("first step");
    assert_eq!(first.step(), 0);
    assert_eq!(agent.static_percept().and_then(|p| p.steps()), Some(3));

    let next = agent.wait_step().expect("step 1");
    assert_eq!(next.step(), 1);
    assert_eq!(next.energy(), Some(90));
    assert_eq!(agent.step(), Some(1));

    assert_eq!(agent.wait_step().map(|p| p.step()), Some(2));
    // bye closes the session
    assert!(agent.wait_step().is_none());
    assert_eq!(agent.state(), ConnectionState::Closed);

    drop(agent);
    server.join().expect("server thread");
}

