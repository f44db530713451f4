//! Action/result correlation against a scripted server.
//!
//! Every action is sent in step N and resolved from the percept for step
//! N + 1. The fault knobs on [`SimServer`] produce the step sequences a
//! correlator has to reject or recover from.

use std::time::Duration;

use mapc_client::{
    ActionRequest, Agent, AgentError, ClientConfig, ConnectionState, Credentials, Direction,
};
use mapc_core::ProtocolError;
use mapc_harness::{SimServer, SimTransport};
use turmoil::Sim;

fn sim() -> Sim<'static> {
    mapc_harness::init_tracing();
    turmoil::Builder::new().simulation_duration(Duration::from_secs(120)).build()
}

async fn open(config: ClientConfig) -> Result<Agent, AgentError> {
    Agent::open_with(&SimTransport, Credentials::new("agentA1", "1"), config).await
}

fn config() -> ClientConfig {
    ClientConfig::new("server", 12300)
}

#[test]
fn outcome_is_read_from_the_next_step() {
    let mut sim = sim();
    let server = SimServer::new().outcome(|record| {
        if record.params.first().and_then(|p| p.as_str()) == Some("w") {
            "failed_path".to_string()
        } else {
            "success".to_string()
        }
    });
    sim.host("server", move || server.clone().serve());

    sim.client("agent", async {
        let agent = open(config()).await?;

        let report = agent.move_in(Direction::North).await?;
        assert_eq!(report.step, 0);
        assert_eq!(report.action, "move");
        assert_eq!(report.percept.step(), 1);
        assert_eq!(report.percept.last_action(), Some("move"));
        assert_eq!(agent.step(), Some(1));

        let err = agent.move_in(Direction::West).await.unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(err.failure_reason(), Some("failed_path"));
        assert_eq!(agent.step(), Some(2));
        Ok(())
    });

    sim.run().expect("both moves should resolve");
}

#[test]
fn repeated_clear_reads_fresh_energy() {
    let mut sim = sim();
    // the third clear reaches the server, then step 3 is held back
    let server = SimServer::new().stall_before(3, Duration::from_secs(5));
    let handle = server.clone();
    sim.host("server", move || server.clone().serve());

    sim.client("agent", async move {
        let agent = open(config()).await?;
        let energy = || agent.dynamic_percept().and_then(|p| p.energy());

        agent.clear((-1, -2)).await?;
        assert_eq!(energy(), Some(90));
        agent.clear((-1, -2)).await?;
        assert_eq!(energy(), Some(80));

        let (cleared, during) = tokio::join!(agent.clear((-1, -2)), async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            (handle.received().len(), agent.step(), energy())
        });
        // executed by the server but not yet reported: still the step 2 view
        assert_eq!(during, (3, Some(2), Some(80)));

        let report = cleared?;
        assert_eq!(report.step, 2);
        assert_eq!(energy(), Some(70));
        assert_eq!(agent.step(), Some(3));
        Ok(())
    });

    sim.run().expect("three clears should resolve");
}

#[test]
fn second_action_while_one_is_outstanding() {
    let mut sim = sim();
    let server = SimServer::new();
    let handle = server.clone();
    sim.host("server", move || server.clone().serve());

    sim.client("agent", async {
        let agent = open(config()).await?;
        agent.ready().await?;

        let (first, second) = tokio::join!(agent.skip(), agent.move_in(Direction::East));
        assert_eq!(first?.step, 0);
        let err = second.unwrap_err();
        assert!(matches!(err, AgentError::Sequencing { .. }));
        assert!(err.is_recoverable());

        agent.close();
        agent.closed().await;
        Ok(())
    });

    sim.run().expect("first action should still resolve");

    let received = handle.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].action_type, "skip");
}

#[test]
fn timeout_leaves_the_agent_usable() {
    let mut sim = sim();
    let server = SimServer::new().stall_before(1, Duration::from_secs(10));
    sim.host("server", move || server.clone().serve());

    sim.client("agent", async {
        let agent = open(config().with_action_timeout(Duration::from_secs(2))).await?;

        let err = agent.skip().await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout { ref action, timeout }
            if action == "skip" && timeout == Duration::from_secs(2)));
        assert_ne!(agent.state(), ConnectionState::Closed);

        // step 0 already has an action, so this one waits for step 1
        let report =
            agent.perform(ActionRequest::new("skip", Vec::new()), Duration::from_secs(30)).await?;
        assert_eq!(report.step, 1);
        Ok(())
    });

    sim.run().expect("the agent should recover from a timeout");
}

#[test]
fn close_releases_a_waiting_action() {
    let mut sim = sim();
    let server = SimServer::new().stall_before(1, Duration::from_secs(30));
    sim.host("server", move || server.clone().serve());

    sim.client("agent", async {
        let agent = open(config()).await?;

        let (waiting, ()) = tokio::join!(agent.skip(), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            agent.close();
        });
        assert!(matches!(waiting.unwrap_err(), AgentError::ConnectionClosed));

        agent.closed().await;
        assert_eq!(agent.state(), ConnectionState::Closed);
        Ok(())
    });

    sim.run().expect("close should release the waiting caller");
}

#[test]
fn skipped_step_is_fatal() {
    let mut sim = sim();
    let server = SimServer::new().skip_step_after(0);
    sim.host("server", move || server.clone().serve());

    sim.client("agent", async {
        let agent = open(config()).await?;

        let err = agent.skip().await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Protocol(ProtocolError::StepMismatch { issued: 0, observed: 2 })
        ));
        assert!(!err.is_recoverable());

        agent.closed().await;
        // the mismatching percept is never published
        assert_eq!(agent.step(), Some(0));
        Ok(())
    });

    sim.run().expect("the mismatch should close the session");
}

#[test]
fn wrong_echo_is_fatal() {
    let mut sim = sim();
    let server = SimServer::new().misreport_at(1, "rotate");
    sim.host("server", move || server.clone().serve());

    sim.client("agent", async {
        let agent = open(config()).await?;

        let err = agent.move_in(Direction::South).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Protocol(ProtocolError::ActionMismatch { ref sent, ref echoed })
                if sent == "move" && echoed == "rotate"
        ));

        agent.closed().await;
        assert_eq!(agent.state(), ConnectionState::Closed);
        Ok(())
    });

    sim.run().expect("the mismatch should close the session");
}

#[test]
fn late_action_is_resent_once() {
    let mut sim = sim();
    let server = SimServer::new().late_at(0);
    let handle = server.clone();
    sim.host("server", move || server.clone().serve());

    sim.client("agent", async {
        let agent = open(config()).await?;

        let report = agent.attach(Direction::South).await?;
        assert_eq!(report.step, 1);
        assert_eq!(report.percept.step(), 2);
        assert_eq!(report.percept.last_action(), Some("attach"));

        agent.close();
        agent.closed().await;
        Ok(())
    });

    sim.run().expect("the resent action should resolve");

    let attempts: Vec<_> = handle.received().into_iter().map(|r| (r.step, r.request_id)).collect();
    assert_eq!(attempts, vec![(0, 0), (1, 1)]);
}

#[test]
fn late_twice_fails_with_no_action() {
    let mut sim = sim();
    let server = SimServer::new().late_at(0).late_at(1);
    sim.host("server", move || server.clone().serve());

    sim.client("agent", async {
        let agent = open(config()).await?;

        let err = agent.attach(Direction::South).await.unwrap_err();
        assert!(matches!(err, AgentError::Failed { ref action, ref reason }
            if action == "attach" && reason == "no_action"));
        assert_ne!(agent.state(), ConnectionState::Closed);
        Ok(())
    });

    sim.run().expect("the exhausted retry should be reported");
}

#[test]
fn simulation_end_fails_the_pending_action() {
    let mut sim = sim();
    let server = SimServer::new().simulation(1);
    sim.host("server", move || server.clone().serve());

    sim.client("agent", async {
        let agent = open(config()).await?;

        let err = agent.request(Direction::North).await.unwrap_err();
        assert!(matches!(err, AgentError::SimulationEnded { ref action } if action == "request"));
        assert!(agent.sim_result().is_some());

        agent.closed().await;
        Ok(())
    });

    sim.run().expect("the simulation end should be reported");
}
