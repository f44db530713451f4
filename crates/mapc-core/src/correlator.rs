//! Action/result correlation.
//!
//! The server only reports the outcome of the action sent for step N inside the
//! percept for step N+1. The correlator holds the single outstanding action,
//! binds it to the step it was sent for, and resolves it against the next
//! percept once that percept is known to describe the same action.
//!
//! # Rules
//!
//! - At most one action is outstanding. A second `perform` fails with
//!   [`ActionError::Sequencing`] and sends nothing.
//! - An action issued while the current step has no action yet is sent right
//!   away. Otherwise it is queued and goes out with the next `request-action`.
//! - The percept that resolves an action sent at step N must be for step N+1.
//!   Anything else is a [`ProtocolError::StepMismatch`].
//! - `lastAction` must name the verb that was sent, except for `no_action`,
//!   which means the action reached the server after the step closed. The
//!   action is then resent for the new step while late retries remain.
//!
//! Like the session, the correlator never reads a clock: callers pass `now`.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use mapc_proto::{
    Action, DynamicPercept, Message,
    percept::{NO_ACTION, SUCCESS},
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    connection::SessionAction,
    error::{ActionError, ProtocolError},
};

/// Result reported when a percept carries no `lastActionResult`.
const UNKNOWN_RESULT: &str = "unknown";

/// An action verb with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    /// Verb, e.g. `move` or `clear`
    pub action_type: String,
    /// Positional parameters
    pub params: Vec<Value>,
}

impl ActionRequest {
    /// Build a request for `action_type` with `params`.
    pub fn new(action_type: impl Into<String>, params: Vec<Value>) -> Self {
        Self { action_type: action_type.into(), params }
    }
}

/// Successful outcome of an action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionReport {
    /// Step the action was executed in
    pub step: u64,
    /// Verb of the action
    pub action: String,
    /// Percept that reported the outcome (step `step + 1`)
    pub percept: Arc<DynamicPercept>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for a step to send in
    Queued,
    /// Sent, waiting for the next percept
    Sent { step_issued: u64 },
}

/// The single outstanding action.
#[derive(Debug, Clone)]
pub struct PendingAction {
    request: ActionRequest,
    phase: Phase,
    timeout: Duration,
    deadline: Instant,
    late_retries_left: u32,
}

impl PendingAction {
    /// The request being performed.
    pub fn request(&self) -> &ActionRequest {
        &self.request
    }

    /// Step the action was sent for, `None` while it is still queued.
    pub fn step_issued(&self) -> Option<u64> {
        match self.phase {
            Phase::Queued => None,
            Phase::Sent { step_issued } => Some(step_issued),
        }
    }

    /// When the caller stops waiting.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    fn send(&mut self, step: &mut StepTicket) -> SessionAction {
        self.phase = Phase::Sent { step_issued: step.step };
        step.acted = true;
        SessionAction::Send(Message::Action(Action {
            id: step.request_id,
            action_type: self.request.action_type.clone(),
            params: self.request.params.clone(),
        }))
    }

    fn fail(self, err: ActionError) -> SessionAction {
        SessionAction::Complete(Err(err))
    }
}

/// Step the server is currently waiting on.
#[derive(Debug, Clone, Copy)]
struct StepTicket {
    request_id: u64,
    step: u64,
    /// Whether an action has been sent for this step
    acted: bool,
}

/// Correlates outgoing actions with the percepts reporting their outcome.
#[derive(Debug, Clone)]
pub struct ActionCorrelator {
    pending: Option<PendingAction>,
    current: Option<StepTicket>,
    late_action_retries: u32,
}

impl ActionCorrelator {
    /// Create a correlator that resends a late action up to
    /// `late_action_retries` times.
    pub fn new(late_action_retries: u32) -> Self {
        Self { pending: None, current: None, late_action_retries }
    }

    /// The outstanding action, if any.
    pub fn pending(&self) -> Option<&PendingAction> {
        self.pending.as_ref()
    }

    /// Step of the latest `request-action` in the current simulation.
    pub fn current_step(&self) -> Option<u64> {
        self.current.map(|ticket| ticket.step)
    }

    /// Earliest instant at which [`Self::poll_timeout`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|pending| pending.deadline)
    }

    /// Issue an action.
    ///
    /// # Errors
    ///
    /// `Sequencing` if another action is still outstanding.
    pub fn perform(
        &mut self,
        request: ActionRequest,
        timeout: Duration,
        now: Instant,
    ) -> Result<Vec<SessionAction>, ActionError> {
        if let Some(pending) = &self.pending {
            return Err(ActionError::Sequencing { outstanding: pending.step_issued() });
        }

        let mut pending = PendingAction {
            request,
            phase: Phase::Queued,
            timeout,
            deadline: now + timeout,
            late_retries_left: self.late_action_retries,
        };

        let mut actions = Vec::new();
        match &mut self.current {
            Some(ticket) if !ticket.acted => {
                debug!(step = ticket.step, action = %pending.request.action_type, "sending action");
                actions.push(pending.send(ticket));
            },
            _ => debug!(action = %pending.request.action_type, "queueing action for next step"),
        }

        self.pending = Some(pending);
        Ok(actions)
    }

    /// Evaluate a new `request-action` percept.
    ///
    /// The session publishes the percept before the returned actions are
    /// executed, so a caller woken by a completion reads it as the current
    /// snapshot.
    ///
    /// # Errors
    ///
    /// - `StepRegressed` if the step does not increase
    /// - `StepMismatch` if the percept is not for the step after the
    ///   outstanding action
    /// - `ActionMismatch` if the percept reports a different verb
    ///
    /// On error the outstanding action is kept, so closing the session can
    /// fail it with the fatal error.
    pub fn on_step(
        &mut self,
        percept: &Arc<DynamicPercept>,
        now: Instant,
    ) -> Result<Vec<SessionAction>, ProtocolError> {
        let step = percept.step();
        if let Some(previous) = self.current_step()
            && step <= previous
        {
            return Err(ProtocolError::StepRegressed { previous, observed: step });
        }

        let resolution = match &self.pending {
            Some(pending) => match pending.phase {
                Phase::Queued => None,
                Phase::Sent { step_issued } => Some(evaluate(pending, step_issued, percept)?),
            },
            None => None,
        };

        let mut ticket = StepTicket { request_id: percept.request_id(), step, acted: false };
        let mut actions = Vec::new();

        match resolution {
            Some(Outcome::Resolved(result)) => {
                self.pending = None;
                actions.push(SessionAction::Complete(result));
            },
            Some(Outcome::Late) => {
                if let Some(pending) = &mut self.pending {
                    pending.late_retries_left = pending.late_retries_left.saturating_sub(1);
                    warn!(
                        step,
                        action = %pending.request.action_type,
                        retries_left = pending.late_retries_left,
                        "action arrived after the step closed, resending"
                    );
                    actions.push(pending.send(&mut ticket));
                }
            },
            None => {
                if let Some(pending) = &mut self.pending {
                    pending.deadline = now + pending.timeout;
                    debug!(step, action = %pending.request.action_type, "sending queued action");
                    actions.push(pending.send(&mut ticket));
                }
            },
        }

        self.current = Some(ticket);
        Ok(actions)
    }

    /// Fail the outstanding action if its deadline has passed.
    pub fn poll_timeout(&mut self, now: Instant) -> Vec<SessionAction> {
        match self.pending.take() {
            Some(pending) if pending.deadline <= now => {
                warn!(
                    action = %pending.request.action_type,
                    step_issued = ?pending.step_issued(),
                    "action timed out"
                );
                let err = ActionError::Timeout {
                    action: pending.request.action_type.clone(),
                    timeout: pending.timeout,
                };
                vec![pending.fail(err)]
            },
            other => {
                self.pending = other;
                Vec::new()
            },
        }
    }

    /// Fail the outstanding action with `err`.
    pub fn abort(&mut self, err: ActionError) -> Vec<SessionAction> {
        self.pending.take().map(|pending| pending.fail(err)).into_iter().collect()
    }

    /// Forget the step sequence at a simulation boundary.
    pub fn reset_steps(&mut self) {
        self.current = None;
    }
}

enum Outcome {
    Resolved(Result<ActionReport, ActionError>),
    /// Server recorded `no_action`; resend
    Late,
}

fn evaluate(
    pending: &PendingAction,
    step_issued: u64,
    percept: &Arc<DynamicPercept>,
) -> Result<Outcome, ProtocolError> {
    let observed = percept.step();
    if step_issued.checked_add(1) != Some(observed) {
        return Err(ProtocolError::StepMismatch { issued: step_issued, observed });
    }

    let action = &pending.request.action_type;
    match percept.last_action() {
        Some(NO_ACTION) if action != NO_ACTION => {
            if pending.late_retries_left > 0 {
                return Ok(Outcome::Late);
            }
            return Ok(Outcome::Resolved(Err(ActionError::Failed {
                action: action.clone(),
                reason: NO_ACTION.to_string(),
            })));
        },
        Some(echoed) if echoed != action => {
            return Err(ProtocolError::ActionMismatch {
                sent: action.clone(),
                echoed: echoed.to_string(),
            });
        },
        Some(_) => {},
        None => warn!(step = observed, %action, "percept carries no lastAction"),
    }

    let result = percept.last_action_result().unwrap_or(UNKNOWN_RESULT);
    if result == SUCCESS {
        Ok(Outcome::Resolved(Ok(ActionReport {
            step: step_issued,
            action: action.clone(),
            percept: Arc::clone(percept),
        })))
    } else {
        Ok(Outcome::Resolved(Err(ActionError::Failed {
            action: action.clone(),
            reason: result.to_string(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use mapc_proto::{Percept, RequestAction};
    use serde_json::json;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(4);

    fn percept(step: u64, last_action: Option<&str>, result: Option<&str>) -> Arc<DynamicPercept> {
        let mut fields = Percept::new();
        if let Some(action) = last_action {
            fields.insert("lastAction".into(), json!(action));
        }
        if let Some(result) = result {
            fields.insert("lastActionResult".into(), json!(result));
        }
        Arc::new(DynamicPercept::from(RequestAction {
            id: 100 + step,
            time: None,
            deadline: 0,
            step,
            percept: fields,
        }))
    }

    fn sent(actions: &[SessionAction]) -> Vec<(u64, String)> {
        actions
            .iter()
            .filter_map(|action| match action {
                SessionAction::Send(Message::Action(action)) => {
                    Some((action.id, action.action_type.clone()))
                },
                _ => None,
            })
            .collect()
    }

    fn completion(actions: &[SessionAction]) -> Option<&Result<ActionReport, ActionError>> {
        actions.iter().find_map(|action| match action {
            SessionAction::Complete(result) => Some(result),
            _ => None,
        })
    }

    fn step_zero(correlator: &mut ActionCorrelator, now: Instant) {
        let actions = correlator.on_step(&percept(0, None, None), now).unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn action_resolves_from_next_step() {
        let now = Instant::now();
        let mut correlator = ActionCorrelator::new(1);
        step_zero(&mut correlator, now);

        let actions = correlator.perform(ActionRequest::new("move", vec![json!("n")]), TIMEOUT, now).unwrap();
        assert_eq!(sent(&actions), vec![(100, "move".to_string())]);
        assert_eq!(correlator.pending().and_then(PendingAction::step_issued), Some(0));

        let actions = correlator.on_step(&percept(1, Some("move"), Some("success")), now).unwrap();
        let report = completion(&actions).unwrap().as_ref().unwrap();
        assert_eq!(report.step, 0);
        assert_eq!(report.percept.step(), 1);
        assert!(correlator.pending().is_none());
    }

    #[test]
    fn failed_result_is_reported_as_reason() {
        let now = Instant::now();
        let mut correlator = ActionCorrelator::new(1);
        step_zero(&mut correlator, now);

        correlator.perform(ActionRequest::new("move", vec![json!("n")]), TIMEOUT, now).unwrap();
        let actions = correlator.on_step(&percept(1, Some("move"), Some("failed_path")), now).unwrap();

        assert_eq!(
            completion(&actions),
            Some(&Err(ActionError::Failed { action: "move".into(), reason: "failed_path".into() }))
        );
    }

    #[test]
    fn missing_result_is_unknown_failure() {
        let now = Instant::now();
        let mut correlator = ActionCorrelator::new(1);
        step_zero(&mut correlator, now);

        correlator.perform(ActionRequest::new("skip", vec![]), TIMEOUT, now).unwrap();
        let actions = correlator.on_step(&percept(1, Some("skip"), None), now).unwrap();

        assert_eq!(
            completion(&actions),
            Some(&Err(ActionError::Failed { action: "skip".into(), reason: "unknown".into() }))
        );
    }

    #[test]
    fn second_perform_is_sequencing_error() {
        let now = Instant::now();
        let mut correlator = ActionCorrelator::new(1);
        step_zero(&mut correlator, now);

        correlator.perform(ActionRequest::new("skip", vec![]), TIMEOUT, now).unwrap();
        let result = correlator.perform(ActionRequest::new("skip", vec![]), TIMEOUT, now);

        assert_eq!(result.unwrap_err(), ActionError::Sequencing { outstanding: Some(0) });
    }

    #[test]
    fn action_before_first_step_is_queued() {
        let now = Instant::now();
        let mut correlator = ActionCorrelator::new(1);

        let actions = correlator.perform(ActionRequest::new("skip", vec![]), TIMEOUT, now).unwrap();
        assert!(actions.is_empty());
        assert_eq!(correlator.pending().and_then(PendingAction::step_issued), None);

        let later = now + Duration::from_secs(1);
        let actions = correlator.on_step(&percept(0, None, None), later).unwrap();
        assert_eq!(sent(&actions), vec![(100, "skip".to_string())]);
        assert_eq!(correlator.next_deadline(), Some(later + TIMEOUT));
    }

    #[test]
    fn skipped_step_is_protocol_error() {
        let now = Instant::now();
        let mut correlator = ActionCorrelator::new(1);
        step_zero(&mut correlator, now);

        correlator.perform(ActionRequest::new("skip", vec![]), TIMEOUT, now).unwrap();
        let err = correlator.on_step(&percept(2, Some("skip"), Some("success")), now).unwrap_err();

        assert_eq!(err, ProtocolError::StepMismatch { issued: 0, observed: 2 });
        assert!(correlator.pending().is_some());
    }

    #[test]
    fn regressing_step_is_protocol_error() {
        let now = Instant::now();
        let mut correlator = ActionCorrelator::new(1);
        correlator.on_step(&percept(5, None, None), now).unwrap();

        let err = correlator.on_step(&percept(5, None, None), now).unwrap_err();
        assert_eq!(err, ProtocolError::StepRegressed { previous: 5, observed: 5 });
    }

    #[test]
    fn different_echoed_verb_is_protocol_error() {
        let now = Instant::now();
        let mut correlator = ActionCorrelator::new(1);
        step_zero(&mut correlator, now);

        correlator.perform(ActionRequest::new("move", vec![json!("e")]), TIMEOUT, now).unwrap();
        let err = correlator.on_step(&percept(1, Some("rotate"), Some("success")), now).unwrap_err();

        assert_eq!(err, ProtocolError::ActionMismatch { sent: "move".into(), echoed: "rotate".into() });
    }

    #[test]
    fn late_action_is_resent_once() {
        let now = Instant::now();
        let mut correlator = ActionCorrelator::new(1);
        step_zero(&mut correlator, now);

        correlator.perform(ActionRequest::new("attach", vec![json!("s")]), TIMEOUT, now).unwrap();

        let actions = correlator.on_step(&percept(1, Some("no_action"), Some("success")), now).unwrap();
        assert_eq!(sent(&actions), vec![(101, "attach".to_string())]);
        assert!(completion(&actions).is_none());
        assert_eq!(correlator.next_deadline(), Some(now + TIMEOUT));

        let actions = correlator.on_step(&percept(2, Some("no_action"), Some("success")), now).unwrap();
        assert!(sent(&actions).is_empty());
        assert_eq!(
            completion(&actions),
            Some(&Err(ActionError::Failed { action: "attach".into(), reason: "no_action".into() }))
        );
    }

    #[test]
    fn timeout_frees_the_slot() {
        let now = Instant::now();
        let mut correlator = ActionCorrelator::new(1);
        step_zero(&mut correlator, now);

        correlator.perform(ActionRequest::new("skip", vec![]), TIMEOUT, now).unwrap();
        assert!(correlator.poll_timeout(now + Duration::from_secs(1)).is_empty());

        let actions = correlator.poll_timeout(now + TIMEOUT);
        assert_eq!(
            completion(&actions),
            Some(&Err(ActionError::Timeout { action: "skip".into(), timeout: TIMEOUT }))
        );
        assert!(correlator.pending().is_none());

        // step 0 already has an action in flight, so the retry waits for step 1
        let actions = correlator.perform(ActionRequest::new("skip", vec![]), TIMEOUT, now + TIMEOUT).unwrap();
        assert!(actions.is_empty());

        let actions = correlator.on_step(&percept(1, Some("skip"), Some("success")), now + TIMEOUT).unwrap();
        assert_eq!(sent(&actions), vec![(101, "skip".to_string())]);
        assert!(completion(&actions).is_none());
    }

    #[test]
    fn abort_fails_pending_action() {
        let now = Instant::now();
        let mut correlator = ActionCorrelator::new(1);
        assert!(correlator.abort(ActionError::ConnectionClosed).is_empty());

        correlator.perform(ActionRequest::new("skip", vec![]), TIMEOUT, now).unwrap();
        let actions = correlator.abort(ActionError::ConnectionClosed);
        assert_eq!(completion(&actions), Some(&Err(ActionError::ConnectionClosed)));
    }
}
