//! Session driver task.
//!
//! One task owns the [`Session`] and both halves of the stream. It waits on
//! three sources at once: inbound frames, commands from the agent handles,
//! and the deadline of the outstanding action. Every transition it triggers
//! returns [`SessionAction`]s, which it executes before waiting again.
//!
//! The task exits once the session is `Closed`, shutting down the write half
//! on the way out.

use std::{collections::VecDeque, time::Duration};

use mapc_core::{
    ActionError, ActionReport, ActionRequest, CloseReason, ConnectionState, FrameReader,
    FrameWriter, Session, SessionAction, SessionError, TransportError,
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf},
    sync::{mpsc, oneshot, watch},
    time::Instant,
};
use tracing::{debug, trace, warn};

/// Reply channel for a `perform`.
pub(crate) type ActionReply = oneshot::Sender<Result<ActionReport, ActionError>>;

/// Reply channel for the authentication handshake.
pub(crate) type AuthReply = oneshot::Sender<Result<(), CloseReason>>;

/// Requests from agent handles to the driver.
#[derive(Debug)]
pub(crate) enum Command {
    /// Issue an action and reply with its outcome
    Perform { request: ActionRequest, timeout: Duration, reply: ActionReply },
    /// Close the session
    Close,
}

pub(crate) struct Driver<S> {
    session: Session,
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    auth_reply: Option<AuthReply>,
    action_reply: Option<ActionReply>,
}

/// Current time on the tokio clock, so simulated time applies under test.
fn now() -> std::time::Instant {
    Instant::now().into_std()
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

impl<S> Driver<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub(crate) fn new(
        session: Session,
        (reader, writer): (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>),
        commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<ConnectionState>,
        auth_reply: AuthReply,
    ) -> Self {
        Self {
            session,
            reader,
            writer,
            commands,
            state,
            auth_reply: Some(auth_reply),
            action_reply: None,
        }
    }

    pub(crate) async fn run(mut self) {
        let opened = self.session.open();
        self.settle(opened).await;

        while self.session.state() != ConnectionState::Closed {
            let deadline = self.session.next_deadline();

            tokio::select! {
                received = self.reader.receive() => {
                    let result = match received {
                        Ok(message) => {
                            debug!(kind = message.kind(), "<<");
                            trace!(?message, "<<");
                            self.session.handle_message(message, now())
                        },
                        Err(TransportError::Eof) => {
                            Err(SessionError::Connection("server closed the connection".to_string()))
                        },
                        Err(err) => Err(err.into()),
                    };
                    self.settle(result).await;
                },

                command = self.commands.recv() => match command {
                    Some(Command::Perform { request, timeout, reply }) => {
                        match self.session.perform(request, timeout, now()) {
                            Ok(actions) => {
                                self.action_reply = Some(reply);
                                self.execute(actions).await;
                            },
                            Err(err) => {
                                debug!(%err, "action rejected");
                                let _ = reply.send(Err(err));
                            },
                        }
                    },
                    // every handle is gone
                    Some(Command::Close) | None => {
                        let actions = self.session.close(CloseReason::Requested);
                        self.execute(actions).await;
                    },
                },

                () = sleep_until(deadline) => {
                    let actions = self.session.poll_timeout(now());
                    self.execute(actions).await;
                },
            }
        }

        if let Err(err) = self.writer.shutdown().await {
            trace!(%err, "shutdown after close");
        }
    }

    async fn settle(&mut self, result: Result<Vec<SessionAction>, SessionError>) {
        let actions = match result {
            Ok(actions) => actions,
            Err(err) => self.session.close(CloseReason::Fatal(err)),
        };
        self.execute(actions).await;
    }

    async fn execute(&mut self, actions: Vec<SessionAction>) {
        let mut queue = VecDeque::from(actions);
        self.state.send_replace(self.session.state());

        while let Some(action) = queue.pop_front() {
            match action {
                SessionAction::Send(message) => {
                    debug!(kind = message.kind(), ">>");
                    if let Err(err) = self.writer.send(&message).await {
                        queue.extend(self.session.close(CloseReason::Fatal(err.into())));
                        self.state.send_replace(self.session.state());
                    }
                },
                SessionAction::Authenticated => {
                    if let Some(reply) = self.auth_reply.take() {
                        let _ = reply.send(Ok(()));
                    }
                },
                SessionAction::Complete(result) => match self.action_reply.take() {
                    Some(reply) => {
                        let _ = reply.send(result);
                    },
                    None => warn!(?result, "action resolved with nobody waiting"),
                },
                SessionAction::Close { reason } => {
                    if let Some(reply) = self.auth_reply.take() {
                        let _ = reply.send(Err(reason));
                    }
                    self.action_reply = None;
                },
            }
        }
    }
}
