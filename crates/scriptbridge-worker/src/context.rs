//! The execution context: owns the interpreter and runs one session at a time.

use std::sync::Arc;

use scriptbridge_core::{BridgeConfig, Interpreter, Message, ScriptError};
use scriptbridge_transport::{Endpoint, Sender, Side, connect};
use tokio::{sync::watch, task::JoinHandle};

use crate::session::{Session, SessionState};

/// Isolated context that executes scripts on behalf of the host.
///
/// Processes one inbound message at a time. While a session is suspended in
/// `read`, the loop keeps dequeuing so the `input-response` can reach it.
pub struct ExecutionContext {
    interpreter: Arc<dyn Interpreter>,
    config: BridgeConfig,
    state: Arc<watch::Sender<SessionState>>,
}

impl ExecutionContext {
    /// Create a context around `interpreter`.
    #[must_use]
    pub fn new(interpreter: Arc<dyn Interpreter>, config: BridgeConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            interpreter,
            config,
            state: Arc::new(state),
        }
    }

    /// Observe session state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Serve on a background task.
    #[must_use]
    pub fn spawn(self, endpoint: Endpoint) -> JoinHandle<()> {
        tokio::spawn(self.serve(endpoint))
    }

    /// Serve messages from `endpoint` until the host goes away.
    ///
    /// A session still active at that point is abandoned without a
    /// terminal message.
    pub async fn serve(self, endpoint: Endpoint) {
        let (outbox, mut inbox) = endpoint.split();
        let mut active: Option<Session> = None;

        loop {
            tokio::select! {
                biased;
                msg = inbox.recv() => {
                    let Some(msg) = msg else {
                        if let Some(session) = active.take() {
                            tracing::warn!(session = %session.id(), "Host disconnected, abandoning session");
                        }
                        break;
                    };
                    self.dispatch(msg, &mut active, &outbox);
                }
                outcome = next_outcome(&mut active) => {
                    if let Some(session) = active.take() {
                        session.finish(outcome);
                    }
                }
            }
        }

        tracing::debug!("Execution context stopped");
    }

    /// Serve over this process's stdin/stdout, one JSON record per line.
    ///
    /// Returns once stdin closes and every outgoing message is flushed.
    pub async fn serve_stdio(self) {
        let (endpoint, tasks) = connect(tokio::io::stdin(), tokio::io::stdout(), Side::Worker);
        self.serve(endpoint).await;
        tasks.flush().await;
    }

    fn dispatch(&self, msg: Message, active: &mut Option<Session>, outbox: &Sender) {
        tracing::debug!(kind = msg.kind(), "Execution context received message");

        match msg {
            Message::Run { code } => {
                if let Some(session) = active {
                    tracing::warn!(
                        session = %session.id(),
                        "Ignoring run: a session is already active"
                    );
                    return;
                }
                *active = Some(Session::start(
                    Arc::clone(&self.interpreter),
                    code,
                    outbox.clone(),
                    Arc::clone(&self.state),
                    self.config.input_poll_interval(),
                ));
            }
            Message::InputResponse { data } => match active {
                Some(session) => {
                    if let Err(e) = session.deliver_input(data) {
                        tracing::warn!(session = %session.id(), "Ignoring input response: {e}");
                    }
                }
                None => tracing::warn!("Ignoring input response: no active session"),
            },
            Message::Abort => match active.take() {
                Some(session) => {
                    tracing::info!(session = %session.id(), "Aborting session");
                    session.finish(Err(ScriptError::aborted()));
                }
                None => tracing::warn!("Ignoring abort: no active session"),
            },
            other => tracing::warn!(kind = other.kind(), "Ignoring unexpected message"),
        }
    }
}

async fn next_outcome(active: &mut Option<Session>) -> Result<(), ScriptError> {
    match active {
        Some(session) => session.outcome().await,
        None => std::future::pending().await,
    }
}
