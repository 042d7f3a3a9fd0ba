//! Execution session: one run of a script from `run` to `run-end`.

use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{FutureExt, future::BoxFuture};
use scriptbridge_core::{HostFunctions, Interpreter, Message, ScriptError};
use scriptbridge_transport::Sender;
use tokio::sync::{Notify, watch};
use uuid::Uuid;

use crate::input::{InputSlot, SlotError};

/// Session identifier, used only for diagnostics.
pub type SessionId = Uuid;

/// Lifecycle of the execution context's current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session has run yet.
    Idle,
    /// The interpreter is evaluating.
    Running,
    /// Suspended inside `read`, waiting for `input-response`.
    AwaitingInput,
    /// Finished without an unhandled error.
    Completed,
    /// Finished with an error that was reported as output.
    Failed,
}

impl SessionState {
    /// Whether a session in this state is still in flight.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::AwaitingInput)
    }
}

/// Host functions bound to one session.
pub struct SessionHost {
    id: SessionId,
    outbox: Sender,
    input: InputSlot,
    ended: AtomicBool,
    end_signal: Notify,
}

impl SessionHost {
    fn new(id: SessionId, outbox: Sender, input: InputSlot) -> Self {
        Self {
            id,
            outbox,
            input,
            ended: AtomicBool::new(false),
            end_signal: Notify::new(),
        }
    }

    fn emit(&self, msg: Message) {
        if self.ended.load(Ordering::Acquire) {
            tracing::debug!(session = %self.id, kind = msg.kind(), "Session already ended, dropping message");
            return;
        }
        if let Err(e) = self.outbox.send(msg) {
            tracing::debug!(session = %self.id, "Failed to emit message: {e}");
        }
    }

    /// Emit `run-end` unless it has already been sent. Returns whether this
    /// call sent it.
    fn signal_end(&self) -> bool {
        if self.ended.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Err(e) = self.outbox.send(Message::RunEnd) {
            tracing::debug!(session = %self.id, "Failed to emit run-end: {e}");
        }
        self.end_signal.notify_one();
        true
    }
}

#[async_trait]
impl HostFunctions for SessionHost {
    fn print(&self, text: &str) {
        self.emit(Message::output(text));
    }

    fn println(&self, text: &str) {
        self.emit(Message::output(format!("{text}\n")));
    }

    async fn read(&self, prompt: &str) -> String {
        if self.ended.load(Ordering::Acquire) {
            tracing::debug!(session = %self.id, "read after end, answering empty");
            return String::new();
        }
        self.input.request(&self.outbox, prompt).await
    }

    fn end(&self) {
        if self.signal_end() {
            tracing::debug!(session = %self.id, "Script signalled end explicitly");
        }
    }
}

/// An active session and the interpreter future driving it.
pub struct Session {
    id: SessionId,
    host: Arc<SessionHost>,
    task: BoxFuture<'static, Result<(), ScriptError>>,
    state: Arc<watch::Sender<SessionState>>,
}

impl Session {
    /// Begin interpreting `code`.
    ///
    /// The returned session does nothing until [`Session::outcome`] is polled.
    #[must_use]
    pub fn start(
        interpreter: Arc<dyn Interpreter>,
        code: String,
        outbox: Sender,
        state: Arc<watch::Sender<SessionState>>,
        poll_interval: Duration,
    ) -> Self {
        let id = Uuid::new_v4();
        let slot = InputSlot::new(Arc::clone(&state), poll_interval);
        let host = Arc::new(SessionHost::new(id, outbox, slot));
        state.send_replace(SessionState::Running);

        let task = {
            let host = Arc::clone(&host);
            async move {
                AssertUnwindSafe(interpreter.execute(&code, &*host))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(ScriptError::panic(&*payload)))
            }
            .boxed()
        };

        tracing::debug!(session = %id, "Session started");
        Self {
            id,
            host,
            task,
            state,
        }
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Hand an `input-response` payload to the suspended `read`.
    ///
    /// # Errors
    /// Returns error if no `read` is outstanding or an answer is already
    /// pending.
    pub fn deliver_input(&self, data: String) -> Result<(), SlotError> {
        self.host.input.fill(data)
    }

    /// Drive the interpreter until it finishes or the script calls `end()`.
    pub async fn outcome(&mut self) -> Result<(), ScriptError> {
        tokio::select! {
            biased;
            () = self.host.end_signal.notified() => Ok(()),
            result = &mut self.task => result,
        }
    }

    /// Convert the interpreter's outcome into the terminal messages.
    ///
    /// A failure becomes one `output` carrying its description, and every
    /// session ends with exactly one `run-end`.
    pub fn finish(self, outcome: Result<(), ScriptError>) -> SessionState {
        let terminal = match outcome {
            Ok(()) => SessionState::Completed,
            Err(e) => {
                tracing::info!(session = %self.id, kind = %e.kind, "Run failed: {e}");
                self.host.emit(Message::failure(e.kind, e.to_string()));
                SessionState::Failed
            }
        };
        self.state.send_replace(terminal);
        self.host.signal_end();
        tracing::debug!(session = %self.id, state = ?terminal, "Session finished");
        terminal
    }
}

#[cfg(test)]
mod tests {
    use scriptbridge_core::ErrorKind;
    use scriptbridge_transport::{Receiver, pair};

    use super::*;

    /// Interpreter whose program is a list of host calls.
    struct Steps(Vec<Step>);

    #[derive(Clone)]
    enum Step {
        Print(&'static str),
        Echo(&'static str),
        End,
        Fail(&'static str),
        Panic,
    }

    #[async_trait]
    impl Interpreter for Steps {
        async fn execute(&self, _source: &str, host: &dyn HostFunctions) -> Result<(), ScriptError> {
            for step in &self.0 {
                match step {
                    Step::Print(text) => host.print(text),
                    Step::Echo(prompt) => {
                        let answer = host.read(prompt).await;
                        host.println(&answer);
                    }
                    Step::End => host.end(),
                    Step::Fail(msg) => return Err(ScriptError::runtime(*msg)),
                    Step::Panic => panic!("vm exploded"),
                }
            }
            Ok(())
        }
    }

    fn start(steps: Vec<Step>) -> (Session, Receiver) {
        let (host, worker) = pair();
        let (state, _) = watch::channel(SessionState::Idle);
        let session = Session::start(
            Arc::new(Steps(steps)),
            String::new(),
            worker.sender,
            Arc::new(state),
            Duration::from_millis(5),
        );
        (session, host.receiver)
    }

    fn drain(rx: &mut Receiver) -> Vec<Message> {
        std::iter::from_fn(|| rx.try_recv()).collect()
    }

    #[tokio::test]
    async fn test_completed_run() {
        let (mut session, mut rx) = start(vec![Step::Print("a"), Step::Print("b")]);
        assert_eq!(session.state(), SessionState::Running);

        let outcome = session.outcome().await;
        assert_eq!(session.finish(outcome), SessionState::Completed);
        assert_eq!(
            drain(&mut rx),
            vec![Message::output("a"), Message::output("b"), Message::RunEnd]
        );
    }

    #[tokio::test]
    async fn test_failure_reported_before_run_end() {
        let (mut session, mut rx) = start(vec![Step::Print("a"), Step::Fail("undefined variable 'x'")]);

        let outcome = session.outcome().await;
        assert_eq!(session.finish(outcome), SessionState::Failed);
        assert_eq!(
            drain(&mut rx),
            vec![
                Message::output("a"),
                Message::failure(ErrorKind::Runtime, "undefined variable 'x'"),
                Message::RunEnd,
            ]
        );
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let (mut session, mut rx) = start(vec![Step::Panic]);

        let outcome = session.outcome().await;
        assert_eq!(session.finish(outcome), SessionState::Failed);

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            Message::Output { data, error } => {
                assert_eq!(*error, Some(ErrorKind::Panic));
                assert!(data.contains("vm exploded"));
            }
            other => panic!("expected failure output, got {other:?}"),
        }
        assert_eq!(messages[1], Message::RunEnd);
    }

    #[tokio::test]
    async fn test_explicit_end_sends_single_run_end() {
        let (mut session, mut rx) = start(vec![Step::Print("a"), Step::End, Step::Print("late")]);

        let outcome = session.outcome().await;
        assert_eq!(session.finish(outcome), SessionState::Completed);
        assert_eq!(drain(&mut rx), vec![Message::output("a"), Message::RunEnd]);
    }

    #[tokio::test]
    async fn test_read_suspends_until_delivered() {
        let (mut session, mut rx) = start(vec![Step::Echo("name?")]);

        let pending = tokio::time::timeout(Duration::from_millis(30), session.outcome()).await;
        assert!(pending.is_err());
        assert_eq!(session.state(), SessionState::AwaitingInput);
        assert_eq!(drain(&mut rx), vec![Message::input_request("name?")]);

        session.deliver_input("Ada".into()).unwrap();
        let outcome = session.outcome().await;
        assert_eq!(session.finish(outcome), SessionState::Completed);
        assert_eq!(drain(&mut rx), vec![Message::output("Ada\n"), Message::RunEnd]);
    }

    #[tokio::test]
    async fn test_input_rejected_while_running() {
        let (session, _rx) = start(vec![Step::Print("a")]);
        assert_eq!(session.deliver_input("x".into()), Err(SlotError::NotAwaiting));
    }
}
