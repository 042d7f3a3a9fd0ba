//! Host run controller.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use scriptbridge_core::{BridgeConfig, ErrorKind, Message};
use scriptbridge_transport::{Endpoint, Receiver, SendError, Sender};

use crate::{input::InputCollector, run_log::RunLog};

/// Controller error.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("A run is already in flight")]
    AlreadyRunning,
    #[error("No run is in flight")]
    NotRunning,
    #[error("Execution context disconnected")]
    Disconnected,
    #[error("Send error: {0}")]
    Send(#[from] SendError),
}

/// The outstanding run.
#[derive(Debug)]
struct RunRequest {
    started: Instant,
    failure: Option<ErrorKind>,
}

/// Result of one completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Everything the run printed, failure text included.
    pub output: String,
    /// Time from `run` to `run-end`.
    pub elapsed: Duration,
    /// Set when the run ended with a reported failure.
    pub error: Option<ErrorKind>,
}

impl RunSummary {
    /// Whether the run completed without a reported failure.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Issues runs to an execution context and interprets its replies.
///
/// At most one run is in flight; a new run is refused until the previous
/// one's `run-end` has been observed.
pub struct RunController {
    sender: Sender,
    receiver: Receiver,
    collector: Arc<dyn InputCollector>,
    log: Arc<RunLog>,
    in_flight: Option<RunRequest>,
    last_elapsed: Option<Duration>,
}

impl RunController {
    /// Create a controller talking through `endpoint`.
    #[must_use]
    pub fn new(endpoint: Endpoint, collector: Arc<dyn InputCollector>, config: &BridgeConfig) -> Self {
        let (sender, receiver) = endpoint.split();
        Self {
            sender,
            receiver,
            collector,
            log: Arc::new(RunLog::new(config.history_limit_bytes)),
            in_flight: None,
            last_elapsed: None,
        }
    }

    /// Log of the current run.
    #[must_use]
    pub fn log(&self) -> Arc<RunLog> {
        Arc::clone(&self.log)
    }

    /// Whether a run is outstanding.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Output accumulated for the current (or last) run.
    #[must_use]
    pub fn output(&self) -> String {
        self.log.output()
    }

    /// Elapsed time of the last completed run.
    #[must_use]
    pub const fn last_elapsed(&self) -> Option<Duration> {
        self.last_elapsed
    }

    /// Start a run of `source`.
    ///
    /// # Errors
    /// Returns error if a run is already in flight or the execution context
    /// is gone.
    pub fn start_run(&mut self, source: impl Into<String>) -> Result<(), ControllerError> {
        if self.in_flight.is_some() {
            return Err(ControllerError::AlreadyRunning);
        }

        self.sender.send(Message::run(source))?;
        self.log.reset();
        self.in_flight = Some(RunRequest {
            started: Instant::now(),
            failure: None,
        });
        tracing::debug!("Run started");
        Ok(())
    }

    /// Ask the execution context to abort the run in flight.
    ///
    /// The run still ends through the usual `run-end`.
    ///
    /// # Errors
    /// Returns error if no run is in flight or the execution context is gone.
    pub fn abort(&self) -> Result<(), ControllerError> {
        if self.in_flight.is_none() {
            return Err(ControllerError::NotRunning);
        }
        self.sender.send(Message::Abort)?;
        Ok(())
    }

    /// Apply one message from the execution context.
    ///
    /// Returns the summary when `msg` ended the run.
    ///
    /// # Errors
    /// Returns error if an input response cannot be sent.
    pub async fn handle_message(&mut self, msg: Message) -> Result<Option<RunSummary>, ControllerError> {
        let Some(run) = self.in_flight.as_mut() else {
            tracing::warn!(kind = msg.kind(), "Ignoring message: no run in flight");
            return Ok(None);
        };

        match msg {
            Message::Output { data, error } => {
                self.log.push_output(data);
                if let Some(kind) = error {
                    run.failure = Some(kind);
                    self.log.push_failure(kind);
                }
                Ok(None)
            }
            Message::InputRequest { prompt } => {
                tracing::debug!(%prompt, "Input requested");
                self.log.push_prompt(prompt.as_str());
                let answer = match self.collector.collect(&prompt).await {
                    Some(answer) => answer,
                    None => {
                        tracing::debug!("Prompt cancelled, answering empty");
                        String::new()
                    }
                };
                self.sender.send(Message::input_response(answer))?;
                Ok(None)
            }
            Message::RunEnd => {
                let Some(run) = self.in_flight.take() else {
                    return Ok(None);
                };
                let elapsed = run.started.elapsed();
                self.last_elapsed = Some(elapsed);
                self.log.push_finished(elapsed);
                tracing::debug!(elapsed_ms = elapsed.as_millis(), "Run ended");
                Ok(Some(RunSummary {
                    output: self.log.output(),
                    elapsed,
                    error: run.failure,
                }))
            }
            other => {
                tracing::warn!(kind = other.kind(), "Ignoring unexpected message");
                Ok(None)
            }
        }
    }

    /// Process messages until the run in flight ends.
    ///
    /// Never returns if the script waits on input that is never answered.
    ///
    /// # Errors
    /// Returns error if no run is in flight or the execution context goes
    /// away first.
    pub async fn wait_for_completion(&mut self) -> Result<RunSummary, ControllerError> {
        if self.in_flight.is_none() {
            return Err(ControllerError::NotRunning);
        }
        loop {
            let msg = self.receiver.recv().await.ok_or(ControllerError::Disconnected)?;
            if let Some(summary) = self.handle_message(msg).await? {
                return Ok(summary);
            }
        }
    }

    /// Start a run of `source` and wait for it to end.
    ///
    /// # Errors
    /// See [`RunController::start_run`] and
    /// [`RunController::wait_for_completion`].
    pub async fn run(&mut self, source: impl Into<String>) -> Result<RunSummary, ControllerError> {
        self.start_run(source)?;
        self.wait_for_completion().await
    }
}
