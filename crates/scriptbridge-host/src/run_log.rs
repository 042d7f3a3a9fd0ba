//! What the current run has produced, for the controller and any UI following it.
//!
//! The log keeps three things per run:
//! - the exact concatenation of every `output` chunk, never truncated;
//! - a transcript of [`RunEvent`]s replayed to followers that attach late,
//!   capped at a byte budget with the oldest events evicted first;
//! - one unbounded feed per follower, so a slow reader delays but never
//!   loses events.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::{StreamExt, future, stream::BoxStream};
use scriptbridge_core::ErrorKind;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Something the UI should reflect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// Program output, in arrival order.
    Output(String),
    /// The script is waiting for an answer to this prompt.
    Prompt(String),
    /// The preceding output reported a failure of this kind.
    Failed(ErrorKind),
    /// The run ended after this long.
    Finished(Duration),
}

impl RunEvent {
    /// Rough transcript cost of the event.
    fn weight(&self) -> usize {
        const TAG: usize = 8;
        match self {
            Self::Output(text) | Self::Prompt(text) => TAG + text.len(),
            Self::Failed(_) | Self::Finished(_) => TAG,
        }
    }
}

#[derive(Default)]
struct Transcript {
    events: VecDeque<RunEvent>,
    weight: usize,
    evicted: usize,
}

impl Transcript {
    fn append(&mut self, event: RunEvent, budget: usize) {
        let weight = event.weight();
        while self.weight + weight > budget {
            let Some(oldest) = self.events.pop_front() else {
                break;
            };
            self.weight -= oldest.weight();
            self.evicted += 1;
        }
        self.weight += weight;
        self.events.push_back(event);
    }
}

#[derive(Default)]
struct State {
    output: String,
    transcript: Transcript,
    followers: Vec<mpsc::UnboundedSender<RunEvent>>,
}

/// Per-run output accumulator and event feed.
pub struct RunLog {
    state: Mutex<State>,
    transcript_budget: usize,
}

impl RunLog {
    /// Create a log whose replay transcript holds about `transcript_budget`
    /// bytes.
    #[must_use]
    pub fn new(transcript_budget: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            transcript_budget,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `event` and hand it to every follower.
    pub fn record(&self, event: RunEvent) {
        let mut state = self.state();
        if let RunEvent::Output(text) = &event {
            state.output.push_str(text);
        }
        state
            .followers
            .retain(|follower| follower.send(event.clone()).is_ok());
        state.transcript.append(event, self.transcript_budget);
    }

    pub fn push_output(&self, text: impl Into<String>) {
        self.record(RunEvent::Output(text.into()));
    }

    pub fn push_prompt(&self, prompt: impl Into<String>) {
        self.record(RunEvent::Prompt(prompt.into()));
    }

    pub fn push_failure(&self, kind: ErrorKind) {
        self.record(RunEvent::Failed(kind));
    }

    pub fn push_finished(&self, elapsed: Duration) {
        self.record(RunEvent::Finished(elapsed));
    }

    /// Start over for a new run. Followers stay attached.
    pub fn reset(&self) {
        let mut state = self.state();
        state.output.clear();
        state.transcript = Transcript::default();
    }

    /// Everything the run has printed so far, in order.
    #[must_use]
    pub fn output(&self) -> String {
        self.state().output.clone()
    }

    /// Events still available for replay.
    #[must_use]
    pub fn transcript(&self) -> Vec<RunEvent> {
        self.state().transcript.events.iter().cloned().collect()
    }

    /// Number of events dropped from the front of the transcript this run.
    #[must_use]
    pub fn evicted(&self) -> usize {
        self.state().transcript.evicted
    }

    /// Replay the transcript, then every later event, without gaps or
    /// duplicates.
    #[must_use]
    pub fn follow(&self) -> BoxStream<'static, RunEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        if state.transcript.evicted > 0 {
            tracing::warn!(
                evicted = state.transcript.evicted,
                "Follower attached after the transcript was trimmed"
            );
        }
        for event in &state.transcript.events {
            let _ = tx.send(event.clone());
        }
        state.followers.push(tx);
        drop(state);

        UnboundedReceiverStream::new(rx).boxed()
    }

    /// Output chunks from [`RunLog::follow`] up to the end of the run.
    #[must_use]
    pub fn output_stream(&self) -> BoxStream<'static, String> {
        self.follow()
            .take_while(|event| future::ready(!matches!(event, RunEvent::Finished(_))))
            .filter_map(|event| {
                future::ready(match event {
                    RunEvent::Output(text) => Some(text),
                    _ => None,
                })
            })
            .boxed()
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new(scriptbridge_core::config::DEFAULT_HISTORY_LIMIT_BYTES)
    }
}
