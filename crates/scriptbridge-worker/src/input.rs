//! Blocking input for interpreter host functions.
//!
//! `read` has to look synchronous to the script while the only way to get an
//! answer is an asynchronous `input-response` message. The calling task polls
//! a single pending-input slot at a fixed interval, yielding to the message
//! loop between checks so the answer can be stored while it waits.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use scriptbridge_core::Message;
use scriptbridge_transport::Sender;
use tokio::sync::watch;

use crate::session::SessionState;

/// Single-slot mailbox for the answer to the outstanding `read`.
///
/// Owned by one session. Holds at most one unconsumed value.
pub struct InputSlot {
    pending: Mutex<Option<String>>,
    state: Arc<watch::Sender<SessionState>>,
    poll_interval: Duration,
}

impl InputSlot {
    /// Create an empty slot that reports suspension through `state`.
    #[must_use]
    pub fn new(state: Arc<watch::Sender<SessionState>>, poll_interval: Duration) -> Self {
        Self {
            pending: Mutex::new(None),
            state,
            poll_interval,
        }
    }

    /// Whether a `read` is currently suspended on this slot.
    #[must_use]
    pub fn is_awaiting(&self) -> bool {
        *self.state.borrow() == SessionState::AwaitingInput
    }

    /// Whether an answer has been stored but not yet consumed.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Store the answer to the outstanding request.
    ///
    /// # Errors
    /// Returns error if nothing is waiting for input or an earlier answer has
    /// not been consumed yet. The slot is left untouched in both cases.
    pub fn fill(&self, value: String) -> Result<(), SlotError> {
        if !self.is_awaiting() {
            return Err(SlotError::NotAwaiting);
        }
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.is_some() {
            return Err(SlotError::Occupied);
        }
        *pending = Some(value);
        Ok(())
    }

    /// Send an `input-request` for `prompt` and suspend until it is answered.
    ///
    /// There is no timeout: an unanswered request keeps the caller suspended
    /// until the session is torn down.
    pub async fn request(&self, outbox: &Sender, prompt: &str) -> String {
        self.state.send_replace(SessionState::AwaitingInput);
        if let Err(e) = outbox.send(Message::input_request(prompt)) {
            tracing::warn!(prompt, "Failed to send input request: {e}");
        }

        let value = self.wait().await;
        self.state.send_replace(SessionState::Running);
        value
    }

    async fn wait(&self) -> String {
        loop {
            if let Some(value) = self.take() {
                return value;
            }
            tracing::trace!("Waiting for user to respond...");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn take(&self) -> Option<String> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Input slot error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("No input request is outstanding")]
    NotAwaiting,
    #[error("An earlier input response has not been consumed")]
    Occupied,
}

#[cfg(test)]
mod tests {
    use scriptbridge_transport::pair;

    use super::*;

    fn slot(interval_ms: u64) -> (Arc<InputSlot>, Arc<watch::Sender<SessionState>>) {
        let (state, _) = watch::channel(SessionState::Running);
        let state = Arc::new(state);
        let slot = Arc::new(InputSlot::new(
            Arc::clone(&state),
            Duration::from_millis(interval_ms),
        ));
        (slot, state)
    }

    #[test]
    fn test_fill_rejected_when_not_awaiting() {
        let (slot, _) = slot(10);
        assert_eq!(slot.fill("early".into()), Err(SlotError::NotAwaiting));
        assert!(!slot.has_pending());
    }

    #[test]
    fn test_second_fill_rejected() {
        let (slot, state) = slot(10);
        state.send_replace(SessionState::AwaitingInput);

        slot.fill("first".into()).unwrap();
        assert_eq!(slot.fill("second".into()), Err(SlotError::Occupied));
        assert_eq!(slot.take().as_deref(), Some("first"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_resumes_after_fill() {
        let (slot, state) = slot(100);
        let (mut host, worker) = pair();

        let waiter = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move { slot.request(&worker.sender, "name?").await })
        };

        assert_eq!(
            host.receiver.recv().await,
            Some(Message::input_request("name?"))
        );
        assert_eq!(*state.borrow(), SessionState::AwaitingInput);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(!waiter.is_finished());

        slot.fill("Ada".into()).unwrap();
        assert_eq!(waiter.await.unwrap(), "Ada");
        assert_eq!(*state.borrow(), SessionState::Running);
        assert!(!slot.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_never_resolves() {
        let (slot, _) = slot(100);
        let (_host, worker) = pair();

        let result = tokio::time::timeout(
            Duration::from_secs(60),
            slot.request(&worker.sender, "anyone?"),
        )
        .await;
        assert!(result.is_err());
        assert!(slot.is_awaiting());
    }
}
