//! Collecting answers to input prompts.

use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;

/// Trait for surfacing prompts to the user.
///
/// Implement this trait to integrate with your UI (a modal, a terminal line,
/// a chat box). The controller provides the protocol; your app implements
/// the UX.
#[async_trait]
pub trait InputCollector: Send + Sync {
    /// Show `prompt` and wait for an answer.
    ///
    /// # Returns
    /// The answer, or `None` if the user cancelled. A cancelled prompt is
    /// answered with an empty string so the script never stalls.
    async fn collect(&self, prompt: &str) -> Option<String>;
}

/// Collector that cancels every prompt.
#[derive(Debug, Default, Clone)]
pub struct CancelInput;

#[async_trait]
impl InputCollector for CancelInput {
    async fn collect(&self, _prompt: &str) -> Option<String> {
        None
    }
}

/// Collector that replays queued answers, cancelling once they run out.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    answers: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedInput {
    /// Create a collector that answers with `answers` in order.
    #[must_use]
    pub fn new<I>(answers: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts seen so far.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl InputCollector for ScriptedInput {
    async fn collect(&self, prompt: &str) -> Option<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}
