//! Seams between the bridge and the interpreter it hosts.

use async_trait::async_trait;

use crate::ScriptError;

/// Host functions the interpreter calls back into.
///
/// `print` and `println` never suspend. `read` suspends the calling script
/// until the host side answers, without blocking the execution context.
#[async_trait]
pub trait HostFunctions: Send + Sync {
    /// Emit `text` as one output chunk.
    fn print(&self, text: &str);

    /// Emit `text` followed by a newline as one output chunk.
    fn println(&self, text: &str);

    /// Ask the user for a line of input.
    ///
    /// Returns the answer, which is empty when the user cancelled.
    async fn read(&self, prompt: &str) -> String;

    /// Same as [`HostFunctions::read`]; kept for scripts written against the
    /// async-named built-in.
    async fn read_async(&self, prompt: &str) -> String {
        self.read(prompt).await
    }

    /// Signal completion explicitly instead of waiting for the interpreter
    /// to return.
    fn end(&self);
}

/// Black-box interpreter consumed by the execution context.
#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Interpret `source` to completion, calling back into `host` for I/O.
    ///
    /// # Errors
    /// Returns the unhandled error that ended interpretation.
    async fn execute(&self, source: &str, host: &dyn HostFunctions) -> Result<(), ScriptError>;
}
