//! Transport layer for the script execution bridge.
//!
//! Provides:
//! - In-process endpoint pair (ordered per direction)
//! - JSON-lines framing for an execution context in a child process

pub mod channel;
pub mod lines;

pub use channel::{Endpoint, Receiver, SendError, Sender, Side, pair};
pub use lines::{LinkTasks, connect};
