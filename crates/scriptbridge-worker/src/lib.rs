//! Execution context for hosted interpreters.
//!
//! Provides:
//! - `ExecutionContext` - Runs one session at a time behind the message protocol
//! - `Session` / `SessionState` - The per-run state machine
//! - `InputSlot` - Blocking input emulated by polling a single pending slot

pub mod context;
pub mod input;
pub mod session;

pub use context::ExecutionContext;
pub use input::{InputSlot, SlotError};
pub use session::{Session, SessionHost, SessionId, SessionState};
