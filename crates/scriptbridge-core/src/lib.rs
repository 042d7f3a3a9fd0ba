//! Core abstractions for the script execution bridge.
//!
//! This crate provides the fundamental building blocks:
//! - `Message` - The tagged records exchanged between host and execution context
//! - `ScriptError` / `ErrorKind` - Typed interpretation failures
//! - `Interpreter` and `HostFunctions` traits
//! - `BridgeConfig` - Shared tunables

pub mod config;
pub mod error;
pub mod protocol;
pub mod traits;

pub use config::{BridgeConfig, ConfigError};
pub use error::{ErrorKind, ScriptError};
pub use protocol::{Direction, Message, ProtocolError};
pub use traits::{HostFunctions, Interpreter};
