//! Host side of the script execution bridge.
//!
//! Provides:
//! - `RunController` - Issues runs and interprets execution context replies
//! - `RunLog` - Exact output and event feed of the current run
//! - `InputCollector` - Seam for surfacing prompts to the user

pub mod controller;
pub mod input;
pub mod run_log;

pub use controller::{ControllerError, RunController, RunSummary};
pub use input::{CancelInput, InputCollector, ScriptedInput};
pub use run_log::{RunEvent, RunLog};
