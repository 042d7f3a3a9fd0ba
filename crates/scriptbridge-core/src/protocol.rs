//! Wire protocol between the host controller and the execution context.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;

/// Every `type` tag the protocol knows about.
pub const MESSAGE_TYPES: [&str; 6] = [
    "run",
    "output",
    "input-request",
    "input-response",
    "run-end",
    "abort",
];

/// Which side of the bridge a message travels towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host controller to execution context.
    ToWorker,
    /// Execution context to host controller.
    ToHost,
}

/// A single message exchanged over the bridge.
///
/// Messages are immutable once sent; ownership moves to the receiving side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    /// Start a run of the given source text.
    Run { code: String },
    /// Program output. Emitted once per `print`/`println`, in order.
    Output {
        data: String,
        /// Set when this output reports the failure that ended the run.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorKind>,
    },
    /// The running script is blocked in `read` and needs an answer.
    InputRequest { prompt: String },
    /// Answer to the outstanding `input-request`.
    InputResponse { data: String },
    /// The session finished, successfully or with a reported failure.
    RunEnd,
    /// Tear down the active session at its current suspension point.
    Abort,
}

impl Message {
    /// Create a `run` message.
    #[must_use]
    pub fn run(code: impl Into<String>) -> Self {
        Self::Run { code: code.into() }
    }

    /// Create a plain `output` message.
    #[must_use]
    pub fn output(data: impl Into<String>) -> Self {
        Self::Output {
            data: data.into(),
            error: None,
        }
    }

    /// Create an `output` message that reports a failure.
    #[must_use]
    pub fn failure(kind: ErrorKind, data: impl Into<String>) -> Self {
        Self::Output {
            data: data.into(),
            error: Some(kind),
        }
    }

    /// Create an `input-request` message.
    #[must_use]
    pub fn input_request(prompt: impl Into<String>) -> Self {
        Self::InputRequest {
            prompt: prompt.into(),
        }
    }

    /// Create an `input-response` message.
    #[must_use]
    pub fn input_response(data: impl Into<String>) -> Self {
        Self::InputResponse { data: data.into() }
    }

    /// The `type` tag as it appears on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Run { .. } => "run",
            Self::Output { .. } => "output",
            Self::InputRequest { .. } => "input-request",
            Self::InputResponse { .. } => "input-response",
            Self::RunEnd => "run-end",
            Self::Abort => "abort",
        }
    }

    /// The direction this message is allowed to travel.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        match self {
            Self::Run { .. } | Self::InputResponse { .. } | Self::Abort => Direction::ToWorker,
            Self::Output { .. } | Self::InputRequest { .. } | Self::RunEnd => Direction::ToHost,
        }
    }

    /// Serialize to a single JSON record.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Parse a single JSON record.
    ///
    /// Unknown `type` tags are reported separately from malformed records so
    /// receivers can log them as protocol errors.
    ///
    /// # Errors
    /// Returns error if the record is not a known, well-formed message.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(raw).map_err(ProtocolError::Malformed)?;

        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;
        if !MESSAGE_TYPES.contains(&tag) {
            return Err(ProtocolError::UnknownType(tag.to_string()));
        }

        serde_json::from_value(value).map_err(ProtocolError::Malformed)
    }
}

/// Protocol error.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Message has no type tag")]
    MissingType,
    #[error("Malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}
