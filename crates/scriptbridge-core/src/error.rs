//! Errors raised while interpreting a script.

use serde::{Deserialize, Serialize};

/// Category of a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The source text could not be parsed.
    Syntax,
    /// Evaluation raised an error.
    Runtime,
    /// The interpreter panicked.
    Panic,
    /// The host aborted the run.
    Aborted,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Syntax => "syntax",
            Self::Runtime => "runtime",
            Self::Panic => "panic",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// An unhandled error that escaped interpretation.
///
/// Rendered to text for the output stream; the kind travels alongside it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ScriptError {
    /// Error category.
    pub kind: ErrorKind,
    /// Human readable description.
    pub message: String,
}

impl ScriptError {
    /// Create a new script error.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Syntax error.
    #[must_use]
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    /// Runtime error.
    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    /// Interpreter panic, with whatever payload the panic carried.
    #[must_use]
    pub fn panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::new(ErrorKind::Panic, format!("interpreter panicked: {detail}"))
    }

    /// The run was aborted by the host.
    #[must_use]
    pub fn aborted() -> Self {
        Self::new(ErrorKind::Aborted, "run aborted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payloads() {
        let err = ScriptError::panic(&"index out of bounds");
        assert_eq!(err.kind, ErrorKind::Panic);
        assert_eq!(err.to_string(), "interpreter panicked: index out of bounds");

        let err = ScriptError::panic(&String::from("owned"));
        assert!(err.message.ends_with("owned"));

        let err = ScriptError::panic(&42_u32);
        assert!(err.message.contains("unknown panic payload"));
    }
}
