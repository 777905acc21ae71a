use thiserror::Error;

use crate::core::domain::Language;

/// Failures that are reported back to the caller as data inside an
/// `ExecutionResult`, never propagated.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ExecutionError {
    /// Raised or thrown by the submitted program.
    #[error("{message}")]
    Program {
        message: String,
        stack_trace: Option<String>,
    },
    #[error("Execution timeout")]
    Timeout,
    #[error("Execution aborted")]
    Aborted,
    #[error("{} runtime not available", .0.display_name())]
    RuntimeUnavailable(Language),
    #[error("Syntax error in {} code", .0.id())]
    Validation(Language),
}

impl ExecutionError {
    pub fn program(message: impl Into<String>) -> Self {
        ExecutionError::Program {
            message: message.into(),
            stack_trace: None,
        }
    }
}

// TODO: Separate failures caused by the host environment from bugs in the runners
#[derive(Clone, Debug, Error)]
pub enum RunnerError {
    #[error("Unknown language: {id:?}")]
    UnknownLanguage { id: String },
    #[error("{msg}")]
    Internal { msg: String },
    #[error("Runner panicked: {msg}")]
    Panicked { msg: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(ExecutionError::Timeout.to_string(), "Execution timeout");
        assert_eq!(
            ExecutionError::RuntimeUnavailable(Language::Python).to_string(),
            "Python runtime not available"
        );
        assert_eq!(
            ExecutionError::Validation(Language::Other("go".to_string())).to_string(),
            "Syntax error in go code"
        );
        assert_eq!(ExecutionError::program("boom").to_string(), "boom");
    }
}
