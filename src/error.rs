//! Error types for the reactive tree core
//!
//! Recoverable evaluation failures are caught at the expression dispatch
//! points, logged, and turned into `Value::Undefined`; they never abort a
//! node's evaluation pass. Structural-invariant violations are programming
//! errors and panic instead of returning an error.

use thiserror::Error;

use crate::tree::NodeId;

/// Result type alias for tree-core operations
pub type Result<T> = std::result::Result<T, AxError>;

/// Error type for expression evaluation and provider interaction
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AxError {
    /// Integer arithmetic exceeded the fixed-width range
    #[error("integer overflow in '{operation}'")]
    IntegerOverflow {
        /// Operation that overflowed (e.g. "add", "mul")
        operation: &'static str,
    },

    /// Division or modulo by zero
    #[error("division by zero")]
    DivisionByZero,

    /// A value was applied or dotted in a way its variant does not support
    #[error("type error: {message}")]
    TypeError {
        /// Human-readable type error message
        message: String,
    },

    /// A callable was invoked with the wrong number of arguments
    #[error("routine '{name}' expects {expected} argument(s), got {actual}")]
    ArityMismatch {
        /// Routine or method name
        name: String,
        /// Expected argument count
        expected: usize,
        /// Actual argument count
        actual: usize,
    },

    /// The referenced node is no longer alive
    #[error("node {node:?} is dead")]
    DeadNode {
        /// Identity of the dead node
        node: NodeId,
    },

    /// A provider reported a transient backend failure (remote object gone,
    /// timeout, unsupported interface); the property stays unknown
    #[error("provider failure for '{identifier}': {message}")]
    ProviderFailure {
        /// Identifier being resolved when the provider failed
        identifier: String,
        /// Backend-supplied description
        message: String,
    },

    /// Generic evaluation failure
    #[error("evaluation error: {message}")]
    EvaluationError {
        /// Human-readable evaluation error message
        message: String,
    },
}

impl AxError {
    /// Shorthand for a type error
    pub fn type_error(message: impl Into<String>) -> Self {
        AxError::TypeError {
            message: message.into(),
        }
    }

    /// Shorthand for a generic evaluation error
    pub fn evaluation(message: impl Into<String>) -> Self {
        AxError::EvaluationError {
            message: message.into(),
        }
    }

    /// Whether this failure is expected in normal operation and should be
    /// swallowed into `Undefined` rather than routed to the error sink.
    pub fn is_recoverable(&self) -> bool {
        match self {
            AxError::IntegerOverflow { .. }
            | AxError::DivisionByZero
            | AxError::TypeError { .. }
            | AxError::ArityMismatch { .. }
            | AxError::DeadNode { .. }
            | AxError::ProviderFailure { .. } => true,
            AxError::EvaluationError { .. } => false,
        }
    }
}

/// Process-wide sink for unexpected (non-recoverable) errors.
///
/// The default sink logs at error level; embedders replace it to crash,
/// report, or count.
pub type ErrorSink = Box<dyn Fn(&AxError)>;

/// Default error sink used when the embedder installs none.
pub fn default_error_sink() -> ErrorSink {
    Box::new(|err| log::error!("unexpected tree-core error: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(AxError::DivisionByZero.is_recoverable());
        assert!(
            AxError::IntegerOverflow { operation: "add" }.is_recoverable()
        );
        assert!(!AxError::evaluation("internal").is_recoverable());
    }

    #[test]
    fn error_messages_are_stable() {
        let err = AxError::ArityMismatch {
            name: "child_matches".into(),
            expected: 1,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "routine 'child_matches' expects 1 argument(s), got 2"
        );
    }
}
