//! Core error taxonomy.
//!
//! Variants map onto the error classes in spec.md §7: validation, not-found,
//! conflict, transient I/O, and fatal. HTTP status mapping happens at the
//! edge (`pureboot-controller`), not here.

use thiserror::Error;

/// Errors raised by `pureboot-core`'s domain operations.
#[derive(Debug, Error)]
pub enum PureBootError {
    /// Malformed MAC, malformed serial, invalid state transition, unknown
    /// architecture, or any other input that fails validation before any
    /// state is mutated.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown node, unknown workflow, or missing TFTP file.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate MAC/serial on create, or a concurrent transition that
    /// would violate an invariant.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A state transition was attempted against an install-attempt bound
    /// (`install_failed -> pending` without `force`).
    #[error("retry limit exceeded: {0}")]
    RetryLimitExceeded(String),

    /// A transition not present in the admissible-transitions table, and
    /// not forced.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// Originating state.
        from: String,
        /// Attempted destination state.
        to: String,
    },

    /// Filesystem I/O failure (symlink creation, config/cmdline write,
    /// workflow file read).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Workflow definition failed to parse.
    #[error("workflow deserialization failed: {0}")]
    WorkflowFormat(String),
}

impl PureBootError {
    /// True for the transient-I/O class that callers may retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
