//! Error types for the bridge.
//!
//! Foreign exceptions never leave the fence as foreign exceptions. They are
//! described into a [`ForeignException`] and carried inside
//! [`UpdateError::Foreign`], so the engine only ever sees native errors.

use std::fmt;

use thiserror::Error;

use crate::engine::VertexId;

/// The foreign runtime refused to create a new pin.
///
/// Returned from the operation that needed the pin (bind, copy or assign).
/// The updater involved is never left half-initialized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to pin foreign updater: {reason}")]
pub struct PinError {
    reason: String,
}

impl PinError {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Diagnostics captured from a foreign exception before it was cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignException {
    /// Qualified name of the exception type, e.g. `ValueError`.
    pub type_name: String,
    /// `str()` of the exception value. Empty if it could not be rendered.
    pub message: String,
    /// Formatted foreign traceback, when the runtime provides one.
    pub traceback: Option<String>,
}

impl ForeignException {
    #[must_use]
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            traceback: None,
        }
    }

    #[must_use]
    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }
}

impl fmt::Display for ForeignException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.type_name)
        } else {
            write!(f, "{}: {}", self.type_name, self.message)
        }
    }
}

/// Errors raised by the engine harness itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("vertex {0} does not exist")]
    UnknownVertex(VertexId),
    #[error("graph cannot hold more vertices")]
    GraphFull,
    /// The run stopped after a failed update; no further work is accepted.
    #[error("engine run was aborted; no further updates will run")]
    Aborted,
}

/// Why a single vertex update failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    /// The updater holds no pin, so there is nothing to dispatch to.
    #[error("updater is not bound to a foreign object")]
    Unbound,
    /// The foreign callback raised. The exception was cleared at the fence.
    #[error("update of vertex {vertex} raised {exception}")]
    Foreign { vertex: i32, exception: ForeignException },
    /// A context handle was used after its update returned.
    #[error("execution context is no longer active")]
    StaleContext,
    #[error(transparent)]
    Pin(#[from] PinError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl UpdateError {
    /// Returns the captured foreign exception, if this failure came from one.
    #[must_use]
    pub fn foreign_exception(&self) -> Option<&ForeignException> {
        match self {
            Self::Foreign { exception, .. } => Some(exception),
            _ => None,
        }
    }
}
