//! Python exceptions raised by the bridge.
//!
//! A foreign exception raised inside an update never travels through the
//! engine as a Python exception: it is fenced into a native error on the
//! worker thread. Only when the run returns to the Python caller of
//! `Core.start()` is the failure re-expressed as a fresh `UpdateError`.

use pyo3::{
    exceptions::{self, PyMemoryError, PyRuntimeError, PyValueError},
    prelude::*,
};
use updater_bridge::{EngineError, PinError, UpdateError, UpdateFailure};

/// Raised by `Core.start()` when at least one update failed.
///
/// Describes the first failure; `failures` counts all of them. The original
/// Python exception's type name and message are preserved as strings.
#[pyclass(name = "UpdateError", extends=exceptions::PyRuntimeError, module="_updater_bridge")]
pub struct PyUpdateError {
    /// Engine-side id of the vertex whose update failed.
    #[pyo3(get)]
    vertex_id: u32,
    /// Application id of that vertex, if known.
    #[pyo3(get)]
    app_id: Option<i32>,
    /// Qualified type name of the exception the updater raised, or None if
    /// the failure did not come from the updater.
    #[pyo3(get)]
    exception_type: Option<String>,
    /// Message of the original exception, or a description of the failure.
    #[pyo3(get)]
    exception_message: String,
    /// Number of updates that failed during the run.
    #[pyo3(get)]
    failures: usize,
    /// Formatted traceback of the original exception, when available.
    #[pyo3(get)]
    traceback: Option<String>,
}

impl PyUpdateError {
    /// Builds the `UpdateError` for `failure`, the first of `failures` failed updates.
    #[must_use]
    pub fn new_err(py: Python<'_>, failure: &UpdateFailure, app_id: Option<i32>, failures: usize) -> PyErr {
        let (exception_type, exception_message, traceback) = match failure.error.foreign_exception() {
            Some(exception) => (
                Some(exception.type_name.clone()),
                exception.message.clone(),
                exception.traceback.clone(),
            ),
            None => (None, failure.error.to_string(), None),
        };
        let error = Self {
            vertex_id: failure.vertex.raw(),
            app_id,
            exception_type,
            exception_message,
            failures,
            traceback,
        };
        match Py::new(py, error) {
            Ok(err) => PyErr::from_value(err.into_bound(py).into_any()),
            Err(e) => e,
        }
    }
}

#[pymethods]
impl PyUpdateError {
    fn __str__(&self) -> String {
        let cause = match &self.exception_type {
            Some(type_name) if self.exception_message.is_empty() => type_name.clone(),
            Some(type_name) => format!("{type_name}: {}", self.exception_message),
            None => self.exception_message.clone(),
        };
        let vertex = self.app_id.map_or_else(|| self.vertex_id.to_string(), |id| id.to_string());
        if self.failures > 1 {
            format!(
                "update of vertex {vertex} failed: {cause} ({} updates failed)",
                self.failures
            )
        } else {
            format!("update of vertex {vertex} failed: {cause}")
        }
    }

    fn __repr__(&self) -> String {
        format!("UpdateError({})", self.__str__())
    }
}

/// Converts a native error hit by a Python call into the bridge (for example
/// `Context.schedule`) into a Python exception.
///
/// A free function rather than a `From` impl because of the orphan rule.
pub fn update_err_to_py(err: &UpdateError) -> PyErr {
    match err {
        UpdateError::Pin(pin) => pin_err_to_py(pin),
        UpdateError::Engine(EngineError::Aborted) => PyRuntimeError::new_err(err.to_string()),
        UpdateError::Engine(engine) => PyValueError::new_err(engine.to_string()),
        UpdateError::Unbound | UpdateError::StaleContext | UpdateError::Foreign { .. } => {
            PyRuntimeError::new_err(err.to_string())
        }
    }
}

pub fn pin_err_to_py(err: &PinError) -> PyErr {
    PyMemoryError::new_err(err.to_string())
}
