use pyo3::prelude::*;
use updater_bridge::{ContextHandle, VertexId};

use crate::exceptions::update_err_to_py;

/// Execution context passed to `update(context, vertex_id)`.
///
/// Only valid while that update runs. Keeping it around is allowed, but
/// calling `schedule` on it afterwards raises `RuntimeError`.
#[pyclass(name = "Context", module = "_updater_bridge", frozen)]
pub struct PyContext {
    handle: ContextHandle,
}

impl PyContext {
    #[must_use]
    pub fn new(handle: ContextHandle) -> Self {
        Self { handle }
    }
}

#[pymethods]
impl PyContext {
    /// Engine-side id of the vertex being updated.
    #[getter]
    fn vertex_id(&self) -> u32 {
        self.handle.vertex_id().raw()
    }

    /// Application id stored on the vertex; the same value `update` receives.
    #[getter]
    fn app_id(&self) -> i32 {
        self.handle.app_vertex_id()
    }

    /// Whether the update this context belongs to is still running.
    fn is_active(&self) -> bool {
        self.handle.is_active()
    }

    /// Schedules another update of `vertex` with the current updater.
    fn schedule(&self, vertex: u32) -> PyResult<()> {
        self.handle.schedule(VertexId::new(vertex)).map_err(|e| update_err_to_py(&e))
    }

    fn __repr__(&self) -> String {
        format!(
            "Context(vertex_id={}, app_id={}, active={})",
            self.handle.vertex_id(),
            self.handle.app_vertex_id(),
            if self.handle.is_active() { "True" } else { "False" }
        )
    }
}
