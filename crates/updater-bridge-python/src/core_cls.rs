use std::sync::{Mutex, MutexGuard, TryLockError};

use pyo3::{
    exceptions::{PyNotImplementedError, PyRuntimeError, PyValueError},
    prelude::*,
};
use updater_bridge::{Engine, EngineOptions, VertexId};

use crate::{
    exceptions::{PyUpdateError, update_err_to_py},
    runtime::PythonRuntime,
};

/// A graph plus the engine that runs Python updaters over it.
///
/// Vertices carry an application id; updaters receive that id together with
/// a `Context`. `start()` releases the GIL while worker threads run updates,
/// each worker re-acquiring it around its own calls into Python.
#[pyclass(name = "Core", module = "_updater_bridge")]
pub struct PyCore {
    engine: Mutex<Engine<PythonRuntime>>,
}

#[pymethods]
impl PyCore {
    /// Creates an empty graph.
    ///
    /// # Arguments
    /// * `ncpus` - Number of worker threads, defaults to the available parallelism
    /// * `abort_on_failure` - Stop scheduling work after the first failed update
    #[new]
    #[pyo3(signature = (*, ncpus=None, abort_on_failure=false))]
    fn new(py: Python<'_>, ncpus: Option<usize>, abort_on_failure: bool) -> PyResult<Self> {
        PythonRuntime::initialize(py);
        let mut options = EngineOptions {
            abort_on_failure,
            ..EngineOptions::default()
        };
        if let Some(ncpus) = ncpus {
            if ncpus == 0 {
                return Err(PyValueError::new_err("ncpus must be at least 1"));
            }
            options.ncpus = ncpus;
        }
        Ok(Self {
            engine: Mutex::new(Engine::new(options)),
        })
    }

    /// Adds a vertex for application vertex `app_id` and returns its engine id.
    fn add_vertex(&self, app_id: i32) -> PyResult<u32> {
        let mut engine = self.engine()?;
        let id = engine
            .graph_mut()
            .add_vertex(app_id)
            .map_err(|e| update_err_to_py(&e.into()))?;
        Ok(id.raw())
    }

    fn add_edge(&self, source: u32, target: u32) -> PyResult<()> {
        let mut engine = self.engine()?;
        engine
            .graph_mut()
            .add_edge(VertexId::new(source), VertexId::new(target))
            .map_err(|e| update_err_to_py(&e.into()))
    }

    /// Schedules `vertex` to be updated by `updater`.
    ///
    /// `updater` must have an `update(context, vertex_id)` method. It is kept
    /// alive until the scheduled update has run.
    fn schedule(&self, vertex: u32, updater: &Bound<'_, PyAny>) -> PyResult<()> {
        let updater = PythonRuntime::bind(updater)?;
        let mut engine = self.engine()?;
        engine
            .schedule(VertexId::new(vertex), &updater)
            .map_err(|e| update_err_to_py(&e))
    }

    /// Schedules every vertex to be updated by `updater`.
    fn schedule_all(&self, updater: &Bound<'_, PyAny>) -> PyResult<()> {
        let updater = PythonRuntime::bind(updater)?;
        let mut engine = self.engine()?;
        engine.schedule_all(&updater).map_err(|e| update_err_to_py(&e))
    }

    /// Drops every scheduled update without running it.
    fn clear_schedule(&self) -> PyResult<()> {
        self.engine()?.clear_schedule();
        Ok(())
    }

    /// Runs all scheduled updates, including ones scheduled while running.
    ///
    /// Returns the number of updates that completed.
    ///
    /// # Raises
    /// * `UpdateError` if any update failed; it describes the first failure
    fn start(&self, py: Python<'_>) -> PyResult<u64> {
        PythonRuntime::initialize(py);
        let mut guard = self.engine()?;
        let engine: &mut Engine<PythonRuntime> = &mut guard;
        let report = py.detach(|| engine.run());

        match report.failures.first() {
            None => Ok(report.updates),
            Some(first) => {
                let app_id = engine.graph().vertex(first.vertex).map(|v| v.app_id);
                tracing::debug!(
                    failures = report.failures.len(),
                    aborted = report.aborted,
                    vertex = %first.vertex,
                    "raising UpdateError from Core.start"
                );
                Err(PyUpdateError::new_err(py, first, app_id, report.failures.len()))
            }
        }
    }

    #[getter]
    fn num_vertices(&self) -> PyResult<usize> {
        Ok(self.engine()?.graph().num_vertices())
    }

    #[getter]
    fn num_edges(&self) -> PyResult<usize> {
        Ok(self.engine()?.graph().num_edges())
    }

    /// Number of updates waiting for the next `start()`.
    #[getter]
    fn pending(&self) -> PyResult<usize> {
        Ok(self.engine()?.pending())
    }

    #[getter]
    fn ncpus(&self) -> PyResult<usize> {
        Ok(self.engine()?.options().ncpus)
    }

    fn __repr__(&self) -> PyResult<String> {
        let engine = self.engine()?;
        Ok(format!(
            "Core(vertices={}, edges={}, pending={}, ncpus={})",
            engine.graph().num_vertices(),
            engine.graph().num_edges(),
            engine.pending(),
            engine.options().ncpus
        ))
    }
}

impl PyCore {
    /// Locks the engine, refusing instead of blocking while a run holds it.
    ///
    /// Blocking here would deadlock: the running thread waits for workers,
    /// and a worker calling back into this `Core` holds the GIL.
    fn engine(&self) -> PyResult<MutexGuard<'_, Engine<PythonRuntime>>> {
        match self.engine.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(PyRuntimeError::new_err(
                "Core is running; it cannot be used until start() returns",
            )),
        }
    }
}

/// Optional base class for updaters.
///
/// Any object with an `update(context, vertex_id)` method can be scheduled;
/// subclassing `Updater` just documents the contract.
#[pyclass(name = "Updater", module = "_updater_bridge", subclass)]
pub struct PyUpdater;

#[pymethods]
impl PyUpdater {
    #[new]
    fn new() -> Self {
        Self
    }

    /// Called once per scheduled vertex. Subclasses must override it.
    fn update(&self, context: &Bound<'_, PyAny>, vertex_id: i32) -> PyResult<()> {
        let _ = (context, vertex_id);
        Err(PyNotImplementedError::new_err(
            "Updater subclasses must implement update(context, vertex_id)",
        ))
    }
}
