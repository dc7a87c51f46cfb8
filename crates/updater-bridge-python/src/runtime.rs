//! [`ForeignRuntime`] for CPython.
//!
//! A pin is a strong reference (`Py<PyAny>`), the access context is the
//! `Python<'py>` token of an attached thread, and the update entry point is
//! the `update` attribute, looked up through a name interned once per process.

use pyo3::{exceptions::PyTypeError, intern, prelude::*, types::PyString};
use updater_bridge::{ContextHandle, DispatchTarget, ForeignException, ForeignRuntime, PinError, ProxyUpdater};

use crate::context::PyContext;

/// Name of the method every updater object must provide.
pub const UPDATE_METHOD: &str = "update";

static UPDATE_TARGET: DispatchTarget<Py<PyString>> = DispatchTarget::new();

/// Marker type for the CPython runtime.
#[derive(Debug)]
pub struct PythonRuntime;

impl PythonRuntime {
    /// Resolves the update dispatch target. Called from module init; later
    /// calls return the already resolved name.
    pub fn initialize(py: Python<'_>) -> &'static Py<PyString> {
        UPDATE_TARGET.resolve_with(|| PyString::intern(py, UPDATE_METHOD).unbind())
    }

    /// Binds a new updater to `object` after checking it has an `update` method.
    pub fn bind(object: &Bound<'_, PyAny>) -> PyResult<ProxyUpdater<Self>> {
        let py = object.py();
        if !object.hasattr(intern!(py, "update"))? {
            let type_name = object.get_type().qualname()?;
            return Err(PyTypeError::new_err(format!(
                "'{type_name}' object has no '{UPDATE_METHOD}' method"
            )));
        }
        ProxyUpdater::bind(py, object.as_unbound()).map_err(|e| crate::exceptions::pin_err_to_py(&e))
    }
}

impl ForeignRuntime for PythonRuntime {
    type Env<'py> = Python<'py>;
    type Object = Py<PyAny>;
    type Method = Py<PyString>;
    type Exception = PyErr;

    fn attach<T>(f: impl for<'env> FnOnce(Self::Env<'env>) -> T) -> T {
        Python::attach(|py| f(py))
    }

    fn dispatch_target() -> &'static DispatchTarget<Py<PyString>> {
        &UPDATE_TARGET
    }

    fn pin(py: Python<'_>, object: &Py<PyAny>) -> Result<Py<PyAny>, PinError> {
        Ok(object.clone_ref(py))
    }

    fn unpin(py: Python<'_>, object: Py<PyAny>) {
        object.drop_ref(py);
    }

    fn call_update(
        py: Python<'_>,
        receiver: &Py<PyAny>,
        method: &Py<PyString>,
        context: &ContextHandle,
        app_vertex_id: i32,
    ) {
        let outcome = Py::new(py, PyContext::new(context.clone()))
            .and_then(|context| receiver.call_method1(py, method.bind(py), (context, app_vertex_id)));
        // leave the exception pending, the fence takes it from here
        if let Err(err) = outcome {
            err.restore(py);
        }
    }

    fn exception_pending(py: Python<'_>) -> bool {
        PyErr::occurred(py)
    }

    fn take_exception(py: Python<'_>) -> Option<PyErr> {
        PyErr::take(py)
    }

    fn describe_exception(py: Python<'_>, exception: &PyErr) -> ForeignException {
        let type_name = exception
            .get_type(py)
            .qualname()
            .map_or_else(|_| "<unknown>".to_owned(), |name| name.to_string());
        let message = exception
            .value(py)
            .str()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let described = ForeignException::new(type_name, message);
        match exception.traceback(py).and_then(|tb| tb.format().ok()) {
            Some(traceback) => described.with_traceback(traceback),
            None => described,
        }
    }
}
