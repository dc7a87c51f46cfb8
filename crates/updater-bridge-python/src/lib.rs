//! Python bindings for updater-bridge.
//!
//! Implements [`ForeignRuntime`](updater_bridge::ForeignRuntime) for CPython
//! and exposes a small engine so Python objects can act as per-vertex
//! updaters run from native worker threads.

mod context;
mod core_cls;
mod exceptions;
mod runtime;

use std::sync::OnceLock;

pub use context::PyContext;
pub use core_cls::{PyCore, PyUpdater};
pub use exceptions::{PyUpdateError, pin_err_to_py, update_err_to_py};
use pyo3::prelude::*;
pub use runtime::{PythonRuntime, UPDATE_METHOD};

/// Returns the package version, converting Cargo's format to Python's PEP 440.
fn get_version() -> &'static str {
    static VERSION: OnceLock<String> = OnceLock::new();

    VERSION.get_or_init(|| {
        let version = env!("CARGO_PKG_VERSION");
        // "1.0-alpha1" in cargo is "1.0a1" in python; close enough for our versions
        version.replace("-alpha", "a").replace("-beta", "b")
    })
}

/// updater_bridge - run Python updaters from native graph engine workers.
#[pymodule]
mod _updater_bridge {
    use pyo3::prelude::*;

    #[pymodule_export]
    use super::PyContext as Context;
    #[pymodule_export]
    use super::PyCore as Core;
    #[pymodule_export]
    use super::PyUpdateError as UpdateError;
    #[pymodule_export]
    use super::PyUpdater as Updater;
    use super::{PythonRuntime, get_version};

    #[pymodule_init]
    fn init(m: &Bound<'_, PyModule>) -> PyResult<()> {
        // the dispatch target must be resolved before any update runs
        PythonRuntime::initialize(m.py());
        m.add("__version__", get_version())?;
        Ok(())
    }
}
