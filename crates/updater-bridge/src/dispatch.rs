//! The fixed dispatch target and the exception fence.

use std::{fmt, sync::OnceLock};

use crate::{
    error::{ForeignException, UpdateError},
    runtime::ForeignRuntime,
};

/// The single resolved update entry point, shared process-wide.
///
/// Each [`ForeignRuntime`] owns one of these as a `static`. It is resolved
/// once during initialization and read-only afterwards, so concurrent reads
/// from worker threads need no locking.
pub struct DispatchTarget<M> {
    cell: OnceLock<M>,
}

impl<M> DispatchTarget<M> {
    #[must_use]
    pub const fn new() -> Self {
        Self { cell: OnceLock::new() }
    }

    /// Resolves the target with `resolve` unless it is already resolved.
    ///
    /// Later calls keep the first value and do not run `resolve`.
    pub fn resolve_with(&self, resolve: impl FnOnce() -> M) -> &M {
        self.cell.get_or_init(resolve)
    }

    /// Fallible variant of [`DispatchTarget::resolve_with`].
    ///
    /// If two threads race, both may run `resolve`; only the first stored
    /// value is kept.
    pub fn try_resolve_with<E>(&self, resolve: impl FnOnce() -> Result<M, E>) -> Result<&M, E> {
        if let Some(method) = self.cell.get() {
            return Ok(method);
        }
        let method = resolve()?;
        Ok(self.cell.get_or_init(|| method))
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Returns the resolved target.
    ///
    /// # Panics
    /// Panics if the target was never resolved. That means the runtime was
    /// not initialized before the first update, which is a programming error.
    #[must_use]
    pub fn get(&self) -> &M {
        match self.cell.get() {
            Some(method) => method,
            None => panic!("update dispatch target used before it was resolved; initialize the runtime first"),
        }
    }
}

impl<M> Default for DispatchTarget<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for DispatchTarget<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTarget")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Where a single invocation is in its dispatch.
///
/// `Completed` and `Failed` are terminal. There is no retry edge; retrying is
/// the engine's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    Idle,
    Dispatching,
    Completed,
    ExceptionPending,
    Fenced,
    Failed,
}

impl DispatchPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Dispatching => "dispatching",
            Self::Completed => "completed",
            Self::ExceptionPending => "exception_pending",
            Self::Fenced => "fenced",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for DispatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checks for a pending foreign exception right after a cross-boundary call.
///
/// With nothing pending this returns `Ok(())`. Otherwise the exception is
/// taken out of the runtime (so the access context is usable again), its
/// diagnostics are logged and it comes back as [`UpdateError::Foreign`].
/// Either way no exception is pending when this returns.
pub fn fence<R: ForeignRuntime>(env: R::Env<'_>, vertex: i32) -> Result<(), UpdateError> {
    if !R::exception_pending(env) {
        return Ok(());
    }
    let span = tracing::Span::current();
    span.record("phase", DispatchPhase::ExceptionPending.as_str());

    let exception = match R::take_exception(env) {
        Some(taken) => R::describe_exception(env, &taken),
        None => ForeignException::new("<unknown>", "exception vanished before it could be taken"),
    };
    debug_assert!(!R::exception_pending(env), "fence left an exception pending");
    span.record("phase", DispatchPhase::Fenced.as_str());

    tracing::error!(
        vertex,
        exception_type = %exception.type_name,
        message = %exception.message,
        "update callback raised"
    );
    if let Some(traceback) = &exception.traceback {
        tracing::debug!(vertex, %traceback, "foreign traceback");
    }
    Err(UpdateError::Foreign { vertex, exception })
}
