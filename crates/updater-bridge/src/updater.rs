//! The native stand-in for a foreign update callback.

use std::fmt;

use crate::{
    context::ContextHandle,
    dispatch::{DispatchPhase, fence},
    error::{PinError, UpdateError},
    handle::Handle,
    runtime::ForeignRuntime,
};

/// Proxy for a foreign updater object.
///
/// Holds zero or one [`Handle`]. The engine copies updaters freely while
/// distributing work; every copy carries its own pin, and dropping a copy
/// only gives back that copy's pin.
///
/// `Clone` is not implemented because taking a pin can fail. Use
/// [`ProxyUpdater::try_clone`] and [`ProxyUpdater::assign_from`].
pub struct ProxyUpdater<R: ForeignRuntime> {
    handle: Option<Handle<R>>,
}

impl<R: ForeignRuntime> ProxyUpdater<R> {
    /// An updater with no foreign object behind it. Invoking it fails with
    /// [`UpdateError::Unbound`].
    #[must_use]
    pub fn empty() -> Self {
        Self { handle: None }
    }

    /// Binds a new updater to `object`, pinning it with the caller's access context.
    pub fn bind(env: R::Env<'_>, object: &R::Object) -> Result<Self, PinError> {
        Ok(Self {
            handle: Some(Handle::acquire(env, object)?),
        })
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.handle.is_some()
    }

    #[must_use]
    pub fn handle(&self) -> Option<&Handle<R>> {
        self.handle.as_ref()
    }

    /// Copies this updater. A bound updater gets a new, independent pin on
    /// the same foreign object.
    pub fn try_clone(&self) -> Result<Self, PinError> {
        Ok(Self {
            handle: self.handle.as_ref().map(Handle::duplicate).transpose()?,
        })
    }

    /// Makes `self` refer to whatever `other` refers to.
    ///
    /// The new pin is acquired before the old one is released, so if pinning
    /// fails `self` is left exactly as it was.
    pub fn assign_from(&mut self, other: &Self) -> Result<(), PinError> {
        let replacement = other.handle.as_ref().map(Handle::duplicate).transpose()?;
        drop(self.handle.take());
        self.handle = replacement;
        Ok(())
    }

    /// Releases the pin now, leaving the updater empty.
    pub fn reset(&mut self) {
        self.handle = None;
    }

    /// Runs the foreign update for the vertex `context` refers to.
    ///
    /// Blocks until the foreign callback returns. A foreign exception is
    /// cleared and returned as [`UpdateError::Foreign`]; the updater stays
    /// bound and can be invoked again.
    ///
    /// # Panics
    /// Panics if the runtime's dispatch target has not been resolved.
    pub fn invoke(&self, context: &ContextHandle) -> Result<(), UpdateError> {
        let Some(handle) = &self.handle else {
            return Err(UpdateError::Unbound);
        };
        let method = R::dispatch_target().get();
        let vertex = context.app_vertex_id();

        let span = tracing::trace_span!("update", vertex, phase = DispatchPhase::Idle.as_str());
        let _entered = span.enter();

        R::attach(|env| {
            span.record("phase", DispatchPhase::Dispatching.as_str());
            R::call_update(env, handle.object(), method, context, vertex);
            let outcome = fence::<R>(env, vertex);
            let phase = if outcome.is_ok() {
                DispatchPhase::Completed
            } else {
                DispatchPhase::Failed
            };
            span.record("phase", phase.as_str());
            outcome
        })
    }
}

impl<R: ForeignRuntime> Default for ProxyUpdater<R> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<R: ForeignRuntime> fmt::Debug for ProxyUpdater<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyUpdater").field("bound", &self.is_bound()).finish()
    }
}
