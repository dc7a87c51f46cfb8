//! Execution contexts handed to update callbacks.
//!
//! The engine owns the context. What crosses the boundary is a
//! [`ContextHandle`]: a cloneable token the foreign side may keep and pass
//! back into native calls. Once the update that created it returns, the
//! handle is revoked and native calls through it fail with
//! [`UpdateError::StaleContext`].

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{engine::VertexId, error::UpdateError};

/// Per-update view the engine exposes to an updater.
pub trait ExecutionContext: Send + Sync {
    /// Engine-side id of the vertex being updated.
    fn vertex_id(&self) -> VertexId;

    /// Application vertex id stored in the vertex data. This is the id the
    /// foreign callback receives.
    fn app_vertex_id(&self) -> i32;

    /// Schedules `vertex` for another update with the current updater.
    fn schedule(&self, vertex: VertexId) -> Result<(), UpdateError>;
}

/// Opaque, revocable handle to an [`ExecutionContext`].
#[derive(Clone)]
pub struct ContextHandle {
    context: Arc<dyn ExecutionContext>,
    active: Arc<AtomicBool>,
}

impl ContextHandle {
    /// Wraps `context` in a handle that is active until [`ContextHandle::revoke`].
    #[must_use]
    pub fn new(context: Arc<dyn ExecutionContext>) -> Self {
        Self {
            context,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Runs `f` with a fresh handle and revokes it afterwards, also on unwind.
    pub fn scoped<T>(context: Arc<dyn ExecutionContext>, f: impl FnOnce(&Self) -> T) -> T {
        struct Revoke(ContextHandle);

        impl Drop for Revoke {
            fn drop(&mut self) {
                self.0.revoke();
            }
        }

        let guard = Revoke(Self::new(context));
        f(&guard.0)
    }

    #[must_use]
    pub fn vertex_id(&self) -> VertexId {
        self.context.vertex_id()
    }

    #[must_use]
    pub fn app_vertex_id(&self) -> i32 {
        self.context.app_vertex_id()
    }

    /// Forwards to [`ExecutionContext::schedule`] while the handle is active.
    pub fn schedule(&self, vertex: VertexId) -> Result<(), UpdateError> {
        if !self.is_active() {
            return Err(UpdateError::StaleContext);
        }
        self.context.schedule(vertex)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Revokes this handle and every clone of it.
    pub fn revoke(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandle")
            .field("vertex_id", &self.vertex_id())
            .field("app_vertex_id", &self.app_vertex_id())
            .field("active", &self.is_active())
            .finish()
    }
}
