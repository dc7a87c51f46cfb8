use std::fmt;

use crate::{error::PinError, runtime::ForeignRuntime};

/// Owns exactly one pin on a foreign object.
///
/// Creating a handle acquires a pin, dropping it releases that pin. Copies
/// made with [`Handle::duplicate`] take their own pin instead of sharing one,
/// so the runtime's view of the pin count always equals the number of live
/// handles on the object.
pub struct Handle<R: ForeignRuntime> {
    // `None` only while `Drop` is handing the pin back.
    object: Option<R::Object>,
}

impl<R: ForeignRuntime> Handle<R> {
    /// Pins `object` using the caller's access context.
    pub fn acquire(env: R::Env<'_>, object: &R::Object) -> Result<Self, PinError> {
        let pinned = R::pin(env, object)?;
        tracing::trace!("pinned foreign updater");
        Ok(Self { object: Some(pinned) })
    }

    /// Takes a new, independent pin on the same object.
    ///
    /// Uses an access context obtained on the current thread, never one
    /// belonging to the thread that created `self`.
    pub fn duplicate(&self) -> Result<Self, PinError> {
        R::attach(|env| Self::acquire(env, self.object()))
    }

    /// The pinned reference.
    #[must_use]
    pub fn object(&self) -> &R::Object {
        match &self.object {
            Some(object) => object,
            None => unreachable!("handle accessed after release"),
        }
    }
}

impl<R: ForeignRuntime> Drop for Handle<R> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            R::attach(|env| R::unpin(env, object));
            tracing::trace!("released foreign updater pin");
        }
    }
}

impl<R: ForeignRuntime> fmt::Debug for Handle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").finish_non_exhaustive()
    }
}
