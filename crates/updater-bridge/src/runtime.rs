//! The seam between the native engine and a managed, garbage-collected runtime.
//!
//! Everything the bridge needs from the foreign side goes through
//! [`ForeignRuntime`]: obtaining a thread-bound access context, pinning and
//! unpinning objects, calling the update entry point and querying/clearing the
//! pending exception. Implementations are zero-sized markers; all state lives
//! in the foreign runtime or in the values passed around.

use crate::{
    context::ContextHandle,
    dispatch::DispatchTarget,
    error::{ForeignException, PinError},
};

/// A managed runtime that update callbacks can live in.
pub trait ForeignRuntime: Sized + 'static {
    /// Access context bound to the calling thread.
    ///
    /// Only ever obtained through [`ForeignRuntime::attach`] and only valid
    /// inside that closure. It must never be stored in a struct.
    type Env<'env>: Copy;

    /// A pinned reference to a foreign object. Holding one keeps the object
    /// alive; handing it to [`ForeignRuntime::unpin`] gives the pin back.
    type Object: Send + Sync;

    /// The resolved update entry point shared by every updater.
    type Method: Send + Sync + 'static;

    /// A pending exception after it has been taken out of the runtime.
    type Exception;

    /// Runs `f` with an access context valid for the current thread,
    /// attaching the thread to the runtime first if needed.
    fn attach<T>(f: impl for<'env> FnOnce(Self::Env<'env>) -> T) -> T;

    /// The process-wide dispatch target for this runtime.
    fn dispatch_target() -> &'static DispatchTarget<Self::Method>;

    /// Creates a new, independent pin on the object `object` refers to.
    fn pin(env: Self::Env<'_>, object: &Self::Object) -> Result<Self::Object, PinError>;

    /// Releases a pin created by [`ForeignRuntime::pin`].
    fn unpin(env: Self::Env<'_>, object: Self::Object);

    /// Calls `method` on `receiver` with `(context, app_vertex_id)`.
    ///
    /// A foreign exception is left pending in the runtime, exactly as a raw
    /// call across the boundary would leave it. The caller must fence.
    fn call_update(
        env: Self::Env<'_>,
        receiver: &Self::Object,
        method: &Self::Method,
        context: &ContextHandle,
        app_vertex_id: i32,
    );

    /// Whether an exception is pending on this thread.
    fn exception_pending(env: Self::Env<'_>) -> bool;

    /// Takes the pending exception, leaving none behind.
    fn take_exception(env: Self::Env<'_>) -> Option<Self::Exception>;

    /// Renders a taken exception into native diagnostics.
    fn describe_exception(env: Self::Env<'_>, exception: &Self::Exception) -> ForeignException;
}
