//! In-process foreign runtime used by the integration tests.
//!
//! Counts pins per object, keeps a pending exception per thread, and panics
//! on the misuse a real runtime would punish with undefined behavior: calling
//! in with an exception still pending, releasing a pin twice.

use std::{
    cell::RefCell,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread::{self, ThreadId},
};

use updater_bridge::{
    ContextHandle, DispatchTarget, ExecutionContext, ForeignException, ForeignRuntime, PinError, ProxyUpdater,
    UpdateError, VertexId,
};

type Behavior = Arc<dyn Fn(&ContextHandle, i32) -> Result<(), String> + Send + Sync>;

/// A foreign object whose `execUpdate` runs `behavior`.
pub struct MockObject {
    pins: AtomicUsize,
    refuse_pins: AtomicBool,
    calls: Mutex<Vec<(i32, ThreadId)>>,
    behavior: Behavior,
}

impl MockObject {
    pub fn new(behavior: impl Fn(&ContextHandle, i32) -> Result<(), String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            pins: AtomicUsize::new(0),
            refuse_pins: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            behavior: Arc::new(behavior),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::new(|_, _| Ok(()))
    }

    pub fn pins(&self) -> usize {
        self.pins.load(Ordering::SeqCst)
    }

    pub fn refuse_pins(&self, refuse: bool) {
        self.refuse_pins.store(refuse, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(i32, ThreadId)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called_vertices(&self) -> Vec<i32> {
        let mut vertices: Vec<i32> = self.calls().into_iter().map(|(vertex, _)| vertex).collect();
        vertices.sort_unstable();
        vertices
    }

    /// An unpinned reference, like the local reference a caller holds.
    pub fn local(self: &Arc<Self>) -> MockRef {
        MockRef(Arc::clone(self))
    }
}

pub struct MockRef(Arc<MockObject>);

#[derive(Debug, Clone)]
pub struct MockException {
    type_name: &'static str,
    message: String,
}

#[derive(Default)]
pub struct MockThread {
    pending: RefCell<Option<MockException>>,
}

thread_local! {
    static THREAD: MockThread = MockThread::default();
}

#[derive(Clone, Copy)]
pub struct MockEnv<'env> {
    thread: &'env MockThread,
    owner: ThreadId,
}

impl MockEnv<'_> {
    fn check_thread(self) {
        assert_eq!(self.owner, thread::current().id(), "access context used on a foreign thread");
    }
}

static TARGET: DispatchTarget<&'static str> = DispatchTarget::new();

pub struct MockRuntime;

impl MockRuntime {
    pub fn initialize() {
        TARGET.resolve_with(|| "execUpdate");
    }

    /// Whether the current thread has an exception pending.
    pub fn pending_here() -> bool {
        Self::attach(|env| Self::exception_pending(env))
    }

    pub fn bind(object: &Arc<MockObject>) -> Result<ProxyUpdater<Self>, PinError> {
        Self::attach(|env| ProxyUpdater::bind(env, &object.local()))
    }
}

impl ForeignRuntime for MockRuntime {
    type Env<'env> = MockEnv<'env>;
    type Object = MockRef;
    type Method = &'static str;
    type Exception = MockException;

    fn attach<T>(f: impl for<'env> FnOnce(Self::Env<'env>) -> T) -> T {
        THREAD.with(|thread| {
            f(MockEnv {
                thread,
                owner: thread::current().id(),
            })
        })
    }

    fn dispatch_target() -> &'static DispatchTarget<Self::Method> {
        &TARGET
    }

    fn pin(env: Self::Env<'_>, object: &Self::Object) -> Result<Self::Object, PinError> {
        env.check_thread();
        if object.0.refuse_pins.load(Ordering::SeqCst) {
            return Err(PinError::new("pin table exhausted"));
        }
        object.0.pins.fetch_add(1, Ordering::SeqCst);
        Ok(MockRef(Arc::clone(&object.0)))
    }

    fn unpin(env: Self::Env<'_>, object: Self::Object) {
        env.check_thread();
        let previous = object.0.pins.fetch_sub(1, Ordering::SeqCst);
        assert!(previous > 0, "pin released twice");
    }

    fn call_update(
        env: Self::Env<'_>,
        receiver: &Self::Object,
        method: &Self::Method,
        context: &ContextHandle,
        app_vertex_id: i32,
    ) {
        env.check_thread();
        assert_eq!(*method, "execUpdate");
        assert!(
            env.thread.pending.borrow().is_none(),
            "called into the runtime with an exception pending"
        );
        receiver
            .0
            .calls
            .lock()
            .unwrap()
            .push((app_vertex_id, thread::current().id()));
        if let Err(message) = (receiver.0.behavior)(context, app_vertex_id) {
            *env.thread.pending.borrow_mut() = Some(MockException {
                type_name: "MockError",
                message,
            });
        }
    }

    fn exception_pending(env: Self::Env<'_>) -> bool {
        env.thread.pending.borrow().is_some()
    }

    fn take_exception(env: Self::Env<'_>) -> Option<Self::Exception> {
        env.thread.pending.borrow_mut().take()
    }

    fn describe_exception(_env: Self::Env<'_>, exception: &Self::Exception) -> ForeignException {
        ForeignException::new(exception.type_name, exception.message.clone())
    }
}

/// Same runtime, but its dispatch target is never resolved.
pub struct UninitializedRuntime;

static UNRESOLVED: DispatchTarget<&'static str> = DispatchTarget::new();

impl ForeignRuntime for UninitializedRuntime {
    type Env<'env> = MockEnv<'env>;
    type Object = MockRef;
    type Method = &'static str;
    type Exception = MockException;

    fn attach<T>(f: impl for<'env> FnOnce(Self::Env<'env>) -> T) -> T {
        MockRuntime::attach(f)
    }

    fn dispatch_target() -> &'static DispatchTarget<Self::Method> {
        &UNRESOLVED
    }

    fn pin(env: Self::Env<'_>, object: &Self::Object) -> Result<Self::Object, PinError> {
        MockRuntime::pin(env, object)
    }

    fn unpin(env: Self::Env<'_>, object: Self::Object) {
        MockRuntime::unpin(env, object);
    }

    fn call_update(
        env: Self::Env<'_>,
        receiver: &Self::Object,
        method: &Self::Method,
        context: &ContextHandle,
        app_vertex_id: i32,
    ) {
        MockRuntime::call_update(env, receiver, method, context, app_vertex_id);
    }

    fn exception_pending(env: Self::Env<'_>) -> bool {
        MockRuntime::exception_pending(env)
    }

    fn take_exception(env: Self::Env<'_>) -> Option<Self::Exception> {
        MockRuntime::take_exception(env)
    }

    fn describe_exception(env: Self::Env<'_>, exception: &Self::Exception) -> ForeignException {
        MockRuntime::describe_exception(env, exception)
    }
}

/// Execution context that records what callbacks schedule.
pub struct StubContext {
    vertex: VertexId,
    app_id: i32,
    pub scheduled: Mutex<Vec<VertexId>>,
}

impl StubContext {
    pub fn new(app_id: i32) -> Arc<Self> {
        Arc::new(Self {
            vertex: VertexId::new(0),
            app_id,
            scheduled: Mutex::new(Vec::new()),
        })
    }

    pub fn handle(self: &Arc<Self>) -> ContextHandle {
        ContextHandle::new(Arc::clone(self) as Arc<dyn ExecutionContext>)
    }
}

impl ExecutionContext for StubContext {
    fn vertex_id(&self) -> VertexId {
        self.vertex
    }

    fn app_vertex_id(&self) -> i32 {
        self.app_id
    }

    fn schedule(&self, vertex: VertexId) -> Result<(), UpdateError> {
        self.scheduled.lock().unwrap().push(vertex);
        Ok(())
    }
}
