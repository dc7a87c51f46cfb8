//! A minimal multi-threaded update engine.
//!
//! This is the upstream side of the bridge: a graph whose vertices carry an
//! application id, a FIFO of `(vertex, updater)` tasks and a pool of worker
//! threads draining it. It exists to drive [`ProxyUpdater`]s the way a real
//! graph engine does, copying them between threads and invoking them in
//! parallel. Scheduling policy beyond FIFO is out of scope.
//!
//! Lock discipline: the run-state mutex is never held while the foreign
//! runtime is entered (invoking, copying or dropping an updater). A callback
//! that schedules more work re-enters the engine from inside the runtime, so
//! holding the lock there could deadlock against another worker.

use std::{
    collections::VecDeque,
    fmt,
    num::NonZeroUsize,
    sync::{Arc, Condvar, Mutex, MutexGuard, Weak},
    thread,
};

use serde::{Deserialize, Serialize};

use crate::{
    context::{ContextHandle, ExecutionContext},
    error::{EngineError, UpdateError},
    runtime::ForeignRuntime,
    updater::ProxyUpdater,
};

/// Engine-side vertex identifier: an index into the [`ProxyGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexId(u32);

impl VertexId {
    #[must_use]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vertex data: the id of the corresponding application vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyVertex {
    pub app_id: i32,
}

/// Edges carry no data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEdge;

/// Graph of proxy vertices. Application data lives on the foreign side,
/// keyed by each vertex's `app_id`.
#[derive(Debug, Clone, Default)]
pub struct ProxyGraph {
    vertices: Vec<ProxyVertex>,
    edges: Vec<(VertexId, VertexId, ProxyEdge)>,
}

impl ProxyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a vertex mirroring application vertex `app_id`.
    pub fn add_vertex(&mut self, app_id: i32) -> Result<VertexId, EngineError> {
        let id = u32::try_from(self.vertices.len()).map_err(|_| EngineError::GraphFull)?;
        self.vertices.push(ProxyVertex { app_id });
        Ok(VertexId(id))
    }

    pub fn add_edge(&mut self, source: VertexId, target: VertexId) -> Result<(), EngineError> {
        self.check(source)?;
        self.check(target)?;
        self.edges.push((source, target, ProxyEdge));
        Ok(())
    }

    #[must_use]
    pub fn vertex(&self, id: VertexId) -> Option<&ProxyVertex> {
        self.vertices.get(id.index())
    }

    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + '_ {
        (0..self.vertices.len()).filter_map(|i| u32::try_from(i).ok().map(VertexId))
    }

    /// Targets of edges leaving `id`.
    pub fn out_neighbors(&self, id: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        self.edges
            .iter()
            .filter(move |(source, _, _)| *source == id)
            .map(|(_, target, _)| *target)
    }

    #[must_use]
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    fn check(&self, id: VertexId) -> Result<&ProxyVertex, EngineError> {
        self.vertex(id).ok_or(EngineError::UnknownVertex(id))
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Number of worker threads. Zero is treated as one.
    pub ncpus: usize,
    /// Stop handing out work after the first failed update.
    pub abort_on_failure: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            ncpus: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            abort_on_failure: false,
        }
    }
}

/// A single failed update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateFailure {
    pub vertex: VertexId,
    pub error: UpdateError,
}

/// Outcome of [`Engine::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Updates that completed without error.
    pub updates: u64,
    /// Failed updates, in the order workers reported them.
    pub failures: Vec<UpdateFailure>,
    /// Whether the run stopped early because of `abort_on_failure`.
    pub aborted: bool,
}

impl RunReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Task<R: ForeignRuntime> {
    vertex: VertexId,
    updater: ProxyUpdater<R>,
}

/// Schedules vertex updates and runs them on a worker pool.
pub struct Engine<R: ForeignRuntime> {
    graph: Arc<ProxyGraph>,
    options: EngineOptions,
    queue: VecDeque<Task<R>>,
}

impl<R: ForeignRuntime> Engine<R> {
    #[must_use]
    pub fn new(options: EngineOptions) -> Self {
        Self::with_graph(ProxyGraph::new(), options)
    }

    #[must_use]
    pub fn with_graph(graph: ProxyGraph, options: EngineOptions) -> Self {
        Self {
            graph: Arc::new(graph),
            options,
            queue: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn graph(&self) -> &ProxyGraph {
        &self.graph
    }

    /// Mutable access to the graph between runs.
    pub fn graph_mut(&mut self) -> &mut ProxyGraph {
        Arc::make_mut(&mut self.graph)
    }

    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: EngineOptions) {
        self.options = options;
    }

    /// Number of tasks waiting for the next run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queues `vertex` for an update by a copy of `updater`.
    pub fn schedule(&mut self, vertex: VertexId, updater: &ProxyUpdater<R>) -> Result<(), UpdateError> {
        self.graph.check(vertex)?;
        let updater = updater.try_clone()?;
        self.queue.push_back(Task { vertex, updater });
        Ok(())
    }

    /// Queues every vertex, each with its own copy of `updater`.
    pub fn schedule_all(&mut self, updater: &ProxyUpdater<R>) -> Result<(), UpdateError> {
        for vertex in self.graph.vertex_ids() {
            let updater = updater.try_clone()?;
            self.queue.push_back(Task { vertex, updater });
        }
        Ok(())
    }

    /// Drops all queued tasks, releasing their pins.
    pub fn clear_schedule(&mut self) {
        self.queue.clear();
    }

    /// Runs queued updates until the queue drains, including updates
    /// scheduled by callbacks while the run is in progress.
    ///
    /// Blocks the calling thread until every worker has finished.
    pub fn run(&mut self) -> RunReport {
        let ncpus = self.options.ncpus.max(1);
        let queue = std::mem::take(&mut self.queue);
        tracing::debug!(ncpus, tasks = queue.len(), "starting engine run");

        let shared = Arc::new(Shared {
            graph: Arc::clone(&self.graph),
            abort_on_failure: self.options.abort_on_failure,
            state: Mutex::new(RunState {
                queue,
                in_flight: 0,
                updates: 0,
                failures: Vec::new(),
                aborted: false,
            }),
            wake: Condvar::new(),
        });

        thread::scope(|scope| {
            for _ in 0..ncpus {
                scope.spawn(|| work(&shared));
            }
        });

        let (report, leftover) = {
            let mut state = lock_unpoisoned(&shared.state);
            let report = RunReport {
                updates: state.updates,
                failures: std::mem::take(&mut state.failures),
                aborted: state.aborted,
            };
            (report, std::mem::take(&mut state.queue))
        };
        if !leftover.is_empty() {
            tracing::debug!(skipped = leftover.len(), "dropping tasks left by aborted run");
        }
        drop(leftover);

        tracing::debug!(
            updates = report.updates,
            failures = report.failures.len(),
            aborted = report.aborted,
            "engine run finished"
        );
        report
    }
}

impl<R: ForeignRuntime> fmt::Debug for Engine<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("graph", &self.graph)
            .field("options", &self.options)
            .field("pending", &self.queue.len())
            .finish()
    }
}

struct Shared<R: ForeignRuntime> {
    graph: Arc<ProxyGraph>,
    abort_on_failure: bool,
    state: Mutex<RunState<R>>,
    wake: Condvar,
}

struct RunState<R: ForeignRuntime> {
    queue: VecDeque<Task<R>>,
    in_flight: usize,
    updates: u64,
    failures: Vec<UpdateFailure>,
    aborted: bool,
}

/// What a callback sees while its vertex is being updated.
///
/// Holds weak references so a context kept alive by the foreign side does
/// not keep the updater's pin or the finished run alive.
struct EngineContext<R: ForeignRuntime> {
    shared: Weak<Shared<R>>,
    vertex: VertexId,
    app_id: i32,
    updater: Weak<ProxyUpdater<R>>,
}

impl<R: ForeignRuntime> ExecutionContext for EngineContext<R> {
    fn vertex_id(&self) -> VertexId {
        self.vertex
    }

    fn app_vertex_id(&self) -> i32 {
        self.app_id
    }

    fn schedule(&self, vertex: VertexId) -> Result<(), UpdateError> {
        let (Some(shared), Some(current)) = (self.shared.upgrade(), self.updater.upgrade()) else {
            return Err(UpdateError::StaleContext);
        };
        shared.graph.check(vertex)?;
        // copied before taking the lock: copying enters the foreign runtime
        let updater = current.try_clone()?;
        drop(current);
        let mut state = lock_unpoisoned(&shared.state);
        if state.aborted {
            drop(state);
            return Err(EngineError::Aborted.into());
        }
        state.queue.push_back(Task { vertex, updater });
        drop(state);
        shared.wake.notify_one();
        Ok(())
    }
}

fn work<R: ForeignRuntime>(shared: &Arc<Shared<R>>) {
    while let Some(task) = next_task(shared) {
        let vertex = task.vertex;
        let unwinding = UnwindGuard { shared };
        let outcome = run_task(shared, task);
        drop(unwinding);

        let mut state = lock_unpoisoned(&shared.state);
        state.in_flight -= 1;
        match outcome {
            Ok(()) => state.updates += 1,
            Err(error) => {
                state.failures.push(UpdateFailure { vertex, error });
                if shared.abort_on_failure {
                    state.aborted = true;
                }
            }
        }
        drop(state);
        shared.wake.notify_all();
    }
}

/// Ends the run if a worker panics mid-task.
///
/// The task never reports back, so without this the other workers would wait
/// on its `in_flight` slot forever and `thread::scope` would never rethrow.
struct UnwindGuard<'a, R: ForeignRuntime> {
    shared: &'a Shared<R>,
}

impl<R: ForeignRuntime> Drop for UnwindGuard<'_, R> {
    fn drop(&mut self) {
        if thread::panicking() {
            let mut state = lock_unpoisoned(&self.shared.state);
            state.in_flight -= 1;
            state.aborted = true;
            drop(state);
            self.shared.wake.notify_all();
        }
    }
}

/// Blocks until there is a task to run, or returns `None` once the queue is
/// empty with nothing in flight (or the run was aborted).
fn next_task<R: ForeignRuntime>(shared: &Shared<R>) -> Option<Task<R>> {
    let mut state = lock_unpoisoned(&shared.state);
    loop {
        if state.aborted {
            return None;
        }
        if let Some(task) = state.queue.pop_front() {
            state.in_flight += 1;
            return Some(task);
        }
        if state.in_flight == 0 {
            return None;
        }
        state = match shared.wake.wait(state) {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
    }
}

fn run_task<R: ForeignRuntime>(shared: &Arc<Shared<R>>, task: Task<R>) -> Result<(), UpdateError> {
    let Task { vertex, updater } = task;
    let app_id = shared.graph.check(vertex)?.app_id;
    let updater = Arc::new(updater);
    let context: Arc<dyn ExecutionContext> = Arc::new(EngineContext {
        shared: Arc::downgrade(shared),
        vertex,
        app_id,
        updater: Arc::downgrade(&updater),
    });
    ContextHandle::scoped(context, |handle| updater.invoke(handle))
}

/// Locks a mutex and recovers the inner value if the lock is poisoned.
///
/// Paired with [`UnwindGuard`], a worker that panicked mid-update does not
/// wedge the remaining workers.
fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
