//! Task and continuation primitives (spec §5), grounded on
//! `scheduler/Task.hpp`/`TaskDescription.hpp`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;

use super::node::NodeId;
use super::ControlMsg;

/// Anything the scheduler can run on a worker thread.
///
/// `execute` takes `self` boxed-and-owned (one-shot: a task never runs
/// twice) and a `TaskContext` it can use to spawn children or a
/// continuation of its own, mirroring `scheduler/Task.hpp`'s `Task`
/// base class and its `spawnTask`/`spawnLambdaTask` helpers.
pub trait Task: Send + 'static {
    fn execute(self: Box<Self>, ctx: &TaskContext);
}

/// Wraps a plain closure as a `Task`, the Rust equivalent of
/// `LambdaTask<Functor>` (the original's `FunctionTraits`-based arity
/// dispatch collapses here to a single closure signature: every task
/// closure takes the context explicitly, whether or not it uses it).
pub struct LambdaTask<F: FnOnce(&TaskContext) + Send + 'static> {
    f: F,
}

impl<F: FnOnce(&TaskContext) + Send + 'static> LambdaTask<F> {
    pub fn new(f: F) -> Self {
        LambdaTask { f }
    }
}

impl<F: FnOnce(&TaskContext) + Send + 'static> Task for LambdaTask<F> {
    fn execute(self: Box<Self>, ctx: &TaskContext) {
        (self.f)(ctx)
    }
}

/// Metadata carried alongside a task: whether it is profiled, and
/// whether that profiling should cascade to tasks it spawns.
///
/// `inherit` mirrors the original's rule that `cascade` only propagates
/// when `profiling` is also active — a non-profiled parent never forces
/// profiling onto children just because it happened to set `cascade`.
#[derive(Copy, Clone, Debug)]
pub struct TaskDescription {
    pub label: &'static str,
    pub profiling: bool,
    pub cascade: bool,
}

impl TaskDescription {
    pub fn new(label: &'static str) -> Self {
        TaskDescription {
            label,
            profiling: false,
            cascade: false,
        }
    }

    pub fn profiled(label: &'static str, cascade: bool) -> Self {
        TaskDescription {
            label,
            profiling: true,
            cascade,
        }
    }

    pub fn inherit(&self) -> Self {
        TaskDescription {
            label: self.label,
            profiling: self.profiling && self.cascade,
            cascade: self.profiling && self.cascade,
        }
    }
}

/// Handle given to a running task. Lets it spawn children or a
/// continuation chain whose completion notifies a dependent the caller
/// names explicitly, exactly as `Task::spawnTask` takes the spawning
/// task's own continuation as the child's dependent.
#[derive(Clone)]
pub struct TaskContext {
    pub(crate) self_node: NodeId,
    pub(crate) control: Sender<ControlMsg>,
    pub(crate) id_counter: Arc<AtomicU32>,
    pub(crate) description: TaskDescription,
}

impl TaskContext {
    fn next_id(&self) -> u32 {
        self.id_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// This task's own node id, usable as a dependent for work this task
    /// spawns that must finish before the task itself is considered done.
    pub fn self_node(&self) -> NodeId {
        self.self_node
    }

    /// Spawn a child task that is ready to run immediately. When
    /// `dependent` is `Some`, that node (normally a continuation created
    /// with `new_continuation`) is decremented once this child completes.
    pub fn spawn_task(&self, task: Box<dyn Task>, dependent: Option<NodeId>) -> NodeId {
        let node = NodeId::task(self.next_id());
        let _ = self.control.send(ControlMsg::NewTask {
            node,
            task,
            description: self.description.inherit(),
            initial_dependency_count: 0,
            dependent,
        });
        node
    }

    pub fn spawn_lambda_task<F>(&self, f: F, dependent: Option<NodeId>) -> NodeId
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        self.spawn_task(Box::new(LambdaTask::new(f)), dependent)
    }

    /// Spawn a task that is *not* ready immediately: it waits for
    /// `initial_dependency_count` prior completions (normally exactly one
    /// continuation) before a worker ever sees it. Used to build a
    /// "finish" stage that must not run until every upstream producer
    /// feeding its continuation has completed.
    pub fn spawn_deferred_task(
        &self,
        task: Box<dyn Task>,
        initial_dependency_count: usize,
        dependent: Option<NodeId>,
    ) -> NodeId {
        let node = NodeId::task(self.next_id());
        let _ = self.control.send(ControlMsg::NewTask {
            node,
            task,
            description: self.description.inherit(),
            initial_dependency_count,
            dependent,
        });
        node
    }

    /// Allocate a fresh continuation id whose dependency count starts at
    /// `producer_count` and that notifies `dependent` (if any) once every
    /// producer feeding it has completed.
    pub fn new_continuation(&self, producer_count: usize, dependent: Option<NodeId>) -> NodeId {
        let node = NodeId::continuation(self.next_id());
        let _ = self.control.send(ControlMsg::NewContinuation {
            node,
            producer_count,
            dependent,
        });
        node
    }
}

/// Build a linear chain of tasks: task `i` does not become ready until
/// task `i-1` completes, and the last task's completion notifies
/// `final_dependent`. Returns the id of the first task (already
/// dispatched with a zero dependency count, so it runs as soon as a
/// worker is free) or `None` for an empty chain.
///
/// Every node is registered with the dispatcher, in chain order from the
/// tail backward, before any of the tasks can possibly start running —
/// the dispatcher processes control messages strictly in send order, so
/// a later-registered node can never miss a completion notification from
/// an earlier one. This mirrors `scheduler/Task.hpp`'s `CreateTaskChain`.
pub fn task_chain(
    ctx: &TaskContext,
    mut tasks: Vec<Box<dyn Task>>,
    final_dependent: Option<NodeId>,
) -> Option<NodeId> {
    let n = tasks.len();
    if n == 0 {
        return None;
    }
    let mut next_id: Option<NodeId> = None;
    let mut first_id = None;
    for i in (0..n).rev() {
        let task = tasks.pop().unwrap();
        let node = NodeId::task(ctx.next_id());
        let initial_dependency_count = if i == 0 { 0 } else { 1 };
        let dependent = if i == n - 1 { final_dependent } else { next_id };
        let _ = ctx.control.send(ControlMsg::NewTask {
            node,
            task,
            description: ctx.description.inherit(),
            initial_dependency_count,
            dependent,
        });
        next_id = Some(node);
        first_id = Some(node);
    }
    first_id
}
