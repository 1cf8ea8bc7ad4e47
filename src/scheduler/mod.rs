//! Task-graph scheduler (spec §5), a direct idiomatic-Rust port of
//! `scheduler/{Scheduler,Task,Node,TaskDescription,Worker}.{hpp,cpp}`.
//!
//! A single dispatcher thread owns the dependency graph (`node::Node`
//! entries keyed by `NodeId`) and a stack of idle worker ids; worker
//! threads run tasks and report completion back to the dispatcher over a
//! `crossbeam-channel`. Tasks and continuations share one id space split
//! by `NodeId`'s top bit. This crate draws the worker-pool/channel idiom
//! from the pack's other columnar-engine scheduler
//! (`cswinter/LocustDB`'s `InnerLocustDB`, which pairs a dispatcher
//! thread with `mpsc`/`ThreadPool`) since the teacher itself has no
//! heavy cross-thread fan-out to generalize from directly.

pub mod node;
pub mod profiler;
pub mod task;
mod worker;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};

use crate::config::EngineConfig;

use node::{Node, NodeId};
use profiler::Profiler;
use task::{Task, TaskContext, TaskDescription};
use worker::{spawn_worker, WorkerMsg};

pub(crate) enum ControlMsg {
    NewTask {
        node: NodeId,
        task: Box<dyn Task>,
        description: TaskDescription,
        initial_dependency_count: usize,
        dependent: Option<NodeId>,
    },
    NewContinuation {
        node: NodeId,
        producer_count: usize,
        dependent: Option<NodeId>,
    },
    Completed {
        node: NodeId,
        worker_id: usize,
    },
    /// Register one more dependent on an existing, not-yet-fired node.
    /// Used to wire a plan's fan-out edges (one continuation releasing
    /// several downstream tasks) after both ends already have ids.
    AddDependent {
        node: NodeId,
        dependent: NodeId,
    },
    /// Force `node` to complete immediately, regardless of its own
    /// dependency count, cascading through its dependents exactly like an
    /// ordinary completion. Used to fire a plan's entry continuation once
    /// every edge has been wired.
    Fire {
        node: NodeId,
    },
    Shutdown,
}

struct PendingTask {
    task: Box<dyn Task>,
    description: TaskDescription,
}

/// Owns the worker pool and the single dispatcher thread arbitrating the
/// task/continuation dependency graph.
pub struct Scheduler {
    control_tx: Sender<ControlMsg>,
    id_counter: Arc<AtomicU32>,
    dispatcher: Option<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
    worker_txs: Vec<Sender<WorkerMsg>>,
    profiler: Arc<Profiler>,
}

impl Scheduler {
    pub fn new(config: &EngineConfig) -> Self {
        if config.pin_workers {
            tracing::warn!(
                "EngineConfig.pin_workers is set but this build has no CPU-pinning \
                 backend wired up; workers will run unpinned"
            );
        }

        let (control_tx, control_rx) = unbounded::<ControlMsg>();
        let id_counter = Arc::new(AtomicU32::new(1));
        let profiler = Arc::new(Profiler::new(config.task_event_capacity));

        let mut worker_txs = Vec::with_capacity(config.num_workers);
        let mut worker_handles = Vec::with_capacity(config.num_workers);
        for worker_id in 0..config.num_workers.max(1) {
            let (tx, rx) = unbounded::<WorkerMsg>();
            worker_txs.push(tx);
            worker_handles.push(spawn_worker(
                worker_id,
                rx,
                control_tx.clone(),
                config.pin_workers,
                profiler.clone(),
            ));
        }

        let dispatcher_control_tx = control_tx.clone();
        let dispatcher_worker_txs = worker_txs.clone();
        let dispatcher_id_counter = id_counter.clone();
        let num_workers = worker_txs.len();
        let dispatcher = std::thread::Builder::new()
            .name("hustle-scheduler".to_string())
            .spawn(move || {
                run_dispatcher(
                    control_rx,
                    dispatcher_control_tx,
                    dispatcher_worker_txs,
                    dispatcher_id_counter,
                    num_workers,
                )
            })
            .expect("failed to spawn scheduler dispatcher thread");

        Scheduler {
            control_tx,
            id_counter,
            dispatcher: Some(dispatcher),
            worker_handles,
            worker_txs,
            profiler,
        }
    }

    fn root_context(&self, description: TaskDescription) -> TaskContext {
        TaskContext {
            self_node: NodeId::task(0),
            control: self.control_tx.clone(),
            id_counter: self.id_counter.clone(),
            description,
        }
    }

    /// Submit a task with no predecessor; it becomes ready immediately.
    /// `dependent`, if given, is notified (decremented) when it completes
    /// -- typically a continuation created with `new_continuation`.
    pub fn spawn_task(
        &self,
        task: Box<dyn Task>,
        description: TaskDescription,
        dependent: Option<NodeId>,
    ) -> NodeId {
        self.root_context(description).spawn_task(task, dependent)
    }

    pub fn spawn_lambda_task<F>(
        &self,
        description: TaskDescription,
        dependent: Option<NodeId>,
        f: F,
    ) -> NodeId
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        self.root_context(description)
            .spawn_lambda_task(f, dependent)
    }

    /// Submit a lambda task that does not become ready until
    /// `initial_dependency_count` prior completions have named it as
    /// their dependent (typically a single upstream continuation). Used
    /// to build a "finish" stage that must not run before every producer
    /// feeding its continuation has completed.
    pub fn spawn_deferred_lambda_task<F>(
        &self,
        description: TaskDescription,
        initial_dependency_count: usize,
        dependent: Option<NodeId>,
        f: F,
    ) -> NodeId
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        self.root_context(description).spawn_deferred_task(
            Box::new(task::LambdaTask::new(f)),
            initial_dependency_count,
            dependent,
        )
    }

    /// Pre-register a continuation with `producer_count` outstanding
    /// producers and an optional node to notify once it fires.
    pub fn new_continuation(
        &self,
        description: TaskDescription,
        producer_count: usize,
        dependent: Option<NodeId>,
    ) -> NodeId {
        self.root_context(description)
            .new_continuation(producer_count, dependent)
    }

    /// Submit a linear chain of tasks; see `task::task_chain`.
    pub fn task_chain(
        &self,
        tasks: Vec<Box<dyn Task>>,
        description: TaskDescription,
        final_dependent: Option<NodeId>,
    ) -> Option<NodeId> {
        task::task_chain(&self.root_context(description), tasks, final_dependent)
    }

    pub fn profiler(&self) -> &Arc<Profiler> {
        &self.profiler
    }

    /// Register `dependent` on `node` after both already have ids, for
    /// DAGs (like `plan::ExecutionPlan`) whose edges aren't known until
    /// every node has been allocated. `node` must not have fired yet, or
    /// the dependent is silently lost -- callers are responsible for
    /// holding the graph open (e.g. via an entry continuation not yet
    /// fired) until all such wiring is sent.
    pub fn add_dependent(&self, node: NodeId, dependent: NodeId) {
        let _ = self.control_tx.send(ControlMsg::AddDependent { node, dependent });
    }

    /// Force `node` to complete right now, cascading through its
    /// dependents. Used to release a plan's entry continuation once every
    /// task and edge has been wired onto it.
    pub fn fire(&self, node: NodeId) {
        let _ = self.control_tx.send(ControlMsg::Fire { node });
    }

    pub fn shutdown(mut self) {
        let _ = self.control_tx.send(ControlMsg::Shutdown);
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
        for tx in &self.worker_txs {
            let _ = tx.send(WorkerMsg::Shutdown);
        }
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn run_dispatcher(
    control_rx: crossbeam_channel::Receiver<ControlMsg>,
    control_tx: Sender<ControlMsg>,
    worker_txs: Vec<Sender<WorkerMsg>>,
    id_counter: Arc<AtomicU32>,
    num_workers: usize,
) {
    let mut nodes: HashMap<NodeId, Node> = HashMap::new();
    let mut pending: HashMap<NodeId, PendingTask> = HashMap::new();
    let mut ready: VecDeque<(NodeId, PendingTask)> = VecDeque::new();
    let mut idle_workers: Vec<usize> = (0..num_workers).rev().collect();

    while let Ok(msg) = control_rx.recv() {
        match msg {
            ControlMsg::NewTask {
                node,
                task,
                description,
                initial_dependency_count,
                dependent,
            } => {
                let entry = nodes.entry(node).or_insert_with(Node::new);
                entry.dependency_count = initial_dependency_count;
                if let Some(dep) = dependent {
                    entry.dependents.push(dep);
                }
                if initial_dependency_count == 0 {
                    ready.push_back((node, PendingTask { task, description }));
                } else {
                    pending.insert(node, PendingTask { task, description });
                }
            }
            ControlMsg::NewContinuation {
                node,
                producer_count,
                dependent,
            } => {
                let entry = nodes.entry(node).or_insert_with(Node::new);
                entry.dependency_count = producer_count;
                if let Some(dep) = dependent {
                    entry.dependents.push(dep);
                }
                if producer_count == 0 {
                    complete_node(node, &mut nodes, &mut pending, &mut ready);
                }
            }
            ControlMsg::Completed { node, worker_id } => {
                idle_workers.push(worker_id);
                complete_node(node, &mut nodes, &mut pending, &mut ready);
            }
            ControlMsg::AddDependent { node, dependent } => {
                nodes.entry(node).or_insert_with(Node::new).add_dependent(dependent);
            }
            ControlMsg::Fire { node } => {
                complete_node(node, &mut nodes, &mut pending, &mut ready);
            }
            ControlMsg::Shutdown => {
                drain_ready(
                    &control_rx,
                    &control_tx,
                    &worker_txs,
                    &id_counter,
                    &mut nodes,
                    &mut pending,
                    &mut ready,
                    &mut idle_workers,
                    num_workers,
                );
                break;
            }
        }

        dispatch_ready(&control_tx, &worker_txs, &id_counter, &mut ready, &mut idle_workers);
    }
}

/// Hand every ready task still in the queue to an idle worker.
fn dispatch_ready(
    control_tx: &Sender<ControlMsg>,
    worker_txs: &[Sender<WorkerMsg>],
    id_counter: &Arc<AtomicU32>,
    ready: &mut VecDeque<(NodeId, PendingTask)>,
    idle_workers: &mut Vec<usize>,
) {
    while let Some(worker_id) = idle_workers.pop() {
        match ready.pop_front() {
            Some((node, PendingTask { task, description })) => {
                let ctx = TaskContext {
                    self_node: node,
                    control: control_tx.clone(),
                    id_counter: id_counter.clone(),
                    description,
                };
                let _ = worker_txs[worker_id].send(WorkerMsg::Run { task, ctx });
            }
            None => {
                idle_workers.push(worker_id);
                break;
            }
        }
    }
}

/// Run the dependency graph to completion before the dispatcher exits
/// (spec.md's "drains the ready queue, then sends stop messages to all
/// workers"). Dispatching one ready task can, once it completes, cascade
/// through `complete_node` into more ready tasks, so it isn't enough to
/// flush the queue once: keep dispatching and waiting on completions
/// until both the queue and every worker are idle.
#[allow(clippy::too_many_arguments)]
fn drain_ready(
    control_rx: &crossbeam_channel::Receiver<ControlMsg>,
    control_tx: &Sender<ControlMsg>,
    worker_txs: &[Sender<WorkerMsg>],
    id_counter: &Arc<AtomicU32>,
    nodes: &mut HashMap<NodeId, Node>,
    pending: &mut HashMap<NodeId, PendingTask>,
    ready: &mut VecDeque<(NodeId, PendingTask)>,
    idle_workers: &mut Vec<usize>,
    num_workers: usize,
) {
    loop {
        dispatch_ready(control_tx, worker_txs, id_counter, ready, idle_workers);
        let busy = num_workers - idle_workers.len();
        if ready.is_empty() && busy == 0 {
            return;
        }
        match control_rx.recv() {
            Ok(ControlMsg::Completed { node, worker_id }) => {
                idle_workers.push(worker_id);
                complete_node(node, nodes, pending, ready);
            }
            Ok(_) => {}
            Err(_) => return,
        }
    }
}

/// Walk the dependency graph from `node` outward, decrementing every
/// dependent's count and recursing through continuations (which have no
/// task body of their own) until either a task becomes ready (queued)
/// or the cascade runs out of dependents.
fn complete_node(
    node: NodeId,
    nodes: &mut HashMap<NodeId, Node>,
    pending: &mut HashMap<NodeId, PendingTask>,
    ready: &mut VecDeque<(NodeId, PendingTask)>,
) {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        let dependents = nodes.remove(&current).map(|n| n.dependents).unwrap_or_default();
        for dep in dependents {
            let entry = nodes.entry(dep).or_insert_with(Node::new);
            if entry.dependency_count > 0 {
                entry.dependency_count -= 1;
            }
            if entry.dependency_count == 0 {
                if dep.is_continuation() {
                    stack.push(dep);
                } else if let Some(task) = pending.remove(&dep) {
                    ready.push_back((dep, task));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use task::LambdaTask;

    #[test]
    fn a_lone_task_runs_and_reports_completion() {
        let config = EngineConfig {
            num_workers: 2,
            ..Default::default()
        };
        let scheduler = Scheduler::new(&config);
        let (done_tx, done_rx) = bounded::<i32>(1);
        scheduler.spawn_lambda_task(TaskDescription::new("test"), None, move |_ctx| {
            done_tx.send(42).unwrap();
        });
        assert_eq!(done_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap(), 42);
        scheduler.shutdown();
    }

    #[test]
    fn a_task_chain_runs_in_order() {
        let config = EngineConfig {
            num_workers: 4,
            ..Default::default()
        };
        let scheduler = Scheduler::new(&config);
        let (order_tx, order_rx) = unbounded::<u32>();
        let (done_tx, done_rx) = bounded::<()>(1);

        let tx1 = order_tx.clone();
        let tx2 = order_tx.clone();
        let tx3 = order_tx;

        let final_continuation = scheduler.new_continuation(TaskDescription::new("finish"), 1, None);
        // In a real pipeline the node `new_continuation` returns would be
        // wired as a dependent elsewhere in the DAG; here we just confirm
        // the chain itself runs in submission order.
        let _ = final_continuation;

        let tasks: Vec<Box<dyn task::Task>> = vec![
            Box::new(LambdaTask::new(move |_: &TaskContext| tx1.send(1).unwrap())),
            Box::new(LambdaTask::new(move |_: &TaskContext| tx2.send(2).unwrap())),
            Box::new(LambdaTask::new(move |_: &TaskContext| {
                tx3.send(3).unwrap();
                let _ = done_tx.send(());
            })),
        ];
        scheduler.task_chain(tasks, TaskDescription::new("chain"), None);

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(order_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
        done_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        scheduler.shutdown();
    }
}
