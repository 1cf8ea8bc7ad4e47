//! Worker threads (spec §5), grounded on `scheduler/Worker.hpp`.
//!
//! Each worker is a plain OS thread blocked on its own inbox, pulled from
//! the dispatcher's idle-worker stack whenever a task is ready to run.
//! CPU pinning is not wired up on any platform (the teacher doesn't carry
//! a pinning dependency, so we do not add one speculatively); `Scheduler::new`
//! warns once if `pin_workers` is set rather than silently accepting it.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};

use super::profiler::{Profiler, TaskEvent};
use super::task::{Task, TaskContext};
use super::ControlMsg;

pub(crate) enum WorkerMsg {
    Run {
        task: Box<dyn Task>,
        ctx: TaskContext,
    },
    Shutdown,
}

pub(crate) fn spawn_worker(
    worker_id: usize,
    inbox: Receiver<WorkerMsg>,
    control: Sender<ControlMsg>,
    _pin: bool,
    profiler: Arc<Profiler>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("hustle-worker-{worker_id}"))
        .spawn(move || {
            while let Ok(msg) = inbox.recv() {
                match msg {
                    WorkerMsg::Run { task, ctx } => {
                        let node = ctx.self_node();
                        let profiling = ctx.description.profiling;
                        let label = ctx.description.label;
                        let start = Instant::now();
                        task.execute(&ctx);
                        if profiling {
                            profiler.record(TaskEvent {
                                node,
                                label,
                                worker_id,
                                start,
                                duration: start.elapsed(),
                            });
                        }
                        let _ = control.send(ControlMsg::Completed { node, worker_id });
                    }
                    WorkerMsg::Shutdown => break,
                }
            }
        })
        .expect("failed to spawn worker thread")
}
