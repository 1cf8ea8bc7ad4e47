//! Execution plan (spec §4.10), grounded on
//! `scheduler/QueryManager.cc`'s plan-submission path: a plan is itself
//! wired onto the scheduler as a small DAG rather than run by a
//! dedicated interpreter loop.
//!
//! An `ExecutionPlan` owns an ordered vector of operators, each a closure
//! that does its work and returns `Result<(), HustleError>`, plus a
//! `depends_on` edge list between them by stable index. `run` allocates
//! an entry continuation `c_enter`, one per-operator continuation
//! `c_op`, and an exit continuation `c_exit`; wires every operator's task
//! to wait on `c_enter` plus any producer edges; links every `c_op` into
//! `c_exit` and into any consumer edges; schedules a final lambda at
//! `c_exit`; and only then fires `c_enter` (spec's "fire c_enter" is the
//! last step, after every edge is wired, so no task can race ahead of its
//! dependency wiring).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::error::HustleError;
use crate::scheduler::task::{TaskContext, TaskDescription};
use crate::scheduler::Scheduler;

/// One operator's unit of work. Failure sets the plan's failure flag;
/// remaining operators still run their task bodies (so every continuation
/// still fires and the DAG always reaches `c_exit`) but skip real work
/// once the flag is set, per spec §7's short-circuit rule.
pub type OperatorFn = Box<dyn FnOnce(&TaskContext) -> Result<(), HustleError> + Send + 'static>;

struct PlanState {
    failed: AtomicBool,
    failure: Mutex<Option<HustleError>>,
}

/// An ordered vector of operators plus a producer/consumer edge list,
/// submitted to the scheduler as a single DAG.
#[derive(Default)]
pub struct ExecutionPlan {
    operators: Vec<OperatorFn>,
    edges: Vec<(usize, usize)>,
}

impl ExecutionPlan {
    pub fn new() -> Self {
        ExecutionPlan {
            operators: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Add an operator, returning its stable index for use in `depends_on`.
    pub fn add_operator<F>(&mut self, f: F) -> usize
    where
        F: FnOnce(&TaskContext) -> Result<(), HustleError> + Send + 'static,
    {
        self.operators.push(Box::new(f));
        self.operators.len() - 1
    }

    /// Record that `consumer` must not start until `producer` has fully
    /// completed (its continuation has fired).
    pub fn depends_on(&mut self, consumer: usize, producer: usize) {
        self.edges.push((producer, consumer));
    }

    /// Submit the plan. The returned receiver yields exactly one message
    /// once every operator has run (or been short-circuited): `Ok(elapsed)`
    /// on success, or the first operator error captured.
    pub fn run(self, scheduler: &Scheduler) -> Receiver<Result<Duration, HustleError>> {
        let num_operators = self.operators.len();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        if num_operators == 0 {
            let _ = done_tx.send(Ok(Duration::ZERO));
            return done_rx;
        }

        let state = Arc::new(PlanState {
            failed: AtomicBool::new(false),
            failure: Mutex::new(None),
        });

        let start = Instant::now();
        let c_enter = scheduler.new_continuation(TaskDescription::new("plan-enter"), 1, None);

        let finish_state = state.clone();
        let finish = scheduler.spawn_deferred_lambda_task(
            TaskDescription::new("plan-finish"),
            1,
            None,
            move |_ctx| {
                let result = match finish_state.failure.lock().unwrap().take() {
                    Some(e) => Err(e),
                    None => Ok(start.elapsed()),
                };
                let _ = done_tx.send(result);
            },
        );
        let c_exit = scheduler.new_continuation(TaskDescription::new("plan-exit"), num_operators, Some(finish));

        let mut in_degree = vec![0usize; num_operators];
        for &(_, consumer) in &self.edges {
            in_degree[consumer] += 1;
        }

        let mut c_ops = Vec::with_capacity(num_operators);
        let mut task_ids = Vec::with_capacity(num_operators);

        for (i, op) in self.operators.into_iter().enumerate() {
            let c_op = scheduler.new_continuation(TaskDescription::new("plan-op-continuation"), 1, None);
            c_ops.push(c_op);

            let op_state = state.clone();
            let task_id = scheduler.spawn_deferred_lambda_task(
                TaskDescription::new("plan-op"),
                1 + in_degree[i],
                Some(c_op),
                move |ctx: &TaskContext| {
                    if op_state.failed.load(Ordering::Acquire) {
                        return;
                    }
                    if let Err(e) = op(ctx) {
                        op_state.failed.store(true, Ordering::Release);
                        *op_state.failure.lock().unwrap() = Some(e);
                    }
                },
            );
            task_ids.push(task_id);
        }

        for &task_id in &task_ids {
            scheduler.add_dependent(c_enter, task_id);
        }
        for &c_op in &c_ops {
            scheduler.add_dependent(c_op, c_exit);
        }
        for &(producer, consumer) in &self.edges {
            scheduler.add_dependent(c_ops[producer], task_ids[consumer]);
        }

        scheduler.fire(c_enter);
        done_rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crossbeam_channel::unbounded;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn a_plan_with_no_edges_runs_every_operator() {
        let scheduler = Scheduler::new(&EngineConfig {
            num_workers: 4,
            ..Default::default()
        });
        let (tx, rx) = unbounded::<usize>();
        let mut plan = ExecutionPlan::new();
        for i in 0..3 {
            let tx = tx.clone();
            plan.add_operator(move |_ctx| {
                tx.send(i).unwrap();
                Ok(())
            });
        }
        let done = plan.run(&scheduler);
        done.recv_timeout(std::time::Duration::from_secs(5)).unwrap().unwrap();
        let mut seen: Vec<usize> = rx.try_iter().collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);
        scheduler.shutdown();
    }

    #[test]
    fn an_edge_forces_consumer_to_observe_producer_writes() {
        let scheduler = Scheduler::new(&EngineConfig {
            num_workers: 4,
            ..Default::default()
        });
        let shared = Arc::new(StdMutex::new(0));
        let producer_shared = shared.clone();
        let consumer_shared = shared.clone();
        let (tx, rx) = unbounded::<i32>();

        let mut plan = ExecutionPlan::new();
        let producer = plan.add_operator(move |_ctx| {
            *producer_shared.lock().unwrap() = 42;
            Ok(())
        });
        let consumer = plan.add_operator(move |_ctx| {
            tx.send(*consumer_shared.lock().unwrap()).unwrap();
            Ok(())
        });
        plan.depends_on(consumer, producer);

        let done = plan.run(&scheduler);
        done.recv_timeout(std::time::Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap(), 42);
        scheduler.shutdown();
    }

    #[test]
    fn a_failing_operator_short_circuits_but_the_plan_still_completes() {
        let scheduler = Scheduler::new(&EngineConfig {
            num_workers: 4,
            ..Default::default()
        });
        let ran = Arc::new(StdMutex::new(false));
        let ran_clone = ran.clone();

        let mut plan = ExecutionPlan::new();
        let failing = plan.add_operator(|_ctx| Err(HustleError::Schema("boom".into())));
        let downstream = plan.add_operator(move |_ctx| {
            *ran_clone.lock().unwrap() = true;
            Ok(())
        });
        plan.depends_on(downstream, failing);

        let done = plan.run(&scheduler);
        let result = done.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert!(matches!(result, Err(HustleError::Schema(_))));
        assert!(!*ran.lock().unwrap(), "downstream operator must not do real work after a failure");
        scheduler.shutdown();
    }

    #[test]
    fn a_diamond_dag_reaches_its_exit_exactly_once() {
        let scheduler = Scheduler::new(&EngineConfig {
            num_workers: 4,
            ..Default::default()
        });
        let (tx, rx) = unbounded::<&'static str>();
        let mut plan = ExecutionPlan::new();
        let tx_b = tx.clone();
        let tx_c = tx.clone();
        let tx_d = tx;
        let a = plan.add_operator(|_ctx| Ok(()));
        let b = plan.add_operator(move |_ctx| {
            tx_b.send("b").unwrap();
            Ok(())
        });
        let c = plan.add_operator(move |_ctx| {
            tx_c.send("c").unwrap();
            Ok(())
        });
        let d = plan.add_operator(move |_ctx| {
            tx_d.send("d").unwrap();
            Ok(())
        });
        plan.depends_on(b, a);
        plan.depends_on(c, a);
        plan.depends_on(d, b);
        plan.depends_on(d, c);

        let done = plan.run(&scheduler);
        done.recv_timeout(std::time::Duration::from_secs(5)).unwrap().unwrap();
        let seen: Vec<&str> = rx.try_iter().collect();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen.last(), Some(&"d"));
        scheduler.shutdown();
    }
}
