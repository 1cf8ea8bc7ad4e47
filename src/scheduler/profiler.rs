//! Per-task profiling events (spec §6.5), grounded on
//! `scheduler/TaskDescription.hpp`'s profiling bit and the teacher's use
//! of `tracing` spans around long-running work.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::node::NodeId;

/// One completed task's timing, recorded when profiling is enabled for
/// that task's description.
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub node: NodeId,
    pub label: &'static str,
    pub worker_id: usize,
    pub start: Instant,
    pub duration: Duration,
}

/// A bounded ring buffer of recent task events. Oldest events are
/// dropped once `capacity` is exceeded, so a long-running scheduler
/// doesn't grow this without bound.
pub struct Profiler {
    capacity: usize,
    events: Mutex<Vec<TaskEvent>>,
}

impl Profiler {
    pub fn new(capacity: usize) -> Self {
        Profiler {
            capacity,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, event: TaskEvent) {
        let mut events = self.events.lock().unwrap();
        events.push(event);
        if events.len() > self.capacity {
            let overflow = events.len() - self.capacity;
            events.drain(0..overflow);
        }
    }

    pub fn snapshot(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_evicts_oldest_events() {
        let profiler = Profiler::new(2);
        for i in 0..5u32 {
            profiler.record(TaskEvent {
                node: NodeId::task(i),
                label: "test",
                worker_id: 0,
                start: Instant::now(),
                duration: Duration::from_millis(1),
            });
        }
        let snap = profiler.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].node, NodeId::task(3));
        assert_eq!(snap[1].node, NodeId::task(4));
    }
}
