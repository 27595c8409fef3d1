use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use forge_core::identifier::TaskId;
use forge_engine::executor::{CancellationToken, TaskExecutor};
use forge_engine::scheduler::{Scheduler, SchedulerOptions};
use forge_engine::task::{Task, TaskResult, TaskResultBuilder};
use forge_engine::TaskGraph;

/// Counts concurrent executions so the worker cap is observable.
struct CountingExecutor {
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

impl TaskExecutor for CountingExecutor {
    fn execute(&self, task: &Task, _cancel: &CancellationToken) -> TaskResult {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(10));
        self.running.fetch_sub(1, Ordering::SeqCst);
        TaskResultBuilder::new(task.id.clone()).from_exit_code(0)
    }
}

fn flat_graph(count: usize) -> TaskGraph {
    let mut graph = TaskGraph::new();
    for i in 0..count {
        graph.add(Task {
            id: format!("p{}:build", i).parse().unwrap(),
            target: Default::default(),
            project_root: Default::default(),
            depends_on: BTreeSet::<TaskId>::new(),
            cacheable: false,
            phase_index: None,
        });
    }
    graph
}

#[test]
fn worker_cap_is_respected_with_excess_tasks() {
    let graph = flat_graph(24);
    let executor = CountingExecutor {
        running: Arc::new(AtomicUsize::new(0)),
        max_running: Arc::new(AtomicUsize::new(0)),
    };
    let scheduler = Scheduler::new(SchedulerOptions {
        workers: NonZeroUsize::new(3).unwrap(),
        keep_going: false,
    });
    let report = scheduler
        .execute(&graph, &executor, &CancellationToken::new(), None)
        .unwrap();

    assert_eq!(report.results.len(), 24);
    assert_eq!(report.success_count(), 24);
    assert!(executor.max_running.load(Ordering::SeqCst) <= 3);
}

#[test]
fn single_worker_still_drains_everything() {
    let graph = flat_graph(9);
    let executor = CountingExecutor {
        running: Arc::new(AtomicUsize::new(0)),
        max_running: Arc::new(AtomicUsize::new(0)),
    };
    let scheduler = Scheduler::new(SchedulerOptions {
        workers: NonZeroUsize::new(1).unwrap(),
        keep_going: false,
    });
    let report = scheduler
        .execute(&graph, &executor, &CancellationToken::new(), None)
        .unwrap();
    assert_eq!(report.success_count(), 9);
    assert_eq!(executor.max_running.load(Ordering::SeqCst), 1);
}
