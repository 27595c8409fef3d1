//! The ready-queue scheduler: N cooperating workers with per-worker deques,
//! a global priority queue, and work stealing between the deques.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use crossbeam::channel::unbounded;
use crossbeam::deque::{Steal, Stealer, Worker as WorkerDeque};
use forge_core::identifier::TaskId;
use parking_lot::Mutex;
use rand::Rng;

use crate::error::ConstructionResult;
use crate::executor::{CancellationToken, TaskExecutor};
use crate::graph::TaskGraph;
use crate::task::{TaskError, TaskResult, TaskResultBuilder, TaskState};

/// Called after every task reaches a terminal state, with the running
/// completion count and the plan total. Used by the daemon for progress
/// notifications.
pub type ProgressFn<'a> = &'a (dyn Fn(&TaskResult, usize, usize) + Sync);

/// Options controlling one scheduler run.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Number of logical workers; defaults to host parallelism
    pub workers: NonZeroUsize,
    /// Keep running unrelated subgraphs after a failure
    pub keep_going: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            workers: NonZeroUsize::new(num_cpus::get().max(1)).expect("cpu count is never 0"),
            keep_going: false,
        }
    }
}

/// The outcome of a scheduler run: one result per task in the graph.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub results: Vec<TaskResult>,
}

impl ExecutionReport {
    fn count(&self, state: TaskState) -> usize {
        self.results.iter().filter(|r| r.status == state).count()
    }

    /// COMPLETED plus CACHED results
    pub fn success_count(&self) -> usize {
        self.count(TaskState::Completed) + self.count(TaskState::Cached)
    }

    pub fn failure_count(&self) -> usize {
        self.count(TaskState::Failed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(TaskState::Skipped)
    }

    pub fn cached_count(&self) -> usize {
        self.count(TaskState::Cached)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|r| r.status == TaskState::Failed)
    }

    /// The exit code the run maps to: 0 unless any task failed.
    pub fn exit_code(&self) -> i32 {
        if self.failure_count() == 0 {
            0
        } else {
            1
        }
    }
}

/// Entry of the global ready queue. Orders by priority, then lower phase
/// hint, then lower task id.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Prioritized {
    priority: u64,
    phase: Reverse<usize>,
    id: Reverse<TaskId>,
}

impl Prioritized {
    fn new(id: TaskId, priority: u64, phase: Option<usize>) -> Self {
        Self {
            priority,
            phase: Reverse(phase.unwrap_or(usize::MAX)),
            id: Reverse(id),
        }
    }

    fn into_id(self) -> TaskId {
        self.id.0
    }
}

/// Weights that make common targets sort predictably.
fn kind_boost(target: &str) -> u64 {
    match target {
        "test" => 30,
        "build" => 20,
        "package" => 10,
        _ => 0,
    }
}

fn synthetic_weight(target: &str) -> u64 {
    kind_boost(target) + 1
}

/// Everything the workers mutate, guarded by one mutex. Execution itself
/// always happens outside the lock.
struct SchedulerState {
    states: HashMap<TaskId, TaskState>,
    /// Unfinished satisfying dependencies per task
    blocking: HashMap<TaskId, usize>,
    /// RUNNING tasks per target name, for `parallelism` caps
    running_per_target: HashMap<String, usize>,
    terminal: usize,
    total: usize,
    stop_admitting: bool,
    cancelled_marked: bool,
}

impl SchedulerState {
    fn new(graph: &TaskGraph) -> (Self, Vec<TaskId>) {
        let mut states = HashMap::new();
        let mut blocking = HashMap::new();
        let mut ready = Vec::new();
        for task in graph.tasks() {
            // count only dependencies that exist, mirroring the plan
            let deps = task.depends_on.iter().filter(|d| graph.contains(d)).count();
            blocking.insert(task.id.clone(), deps);
            if deps == 0 {
                states.insert(task.id.clone(), TaskState::Ready);
                ready.push(task.id.clone());
            } else {
                states.insert(task.id.clone(), TaskState::Pending);
            }
        }
        let total = states.len();
        (
            Self {
                states,
                blocking,
                running_per_target: HashMap::new(),
                terminal: 0,
                total,
                stop_admitting: false,
                cancelled_marked: false,
            },
            ready,
        )
    }

    fn all_terminal(&self) -> bool {
        self.terminal == self.total
    }

    /// Move a READY task to RUNNING. A task already claimed or skipped is
    /// stale; a task over its parallelism cap goes back to the queue.
    fn try_claim(&mut self, graph: &TaskGraph, id: &TaskId) -> Claim {
        if self.stop_admitting {
            return Claim::Stale;
        }
        if self.states.get(id) != Some(&TaskState::Ready) {
            return Claim::Stale;
        }
        let task = match graph.get(id) {
            Some(task) => task,
            None => return Claim::Stale,
        };
        if let Some(cap) = task.target.parallelism {
            let running = self
                .running_per_target
                .get(id.target())
                .copied()
                .unwrap_or(0);
            if running >= cap.max(1) {
                return Claim::Requeue;
            }
        }
        self.states.insert(id.clone(), TaskState::Running);
        *self
            .running_per_target
            .entry(id.target().to_string())
            .or_insert(0) += 1;
        Claim::Run
    }

    /// Record a terminal result for a previously RUNNING task. Returns the
    /// successors that became READY plus the tasks that became SKIPPED.
    fn finish(
        &mut self,
        graph: &TaskGraph,
        id: &TaskId,
        status: TaskState,
    ) -> (Vec<TaskId>, Vec<TaskId>) {
        debug_assert!(status.is_terminal());
        self.states.insert(id.clone(), status);
        self.terminal += 1;
        if let Some(count) = self.running_per_target.get_mut(id.target()) {
            *count = count.saturating_sub(1);
        }

        let mut newly_ready = Vec::new();
        let mut newly_skipped = Vec::new();

        if status.satisfies_dependents() {
            for successor in graph.successors(id) {
                let remaining = self
                    .blocking
                    .get_mut(&successor)
                    .expect("graph invariant: successor is in the graph");
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 && self.states.get(&successor) == Some(&TaskState::Pending) {
                    self.states.insert(successor.clone(), TaskState::Ready);
                    newly_ready.push(successor);
                }
            }
        } else {
            self.skip_descendants(graph, id, &mut newly_skipped);
        }

        (newly_ready, newly_skipped)
    }

    /// Mark every non-terminal descendant of `id` SKIPPED.
    fn skip_descendants(&mut self, graph: &TaskGraph, id: &TaskId, skipped: &mut Vec<TaskId>) {
        let mut queue: VecDeque<TaskId> = graph.successors(id).into();
        while let Some(descendant) = queue.pop_front() {
            match self.states.get(&descendant) {
                Some(TaskState::Pending) | Some(TaskState::Ready) => {
                    self.states.insert(descendant.clone(), TaskState::Skipped);
                    self.terminal += 1;
                    skipped.push(descendant.clone());
                    queue.extend(graph.successors(&descendant));
                }
                _ => {}
            }
        }
    }

    /// Fail-fast: stop admitting and skip everything not yet running.
    fn stop(&mut self) -> Vec<TaskId> {
        self.stop_admitting = true;
        self.skip_all_pending()
    }

    /// Cancellation: refuse further READY transitions. Runs once.
    fn cancel(&mut self) -> Vec<TaskId> {
        if self.cancelled_marked {
            return vec![];
        }
        self.cancelled_marked = true;
        self.stop_admitting = true;
        self.skip_all_pending()
    }

    fn skip_all_pending(&mut self) -> Vec<TaskId> {
        let mut skipped = Vec::new();
        for (id, state) in self.states.iter_mut() {
            if matches!(state, TaskState::Pending | TaskState::Ready) {
                *state = TaskState::Skipped;
                skipped.push(id.clone());
            }
        }
        self.terminal += skipped.len();
        skipped
    }
}

enum Claim {
    Run,
    Requeue,
    Stale,
}

/// Drives a task graph through an executor with work-stealing workers.
pub struct Scheduler {
    options: SchedulerOptions,
}

impl Scheduler {
    pub fn new(options: SchedulerOptions) -> Self {
        Self { options }
    }

    /// Execute every task in `graph`, respecting edges. Returns one result
    /// per task; tasks that never ran (failed or skipped dependencies,
    /// cancellation) get synthesized SKIPPED results.
    pub fn execute(
        &self,
        graph: &TaskGraph,
        executor: &dyn TaskExecutor,
        cancel: &CancellationToken,
        progress: Option<ProgressFn>,
    ) -> ConstructionResult<ExecutionReport> {
        if graph.is_empty() {
            return Ok(ExecutionReport::default());
        }

        let plan = graph.execution_plan()?;
        let priorities = compute_priorities(graph, &plan);
        let total = graph.len();

        let (state, initially_ready) = SchedulerState::new(graph);
        let state = Mutex::new(state);
        let global: Mutex<BinaryHeap<Prioritized>> = Mutex::new(
            initially_ready
                .into_iter()
                .map(|id| {
                    let phase = graph.get(&id).and_then(|t| t.phase_index);
                    let priority = priorities.get(&id).copied().unwrap_or(0);
                    Prioritized::new(id, priority, phase)
                })
                .collect(),
        );

        let worker_count = self.options.workers.get().min(total.max(1));
        let keep_going = self.options.keep_going;

        let mut deques: Vec<WorkerDeque<TaskId>> = Vec::with_capacity(worker_count);
        let mut stealers: Vec<Stealer<TaskId>> = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let deque = WorkerDeque::new_lifo();
            stealers.push(deque.stealer());
            deques.push(deque);
        }

        let (results_tx, results_rx) = unbounded::<TaskResult>();
        let finished = Mutex::new(0usize);

        crossbeam::scope(|scope| {
            for (index, own) in deques.into_iter().enumerate() {
                let stealers = &stealers;
                let state = &state;
                let global = &global;
                let priorities = &priorities;
                let results_tx = results_tx.clone();
                let finished = &finished;
                scope.spawn(move |_| {
                    run_worker(WorkerContext {
                        index,
                        own,
                        stealers,
                        state,
                        global,
                        priorities,
                        graph,
                        executor,
                        cancel,
                        keep_going,
                        results_tx,
                        progress,
                        finished,
                        total,
                    });
                });
            }
        })
        .expect("scheduler worker panicked");

        drop(results_tx);
        let mut report = ExecutionReport::default();
        report.results.extend(results_rx.into_iter());
        Ok(report)
    }
}

struct WorkerContext<'env> {
    index: usize,
    own: WorkerDeque<TaskId>,
    stealers: &'env [Stealer<TaskId>],
    state: &'env Mutex<SchedulerState>,
    global: &'env Mutex<BinaryHeap<Prioritized>>,
    priorities: &'env HashMap<TaskId, u64>,
    graph: &'env TaskGraph,
    executor: &'env dyn TaskExecutor,
    cancel: &'env CancellationToken,
    keep_going: bool,
    results_tx: crossbeam::channel::Sender<TaskResult>,
    progress: Option<ProgressFn<'env>>,
    finished: &'env Mutex<usize>,
    total: usize,
}

fn run_worker(ctx: WorkerContext) {
    loop {
        if ctx.cancel.is_cancelled() {
            let skipped = ctx.state.lock().cancel();
            emit_skipped(&ctx, skipped, Some(TaskError::cancelled()));
        }

        if ctx.state.lock().all_terminal() {
            break;
        }

        let next = ctx
            .own
            .pop()
            .or_else(|| ctx.global.lock().pop().map(Prioritized::into_id))
            .or_else(|| steal_one(&ctx));

        let Some(id) = next else {
            thread::sleep(Duration::from_millis(1));
            continue;
        };

        let claim = ctx.state.lock().try_claim(ctx.graph, &id);
        match claim {
            Claim::Stale => continue,
            Claim::Requeue => {
                push_global(&ctx, id);
                thread::sleep(Duration::from_millis(1));
                continue;
            }
            Claim::Run => {}
        }

        let task = ctx.graph.get(&id).expect("claimed tasks are in the graph");
        trace!("worker {} running {}", ctx.index, id);
        let result = ctx.executor.execute(task, ctx.cancel);
        let status = if result.status.is_terminal() && result.status != TaskState::Skipped {
            result.status
        } else {
            TaskState::Failed
        };

        let (newly_ready, newly_skipped) = {
            let mut state = ctx.state.lock();
            let outcome = state.finish(ctx.graph, &id, status);
            if status == TaskState::Failed && !ctx.keep_going && !ctx.cancel.is_cancelled() {
                let mut everything = outcome.1;
                everything.extend(state.stop());
                (outcome.0, everything)
            } else {
                outcome
            }
        };

        emit_result(&ctx, result);
        emit_skipped(
            &ctx,
            newly_skipped,
            Some(TaskError::new(
                forge_core::error::ErrorCode::TaskFailed,
                format!("not run because {} failed", id),
            )),
        );

        // affinity: keep one successor local, overflow to the global queue
        let mut ready = newly_ready.into_iter();
        if let Some(first) = ready.next() {
            ctx.own.push(first);
        }
        for id in ready {
            push_global(&ctx, id);
        }
    }
}

fn steal_one(ctx: &WorkerContext) -> Option<TaskId> {
    if ctx.stealers.len() < 2 {
        return None;
    }
    let victim = rand::thread_rng().gen_range(0..ctx.stealers.len());
    if victim == ctx.index {
        return None;
    }
    match ctx.stealers[victim].steal() {
        Steal::Success(id) => Some(id),
        _ => None,
    }
}

fn push_global(ctx: &WorkerContext, id: TaskId) {
    let phase = ctx.graph.get(&id).and_then(|t| t.phase_index);
    let priority = ctx.priorities.get(&id).copied().unwrap_or(0);
    ctx.global.lock().push(Prioritized::new(id, priority, phase));
}

fn emit_result(ctx: &WorkerContext, result: TaskResult) {
    let (done, total) = {
        let mut finished = ctx.finished.lock();
        *finished += 1;
        (*finished, ctx.total)
    };
    if let Some(progress) = ctx.progress {
        progress(&result, done, total);
    }
    let _ = ctx.results_tx.send(result);
}

fn emit_skipped(ctx: &WorkerContext, skipped: Vec<TaskId>, error: Option<TaskError>) {
    for id in skipped {
        let result = TaskResultBuilder::new(id).skipped(error.clone());
        emit_result(ctx, result);
    }
}

/// priority = criticalPath + 10 * successorCount + kindBoost. The critical
/// path is computed once per run by walking the plan's layers backwards,
/// so every successor's value exists before its dependencies need it.
fn compute_priorities(graph: &TaskGraph, plan: &crate::plan::ExecutionPlan) -> HashMap<TaskId, u64> {
    let mut critical: HashMap<TaskId, u64> = HashMap::new();
    for layer in plan.layers().iter().rev() {
        for id in layer {
            let own = synthetic_weight(id.target());
            let best_successor = graph
                .successors(id)
                .iter()
                .filter_map(|s| critical.get(s))
                .max()
                .copied()
                .unwrap_or(0);
            critical.insert(id.clone(), own + best_successor);
        }
    }

    graph
        .task_ids()
        .map(|id| {
            let successors = graph.successors(id).len() as u64;
            let priority = critical.get(id).copied().unwrap_or(0)
                + 10 * successors
                + kind_boost(id.target());
            (id.clone(), priority)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use parking_lot::Mutex as PlMutex;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task {
            id: id.parse().unwrap(),
            target: Default::default(),
            project_root: Default::default(),
            depends_on: deps
                .iter()
                .map(|d| d.parse().unwrap())
                .collect::<BTreeSet<TaskId>>(),
            cacheable: false,
            phase_index: None,
        }
    }

    fn id(repr: &str) -> TaskId {
        repr.parse().unwrap()
    }

    /// Records execution order; fails the tasks named in `failures`.
    struct RecordingExecutor {
        order: Arc<PlMutex<Vec<TaskId>>>,
        failures: Vec<TaskId>,
    }

    impl RecordingExecutor {
        fn new(failures: &[&str]) -> Self {
            Self {
                order: Arc::new(PlMutex::new(vec![])),
                failures: failures.iter().map(|f| f.parse().unwrap()).collect(),
            }
        }
    }

    impl TaskExecutor for RecordingExecutor {
        fn execute(&self, task: &Task, cancel: &CancellationToken) -> TaskResult {
            self.order.lock().push(task.id.clone());
            let builder = TaskResultBuilder::new(task.id.clone());
            if cancel.is_cancelled() {
                builder.failed(TaskError::cancelled(), None)
            } else if self.failures.contains(&task.id) {
                builder.from_exit_code(1)
            } else {
                builder.from_exit_code(0)
            }
        }
    }

    fn run(
        graph: &TaskGraph,
        executor: &RecordingExecutor,
        keep_going: bool,
    ) -> ExecutionReport {
        let scheduler = Scheduler::new(SchedulerOptions {
            workers: NonZeroUsize::new(4).unwrap(),
            keep_going,
        });
        scheduler
            .execute(graph, executor, &CancellationToken::new(), None)
            .unwrap()
    }

    #[test]
    fn empty_graph_is_a_successful_noop() {
        let report = run(&TaskGraph::new(), &RecordingExecutor::new(&[]), false);
        assert!(report.results.is_empty());
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn dependencies_finish_before_dependents_start() {
        let mut graph = TaskGraph::new();
        graph.add(task("core:build", &[]));
        graph.add(task("lib:build", &["core:build"]));
        graph.add(task("app:build", &["lib:build"]));
        graph.add(task("app:test", &["app:build"]));

        let executor = RecordingExecutor::new(&[]);
        let report = run(&graph, &executor, false);

        assert_eq!(report.success_count(), 4);
        let order = executor.order.lock();
        let position = |target: &str| order.iter().position(|t| t == &id(target)).unwrap();
        assert!(position("core:build") < position("lib:build"));
        assert!(position("lib:build") < position("app:build"));
        assert!(position("app:build") < position("app:test"));
    }

    #[test]
    fn failure_skips_descendants_and_stops_admitting() {
        let mut graph = TaskGraph::new();
        graph.add(task("b:build", &[]));
        graph.add(task("a:build", &["b:build"]));

        let executor = RecordingExecutor::new(&["b:build"]);
        let report = run(&graph, &executor, false);

        assert_eq!(report.failure_count(), 1);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.success_count(), 0);
        assert_eq!(report.exit_code(), 1);
        let skipped = report
            .results
            .iter()
            .find(|r| r.status == TaskState::Skipped)
            .unwrap();
        assert_eq!(skipped.task, id("a:build"));
    }

    #[test]
    fn keep_going_still_runs_unrelated_subgraphs() {
        let mut graph = TaskGraph::new();
        graph.add(task("bad:build", &[]));
        graph.add(task("dependent:build", &["bad:build"]));
        graph.add(task("unrelated:build", &[]));
        graph.add(task("unrelated:test", &["unrelated:build"]));

        let executor = RecordingExecutor::new(&["bad:build"]);
        let report = run(&graph, &executor, true);

        assert_eq!(report.failure_count(), 1);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.success_count(), 2, "unrelated subgraph completed");
    }

    #[test]
    fn every_task_gets_exactly_one_result() {
        let mut graph = TaskGraph::new();
        for i in 0..20 {
            let name = format!("p{}:build", i);
            if i < 4 {
                graph.add(task(&name, &[]));
            } else {
                let dep = format!("p{}:build", i % 4);
                graph.add(task(&name, &[dep.as_str()]));
            }
        }
        let executor = RecordingExecutor::new(&[]);
        let report = run(&graph, &executor, false);
        assert_eq!(report.results.len(), 20);
        let mut ids: Vec<_> = report.results.iter().map(|r| r.task.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
    }

    #[test]
    fn cancellation_skips_pending_tasks() {
        let mut graph = TaskGraph::new();
        graph.add(task("a:build", &[]));
        graph.add(task("b:build", &["a:build"]));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let executor = RecordingExecutor::new(&[]);
        let scheduler = Scheduler::new(SchedulerOptions {
            workers: NonZeroUsize::new(2).unwrap(),
            keep_going: false,
        });
        let report = scheduler.execute(&graph, &executor, &cancel, None).unwrap();
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.skipped_count(), 2);
        assert!(executor.order.lock().is_empty(), "nothing was admitted");
    }

    #[test]
    fn priorities_prefer_long_critical_paths() {
        let mut graph = TaskGraph::new();
        graph.add(task("deep3:build", &[]));
        graph.add(task("deep2:build", &["deep3:build"]));
        graph.add(task("deep1:build", &["deep2:build"]));
        graph.add(task("shallow:lint", &[]));

        let plan = graph.execution_plan().unwrap();
        let priorities = compute_priorities(&graph, &plan);
        assert!(
            priorities[&id("deep3:build")] > priorities[&id("shallow:lint")],
            "the root of the deep chain outranks the isolated task"
        );
    }

    #[test]
    fn kind_boost_orders_common_targets() {
        assert!(kind_boost("test") > kind_boost("build"));
        assert!(kind_boost("build") > kind_boost("package"));
        assert_eq!(kind_boost("anything-else"), 0);
    }
}
