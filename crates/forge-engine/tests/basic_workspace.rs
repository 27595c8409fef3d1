use forge_core::config::ExecutionDefaults;
use forge_core::graph::{Dependency, DependencyKind, ProjectGraph, ProjectGraphBuilder};
use forge_core::project::{Project, TargetConfiguration};
use forge_engine::local::LocalExecutor;
use forge_engine::scheduler::{Scheduler, SchedulerOptions};
use forge_engine::{CancellationToken, TaskGraphBuilder, TaskState};

fn shell_target(command: &str, depends_on: &[&str]) -> TargetConfiguration {
    TargetConfiguration {
        command: Some(command.to_string()),
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

fn two_project_graph(b_command: &str) -> ProjectGraph {
    let mut builder = ProjectGraphBuilder::new();

    let mut a = Project::new("a", "libs/a");
    a.targets
        .insert("build".into(), shell_target("echo building a", &["^build"]));
    builder.add_project(a);

    let mut b = Project::new("b", "libs/b");
    b.targets.insert("build".into(), shell_target(b_command, &[]));
    builder.add_project(b);

    builder.add_dependency(Dependency {
        source: "a".into(),
        target: "b".into(),
        kind: DependencyKind::Static,
        source_file: None,
    });
    builder.build()
}

fn run_all(graph: &ProjectGraph, target: &str) -> forge_engine::ExecutionReport {
    let workspace = tempfile::tempdir().unwrap();
    for project in graph.all() {
        std::fs::create_dir_all(workspace.path().join(&project.root)).unwrap();
    }
    let task_graph = TaskGraphBuilder::new(graph).build_all(target).unwrap();
    let executor = LocalExecutor::new(workspace.path().to_path_buf(), ExecutionDefaults::default());
    Scheduler::new(SchedulerOptions::default())
        .execute(&task_graph, &executor, &CancellationToken::new(), None)
        .unwrap()
}

#[test]
fn dependency_layers_execute_in_order_and_succeed() {
    let graph = two_project_graph("echo building b");

    // the plan the scheduler derives is the dry-run plan
    let task_graph = TaskGraphBuilder::new(&graph).build_all("build").unwrap();
    let plan = task_graph.execution_plan().unwrap();
    assert_eq!(plan.layers().len(), 2);
    assert_eq!(plan.layers()[0][0].to_string(), "b:build");
    assert_eq!(plan.layers()[1][0].to_string(), "a:build");

    let report = run_all(&graph, "build");
    assert_eq!(report.success_count(), 2);
    assert_eq!(report.exit_code(), 0);

    // invariant: dependencies terminate before dependents start
    let b = report
        .results
        .iter()
        .find(|r| r.task.to_string() == "b:build")
        .unwrap();
    let a = report
        .results
        .iter()
        .find(|r| r.task.to_string() == "a:build")
        .unwrap();
    assert!(b.end_time <= a.start_time);
}

#[test]
fn failing_dependency_skips_dependents() {
    let graph = two_project_graph("exit 7");
    let report = run_all(&graph, "build");

    assert_eq!(report.failure_count(), 1);
    assert_eq!(report.skipped_count(), 1);
    assert_eq!(report.success_count(), 0);
    assert_eq!(report.exit_code(), 1);

    let failed = report.failed().next().unwrap();
    assert_eq!(failed.task.to_string(), "b:build");
    assert_eq!(failed.exit_code, Some(7));

    let skipped = report
        .results
        .iter()
        .find(|r| r.status == TaskState::Skipped)
        .unwrap();
    assert_eq!(skipped.task.to_string(), "a:build");
}

#[test]
fn dry_run_and_run_agree_on_task_ids_and_layers() {
    let graph = two_project_graph("echo ok");
    let task_graph = TaskGraphBuilder::new(&graph).build_all("build").unwrap();

    let dry = task_graph.execution_plan().unwrap();
    let wet = task_graph.execution_plan().unwrap();
    assert_eq!(dry, wet);
}
