//! The task graph: a DAG of tasks keyed by id.

use std::collections::{HashMap, HashSet, VecDeque};

use forge_core::identifier::TaskId;
use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::error::{ConstructionError, ConstructionResult};
use crate::plan::ExecutionPlan;
use crate::task::Task;

/// DAG of tasks. Nodes are owned in an id-keyed map; a petgraph mirror
/// carries the edges for traversal. Every `depends_on` entry of a stored
/// task references another task in the graph; the
/// [builder](crate::builder::TaskGraphBuilder) establishes that before
/// anything is added here.
#[derive(Debug, Default)]
pub struct TaskGraph {
    tasks: IndexMap<TaskId, Task>,
    graph: DiGraph<TaskId, ()>,
    indices: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task. Edges to its dependencies are recorded immediately;
    /// dependencies that have not been added yet get placeholder nodes
    /// that are filled in when they arrive.
    pub fn add(&mut self, task: Task) {
        let index = self.index_of(&task.id);
        for dep in &task.depends_on {
            let dep_index = self.index_of(dep);
            // dependency edges point dep -> dependent
            if !self.graph.contains_edge(dep_index, index) {
                self.graph.add_edge(dep_index, index, ());
            }
        }
        self.tasks.insert(task.id.clone(), task);
    }

    fn index_of(&mut self, id: &TaskId) -> NodeIndex {
        if let Some(index) = self.indices.get(id) {
            *index
        } else {
            let index = self.graph.add_node(id.clone());
            self.indices.insert(id.clone(), index);
            index
        }
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.tasks.keys()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The tasks that depend on `id`.
    pub fn successors(&self, id: &TaskId) -> Vec<TaskId> {
        match self.indices.get(id) {
            Some(index) => self
                .graph
                .neighbors_directed(*index, Direction::Outgoing)
                .map(|i| self.graph[i].clone())
                .collect(),
            None => vec![],
        }
    }

    /// The tasks `id` depends on.
    pub fn dependencies(&self, id: &TaskId) -> Vec<TaskId> {
        self.tasks
            .get(id)
            .map(|t| t.depends_on.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Partition every task into ordered layers.
    pub fn execution_plan(&self) -> ConstructionResult<ExecutionPlan> {
        let all: Vec<TaskId> = self.tasks.keys().cloned().collect();
        self.layered_plan(all)
    }

    /// Partition `subset` plus its transitive dependencies into layers.
    /// Every dependency of an emitted task is also emitted.
    pub fn execution_plan_for(&self, subset: &[TaskId]) -> ConstructionResult<ExecutionPlan> {
        let mut included: HashSet<TaskId> = HashSet::new();
        let mut queue: VecDeque<TaskId> = subset.iter().cloned().collect();
        while let Some(id) = queue.pop_front() {
            if !self.tasks.contains_key(&id) || !included.insert(id.clone()) {
                continue;
            }
            for dep in self.dependencies(&id) {
                queue.push_back(dep);
            }
        }
        // keep graph insertion order for determinism
        let ordered: Vec<TaskId> = self
            .tasks
            .keys()
            .filter(|id| included.contains(*id))
            .cloned()
            .collect();
        self.layered_plan(ordered)
    }

    /// Kahn's algorithm over `included`, layer by layer. A non-empty
    /// remainder is a [`ConstructionError::TaskCycle`].
    fn layered_plan(&self, included: Vec<TaskId>) -> ConstructionResult<ExecutionPlan> {
        let member: HashSet<&TaskId> = included.iter().collect();
        let mut satisfied: HashSet<TaskId> = HashSet::new();
        let mut remaining = included.clone();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let (ready, rest): (Vec<TaskId>, Vec<TaskId>) =
                remaining.into_iter().partition(|id| {
                    self.dependencies(id)
                        .iter()
                        .filter(|dep| member.contains(dep))
                        .all(|dep| satisfied.contains(dep))
                });

            if ready.is_empty() {
                let mut remaining = rest;
                remaining.sort();
                return Err(ConstructionError::TaskCycle { remaining });
            }

            satisfied.extend(ready.iter().cloned());
            layers.push(ready);
            remaining = rest;
        }

        Ok(ExecutionPlan::new(layers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

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

    #[test]
    fn successors_follow_edges() {
        let mut graph = TaskGraph::new();
        graph.add(task("core:build", &[]));
        graph.add(task("lib:build", &["core:build"]));
        graph.add(task("app:build", &["lib:build", "core:build"]));

        let successors = graph.successors(&id("core:build"));
        assert_eq!(successors.len(), 2);
        assert_eq!(graph.dependencies(&id("app:build")).len(), 2);
    }

    #[test]
    fn plan_layers_respect_dependencies() {
        let mut graph = TaskGraph::new();
        graph.add(task("a:build", &["b:build"]));
        graph.add(task("b:build", &[]));

        let plan = graph.execution_plan().unwrap();
        assert_eq!(plan.layers().len(), 2);
        assert_eq!(plan.layers()[0], vec![id("b:build")]);
        assert_eq!(plan.layers()[1], vec![id("a:build")]);
    }

    #[test]
    fn subset_plan_pulls_transitive_dependencies() {
        let mut graph = TaskGraph::new();
        graph.add(task("core:build", &[]));
        graph.add(task("lib:build", &["core:build"]));
        graph.add(task("app:build", &["lib:build"]));
        graph.add(task("other:build", &[]));

        let plan = graph.execution_plan_for(&[id("app:build")]).unwrap();
        let ids: Vec<&TaskId> = plan.task_ids().collect();
        assert_eq!(ids.len(), 3);
        assert!(!ids.contains(&&id("other:build")));
        // every dependency of an emitted task is also emitted
        for task_id in plan.task_ids() {
            for dep in graph.dependencies(task_id) {
                assert!(plan.task_ids().any(|t| t == &dep));
            }
        }
    }

    #[test]
    fn cycle_is_reported_with_remainder() {
        let mut graph = TaskGraph::new();
        graph.add(task("a:build", &["b:build"]));
        graph.add(task("b:build", &["a:build"]));
        graph.add(task("c:build", &[]));

        match graph.execution_plan() {
            Err(ConstructionError::TaskCycle { remaining }) => {
                assert_eq!(remaining, vec![id("a:build"), id("b:build")]);
            }
            other => panic!("expected cycle, got {:?}", other.map(|_| ())),
        }
    }
}
