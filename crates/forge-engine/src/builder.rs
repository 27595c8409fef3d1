//! Expands `(target, project set)` requests into task graphs.

use std::collections::{BTreeSet, VecDeque};
use std::path::Path;

use forge_core::files::projects_for_files;
use forge_core::graph::ProjectGraph;
use forge_core::identifier::TaskId;
use forge_core::project::{DependencyRef, Project, TargetConfiguration};
use indexmap::IndexMap;

use crate::error::{ConstructionError, ConstructionResult};
use crate::graph::TaskGraph;
use crate::task::Task;

/// Builds task graphs from a project graph.
///
/// Expansion first creates a task for every reachable `(project, target)`
/// pair, then a second pass resolves `dependsOn` references against the
/// full set of created task ids, so resolution order can not change the
/// result. Unresolved references are dropped silently; a reference that
/// resolves to the task itself is a [`ConstructionError::TaskSelfDep`].
pub struct TaskGraphBuilder<'a> {
    graph: &'a ProjectGraph,
}

impl<'a> TaskGraphBuilder<'a> {
    pub fn new(graph: &'a ProjectGraph) -> Self {
        Self { graph }
    }

    /// Build the graph for `target` over an explicit project set. Projects
    /// that don't declare the target contribute nothing; an unknown
    /// project name is an error.
    pub fn build(&self, target: &str, projects: &[String]) -> ConstructionResult<TaskGraph> {
        for name in projects {
            if self.graph.get(name).is_none() {
                return Err(ConstructionError::ProjectNotFound(name.clone()));
            }
        }
        self.expand(target, projects.iter().map(String::as_str))
    }

    /// Build for one project, validating that the target exists on it.
    pub fn build_single(&self, project: &str, target: &str) -> ConstructionResult<TaskGraph> {
        let found = self
            .graph
            .get(project)
            .ok_or_else(|| ConstructionError::ProjectNotFound(project.to_string()))?;
        if found.target(target).is_none() {
            return Err(ConstructionError::TargetNotFound {
                project: project.to_string(),
                target: target.to_string(),
            });
        }
        self.expand(target, std::iter::once(project))
    }

    /// Build for `target` over every project in the graph.
    pub fn build_all(&self, target: &str) -> ConstructionResult<TaskGraph> {
        self.expand(target, self.graph.all().map(|p| p.name.as_str()))
    }

    /// Build for specific projects plus their transitive project
    /// dependencies, so cross-project ordering is preserved.
    pub fn build_for_projects(
        &self,
        target: &str,
        projects: &[String],
    ) -> ConstructionResult<TaskGraph> {
        for name in projects {
            if self.graph.get(name).is_none() {
                return Err(ConstructionError::ProjectNotFound(name.clone()));
            }
        }
        let mut set: Vec<String> = projects.to_vec();
        for name in projects {
            for dep in self.graph.transitive_deps_of(name) {
                if !set.contains(&dep) {
                    set.push(dep);
                }
            }
        }
        self.expand(target, set.iter().map(String::as_str))
    }

    /// Build for the projects owning `changed_files` plus their transitive
    /// dependents.
    pub fn build_affected<P: AsRef<Path>>(
        &self,
        target: &str,
        changed_files: &[P],
    ) -> ConstructionResult<TaskGraph> {
        let mut set: Vec<String> = Vec::new();
        for owner in projects_for_files(self.graph, changed_files) {
            for dependent in self.graph.transitive_dependents_of(&owner) {
                if !set.contains(&dependent) {
                    set.push(dependent);
                }
            }
            if !set.contains(&owner) {
                set.push(owner);
            }
        }
        self.expand(target, set.iter().map(String::as_str))
    }

    fn expand<'p>(
        &self,
        target: &str,
        projects: impl Iterator<Item = &'p str>,
    ) -> ConstructionResult<TaskGraph> {
        let mut queue: VecDeque<TaskId> = VecDeque::new();
        for project in projects {
            if self.has_target(project, target) {
                if let Ok(id) = TaskId::new(project, target) {
                    queue.push_back(id);
                }
            }
        }

        // expansion: create every reachable task, remembering raw refs
        let mut raw: IndexMap<TaskId, Vec<DependencyRef>> = IndexMap::new();
        while let Some(id) = queue.pop_front() {
            if raw.contains_key(&id) {
                continue;
            }
            let project = self
                .graph
                .get(id.project())
                .expect("expansion only enqueues existing projects");
            let config = project
                .target(id.target())
                .expect("expansion only enqueues existing targets");
            let refs: Vec<DependencyRef> = config
                .depends_on
                .iter()
                .map(|raw| DependencyRef::parse(raw))
                .collect();
            for candidate in self.candidates(project, &refs) {
                queue.push_back(candidate);
            }
            raw.insert(id, refs);
        }

        // resolution: all task ids are known now
        let mut task_graph = TaskGraph::new();
        for (id, refs) in &raw {
            let mut depends_on = BTreeSet::new();
            for candidate in
                self.candidates(self.graph.get(id.project()).expect("created above"), refs)
            {
                if &candidate == id {
                    return Err(ConstructionError::TaskSelfDep(id.clone()));
                }
                if raw.contains_key(&candidate) {
                    depends_on.insert(candidate);
                }
            }
            let project = self.graph.get(id.project()).expect("created above");
            let config = project.target(id.target()).expect("created above");
            task_graph.add(self.make_task(id.clone(), project, config, depends_on));
        }

        // refuse cycles before anything is scheduled
        task_graph.execution_plan()?;
        Ok(task_graph)
    }

    /// The task ids a ref list can resolve to, in ref order. Only pairs
    /// where the project declares the target are produced; everything else
    /// drops here.
    fn candidates(&self, project: &Project, refs: &[DependencyRef]) -> Vec<TaskId> {
        let mut out = Vec::new();
        for reference in refs {
            match reference {
                DependencyRef::SameProject(target) => {
                    if self.has_target(&project.name, target) {
                        out.extend(TaskId::new(&project.name, target));
                    }
                }
                DependencyRef::Dependencies(target) => {
                    for dep in self.graph.project_deps_of(&project.name) {
                        if self.has_target(&dep.name, target) {
                            out.extend(TaskId::new(&dep.name, target));
                        }
                    }
                }
                DependencyRef::Project {
                    project: referenced,
                    target,
                } => {
                    let name = if referenced == "self" {
                        project.name.as_str()
                    } else {
                        referenced.as_str()
                    };
                    if self.has_target(name, target) {
                        out.extend(TaskId::new(name, target));
                    }
                }
            }
        }
        out
    }

    fn has_target(&self, project: &str, target: &str) -> bool {
        self.graph
            .get(project)
            .map(|p| p.targets.contains_key(target))
            .unwrap_or(false)
    }

    fn make_task(
        &self,
        id: TaskId,
        project: &Project,
        config: &TargetConfiguration,
        depends_on: BTreeSet<TaskId>,
    ) -> Task {
        let phase_index = config
            .options
            .extra
            .get("phase")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize);
        Task {
            id,
            target: config.clone(),
            project_root: project.root.clone(),
            depends_on,
            cacheable: config.cache,
            phase_index,
        }
    }
}
