//! The project graph: nodes, dependency edges, and traversal operations.
//!
//! Cycles are permitted here (they only indicate build-system metadata);
//! the task graph builder is the component that refuses them.

use std::collections::{HashSet, VecDeque};

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;

use crate::error::{ErrorCode, StructuredError};
use crate::project::{Project, ProjectType};

/// How a dependency edge was established.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Established at runtime (lazy imports and the like)
    Dynamic,
    /// Not visible in source, configured explicitly
    Implicit,
    /// Declared in build metadata
    #[default]
    #[serde(other)]
    Static,
}

/// A directed dependency between two projects.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub kind: DependencyKind,
    /// The file that evidences the edge, when an inferrer knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
}

/// A third-party package referenced by projects. Present in the graph so
/// edges can point at it, but never scheduled.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExternalNode {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// An error raised by graph traversal
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("project graph contains a cycle; unsatisfiable projects: {}", remaining.iter().join(", "))]
    Cycle { remaining: Vec<String> },
    #[error("project {0:?} not found")]
    ProjectNotFound(String),
}

impl StructuredError for GraphError {
    fn code(&self) -> ErrorCode {
        match self {
            GraphError::Cycle { .. } => ErrorCode::GraphCycle,
            GraphError::ProjectNotFound(_) => ErrorCode::ProjectNotFound,
        }
    }

    fn context(&self) -> serde_json::Value {
        match self {
            GraphError::Cycle { remaining } => serde_json::json!({ "remaining": remaining }),
            GraphError::ProjectNotFound(name) => serde_json::json!({ "project": name }),
        }
    }
}

/// Immutable typed graph of projects and their dependency edges.
///
/// Stored as `(nodes map, edges map)` keyed by stable string ids, so the
/// data carries no reference cycles regardless of what the edges do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectGraph {
    nodes: IndexMap<String, Project>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    external_nodes: IndexMap<String, ExternalNode>,
    edges: IndexMap<String, Vec<Dependency>>,
}

impl ProjectGraph {
    /// Get a project by name.
    pub fn get(&self, name: &str) -> Option<&Project> {
        self.nodes.get(name)
    }

    /// All projects, in discovery order.
    pub fn all(&self) -> impl Iterator<Item = &Project> {
        self.nodes.values()
    }

    /// Number of (non-external) projects.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Projects carrying `tag`.
    pub fn by_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Project> {
        self.nodes.values().filter(move |p| p.tags.contains(tag))
    }

    /// Projects of a given type.
    pub fn by_type(&self, ty: ProjectType) -> impl Iterator<Item = &Project> {
        self.nodes.values().filter(move |p| p.project_type == ty)
    }

    /// An external node by name.
    pub fn external(&self, name: &str) -> Option<&ExternalNode> {
        self.external_nodes.get(name)
    }

    /// The outgoing dependency edges of `name`, in declaration order.
    pub fn deps_of(&self, name: &str) -> &[Dependency] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct dependencies of `name` that are projects (external targets
    /// are skipped, they are never scheduled).
    pub fn project_deps_of<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Project> {
        self.deps_of(name)
            .iter()
            .filter_map(|dep| self.nodes.get(&dep.target))
    }

    /// Every project reachable from `name` through dependency edges.
    pub fn transitive_deps_of(&self, name: &str) -> IndexSet<String> {
        self.bfs(name, |node| {
            self.deps_of(node)
                .iter()
                .map(|d| d.target.clone())
                .collect()
        })
    }

    /// Every project that transitively depends on `name`.
    pub fn transitive_dependents_of(&self, name: &str) -> IndexSet<String> {
        self.bfs(name, |node| {
            self.edges
                .iter()
                .filter(|(_, deps)| deps.iter().any(|d| d.target == node))
                .map(|(source, _)| source.clone())
                .collect()
        })
    }

    fn bfs(&self, start: &str, next: impl Fn(&str) -> Vec<String>) -> IndexSet<String> {
        let mut found = IndexSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(start.to_string());
        while let Some(node) = queue.pop_front() {
            for neighbor in next(&node) {
                if self.nodes.contains_key(&neighbor) && found.insert(neighbor.clone()) {
                    queue.push_back(neighbor);
                }
            }
        }
        found
    }

    /// Partition the projects into ordered layers where layer `i` only
    /// depends on layers `< i`.
    ///
    /// # Error
    /// Fails with [`GraphError::Cycle`] naming the remaining set on the
    /// first iteration where no project can be satisfied.
    pub fn topological_layers(&self) -> Result<Vec<Vec<String>>, GraphError> {
        let mut remaining: IndexSet<&str> = self.nodes.keys().map(String::as_str).collect();
        let mut placed: HashSet<&str> = HashSet::new();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let satisfied: Vec<&str> = remaining
                .iter()
                .copied()
                .filter(|name| {
                    self.deps_of(name)
                        .iter()
                        .filter(|dep| self.nodes.contains_key(&dep.target))
                        .all(|dep| placed.contains(dep.target.as_str()))
                })
                .collect();

            if satisfied.is_empty() {
                return Err(GraphError::Cycle {
                    remaining: remaining.iter().map(|s| s.to_string()).collect(),
                });
            }

            for name in &satisfied {
                remaining.shift_remove(*name);
                placed.insert(*name);
            }
            layers.push(satisfied.into_iter().map(String::from).collect());
        }

        Ok(layers)
    }
}

/// Accumulates projects and edges during discovery, applying the
/// project-level merge semantics, then freezes into a [`ProjectGraph`].
#[derive(Debug, Default)]
pub struct ProjectGraphBuilder {
    nodes: IndexMap<String, Project>,
    external_nodes: IndexMap<String, ExternalNode>,
    edges: IndexMap<String, Vec<Dependency>>,
}

impl ProjectGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or merge a project contribution. When a project of the same
    /// name was already reported, target maps merge with the later
    /// contribution winning per target name and tags union.
    pub fn add_project(&mut self, project: Project) {
        match self.nodes.get_mut(&project.name) {
            Some(existing) => {
                for (target_name, target) in project.targets {
                    existing.targets.insert(target_name, target);
                }
                existing.tags.extend(project.tags);
                if existing.source_root.is_none() {
                    existing.source_root = project.source_root;
                }
            }
            None => {
                self.nodes.insert(project.name.clone(), project);
            }
        }
    }

    /// Add an external node. First contribution wins.
    pub fn add_external_node(&mut self, node: ExternalNode) {
        self.external_nodes.entry(node.name.clone()).or_insert(node);
    }

    /// Record a dependency edge. Edges whose endpoints don't exist are
    /// dropped with a warning once [`build`](Self::build) runs.
    pub fn add_dependency(&mut self, dependency: Dependency) {
        self.edges
            .entry(dependency.source.clone())
            .or_default()
            .push(dependency);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn projects(&self) -> &IndexMap<String, Project> {
        &self.nodes
    }

    pub fn projects_mut(&mut self) -> &mut IndexMap<String, Project> {
        &mut self.nodes
    }

    /// Move the edges and external nodes out of another builder into this
    /// one. Used when projects are re-added after post-processing.
    pub fn absorb_edges(&mut self, mut other: ProjectGraphBuilder) {
        for (_, deps) in std::mem::take(&mut other.edges) {
            for dep in deps {
                self.add_dependency(dep);
            }
        }
        for (_, node) in std::mem::take(&mut other.external_nodes) {
            self.add_external_node(node);
        }
    }

    /// Validate edges and freeze. Duplicate directed edges collapse to the
    /// first occurrence; edges naming unknown endpoints are dropped.
    pub fn build(mut self) -> ProjectGraph {
        let mut validated: IndexMap<String, Vec<Dependency>> = IndexMap::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for (source, deps) in std::mem::take(&mut self.edges) {
            if !self.nodes.contains_key(&source) {
                warn!("dropping edges from unknown project {:?}", source);
                continue;
            }
            for dep in deps {
                let known_target = self.nodes.contains_key(&dep.target)
                    || self.external_nodes.contains_key(&dep.target);
                if !known_target {
                    warn!(
                        "dropping edge {} -> {}: target is not in the graph",
                        dep.source, dep.target
                    );
                    continue;
                }
                if seen.insert((dep.source.clone(), dep.target.clone())) {
                    validated.entry(source.clone()).or_default().push(dep);
                }
            }
        }

        ProjectGraph {
            nodes: self.nodes,
            external_nodes: self.external_nodes,
            edges: validated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::TargetConfiguration;

    fn dep(source: &str, target: &str) -> Dependency {
        Dependency {
            source: source.to_string(),
            target: target.to_string(),
            kind: DependencyKind::Static,
            source_file: None,
        }
    }

    fn graph_of(edges: &[(&str, &str)]) -> ProjectGraph {
        let mut builder = ProjectGraphBuilder::new();
        for (source, target) in edges {
            for name in [source, target] {
                if !builder.contains(name) {
                    builder.add_project(Project::new(*name, format!("libs/{name}")));
                }
            }
            builder.add_dependency(dep(source, target));
        }
        builder.build()
    }

    #[test]
    fn merge_unions_targets_and_tags() {
        let mut builder = ProjectGraphBuilder::new();

        let mut first = Project::new("p", "libs/p");
        first.targets.insert("build".into(), TargetConfiguration::default());
        first.tags.insert("scope:shared".into());
        builder.add_project(first);

        let mut second = Project::new("p", "libs/p");
        second.targets.insert("test".into(), TargetConfiguration::default());
        second.tags.insert("lang:js".into());
        builder.add_project(second);

        let graph = builder.build();
        let merged = graph.get("p").unwrap();
        assert!(merged.targets.contains_key("build"));
        assert!(merged.targets.contains_key("test"));
        assert_eq!(merged.tags.len(), 2);
    }

    #[test]
    fn duplicate_edges_collapse() {
        let graph = graph_of(&[("a", "b"), ("a", "b")]);
        assert_eq!(graph.deps_of("a").len(), 1);
    }

    #[test]
    fn edges_to_unknown_projects_drop() {
        let mut builder = ProjectGraphBuilder::new();
        builder.add_project(Project::new("a", "libs/a"));
        builder.add_dependency(dep("a", "ghost"));
        let graph = builder.build();
        assert!(graph.deps_of("a").is_empty());
    }

    #[test]
    fn transitive_traversals() {
        let graph = graph_of(&[("app", "feature"), ("feature", "core"), ("other", "core")]);
        let deps = graph.transitive_deps_of("app");
        assert_eq!(deps.len(), 2);
        assert!(deps.contains("core"));

        let dependents = graph.transitive_dependents_of("core");
        assert_eq!(dependents.len(), 3);
        assert!(dependents.contains("app"));
        assert!(dependents.contains("other"));
    }

    #[test]
    fn layers_respect_edges() {
        let graph = graph_of(&[("app", "lib"), ("lib", "core")]);
        let layers = graph.topological_layers().unwrap();
        assert_eq!(layers, vec![
            vec!["core".to_string()],
            vec!["lib".to_string()],
            vec!["app".to_string()],
        ]);
    }

    #[test]
    fn cycle_reports_remaining() {
        let graph = graph_of(&[("a", "b"), ("b", "a"), ("c", "a")]);
        match graph.topological_layers() {
            Err(GraphError::Cycle { remaining }) => {
                assert!(remaining.contains(&"a".to_string()));
                assert!(remaining.contains(&"b".to_string()));
                assert!(remaining.contains(&"c".to_string()));
            }
            other => panic!("expected cycle, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn external_nodes_are_edge_targets_but_not_projects() {
        let mut builder = ProjectGraphBuilder::new();
        builder.add_project(Project::new("app", "apps/app"));
        builder.add_external_node(ExternalNode {
            name: "npm:lodash".into(),
            version: Some("4.17.21".into()),
        });
        builder.add_dependency(dep("app", "npm:lodash"));
        let graph = builder.build();
        assert_eq!(graph.deps_of("app").len(), 1);
        assert!(graph.get("npm:lodash").is_none());
        assert!(graph.external("npm:lodash").is_some());
        // never scheduled: project_deps_of skips it
        assert_eq!(graph.project_deps_of("app").count(), 0);
    }
}
