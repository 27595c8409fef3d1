//! The inference plugin host.
//!
//! An inferrer converts files in the workspace into projects and edges. The
//! host owns the registered plugin instances for the life of the daemon,
//! walks the workspace for each plugin's pattern, and merges contributions
//! into the accumulating graph with project-level merge semantics.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use glob::Pattern;
use indexmap::IndexMap;

use crate::config::PluginSpec;
use crate::error::{ErrorCode, StructuredError};
use crate::files::matching_files;
use crate::graph::{Dependency, ExternalNode, ProjectGraphBuilder};
use crate::project::Project;

/// Static description of a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetadata {
    pub id: String,
    pub version: String,
    /// Glob over workspace-relative paths selecting the files
    /// `create_nodes` is interested in
    pub create_nodes_pattern: String,
    #[serde(default)]
    pub supported_files: Vec<String>,
    #[serde(default)]
    pub default_options: serde_json::Value,
}

/// Context handed to `create_nodes`.
pub struct CreateNodesContext<'a> {
    pub workspace_root: &'a Path,
}

/// Context handed to `create_edges`, after all nodes are collected.
pub struct CreateEdgesContext<'a> {
    pub workspace_root: &'a Path,
    pub projects: &'a IndexMap<String, Project>,
}

/// The projects and external nodes one `create_nodes` call contributes.
#[derive(Debug, Default)]
pub struct CreateNodesResult {
    pub projects: IndexMap<String, Project>,
    pub external_nodes: Vec<ExternalNode>,
}

/// An error raised inside a plugin
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin {id:?} could not be loaded: {reason}")]
    Load { id: String, reason: String },
    #[error("plugin {id:?} rejected its options: {}", errors.join("; "))]
    InvalidOptions { id: String, errors: Vec<String> },
    #[error("plugin {id:?} failed: {reason}")]
    Runtime { id: String, reason: String },
}

impl PluginError {
    pub fn runtime<S: Into<String>, R: std::fmt::Display>(id: S, reason: R) -> Self {
        PluginError::Runtime {
            id: id.into(),
            reason: reason.to_string(),
        }
    }
}

impl StructuredError for PluginError {
    fn code(&self) -> ErrorCode {
        match self {
            PluginError::Load { .. } => ErrorCode::PluginLoad,
            PluginError::InvalidOptions { .. } => ErrorCode::PluginInvalidOptions,
            PluginError::Runtime { .. } => ErrorCode::PluginRuntime,
        }
    }

    fn context(&self) -> serde_json::Value {
        let id = match self {
            PluginError::Load { id, .. }
            | PluginError::InvalidOptions { id, .. }
            | PluginError::Runtime { id, .. } => id,
        };
        serde_json::json!({ "plugin": id })
    }
}

/// The capability set every inferrer implements.
pub trait Inferrer: Send + Sync {
    fn metadata(&self) -> PluginMetadata;

    /// Check an option bag before any callback runs.
    fn validate_options(&self, options: &serde_json::Value) -> Result<(), Vec<String>>;

    /// Convert the matching files into projects and external nodes.
    fn create_nodes(
        &self,
        matching_files: &[PathBuf],
        options: &serde_json::Value,
        ctx: &CreateNodesContext,
    ) -> Result<CreateNodesResult, PluginError>;

    /// Contribute dependency edges, with the full project set visible.
    fn create_edges(
        &self,
        options: &serde_json::Value,
        ctx: &CreateEdgesContext,
    ) -> Result<Vec<Dependency>, PluginError>;
}

/// On-disk cache of plugin artefacts under `~/.forge/plugins/`. Each
/// artefact is an opaque blob keyed by `(id, version)`; the host never
/// looks inside, it only hands paths to whatever loads the plugin.
pub struct PluginArtifactCache {
    root: PathBuf,
}

impl PluginArtifactCache {
    /// Cache under the user's forge home.
    pub fn new() -> Option<Self> {
        crate::FORGE_HOME
            .as_ref()
            .map(|home| Self::at(home.join("plugins")))
    }

    /// Cache rooted at an explicit directory.
    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    /// The artefact path for a plugin. The extension is part of the
    /// identifier chosen by whoever stores the blob.
    pub fn path_for(&self, id: &str, version: &str, extension: &str) -> PathBuf {
        self.root.join(format!("{}-{}.{}", id, version, extension))
    }

    pub fn contains(&self, id: &str, version: &str, extension: &str) -> bool {
        self.path_for(id, version, extension).is_file()
    }

    /// Store an artefact, creating the cache directory on first use.
    pub fn store(
        &self,
        id: &str,
        version: &str,
        extension: &str,
        bytes: &[u8],
    ) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.path_for(id, version, extension);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    pub fn load(&self, id: &str, version: &str, extension: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path_for(id, version, extension))
    }
}

type InferrerFactory = Box<dyn Fn() -> Box<dyn Inferrer> + Send + Sync>;

/// Maps plugin identifiers to inferrer constructors. The daemon populates
/// this at startup; unknown identifiers in the workspace configuration are
/// a [`PluginError::Load`].
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, InferrerFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a plugin id.
    pub fn register<F>(&mut self, id: &str, factory: F)
    where
        F: Fn() -> Box<dyn Inferrer> + Send + Sync + 'static,
    {
        self.factories.insert(id.to_string(), Box::new(factory));
    }

    fn instantiate(&self, spec: &PluginSpec) -> Result<Box<dyn Inferrer>, PluginError> {
        let factory = self.factories.get(&spec.id).ok_or_else(|| PluginError::Load {
            id: spec.id.clone(),
            reason: "no inferrer registered under this id".to_string(),
        })?;
        Ok(factory())
    }
}

/// Owns plugin instances and drives the node/edge callbacks for one
/// workspace.
pub struct PluginHost {
    plugins: Vec<(PluginSpec, Box<dyn Inferrer>)>,
}

impl PluginHost {
    /// Instantiate every configured plugin, in declared order. Plugins that
    /// fail to load or reject their options are skipped with a logged
    /// error; the rest of the host still works.
    pub fn load(registry: &PluginRegistry, specs: &[PluginSpec]) -> Self {
        let mut plugins = Vec::new();
        for spec in specs {
            match registry.instantiate(spec) {
                Ok(inferrer) => {
                    if let Err(errors) = inferrer.validate_options(&spec.options) {
                        error!(
                            "{}",
                            PluginError::InvalidOptions {
                                id: spec.id.clone(),
                                errors,
                            }
                        );
                        continue;
                    }
                    plugins.push((spec.clone(), inferrer));
                }
                Err(e) => error!("{}", e),
            }
        }
        Self { plugins }
    }

    /// Host wrapping pre-built inferrers, for embedding and tests.
    pub fn with_inferrers(plugins: Vec<(PluginSpec, Box<dyn Inferrer>)>) -> Self {
        Self { plugins }
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run every plugin's `create_nodes` over the workspace, merging
    /// contributions into `builder`. A failing plugin is logged and
    /// skipped; the others continue.
    pub fn discover_nodes(&self, workspace_root: &Path, builder: &mut ProjectGraphBuilder) {
        let ctx = CreateNodesContext { workspace_root };
        for (spec, inferrer) in &self.plugins {
            let metadata = inferrer.metadata();
            let pattern = match Pattern::new(&metadata.create_nodes_pattern) {
                Ok(p) => p,
                Err(e) => {
                    error!(
                        "plugin {:?} has an invalid createNodes pattern {:?}: {}",
                        spec.id, metadata.create_nodes_pattern, e
                    );
                    continue;
                }
            };
            let files = matching_files(workspace_root, &pattern);
            if files.is_empty() {
                debug!("plugin {:?} matched no files", spec.id);
                continue;
            }
            match inferrer.create_nodes(&files, &spec.options, &ctx) {
                Ok(result) => {
                    for (_, project) in result.projects {
                        builder.add_project(project);
                    }
                    for external in result.external_nodes {
                        builder.add_external_node(external);
                    }
                }
                Err(e) => error!("createNodes failed, skipping contribution: {}", e),
            }
        }
    }

    /// Run every plugin's `create_edges` with the full project set,
    /// accumulating edges into `builder`. Failures are isolated the same
    /// way as for nodes.
    pub fn discover_edges(&self, workspace_root: &Path, builder: &mut ProjectGraphBuilder) {
        for (spec, inferrer) in &self.plugins {
            let ctx = CreateEdgesContext {
                workspace_root,
                projects: builder.projects(),
            };
            match inferrer.create_edges(&spec.options, &ctx) {
                Ok(edges) => {
                    for edge in edges {
                        builder.add_dependency(edge);
                    }
                }
                Err(e) => error!("createEdges failed, skipping contribution: {}", e),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! A scriptable inferrer used across the core test suites.

    use super::*;
    use crate::graph::DependencyKind;
    use crate::project::TargetConfiguration;

    /// Emits one project per matched manifest-like file, with a fixed set
    /// of targets, and edges from a static table.
    pub struct ScriptedInferrer {
        pub id: String,
        pub pattern: String,
        pub targets: Vec<String>,
        pub edges: Vec<(String, String)>,
        pub fail_nodes: bool,
    }

    impl ScriptedInferrer {
        pub fn new(id: &str, pattern: &str, targets: &[&str]) -> Self {
            Self {
                id: id.to_string(),
                pattern: pattern.to_string(),
                targets: targets.iter().map(|s| s.to_string()).collect(),
                edges: vec![],
                fail_nodes: false,
            }
        }
    }

    impl Inferrer for ScriptedInferrer {
        fn metadata(&self) -> PluginMetadata {
            PluginMetadata {
                id: self.id.clone(),
                version: "0.0.0".to_string(),
                create_nodes_pattern: self.pattern.clone(),
                supported_files: vec![],
                default_options: serde_json::Value::Null,
            }
        }

        fn validate_options(&self, options: &serde_json::Value) -> Result<(), Vec<String>> {
            if options.is_object() || options.is_null() {
                Ok(())
            } else {
                Err(vec!["options must be an object".to_string()])
            }
        }

        fn create_nodes(
            &self,
            matching_files: &[PathBuf],
            _options: &serde_json::Value,
            _ctx: &CreateNodesContext,
        ) -> Result<CreateNodesResult, PluginError> {
            if self.fail_nodes {
                return Err(PluginError::runtime(&self.id, "scripted failure"));
            }
            let mut result = CreateNodesResult::default();
            for file in matching_files {
                let root = file.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
                let name = root
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "root".to_string());
                let mut project = Project::new(&name, &root);
                for target in &self.targets {
                    project
                        .targets
                        .insert(target.clone(), TargetConfiguration::default());
                }
                result.projects.insert(name, project);
            }
            Ok(result)
        }

        fn create_edges(
            &self,
            _options: &serde_json::Value,
            ctx: &CreateEdgesContext,
        ) -> Result<Vec<Dependency>, PluginError> {
            Ok(self
                .edges
                .iter()
                .filter(|(source, target)| {
                    ctx.projects.contains_key(source) && ctx.projects.contains_key(target)
                })
                .map(|(source, target)| Dependency {
                    source: source.clone(),
                    target: target.clone(),
                    kind: DependencyKind::Static,
                    source_file: None,
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedInferrer;
    use super::*;

    fn spec(id: &str) -> PluginSpec {
        PluginSpec {
            id: id.to_string(),
            version: None,
            options: serde_json::Value::Null,
        }
    }

    fn workspace_with_manifests(paths: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for path in paths {
            let full = dir.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, "{}").unwrap();
        }
        dir
    }

    #[test]
    fn two_plugins_merge_targets_per_project() {
        let dir = workspace_with_manifests(&["pkgs/p/package.json"]);

        let first = ScriptedInferrer::new("one", "**/package.json", &["build"]);
        let second = ScriptedInferrer::new("two", "**/package.json", &["test"]);
        let host = PluginHost::with_inferrers(vec![
            (spec("one"), Box::new(first)),
            (spec("two"), Box::new(second)),
        ]);

        let mut builder = ProjectGraphBuilder::new();
        host.discover_nodes(dir.path(), &mut builder);
        let graph = builder.build();

        let project = graph.get("p").unwrap();
        assert!(project.targets.contains_key("build"));
        assert!(project.targets.contains_key("test"));
    }

    #[test]
    fn failing_plugin_is_isolated() {
        let dir = workspace_with_manifests(&["pkgs/p/package.json"]);

        let mut broken = ScriptedInferrer::new("broken", "**/package.json", &["build"]);
        broken.fail_nodes = true;
        let healthy = ScriptedInferrer::new("healthy", "**/package.json", &["test"]);
        let host = PluginHost::with_inferrers(vec![
            (spec("broken"), Box::new(broken)),
            (spec("healthy"), Box::new(healthy)),
        ]);

        let mut builder = ProjectGraphBuilder::new();
        host.discover_nodes(dir.path(), &mut builder);
        let graph = builder.build();

        let project = graph.get("p").unwrap();
        assert!(!project.targets.contains_key("build"));
        assert!(project.targets.contains_key("test"));
    }

    #[test]
    fn every_plugin_failing_gives_empty_graph() {
        let dir = workspace_with_manifests(&["pkgs/p/package.json"]);
        let mut broken = ScriptedInferrer::new("broken", "**/package.json", &["build"]);
        broken.fail_nodes = true;
        let host = PluginHost::with_inferrers(vec![(spec("broken"), Box::new(broken))]);

        let mut builder = ProjectGraphBuilder::new();
        host.discover_nodes(dir.path(), &mut builder);
        host.discover_edges(dir.path(), &mut builder);
        assert!(builder.build().is_empty());
    }

    #[test]
    fn artifact_cache_round_trips_opaque_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PluginArtifactCache::at(dir.path().join("plugins"));
        assert!(!cache.contains("forge-maven", "1.2.0", "jar"));

        let path = cache
            .store("forge-maven", "1.2.0", "jar", b"not really a jar")
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "forge-maven-1.2.0.jar");
        assert!(cache.contains("forge-maven", "1.2.0", "jar"));
        assert_eq!(
            cache.load("forge-maven", "1.2.0", "jar").unwrap(),
            b"not really a jar"
        );
    }

    #[test]
    fn registry_rejects_unknown_ids() {
        let registry = PluginRegistry::new();
        let host = PluginHost::load(&registry, &[spec("ghost")]);
        assert!(host.is_empty());
    }

    #[test]
    fn edges_see_full_project_set() {
        let dir = workspace_with_manifests(&["pkgs/a/package.json", "pkgs/b/pom.xml"]);

        let mut js = ScriptedInferrer::new("js", "**/package.json", &["build"]);
        js.edges = vec![("a".to_string(), "b".to_string())];
        let maven = ScriptedInferrer::new("maven", "**/pom.xml", &["build"]);

        let host = PluginHost::with_inferrers(vec![
            (spec("js"), Box::new(js)),
            (spec("maven"), Box::new(maven)),
        ]);

        let mut builder = ProjectGraphBuilder::new();
        host.discover_nodes(dir.path(), &mut builder);
        host.discover_edges(dir.path(), &mut builder);
        let graph = builder.build();
        assert_eq!(graph.deps_of("a").len(), 1);
    }
}
