//! The project and target model produced by discovery.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::identifier::ID_SEPARATOR;

/// What kind of buildable unit a project is.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Application,
    Library,
    #[default]
    #[serde(other)]
    Other,
}

/// The option bag of a target.
///
/// The fields the local executor understands are typed; anything else a
/// custom executor may want rides along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetOptions {
    /// Commands joined with `&&` under the platform shell
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    /// Working directory, relative to the workspace root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Extra environment variables for the spawned process
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Remote-execution overrides a target may carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetRemoteExecution {
    /// Explicitly enable or disable remote execution for this target.
    /// `Some(false)` wins over a workspace-level enable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Name of a workspace `namedEndpoints` entry to use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<BTreeMap<String, String>>,
}

/// The recipe for one runnable operation of a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetConfiguration {
    /// Executor identifier, e.g. `"forge:run-commands"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor: Option<String>,
    /// A raw command, used when `options.commands` is empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub options: TargetOptions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    /// Whether results of this target may be cached
    pub cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_execution: Option<TargetRemoteExecution>,
    /// Soft cap on how many instances of this target run at once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// A buildable unit with a root directory and a set of targets.
///
/// Immutable once the owning [`ProjectGraph`](crate::graph::ProjectGraph)
/// is assembled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Project {
    pub name: String,
    /// Root directory, relative to the workspace root
    pub root: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_root: Option<PathBuf>,
    pub project_type: ProjectType,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    pub targets: IndexMap<String, TargetConfiguration>,
}

impl Project {
    /// Create an empty project rooted at `root`.
    pub fn new<S: Into<String>, P: AsRef<Path>>(name: S, root: P) -> Self {
        Self {
            name: name.into(),
            root: root.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Get a target by name.
    pub fn target(&self, name: &str) -> Option<&TargetConfiguration> {
        self.targets.get(name)
    }

    /// The directory source files live in, falling back to the project root.
    pub fn source_root(&self) -> &Path {
        self.source_root.as_deref().unwrap_or(&self.root)
    }
}

/// A parsed entry of `dependsOn`.
///
/// - `"name"` resolves to the same target on the same project
/// - `"^name"` resolves to `name` on every project-graph dependency
/// - `"proj:name"` is a cross-project reference; `self` aliases the
///   current project
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum DependencyRef {
    SameProject(String),
    Dependencies(String),
    Project { project: String, target: String },
}

impl DependencyRef {
    /// Parse a raw `dependsOn` entry. The grammar has no invalid inputs;
    /// references that resolve to nothing are dropped later.
    pub fn parse(raw: &str) -> Self {
        if let Some(target) = raw.strip_prefix('^') {
            return DependencyRef::Dependencies(target.to_string());
        }
        match raw.split_once(ID_SEPARATOR) {
            Some((project, target)) => DependencyRef::Project {
                project: project.to_string(),
                target: target.to_string(),
            },
            None => DependencyRef::SameProject(raw.to_string()),
        }
    }
}
