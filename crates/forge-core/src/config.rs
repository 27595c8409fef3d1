//! The workspace configuration document and per-project manifests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use itertools::Itertools;

use crate::error::{ErrorCode, StructuredError};
use crate::project::{Project, TargetConfiguration};
use crate::{PROJECT_MANIFEST_FILE, WORKSPACE_CONFIG_FILE};

/// A plugin to load, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginSpec {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub options: serde_json::Value,
}

/// A named remote-execution endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NamedEndpoint {
    pub endpoint: String,
    pub use_tls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
}

/// Workspace-level remote execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteExecutionConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub use_tls: bool,
    pub max_connections: usize,
    pub default_timeout_seconds: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub default_platform: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub named_endpoints: BTreeMap<String, NamedEndpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
}

impl Default for RemoteExecutionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            use_tls: false,
            max_connections: 8,
            default_timeout_seconds: 300,
            default_platform: BTreeMap::new(),
            named_endpoints: BTreeMap::new(),
            instance_name: None,
        }
    }
}

/// Settings for `affected` computations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AffectedConfig {
    pub default_base: String,
}

impl Default for AffectedConfig {
    fn default() -> Self {
        Self {
            default_base: "main".to_string(),
        }
    }
}

/// Workspace defaults the executors fall back to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionDefaults {
    /// Per-task timeout when the target does not override it
    pub timeout_seconds: u64,
    /// Cap on captured bytes per output stream
    pub output_byte_limit: usize,
    /// Shell override; platform default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
}

impl Default for ExecutionDefaults {
    fn default() -> Self {
        Self {
            timeout_seconds: 600,
            output_byte_limit: 1024 * 1024,
            shell: None,
        }
    }
}

/// The single workspace configuration document, read from `forge.json`
/// at the workspace root. A missing file yields the default configuration;
/// invalid JSON is a [`ConfigError::Parse`] failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkspaceConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginSpec>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub named_inputs: IndexMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub target_defaults: IndexMap<String, TargetConfiguration>,
    pub remote_execution: RemoteExecutionConfig,
    pub affected: AffectedConfig,
    pub execution_defaults: ExecutionDefaults,
}

/// A per-project manifest (`project.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectManifest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_root: Option<PathBuf>,
    pub project_type: crate::project::ProjectType,
    #[serde(skip_serializing_if = "std::collections::BTreeSet::is_empty")]
    pub tags: std::collections::BTreeSet<String>,
    pub targets: IndexMap<String, TargetConfiguration>,
}

impl ProjectManifest {
    /// Turn a manifest found at `manifest_dir` (relative to the workspace
    /// root) into a project. An explicit `root` wins over the location of
    /// the file.
    pub fn into_project(self, manifest_dir: &Path) -> Project {
        let root = self.root.unwrap_or_else(|| manifest_dir.to_path_buf());
        Project {
            name: self.name,
            root,
            source_root: self.source_root,
            project_type: self.project_type,
            tags: self.tags,
            targets: self.targets,
        }
    }
}

/// An error loading or interpreting configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("couldn't parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StructuredError for ConfigError {
    fn code(&self) -> ErrorCode {
        ErrorCode::ConfigParse
    }

    fn context(&self) -> serde_json::Value {
        match self {
            ConfigError::Parse { path, .. } => serde_json::json!({ "path": path }),
            ConfigError::Io(_) => serde_json::Value::Null,
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl WorkspaceConfig {
    /// Load the workspace configuration from `workspace_root`.
    pub fn load(workspace_root: &Path) -> ConfigResult<Self> {
        let path = workspace_root.join(WORKSPACE_CONFIG_FILE);
        if !path.exists() {
            debug!("no {} in {}, using defaults", WORKSPACE_CONFIG_FILE, workspace_root.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path)?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
    }

    /// The effective configuration of `target` under this workspace's
    /// defaults for `target_name`: defaults ∪ target, target fields
    /// winning; list fields are deduplicated preserving first-occurrence
    /// order.
    pub fn effective_target(
        &self,
        target_name: &str,
        target: &TargetConfiguration,
    ) -> TargetConfiguration {
        match self.target_defaults.get(target_name) {
            Some(defaults) => merge_target(defaults, target),
            None => target.clone(),
        }
    }
}

/// Load a project manifest file.
pub fn load_project_manifest(path: &Path) -> ConfigResult<ProjectManifest> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merge a target over its defaults. Scalar fields from the target win when
/// present; the option bags merge key-wise with target keys winning; the
/// list fields concatenate target-first and deduplicate keeping the first
/// occurrence.
pub fn merge_target(
    defaults: &TargetConfiguration,
    target: &TargetConfiguration,
) -> TargetConfiguration {
    let mut options = defaults.options.clone();
    if !target.options.commands.is_empty() {
        options.commands = target.options.commands.clone();
    }
    if target.options.cwd.is_some() {
        options.cwd = target.options.cwd.clone();
    }
    options.env.extend(target.options.env.clone());
    options.extra.extend(target.options.extra.clone());

    TargetConfiguration {
        executor: target.executor.clone().or_else(|| defaults.executor.clone()),
        command: target.command.clone().or_else(|| defaults.command.clone()),
        options,
        depends_on: dedup_preserving(&target.depends_on, &defaults.depends_on),
        inputs: dedup_preserving(&target.inputs, &defaults.inputs),
        outputs: dedup_preserving(&target.outputs, &defaults.outputs),
        cache: target.cache || defaults.cache,
        remote_execution: target
            .remote_execution
            .clone()
            .or_else(|| defaults.remote_execution.clone()),
        parallelism: target.parallelism.or(defaults.parallelism),
        timeout_seconds: target.timeout_seconds.or(defaults.timeout_seconds),
    }
}

fn dedup_preserving(first: &[String], second: &[String]) -> Vec<String> {
    first
        .iter()
        .chain(second.iter())
        .unique()
        .cloned()
        .collect()
}

/// The configuration files a discovery run depends on, used by the daemon
/// for its best-effort mtime invalidation probe.
pub fn config_files(workspace_root: &Path, manifest_paths: &[PathBuf]) -> Vec<PathBuf> {
    std::iter::once(workspace_root.join(WORKSPACE_CONFIG_FILE))
        .chain(manifest_paths.iter().cloned())
        .collect()
}

/// Convenience for tests and manifest walking.
pub fn is_project_manifest(path: &Path) -> bool {
    path.file_name()
        .map(|name| name == PROJECT_MANIFEST_FILE)
        .unwrap_or(false)
}
