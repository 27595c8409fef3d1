//! Project discovery: explicit manifests composed with inferrer output.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::{self, WorkspaceConfig};
use crate::error::{ErrorCode, StructuredError};
use crate::files::walk_workspace;
use crate::graph::{ProjectGraph, ProjectGraphBuilder};
use crate::plugins::PluginHost;

/// An error aborting a discovery run
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StructuredError for DiscoveryError {
    fn code(&self) -> ErrorCode {
        match self {
            DiscoveryError::Config(e) => e.code(),
            DiscoveryError::Io(_) => ErrorCode::ConfigParse,
        }
    }
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// The output of one discovery run: the graph plus the manifest files it
/// was derived from (the daemon probes those for invalidation).
#[derive(Debug)]
pub struct DiscoveredWorkspace {
    pub graph: ProjectGraph,
    pub manifest_paths: Vec<PathBuf>,
}

impl DiscoveredWorkspace {
    /// The configuration files this discovery depends on, absolute.
    pub fn config_files(&self, workspace_root: &Path) -> Vec<PathBuf> {
        config::config_files(workspace_root, &self.manifest_paths)
            .into_iter()
            .map(|p| {
                if p.is_absolute() {
                    p
                } else {
                    workspace_root.join(p)
                }
            })
            .collect()
    }
}

/// Produces a project graph for a workspace by composing, in order,
/// explicit per-directory manifests and the plugin host's inferrers, then
/// applying workspace target defaults.
pub struct ProjectDiscoverer<'a> {
    workspace_root: &'a Path,
    config: &'a WorkspaceConfig,
    host: &'a PluginHost,
}

impl<'a> ProjectDiscoverer<'a> {
    pub fn new(workspace_root: &'a Path, config: &'a WorkspaceConfig, host: &'a PluginHost) -> Self {
        Self {
            workspace_root,
            config,
            host,
        }
    }

    /// Run discovery. Manifest parse failures abort the run; plugin
    /// failures are isolated by the host.
    pub fn discover(&self) -> DiscoveryResult<DiscoveredWorkspace> {
        let mut builder = ProjectGraphBuilder::new();

        let manifest_paths = self.discover_manifests(&mut builder)?;
        self.host.discover_nodes(self.workspace_root, &mut builder);
        self.host.discover_edges(self.workspace_root, &mut builder);

        let mut graph_builder = ProjectGraphBuilder::new();
        for (_, project) in std::mem::take(builder.projects_mut()) {
            graph_builder.add_project(self.apply_target_defaults(project));
        }
        graph_builder.absorb_edges(builder);

        info!(
            "discovered {} projects in {}",
            graph_builder.projects().len(),
            self.workspace_root.display()
        );

        Ok(DiscoveredWorkspace {
            graph: graph_builder.build(),
            manifest_paths,
        })
    }

    fn discover_manifests(
        &self,
        builder: &mut ProjectGraphBuilder,
    ) -> DiscoveryResult<Vec<PathBuf>> {
        let mut manifest_paths = Vec::new();
        for relative in walk_workspace(self.workspace_root) {
            if config::is_project_manifest(&relative) {
                let manifest =
                    config::load_project_manifest(&self.workspace_root.join(&relative))?;
                let manifest_dir = relative.parent().unwrap_or_else(|| Path::new(""));
                builder.add_project(manifest.into_project(manifest_dir));
                manifest_paths.push(relative);
            }
        }
        Ok(manifest_paths)
    }

    fn apply_target_defaults(&self, mut project: crate::project::Project) -> crate::project::Project {
        let targets = std::mem::take(&mut project.targets);
        project.targets = targets
            .into_iter()
            .map(|(name, target)| {
                let effective = self.config.effective_target(&name, &target);
                (name, effective)
            })
            .collect();
        project
    }
}

/// Files changed relative to `base`, from `git diff --name-only`, combined
/// with untracked files. Paths come back relative to the workspace root.
pub fn changed_files(workspace_root: &Path, base: &str) -> std::io::Result<Vec<PathBuf>> {
    let diff = Command::new("git")
        .current_dir(workspace_root)
        .args(["diff", "--name-only", base])
        .output()?;
    let untracked = Command::new("git")
        .current_dir(workspace_root)
        .args(["ls-files", "--others", "--exclude-standard"])
        .output()?;

    let mut files: Vec<PathBuf> = Vec::new();
    for output in [diff, untracked] {
        if !output.status.success() {
            continue;
        }
        files.extend(
            String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter(|line| !line.is_empty())
                .map(PathBuf::from),
        );
    }
    files.sort();
    files.dedup();
    Ok(files)
}
