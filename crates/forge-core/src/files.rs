//! Workspace file walking and input-pattern resolution.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use glob::Pattern;
use indexmap::{IndexMap, IndexSet};
use walkdir::WalkDir;

use crate::graph::ProjectGraph;
use crate::project::Project;
use crate::{PROJECT_MANIFEST_FILE, WORKSPACE_CONFIG_FILE};

/// Canonical noise directories excluded from every workspace walk.
pub const NOISE_DIRECTORIES: [&str; 5] = ["node_modules", "target", "build", "dist", ".git"];

fn is_noise(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| NOISE_DIRECTORIES.contains(&name))
            .unwrap_or(false)
}

/// Walk the workspace, yielding regular files relative to `root`, skipping
/// the canonical noise directories. Order is deterministic (sorted by file
/// name within each directory).
pub fn walk_workspace(root: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_noise(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(move |entry| {
            entry
                .path()
                .strip_prefix(root)
                .map(Path::to_path_buf)
                .ok()
        })
}

/// Files in the workspace matching `pattern` (a workspace-relative glob).
pub fn matching_files(root: &Path, pattern: &Pattern) -> Vec<PathBuf> {
    walk_workspace(root)
        .filter(|path| pattern.matches_path(path))
        .collect()
}

/// Substitute the `{projectRoot}` token in an input or output pattern.
pub fn substitute_tokens(pattern: &str, project: &Project) -> String {
    pattern.replace("{projectRoot}", &project.root.to_string_lossy())
}

/// Resolves target input patterns into concrete workspace-relative files.
///
/// Recognised pattern forms:
/// - `"default"` — the project's own files plus the common config files
/// - `"^default"` — the default set of every direct project dependency
/// - a named-input key — splices the named glob group (named inputs may
///   reference other named inputs one level deep)
/// - `"!glob"` — negation, applied after all includes
/// - anything else — a literal glob relative to the workspace root, after
///   `{projectRoot}` substitution
pub struct InputResolver<'a> {
    workspace_root: &'a Path,
    graph: &'a ProjectGraph,
    named_inputs: &'a IndexMap<String, Vec<String>>,
}

impl<'a> InputResolver<'a> {
    pub fn new(
        workspace_root: &'a Path,
        graph: &'a ProjectGraph,
        named_inputs: &'a IndexMap<String, Vec<String>>,
    ) -> Self {
        Self {
            workspace_root,
            graph,
            named_inputs,
        }
    }

    /// Resolve `patterns` for `project` into a sorted set of files.
    pub fn resolve(
        &self,
        project: &Project,
        patterns: &[String],
    ) -> io::Result<BTreeSet<PathBuf>> {
        let mut includes: Vec<Pattern> = Vec::new();
        let mut excludes: Vec<Pattern> = Vec::new();
        let mut files = BTreeSet::new();

        self.collect_patterns(project, patterns, 0, &mut includes, &mut excludes, &mut files)?;

        if !includes.is_empty() {
            for path in walk_workspace(self.workspace_root) {
                if includes.iter().any(|p| p.matches_path(&path)) {
                    files.insert(path);
                }
            }
        }
        files.retain(|path| !excludes.iter().any(|p| p.matches_path(path)));
        Ok(files)
    }

    fn collect_patterns(
        &self,
        project: &Project,
        patterns: &[String],
        depth: usize,
        includes: &mut Vec<Pattern>,
        excludes: &mut Vec<Pattern>,
        files: &mut BTreeSet<PathBuf>,
    ) -> io::Result<()> {
        for raw in patterns {
            match raw.as_str() {
                "default" => files.extend(self.default_inputs(project)),
                "^default" => {
                    for dep in self.graph.project_deps_of(&project.name) {
                        files.extend(self.default_inputs(dep));
                    }
                }
                negated if negated.starts_with('!') => {
                    let substituted = substitute_tokens(&negated[1..], project);
                    if let Ok(pattern) = Pattern::new(&substituted) {
                        excludes.push(pattern);
                    }
                }
                named if depth == 0 && self.named_inputs.contains_key(named) => {
                    let group = &self.named_inputs[named];
                    self.collect_patterns(project, group, depth + 1, includes, excludes, files)?;
                }
                // one level of named-input indirection is allowed
                named if depth == 1 && self.named_inputs.contains_key(named) => {
                    let group = self.named_inputs[named].clone();
                    let literal: Vec<String> = group
                        .into_iter()
                        .filter(|p| !self.named_inputs.contains_key(p.as_str()))
                        .collect();
                    self.collect_patterns(project, &literal, 2, includes, excludes, files)?;
                }
                literal => {
                    let substituted = substitute_tokens(literal, project);
                    match Pattern::new(&substituted) {
                        Ok(pattern) => includes.push(pattern),
                        Err(e) => warn!("ignoring invalid input glob {:?}: {}", substituted, e),
                    }
                }
            }
        }
        Ok(())
    }

    /// The `default` input set of a project: every file under its root,
    /// plus the workspace configuration and the project's own manifest.
    fn default_inputs(&self, project: &Project) -> BTreeSet<PathBuf> {
        let mut files: BTreeSet<PathBuf> = walk_workspace(self.workspace_root)
            .filter(|path| path.starts_with(&project.root))
            .collect();
        for common in [
            PathBuf::from(WORKSPACE_CONFIG_FILE),
            project.root.join(PROJECT_MANIFEST_FILE),
        ] {
            if self.workspace_root.join(&common).is_file() {
                files.insert(common);
            }
        }
        files
    }
}

/// Map changed files to the projects owning them, by longest project root.
/// Files not under any project root are ignored.
pub fn projects_for_files<P: AsRef<Path>>(
    graph: &ProjectGraph,
    files: &[P],
) -> IndexSet<String> {
    let mut owners = IndexSet::new();
    for file in files {
        let best = graph
            .all()
            .filter(|project| file.as_ref().starts_with(&project.root))
            .max_by_key(|project| project.root.components().count());
        if let Some(project) = best {
            owners.insert(project.name.clone());
        }
    }
    owners
}
