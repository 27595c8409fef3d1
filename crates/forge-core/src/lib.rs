//! # `forge-core`
//!
//! Defines the structs, functions, and traits that make up a forge workspace:
//! configuration, project discovery, the inference plugin host, and the
//! project graph the execution crates consume.

#![deny(rustdoc::broken_intra_doc_links)]

#[macro_use]
extern crate serde;

#[macro_use]
extern crate log;

pub mod config;
pub mod discovery;
pub mod error;
pub mod files;
pub mod graph;
pub mod hashing;
pub mod identifier;
pub mod logging;
pub mod plugins;
pub mod project;

// Re-exports
pub use graph::ProjectGraph;
pub use identifier::TaskId;
pub use project::{Project, TargetConfiguration};

/// Name of the workspace configuration document at the workspace root.
pub const WORKSPACE_CONFIG_FILE: &str = "forge.json";

/// Name of a per-project manifest.
pub const PROJECT_MANIFEST_FILE: &str = "project.json";

/// Directory under the user home holding daemon and plugin state.
pub const FORGE_HOME_DIR: &str = ".forge";

/// The user-level forge home (`~/.forge`), when a home directory exists.
pub static FORGE_HOME: once_cell::sync::Lazy<Option<std::path::PathBuf>> =
    once_cell::sync::Lazy::new(|| dirs::home_dir().map(|home| home.join(FORGE_HOME_DIR)));

pub mod prelude {
    //! Often used types and functions within forge

    pub use super::*;
    pub use crate::config::WorkspaceConfig;
    pub use crate::error::{ErrorCode, StructuredError};
    pub use crate::graph::{Dependency, DependencyKind, ProjectGraph};
    pub use crate::identifier::{InvalidId, TaskId};
    pub use crate::project::{Project, ProjectType, TargetConfiguration};

    pub use std::result::Result as StdResult;
}
