//! Builds content-addressed `Directory` trees from resolved input files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::digest::{digest_bytes, digest_message};
use crate::error::{RemoteError, RemoteResult};
use crate::proto::rev2::{Digest, Directory, DirectoryNode, FileNode};

/// The input root of an action: the root `Directory` digest plus every
/// blob (directory messages and file contents) the CAS must hold for it.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    pub root: Directory,
    pub root_digest: Digest,
    /// Every blob referenced by the tree, keyed by digest. Includes the
    /// serialized root itself.
    pub blobs: Vec<(Digest, Vec<u8>)>,
}

impl MerkleTree {
    /// All blob digests, for `FindMissingBlobs`.
    pub fn digests(&self) -> Vec<Digest> {
        self.blobs.iter().map(|(digest, _)| digest.clone()).collect()
    }
}

enum Node {
    File(PathBuf),
    Dir(BTreeMap<String, Node>),
}

/// Build the input tree for a set of workspace-relative files.
///
/// Directory children come out sorted (BTreeMap iteration), so two calls
/// over the same file set always produce identical digests.
pub fn build_input_tree<'a>(
    workspace_root: &Path,
    files: impl IntoIterator<Item = &'a PathBuf>,
) -> RemoteResult<MerkleTree> {
    let mut root: BTreeMap<String, Node> = BTreeMap::new();

    for relative in files {
        let mut level = &mut root;
        let components: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        let Some((file_name, dirs)) = components.split_last() else {
            continue;
        };
        for dir in dirs {
            let entry = level
                .entry(dir.clone())
                .or_insert_with(|| Node::Dir(BTreeMap::new()));
            level = match entry {
                Node::Dir(children) => children,
                Node::File(path) => {
                    return Err(RemoteError::Protocol(format!(
                        "input {:?} is both a file and a directory",
                        path
                    )))
                }
            };
        }
        level.insert(file_name.clone(), Node::File(relative.clone()));
    }

    let mut blobs = Vec::new();
    let root_directory = build_directory(workspace_root, &root, &mut blobs)?;
    let (root_digest, root_bytes) = digest_message(&root_directory);
    blobs.push((root_digest.clone(), root_bytes));

    Ok(MerkleTree {
        root: root_directory,
        root_digest,
        blobs,
    })
}

fn build_directory(
    workspace_root: &Path,
    children: &BTreeMap<String, Node>,
    blobs: &mut Vec<(Digest, Vec<u8>)>,
) -> RemoteResult<Directory> {
    let mut directory = Directory::default();

    for (name, node) in children {
        match node {
            Node::File(relative) => {
                let absolute = workspace_root.join(relative);
                let contents = std::fs::read(&absolute)?;
                let digest = digest_bytes(&contents);
                directory.files.push(FileNode {
                    name: name.clone(),
                    digest: Some(digest.clone()),
                    is_executable: is_executable(&absolute),
                });
                blobs.push((digest, contents));
            }
            Node::Dir(grandchildren) => {
                let child = build_directory(workspace_root, grandchildren, blobs)?;
                let (digest, bytes) = digest_message(&child);
                directory.directories.push(DirectoryNode {
                    name: name.clone(),
                    digest: Some(digest.clone()),
                });
                blobs.push((digest, bytes));
            }
        }
    }

    Ok(directory)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}
