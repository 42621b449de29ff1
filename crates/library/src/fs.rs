use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;
use walkdir::WalkDir;

use crate::LibraryError;

/// One entry of a recursive directory listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirEntryNode {
    pub name: String,
    pub is_directory: bool,
    pub is_symlink: bool,
    pub children: Vec<DirEntryNode>,
}

impl DirEntryNode {
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_directory: true,
            is_symlink: false,
            children: Vec::new(),
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_directory: false,
            is_symlink: false,
            children: Vec::new(),
        }
    }

    /// Builds a tree from `/`-separated relative file paths.
    pub fn from_paths<S: AsRef<str>>(paths: &[S]) -> Self {
        let mut root = DirEntryNode::directory("");
        for path in paths {
            let parts: Vec<&str> = path
                .as_ref()
                .split('/')
                .filter(|part| !part.is_empty())
                .collect();
            let Some((file, dirs)) = parts.split_last() else {
                continue;
            };
            let mut node = &mut root;
            for dir in dirs {
                let idx = match node
                    .children
                    .iter()
                    .position(|child| child.is_directory && child.name == *dir)
                {
                    Some(idx) => idx,
                    None => {
                        node.children.push(DirEntryNode::directory(*dir));
                        node.children.len() - 1
                    }
                };
                node = &mut node.children[idx];
            }
            node.children.push(DirEntryNode::file(*file));
        }
        root
    }
}

#[async_trait]
pub trait DirectoryLister: Send + Sync {
    async fn list(&self, root: &Path) -> Result<DirEntryNode, LibraryError>;
}

/// Lists the tree with walkdir on the blocking pool. Symlinks are reported,
/// never followed.
#[derive(Debug, Clone, Default)]
pub struct WalkDirLister;

#[async_trait]
impl DirectoryLister for WalkDirLister {
    async fn list(&self, root: &Path) -> Result<DirEntryNode, LibraryError> {
        tokio::fs::metadata(root).await?;
        let root: PathBuf = root.to_path_buf();
        let tree = tokio::task::spawn_blocking(move || walk_tree(&root)).await?;
        Ok(tree)
    }
}

fn walk_tree(root: &Path) -> DirEntryNode {
    let mut stack: Vec<DirEntryNode> = vec![DirEntryNode::directory("")];

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry under {:?}: {}", root, err);
                continue;
            }
        };
        let depth = entry.depth();
        while stack.len() > depth {
            close_top(&mut stack);
        }

        let name = entry.file_name().to_string_lossy().to_string();
        let file_type = entry.file_type();
        if file_type.is_dir() {
            stack.push(DirEntryNode::directory(name));
        } else if let Some(parent) = stack.last_mut() {
            parent.children.push(DirEntryNode {
                name,
                is_directory: false,
                is_symlink: file_type.is_symlink(),
                children: Vec::new(),
            });
        }
    }

    while stack.len() > 1 {
        close_top(&mut stack);
    }
    stack.pop().unwrap_or_default()
}

fn close_top(stack: &mut Vec<DirEntryNode>) {
    if let Some(done) = stack.pop() {
        if let Some(parent) = stack.last_mut() {
            parent.children.push(done);
        }
    }
}
