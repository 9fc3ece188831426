use anyhow::{Context, Result};
use log::{debug, trace};
use rayon::prelude::*;

use crate::backend::{Backend, Entry, join_path};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

/// One walked path with totals for its whole subtree. Built bottom-up and
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    path: String,
    kind: NodeKind,
    files: Vec<Entry>,
    folders: Vec<TreeNode>,
    items: u64,
    size: u64,
}

impl TreeNode {
    /// Aggregates `files` and already-walked `folders` into a directory node.
    pub fn directory(path: impl Into<String>, files: Vec<Entry>, folders: Vec<TreeNode>) -> Self {
        let own_items = (files.len() + folders.len()) as u64;
        let own_size: u64 = files.iter().map(|f| f.size.unwrap_or(0)).sum();
        let items = own_items + folders.iter().map(|c| c.items).sum::<u64>();
        let size = own_size + folders.iter().map(|c| c.size).sum::<u64>();
        Self {
            path: path.into(),
            kind: NodeKind::Directory,
            files,
            folders,
            items,
            size,
        }
    }

    /// A root that turned out to be a plain file.
    pub fn file(path: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            path: path.into(),
            kind: NodeKind::File,
            files: Vec::new(),
            folders: Vec::new(),
            items: 0,
            size: size.unwrap_or(0),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn files(&self) -> &[Entry] {
        &self.files
    }

    pub fn folders(&self) -> &[TreeNode] {
        &self.folders
    }

    pub fn items(&self) -> u64 {
        self.items
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Walks `path` on `backend`. Any failed listing fails the whole walk; a
/// tree with a hole in it would under-count and under-delete.
pub fn walk(backend: &dyn Backend, session: &Session, path: &str) -> Result<TreeNode> {
    if let Some(entry) = backend.stat(session, path)? {
        if !entry.is_dir {
            debug!("{} is a file, nothing to list", path);
            return Ok(TreeNode::file(path, entry.size));
        }
    }
    walk_dir(backend, session, path)
}

fn walk_dir(backend: &dyn Backend, session: &Session, path: &str) -> Result<TreeNode> {
    trace!("listing {}", path);
    let entries = backend
        .readdir(session, path)
        .with_context(|| format!("failed to list {}", path))?;
    let (dirs, files): (Vec<Entry>, Vec<Entry>) = entries.into_iter().partition(|e| e.is_dir);

    let folders = dirs
        .par_iter()
        .map(|dir| walk_dir(backend, session, &join_path(path, &dir.name)))
        .collect::<Result<Vec<_>>>()?;

    Ok(TreeNode::directory(path, files, folders))
}
