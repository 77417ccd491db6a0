//! Hierarchical path store that registered nodes are published into.
//!
//! The registry only ever talks to a [SysfsBackend]: a directory per registered node, named by
//! the node's full path, plus symbolic links between directories. [MemFs] is the in-process
//! implementation that ships with the crate.
use crate::kobject::KObject;
use core::fmt::{self, Display};

mod memfs;

pub use memfs::{EntryKind, MemFs};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    AlreadyExists(String),
    NotFound(String),
    NotADirectory(String),
    /// The root entry cannot be removed or renamed.
    Busy(String),
}

impl Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::AlreadyExists(path) => write!(f, "{}: already exists", path),
            FsError::NotFound(path) => write!(f, "{}: no such entry", path),
            FsError::NotADirectory(path) => write!(f, "{}: not a directory", path),
            FsError::Busy(path) => write!(f, "{}: busy", path),
        }
    }
}

impl core::error::Error for FsError {}

/// Storage contract used by the registry.
///
/// Paths are absolute, `/`-separated and never end in `/`. Implementations must be safe to call
/// from any thread; the registry never holds a node lock across these calls.
pub trait SysfsBackend: Send + Sync {
    /// Create the directory for `kobj` at `path`. The parent directory must exist.
    fn publish(&self, path: &str, kobj: &KObject) -> Result<(), FsError>;
    /// Remove the directory at `path` with everything below it.
    fn unpublish(&self, path: &str) -> Result<(), FsError>;
    /// Move the directory at `old_path` to `new_path`, possibly under a different parent.
    fn rename_entry(&self, old_path: &str, new_path: &str) -> Result<(), FsError>;
    /// Create the link `dir/name` pointing at `target`.
    fn create_link(&self, dir: &str, name: &str, target: &str) -> Result<(), FsError>;
    fn remove_link(&self, dir: &str, name: &str) -> Result<(), FsError>;
}

/// Split `path` into its parent directory and leaf name.
pub(crate) fn split_path(path: &str) -> Option<(&str, &str)> {
    let (parent, leaf) = path.rsplit_once('/')?;
    if leaf.is_empty() {
        return None;
    }
    Some((parent, leaf))
}

/// Join a directory path and an entry name.
pub(crate) fn join_path(dir: &str, name: &str) -> String {
    let mut path = String::with_capacity(dir.len() + name.len() + 1);
    path.push_str(dir.trim_end_matches('/'));
    path.push('/');
    path.push_str(name);
    path
}
