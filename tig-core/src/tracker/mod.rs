//! Change tracking: which paths are tracked, what is gated, and how the
//! working tree differs from the last committed state.

mod auto;
mod local;

pub use auto::AutoTracker;
pub use local::LocalTracker;

use crate::diff::DiffResult;
use crate::error::{Error, Result};
use crate::models::{Change, ChangeSet, ChangeSetRequest};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path};

/// The operations a workspace needs from a tracker, independent of whether
/// paths are tracked by hand or by watching the filesystem.
pub trait Tracker: Send + Sync {
    fn track(&self, paths: &[String]) -> Result<()>;
    fn untrack(&self, paths: &[String]) -> Result<()>;
    fn status(&self) -> Result<Vec<Change>>;
    fn gate(&self, paths: &[String]) -> Result<Vec<String>>;
    fn ungate(&self, paths: &[String]) -> Result<Vec<String>>;
    fn show_file_diff(&self, path: &str) -> Result<DiffResult>;
    fn create_change_set(&self, request: ChangeSetRequest) -> Result<ChangeSet>;
    fn cleanup_gated_changes(&self) -> Result<Vec<String>>;
    fn gated_change(&self, path: &str) -> Result<Option<Change>>;
    fn gated_changes(&self) -> Vec<Change>;
}

/// In-memory view of the tracked set and the gated map, guarded by the
/// tracker's lock and mirrored in the key-value store.
#[derive(Debug, Default)]
pub struct TrackerState {
    pub tracked: BTreeSet<String>,
    pub gated: BTreeMap<String, Change>,
}

/// Joins the normal components of `rel` with `/`.
pub fn rel_string(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolves a user-supplied path (relative to `root`, or absolute beneath it)
/// to a repository-relative `/`-separated path. `.` and the root itself
/// resolve to the empty string.
pub fn resolve(root: &Path, input: &str) -> Result<String> {
    let path = Path::new(input);
    let rel = if path.is_absolute() {
        let canonical_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        path.strip_prefix(root)
            .or_else(|_| path.strip_prefix(&canonical_root))
            .map_err(|_| Error::InvalidPath(format!("{input} is outside the repository")))?
    } else {
        path
    };

    let mut parts: Vec<String> = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(Error::InvalidPath(format!("{input} is outside the repository")));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidPath(input.to_string()));
            }
        }
    }
    Ok(parts.join("/"))
}
