pub mod cleanup;
pub mod commit;
pub mod diff;
pub mod gate;
pub mod init;
pub mod log;
pub mod serve;
pub mod status;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tig_core::{TrackingMode, Workspace};

/// Locates the repository for `repo` (or the current directory).
pub fn find_repo(repo: Option<PathBuf>) -> Result<PathBuf> {
    let start = match repo {
        Some(path) => path,
        None => std::env::current_dir().context("Cannot read current directory")?,
    };
    Workspace::find_root(&start)
        .with_context(|| format!("No tig repository found at {:?}. Run 'tig init' first.", start))
}

/// Opens the repository for a one-shot command. The watcher is never
/// started here; auto tracking only runs under `tig serve`.
pub fn open_repo(repo: Option<PathBuf>) -> Result<Workspace> {
    let root = find_repo(repo)?;
    let workspace =
        Workspace::open_with(&root, Some(TrackingMode::Manual), &tracing::Span::current())?;
    Ok(workspace)
}
