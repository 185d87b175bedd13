//! A repository on disk: the working tree plus its `.tig` directory.
//!
//! ```text
//! <root>/.tig/config.toml   optional, see TigConfig
//! <root>/.tig/db/tig.db     SQLite key-value store
//! <root>/.tig/content/      content-addressed blobs
//! ```

use crate::config::{TigConfig, TrackingMode, CONFIG_FILE};
use crate::diff::DiffResult;
use crate::error::{Error, IoResultExt, Result};
use crate::models::{Change, ChangeSet, ChangeSetRequest};
use crate::storage::{KvStore, SqliteKv};
use crate::store::ContentStore;
use crate::tracker::{AutoTracker, LocalTracker, Tracker};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Span};
use uuid::Uuid;

pub const TIG_DIR: &str = ".tig";
const DB_DIR: &str = "db";
const DB_FILE: &str = "tig.db";
const CONTENT_DIR: &str = "content";

pub struct Workspace {
    root: PathBuf,
    config: TigConfig,
    store: Arc<ContentStore>,
    local: Arc<LocalTracker>,
    auto: Option<AutoTracker>,
}

impl Workspace {
    /// Creates the `.tig` layout under `root` and opens it.
    pub fn init(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let tig_dir = root.join(TIG_DIR);
        if tig_dir.exists() {
            return Err(Error::InvalidPath(format!(
                "{} is already a tig repository",
                root.display()
            )));
        }

        std::fs::create_dir_all(tig_dir.join(DB_DIR)).with_path("creating", &tig_dir)?;
        std::fs::create_dir_all(tig_dir.join(CONTENT_DIR)).with_path("creating", &tig_dir)?;
        let config_path = tig_dir.join(CONFIG_FILE);
        std::fs::write(&config_path, TigConfig::default().to_toml()?)
            .with_path("writing config", &config_path)?;

        info!("Initialized tig repository at {:?}", root);
        Self::open(root)
    }

    /// Opens an existing repository, tracking in the mode its config asks for.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(root, None, &Span::current())
    }

    /// Opens an existing repository. `mode` overrides the configured
    /// tracking mode; one-shot commands pass `Manual` to skip the watcher.
    pub fn open_with(root: impl AsRef<Path>, mode: Option<TrackingMode>, parent: &Span) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let tig_dir = root.join(TIG_DIR);
        if !tig_dir.is_dir() {
            return Err(Error::NotFound(format!(
                "{} is not a tig repository",
                root.display()
            )));
        }

        let config = TigConfig::load_or_default(&tig_dir)?;
        let span = tracing::info_span!(parent: parent, "workspace", root = %root.display());

        let db_dir = tig_dir.join(DB_DIR);
        std::fs::create_dir_all(&db_dir).with_path("creating", &db_dir)?;
        let kv: Arc<dyn KvStore> = Arc::new(SqliteKv::new(db_dir.join(DB_FILE))?);
        let store = Arc::new(ContentStore::new(
            tig_dir.join(CONTENT_DIR),
            Arc::clone(&kv),
            &config.store,
            &span,
        )?);
        let local = Arc::new(LocalTracker::new(
            root.clone(),
            kv,
            Arc::clone(&store),
            &config,
            &span,
        )?);

        let auto = match mode.unwrap_or(config.workspace.mode) {
            TrackingMode::Manual => None,
            TrackingMode::Auto => Some(AutoTracker::new(
                Arc::clone(&local),
                Duration::from_millis(config.workspace.debounce_ms),
                &span,
            )?),
        };

        Ok(Self {
            root,
            config,
            store,
            local,
            auto,
        })
    }

    /// Walks up from `start` to the nearest directory containing `.tig`.
    pub fn find_root(start: impl AsRef<Path>) -> Result<PathBuf> {
        let start = start.as_ref();
        let start = if start.is_absolute() {
            start.to_path_buf()
        } else {
            std::env::current_dir()
                .with_path("resolving", start)?
                .join(start)
        };

        start
            .ancestors()
            .find(|dir| dir.join(TIG_DIR).is_dir())
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::NotFound(format!("no tig repository above {}", start.display())))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &TigConfig {
        &self.config
    }

    pub fn mode(&self) -> TrackingMode {
        if self.auto.is_some() {
            TrackingMode::Auto
        } else {
            TrackingMode::Manual
        }
    }

    pub fn content_store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    pub fn tracker(&self) -> &dyn Tracker {
        match &self.auto {
            Some(auto) => auto,
            None => self.local.as_ref(),
        }
    }

    pub fn track(&self, paths: &[String]) -> Result<()> {
        self.tracker().track(paths)
    }

    pub fn untrack(&self, paths: &[String]) -> Result<()> {
        self.tracker().untrack(paths)
    }

    pub fn tracked(&self) -> Vec<String> {
        self.local.tracked()
    }

    pub fn status(&self) -> Result<Vec<Change>> {
        self.tracker().status()
    }

    pub fn status_with_diffs(&self) -> Result<Vec<Change>> {
        self.local.status_with_diffs()
    }

    pub fn gate(&self, paths: &[String]) -> Result<Vec<String>> {
        self.tracker().gate(paths)
    }

    pub fn ungate(&self, paths: &[String]) -> Result<Vec<String>> {
        self.tracker().ungate(paths)
    }

    pub fn gated_change(&self, path: &str) -> Result<Option<Change>> {
        self.tracker().gated_change(path)
    }

    pub fn gated_changes(&self) -> Vec<Change> {
        self.tracker().gated_changes()
    }

    pub fn show_file_diff(&self, path: &str) -> Result<DiffResult> {
        self.tracker().show_file_diff(path)
    }

    pub fn cleanup_gated_changes(&self) -> Result<Vec<String>> {
        self.tracker().cleanup_gated_changes()
    }

    pub fn create_change_set(&self, description: &str) -> Result<ChangeSet> {
        self.tracker().create_change_set(ChangeSetRequest::new(description))
    }

    pub fn create_change_set_with(&self, request: ChangeSetRequest) -> Result<ChangeSet> {
        self.tracker().create_change_set(request)
    }

    pub fn get_change_set(&self, id: Uuid) -> Result<ChangeSet> {
        self.local.get_change_set(id)
    }

    pub fn list_change_sets(&self) -> Result<Vec<ChangeSet>> {
        self.local.list_change_sets()
    }

    pub fn history(&self, path: &str) -> Result<Vec<ChangeSet>> {
        self.local.history(path)
    }

    pub fn load_gated_changes(&self) -> Result<usize> {
        self.local.load_gated_changes()
    }

    pub fn save_gated_changes(&self) -> Result<()> {
        self.local.save_gated_changes()
    }
}
