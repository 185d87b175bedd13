use super::{rel_string, resolve, Tracker, TrackerState};
use crate::config::TigConfig;
use crate::diff::{DiffEngine, DiffResult};
use crate::error::{Error, IoResultExt, Result};
use crate::ignore::IgnoreRules;
use crate::models::{
    hash_content, Change, ChangeSet, ChangeSetRequest, ChangeType, FileState, STATUS_PROBE,
};
use crate::storage::{get_json, keys, KvStore, WriteBatch};
use crate::store::ContentStore;
use crate::watcher::PathEvent;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn, Span};
use uuid::Uuid;
use walkdir::WalkDir;

/// Tracker whose tracked set changes only through explicit `track` and
/// `untrack` calls (and commits).
///
/// One reader/writer lock guards the tracked set and the gated map. Every
/// mutation is written to the key-value store before the call returns.
pub struct LocalTracker {
    root: PathBuf,
    kv: Arc<dyn KvStore>,
    store: Arc<ContentStore>,
    engine: DiffEngine,
    ignore: IgnoreRules,
    state: RwLock<TrackerState>,
    span: Span,
}

impl LocalTracker {
    pub fn new(
        root: impl Into<PathBuf>,
        kv: Arc<dyn KvStore>,
        store: Arc<ContentStore>,
        config: &TigConfig,
        span: &Span,
    ) -> Result<Self> {
        let tracker = Self {
            root: root.into(),
            kv,
            store,
            engine: DiffEngine::from_config(&config.diff),
            ignore: IgnoreRules::new(config.workspace.ignore.iter().cloned()),
            state: RwLock::new(TrackerState::default()),
            span: tracing::info_span!(parent: span, "tracker"),
        };
        tracker.load_tracked()?;
        tracker.load_gated_changes()?;
        Ok(tracker)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ignore_rules(&self) -> &IgnoreRules {
        &self.ignore
    }

    pub fn content_store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    pub fn tracked(&self) -> Vec<String> {
        self.state.read().tracked.iter().cloned().collect()
    }

    /// Replaces the in-memory gated map with what is persisted.
    pub fn load_gated_changes(&self) -> Result<usize> {
        let mut gated = BTreeMap::new();
        for (key, value) in self.kv.scan_prefix(keys::GATED)? {
            let change: Change = serde_json::from_slice(&value)?;
            if keys::strip(&key, keys::GATED) != Some(change.path.as_str()) {
                warn!(key = %key, path = %change.path, "gated record key does not match its path");
            }
            gated.insert(change.path.clone(), change);
        }

        let count = gated.len();
        self.state.write().gated = gated;
        debug!(count, "loaded gated changes");
        Ok(count)
    }

    /// Writes the gated map out in full, removing records for paths that are
    /// no longer gated.
    pub fn save_gated_changes(&self) -> Result<()> {
        let state = self.state.read();
        self.persist_gated(&state)
    }

    /// Like [`Tracker::status`], with `diff` and `diff_hunks` filled in for
    /// modified files.
    pub fn status_with_diffs(&self) -> Result<Vec<Change>> {
        let _enter = self.span.enter();
        let state = self.state.read();
        let mut changes = self.status_locked(&state)?;

        for change in changes
            .iter_mut()
            .filter(|c| c.change_type == ChangeType::Modify)
        {
            match self.diff_path(&change.path) {
                Ok(result) => {
                    change.diff = Some(result.format());
                    change.diff_hunks = Some(result.hunks);
                }
                Err(e) => warn!(path = %change.path, error = %e, "failed to diff file"),
            }
        }
        Ok(changes)
    }

    pub fn create_change_set_for(&self, description: &str) -> Result<ChangeSet> {
        self.create_change_set(ChangeSetRequest::new(description))
    }

    pub fn get_change_set(&self, id: Uuid) -> Result<ChangeSet> {
        get_json(self.kv.as_ref(), &keys::changeset(&id.to_string()))?
            .ok_or_else(|| Error::NotFound(format!("change set {id}")))
    }

    /// All committed change sets, newest first.
    pub fn list_change_sets(&self) -> Result<Vec<ChangeSet>> {
        let ids = self
            .kv
            .scan_prefix(keys::CHANGESET_TIME)?
            .into_iter()
            .rev()
            .map(|(_, value)| value);
        self.load_change_sets(ids)
    }

    /// Change sets touching `path`, newest first.
    pub fn history(&self, path: &str) -> Result<Vec<ChangeSet>> {
        let rel = resolve(&self.root, path)?;
        let prefix = format!("{}{rel}:", keys::CHANGESET_PATH);
        // A longer path can share the prefix ("a" vs "a:b.txt"); ids never contain ':'.
        let ids = self
            .kv
            .scan_prefix(&prefix)?
            .into_iter()
            .filter(|(key, _)| {
                keys::strip(key, keys::CHANGESET_PATH)
                    .and_then(|rest| rest.rsplit_once(':'))
                    .is_some_and(|(path, _)| path == rel)
            })
            .map(|(_, value)| value);
        let mut sets = self.load_change_sets(ids)?;
        sets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sets)
    }

    pub fn head(&self) -> Result<Option<Uuid>> {
        let Some(raw) = self.kv.get(keys::CHANGESET_HEAD)? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&raw);
        match Uuid::parse_str(text.trim()) {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                warn!(head = %text, error = %e, "ignoring unreadable change set head");
                Ok(None)
            }
        }
    }

    /// Applies a batch of filesystem events to the tracked set.
    pub fn apply_events(&self, events: &[PathEvent]) -> Result<()> {
        let _enter = self.span.enter();
        let mut state = self.state.write();
        let mut batch = WriteBatch::new();

        for event in events {
            match event {
                PathEvent::Created(rel) | PathEvent::Modified(rel) => {
                    self.remember(&mut state, &mut batch, rel);
                }
                PathEvent::Removed(rel) => self.forget(&mut state, &mut batch, rel),
                PathEvent::Renamed { from, to } => {
                    self.forget(&mut state, &mut batch, from);
                    self.remember(&mut state, &mut batch, to);
                }
            }
        }

        if !batch.is_empty() {
            debug!(ops = batch.len(), "persisting tracked set changes");
            self.kv.apply(batch)?;
        }
        Ok(())
    }

    fn remember(&self, state: &mut TrackerState, batch: &mut WriteBatch, rel: &str) {
        let abs = self.abs(rel);
        let files = if abs.is_dir() {
            self.walk_files(rel)
        } else if abs.is_file() {
            vec![rel.to_string()]
        } else {
            Vec::new()
        };

        for path in files {
            if state.tracked.insert(path.clone()) {
                batch.put(keys::tracked(&path), Vec::<u8>::new());
            }
        }
    }

    fn forget(&self, state: &mut TrackerState, batch: &mut WriteBatch, rel: &str) {
        let gone: Vec<String> = state
            .tracked
            .iter()
            .filter(|p| is_under(p, rel))
            .cloned()
            .collect();
        for path in gone {
            state.tracked.remove(&path);
            batch.delete(keys::tracked(&path));
        }
    }

    fn load_tracked(&self) -> Result<()> {
        let tracked: BTreeSet<String> = self
            .kv
            .scan_prefix(keys::TRACKED)?
            .into_iter()
            .filter_map(|(key, _)| keys::strip(&key, keys::TRACKED).map(str::to_string))
            .collect();
        self.state.write().tracked = tracked;
        Ok(())
    }

    fn load_change_sets(&self, ids: impl Iterator<Item = Vec<u8>>) -> Result<Vec<ChangeSet>> {
        let mut sets = Vec::new();
        for raw in ids {
            let text = String::from_utf8_lossy(&raw);
            let id = Uuid::parse_str(text.trim())
                .map_err(|e| Error::NotFound(format!("change set {text}: {e}")))?;
            sets.push(self.get_change_set(id)?);
        }
        Ok(sets)
    }

    fn persist_gated(&self, state: &TrackerState) -> Result<()> {
        let mut batch = WriteBatch::new();
        for (key, _) in self.kv.scan_prefix(keys::GATED)? {
            let stale = keys::strip(&key, keys::GATED).is_some_and(|p| !state.gated.contains_key(p));
            if stale {
                batch.delete(key);
            }
        }
        for (path, change) in &state.gated {
            batch.put_json(keys::gated(path), change)?;
        }
        self.kv.apply(batch)
    }

    fn abs(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    fn file_state(&self, rel: &str) -> Result<Option<FileState>> {
        get_json(self.kv.as_ref(), &keys::file_state(rel))
    }

    fn file_states(&self) -> Result<BTreeMap<String, FileState>> {
        let mut states = BTreeMap::new();
        for (key, value) in self.kv.scan_prefix(keys::FILE_STATE)? {
            if let Some(path) = keys::strip(&key, keys::FILE_STATE) {
                states.insert(path.to_string(), serde_json::from_slice(&value)?);
            }
        }
        Ok(states)
    }

    /// Non-ignored regular files under `rel_dir` (the whole tree when empty),
    /// in path order.
    fn walk_files(&self, rel_dir: &str) -> Vec<String> {
        let root = &self.root;
        WalkDir::new(self.abs(rel_dir))
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| match entry.path().strip_prefix(root) {
                Ok(rel) => rel.as_os_str().is_empty() || !self.ignore.is_ignored(rel),
                Err(_) => false,
            })
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.path().strip_prefix(root).ok().map(rel_string))
            .collect()
    }

    /// Expands user paths into repository-relative file paths. Directories
    /// (and `.`) expand to the files beneath them plus any known path beneath
    /// them whose file has disappeared.
    fn expand(&self, state: &TrackerState, paths: &[String]) -> Result<BTreeSet<String>> {
        let resolved = paths
            .iter()
            .map(|p| resolve(&self.root, p))
            .collect::<Result<Vec<_>>>()?;
        let file_states = self.file_states()?;

        let mut out = BTreeSet::new();
        for rel in resolved {
            if !rel.is_empty() && self.ignore.is_ignored(Path::new(&rel)) {
                debug!(path = %rel, "skipping ignored path");
                continue;
            }
            if rel.is_empty() || self.abs(&rel).is_dir() {
                out.extend(self.walk_files(&rel));
                let known = file_states
                    .keys()
                    .chain(state.tracked.iter())
                    .chain(state.gated.keys());
                out.extend(
                    known
                        .filter(|p| is_under(p, &rel) && !self.abs(p).exists())
                        .cloned(),
                );
            } else {
                out.insert(rel);
            }
        }
        Ok(out)
    }

    fn status_locked(&self, state: &TrackerState) -> Result<Vec<Change>> {
        let mut result: Vec<Change> = state.gated.values().cloned().collect();
        let file_states = self.file_states()?;

        let mut working = Vec::new();
        for rel in self.walk_files("") {
            if state.gated.contains_key(&rel) {
                continue;
            }
            let (content, meta) = match self.read_file(&rel) {
                Ok(read) => read,
                Err(e) => {
                    warn!(path = %rel, error = %e, "skipping unreadable file");
                    continue;
                }
            };
            let hash = hash_content(&content);
            let (mode, size, mod_time) = file_info(&meta);

            match file_states.get(&rel) {
                None => working.push(
                    Change::new(ChangeType::Untracked, rel)
                        .with_new_hash(hash)
                        .with_file_info(mode, size, mod_time),
                ),
                Some(prior) if prior.hash != hash => working.push(
                    Change::new(ChangeType::Modify, rel)
                        .with_old_hash(Some(prior.hash.clone()))
                        .with_new_hash(hash)
                        .with_file_info(mode, size, mod_time),
                ),
                Some(_) => {}
            }
        }

        let candidates: BTreeSet<&String> = file_states.keys().chain(state.tracked.iter()).collect();
        let mut deleted = Vec::new();
        for rel in candidates {
            if state.gated.contains_key(rel) || self.abs(rel).exists() {
                continue;
            }
            let old_hash = file_states.get(rel).map(|s| s.hash.clone());
            let delete = Change::new(ChangeType::Delete, rel.clone()).with_old_hash(old_hash);

            // Same content reappearing at an untracked path is a rename.
            let renamed = delete.old_hash.as_deref().and_then(|h| {
                working.iter().position(|c: &Change| {
                    c.change_type == ChangeType::Untracked && c.new_hash.as_deref() == Some(h)
                })
            });
            match renamed {
                Some(i) => {
                    let entry = &mut working[i];
                    entry.change_type = ChangeType::Rename;
                    entry.old_path = Some(delete.path);
                    entry.old_hash = delete.old_hash;
                }
                None => deleted.push(delete),
            }
        }

        working.sort_by(|a, b| a.path.cmp(&b.path));
        result.extend(working);
        result.extend(deleted);
        Ok(result)
    }

    fn read_file(&self, rel: &str) -> io::Result<(Vec<u8>, fs::Metadata)> {
        let abs = self.abs(rel);
        let content = fs::read(&abs)?;
        let meta = fs::metadata(&abs)?;
        Ok((content, meta))
    }

    fn diff_path(&self, rel: &str) -> Result<DiffResult> {
        let prior = self.file_state(rel)?;
        let old = match &prior {
            None => Vec::new(),
            Some(state) => match self.store.get(&state.hash) {
                Ok(content) => content,
                Err(e) if e.is_not_found() => {
                    debug!(path = %rel, hash = %state.hash, "previous content missing, diffing against empty");
                    Vec::new()
                }
                Err(e) => return Err(e),
            },
        };

        let abs = self.abs(rel);
        let new = match fs::read(&abs) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound && prior.is_some() => Vec::new(),
            Err(e) => return Err(Error::io("reading", abs, e)),
        };

        Ok(self.engine.diff(&old, &new))
    }

    /// Drops the reference a replaced gated change held, unless the committed
    /// state still points at the same content.
    fn release_superseded(&self, rel: &str, superseded: Option<String>, prior: Option<&FileState>) {
        let Some(hash) = superseded else {
            return;
        };
        if prior.is_some_and(|p| p.hash == hash) {
            return;
        }
        match self.store.delete(&hash) {
            Ok(()) => debug!(path = %rel, hash = %hash, "released superseded gated content"),
            Err(e) if e.is_not_found() => {
                debug!(path = %rel, hash = %hash, "superseded gated content already gone")
            }
            Err(e) => warn!(path = %rel, hash = %hash, error = %e, "failed to release superseded gated content"),
        }
    }

    /// Gates one path. Returns whether the path ended up newly or still gated.
    fn gate_file(&self, state: &mut TrackerState, rel: &str) -> Result<bool> {
        let abs = self.abs(rel);
        let prior = self.file_state(rel)?;

        match fs::read(&abs) {
            Ok(content) => {
                let meta = fs::metadata(&abs).with_path("reading metadata", &abs)?;
                let hash = hash_content(&content);
                let existing = state.gated.get(rel);

                if existing.is_some_and(|c| {
                    c.change_type != ChangeType::Delete && c.new_hash.as_deref() == Some(hash.as_str())
                }) {
                    return Ok(true);
                }
                let superseded = existing.and_then(|c| c.new_hash.clone());
                if prior.as_ref().is_some_and(|p| p.hash == hash) {
                    if existing.is_some() {
                        debug!(path = %rel, "reverted to committed content, dropping gated change");
                        state.gated.remove(rel);
                        self.release_superseded(rel, superseded, prior.as_ref());
                    } else {
                        debug!(path = %rel, "unchanged since last commit");
                    }
                    return Ok(false);
                }

                let change_type = if existing.is_none() && prior.is_none() {
                    ChangeType::Add
                } else {
                    ChangeType::Modify
                };
                let stored = self.store.store_file(Path::new(rel), &content)?;
                self.release_superseded(rel, superseded, prior.as_ref());
                let (mode, size, mod_time) = file_info(&meta);
                let change = Change::new(change_type, rel)
                    .with_old_hash(prior.map(|p| p.hash))
                    .with_new_hash(stored)
                    .with_file_info(mode, size, mod_time)
                    .gated();

                debug!(path = %rel, change_type = %change.change_type, "gated file");
                state.gated.insert(rel.to_string(), change);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if state
                    .gated
                    .get(rel)
                    .is_some_and(|c| c.change_type == ChangeType::Delete)
                {
                    return Ok(false);
                }
                if prior.is_none() && !state.tracked.contains(rel) {
                    return Err(Error::NotFound(format!("{rel} does not exist")));
                }

                let superseded = state.gated.get(rel).and_then(|c| c.new_hash.clone());
                self.release_superseded(rel, superseded, prior.as_ref());
                let change = Change::new(ChangeType::Delete, rel)
                    .with_old_hash(prior.map(|p| p.hash))
                    .gated();
                debug!(path = %rel, "gated deletion");
                state.gated.insert(rel.to_string(), change);
                Ok(true)
            }
            Err(e) => Err(Error::io("reading", abs, e)),
        }
    }
}

impl Tracker for LocalTracker {
    fn track(&self, paths: &[String]) -> Result<()> {
        let _enter = self.span.enter();
        let mut state = self.state.write();

        let added: Vec<String> = self
            .expand(&state, paths)?
            .into_iter()
            .filter(|rel| {
                let present = self.abs(rel).is_file();
                if !present {
                    warn!(path = %rel, "cannot track missing file");
                }
                present && !state.tracked.contains(rel)
            })
            .collect();

        let mut batch = WriteBatch::new();
        for rel in &added {
            batch.put(keys::tracked(rel), Vec::<u8>::new());
        }
        self.kv.apply(batch)?;

        info!(count = added.len(), "tracked paths");
        state.tracked.extend(added);
        Ok(())
    }

    fn untrack(&self, paths: &[String]) -> Result<()> {
        let _enter = self.span.enter();
        let mut state = self.state.write();
        let file_states = self.file_states()?;

        let mut targets = BTreeSet::new();
        for input in paths {
            let rel = resolve(&self.root, input)?;
            let known = state
                .tracked
                .iter()
                .chain(state.gated.keys())
                .chain(file_states.keys());
            targets.extend(known.filter(|p| is_under(p, &rel)).cloned());
        }

        let mut batch = WriteBatch::new();
        for rel in &targets {
            batch
                .delete(keys::tracked(rel))
                .delete(keys::file_state(rel))
                .delete(keys::gated(rel));
        }
        self.kv.apply(batch)?;

        for rel in &targets {
            state.tracked.remove(rel);
            state.gated.remove(rel);
        }
        info!(count = targets.len(), "untracked paths");
        Ok(())
    }

    fn status(&self) -> Result<Vec<Change>> {
        let _enter = self.span.enter();
        let state = self.state.read();
        self.status_locked(&state)
    }

    fn gate(&self, paths: &[String]) -> Result<Vec<String>> {
        let _enter = self.span.enter();
        let mut state = self.state.write();
        let targets = self.expand(&state, paths)?;

        let mut gated = Vec::new();
        for rel in targets {
            match self.gate_file(&mut state, &rel) {
                Ok(true) => gated.push(rel),
                Ok(false) => {}
                Err(e) => warn!(path = %rel, error = %e, "failed to gate file"),
            }
        }

        self.persist_gated(&state)?;
        info!(count = gated.len(), "gated changes");
        Ok(gated)
    }

    fn ungate(&self, paths: &[String]) -> Result<Vec<String>> {
        let _enter = self.span.enter();
        let mut state = self.state.write();

        let mut removed = BTreeSet::new();
        for input in paths {
            let rel = resolve(&self.root, input)?;
            removed.extend(state.gated.keys().filter(|p| is_under(p, &rel)).cloned());
        }

        let mut batch = WriteBatch::new();
        for rel in &removed {
            batch.delete(keys::gated(rel));
        }
        self.kv.apply(batch)?;

        for rel in &removed {
            state.gated.remove(rel);
        }
        info!(count = removed.len(), "ungated changes");
        Ok(removed.into_iter().collect())
    }

    fn show_file_diff(&self, path: &str) -> Result<DiffResult> {
        let _enter = self.span.enter();
        let rel = resolve(&self.root, path)?;
        if rel.is_empty() {
            return Err(Error::InvalidPath(path.to_string()));
        }
        let _state = self.state.read();
        self.diff_path(&rel)
    }

    fn create_change_set(&self, request: ChangeSetRequest) -> Result<ChangeSet> {
        let _enter = self.span.enter();

        if request.description == STATUS_PROBE {
            let state = self.state.read();
            return Ok(ChangeSet::new(request, state.gated.values().cloned().collect()));
        }

        let mut state = self.state.write();
        if state.gated.is_empty() {
            return Err(Error::NoChanges);
        }

        let changes: Vec<Change> = state.gated.values().cloned().collect();
        let change_set = ChangeSet::new(request, changes).with_parent(self.head()?);
        let id = change_set.id.to_string();

        let mut batch = WriteBatch::new();
        batch.put_json(keys::changeset(&id), &change_set)?;
        batch.put(
            keys::changeset_time(change_set.created_at.timestamp_micros(), &id),
            id.clone(),
        );
        for change in &change_set.changes {
            batch
                .put(keys::changeset_path(&change.path, &id), id.clone())
                .delete(keys::gated(&change.path));
            if change.change_type == ChangeType::Delete {
                batch
                    .delete(keys::file_state(&change.path))
                    .delete(keys::tracked(&change.path));
            } else {
                if let Some(file_state) = FileState::from_change(change) {
                    batch.put_json(keys::file_state(&change.path), &file_state)?;
                }
                batch.put(keys::tracked(&change.path), Vec::<u8>::new());
            }
        }
        batch.put(keys::CHANGESET_HEAD, id.clone());
        self.kv.apply(batch)?;

        state.gated.clear();
        for change in &change_set.changes {
            if change.change_type == ChangeType::Delete {
                state.tracked.remove(&change.path);
            } else {
                state.tracked.insert(change.path.clone());
            }
        }

        info!(
            id = %change_set.id,
            changes = change_set.changes.len(),
            "created change set"
        );
        Ok(change_set)
    }

    fn cleanup_gated_changes(&self) -> Result<Vec<String>> {
        let _enter = self.span.enter();
        let mut state = self.state.write();

        let mut removed = Vec::new();
        for (path, change) in &state.gated {
            if self.abs(path).exists() {
                continue;
            }
            let blob_present = match change.content_hash() {
                Some(hash) => self.store.exists(hash)?,
                None => false,
            };
            if !blob_present {
                removed.push(path.clone());
            }
        }

        let mut batch = WriteBatch::new();
        for path in &removed {
            batch.delete(keys::gated(path));
        }
        self.kv.apply(batch)?;

        for path in &removed {
            state.gated.remove(path);
        }
        info!(count = removed.len(), "cleaned up gated changes");
        Ok(removed)
    }

    fn gated_change(&self, path: &str) -> Result<Option<Change>> {
        let rel = resolve(&self.root, path)?;
        Ok(self.state.read().gated.get(&rel).cloned())
    }

    fn gated_changes(&self) -> Vec<Change> {
        self.state.read().gated.values().cloned().collect()
    }
}

/// True when `path` is `dir` or lies beneath it. The empty `dir` is the root.
fn is_under(path: &str, dir: &str) -> bool {
    dir.is_empty()
        || path == dir
        || path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn file_info(meta: &fs::Metadata) -> (u32, u64, Option<DateTime<Utc>>) {
    (
        file_mode(meta),
        meta.len(),
        meta.modified().ok().map(DateTime::<Utc>::from),
    )
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteKv;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        kv: Arc<dyn KvStore>,
        store: Arc<ContentStore>,
        tracker: LocalTracker,
        config: TigConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let mut config = TigConfig::default();
            config.store.cache_capacity = 0;
            Self::with_config(config)
        }

        fn with_config(config: TigConfig) -> Self {
            let dir = TempDir::new().unwrap();
            let kv: Arc<dyn KvStore> = Arc::new(SqliteKv::in_memory().unwrap());
            let store = Arc::new(
                ContentStore::new(
                    dir.path().join(".tig").join("content"),
                    Arc::clone(&kv),
                    &config.store,
                    &Span::none(),
                )
                .unwrap(),
            );
            let tracker = LocalTracker::new(
                dir.path(),
                Arc::clone(&kv),
                Arc::clone(&store),
                &config,
                &Span::none(),
            )
            .unwrap();
            Self {
                dir,
                kv,
                store,
                tracker,
                config,
            }
        }

        fn reopen(&self) -> LocalTracker {
            LocalTracker::new(
                self.dir.path(),
                Arc::clone(&self.kv),
                Arc::clone(&self.store),
                &self.config,
                &Span::none(),
            )
            .unwrap()
        }

        fn write(&self, rel: &str, content: &str) {
            let path = self.dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        fn remove(&self, rel: &str) {
            fs::remove_file(self.dir.path().join(rel)).unwrap();
        }

        fn commit_all(&self, message: &str) -> ChangeSet {
            self.tracker.gate(&paths(&["."])).unwrap();
            self.tracker.create_change_set_for(message).unwrap()
        }
    }

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn summary(changes: &[Change]) -> Vec<(String, ChangeType)> {
        changes
            .iter()
            .map(|c| (c.path.clone(), c.change_type))
            .collect()
    }

    #[test]
    fn test_gate_add_then_modify() {
        let fx = Fixture::new();
        fx.write("a.txt", "one");

        let gated = fx.tracker.gate(&paths(&["a.txt"])).unwrap();
        assert_eq!(gated, vec!["a.txt".to_string()]);

        let change = fx.tracker.gated_change("a.txt").unwrap().unwrap();
        assert_eq!(change.change_type, ChangeType::Add);
        assert!(change.gated);
        assert_eq!(change.new_hash.as_deref(), Some(hash_content(b"one").as_str()));
        assert_eq!(change.size, 3);

        fx.write("a.txt", "two");
        fx.tracker.gate(&paths(&["a.txt"])).unwrap();

        let change = fx.tracker.gated_change("a.txt").unwrap().unwrap();
        assert_eq!(change.change_type, ChangeType::Modify);
        assert_eq!(change.new_hash.as_deref(), Some(hash_content(b"two").as_str()));
        assert_eq!(fx.tracker.gated_changes().len(), 1);
    }

    #[test]
    fn test_gate_after_commit_records_old_hash() {
        let fx = Fixture::new();
        fx.write("a.txt", "one");
        fx.commit_all("first");

        fx.write("a.txt", "two");
        fx.tracker.gate(&paths(&["a.txt"])).unwrap();

        let change = fx.tracker.gated_change("a.txt").unwrap().unwrap();
        assert_eq!(change.change_type, ChangeType::Modify);
        assert_eq!(change.old_hash.as_deref(), Some(hash_content(b"one").as_str()));
    }

    #[test]
    fn test_gate_unchanged_file_is_skipped() {
        let fx = Fixture::new();
        fx.write("a.txt", "one");
        fx.commit_all("first");

        assert!(fx.tracker.gate(&paths(&["a.txt"])).unwrap().is_empty());
        assert!(fx.tracker.gated_changes().is_empty());
    }

    #[test]
    fn test_regate_same_content_keeps_one_reference() {
        let fx = Fixture::new();
        fx.write("a.txt", "same");
        fx.tracker.gate(&paths(&["a.txt"])).unwrap();
        fx.tracker.gate(&paths(&["a.txt"])).unwrap();

        let hash = hash_content(b"same");
        assert_eq!(fx.store.metadata(&hash).unwrap().ref_count, 1);
    }

    #[test]
    fn test_regate_new_content_releases_replaced_blob() {
        let fx = Fixture::new();
        fx.write("a.txt", "v1");
        fx.tracker.gate(&paths(&["a.txt"])).unwrap();
        fx.write("a.txt", "v2");
        fx.tracker.gate(&paths(&["a.txt"])).unwrap();

        assert!(!fx.store.exists(&hash_content(b"v1")).unwrap());
        assert_eq!(fx.store.metadata(&hash_content(b"v2")).unwrap().ref_count, 1);
    }

    #[test]
    fn test_regate_keeps_committed_blob() {
        let fx = Fixture::new();
        fx.write("a.txt", "base");
        fx.commit_all("first");
        let base = hash_content(b"base");
        let refs = fx.store.metadata(&base).unwrap().ref_count;

        fx.write("a.txt", "next");
        fx.tracker.gate(&paths(&["a.txt"])).unwrap();
        fx.write("a.txt", "later");
        fx.tracker.gate(&paths(&["a.txt"])).unwrap();

        assert_eq!(fx.store.metadata(&base).unwrap().ref_count, refs);
        assert!(!fx.store.exists(&hash_content(b"next")).unwrap());
        assert_eq!(
            fx.tracker.gated_change("a.txt").unwrap().unwrap().old_hash,
            Some(base)
        );
    }

    #[test]
    fn test_revert_to_committed_content_drops_gated_change() {
        let fx = Fixture::new();
        fx.write("a.txt", "one");
        fx.commit_all("first");

        fx.write("a.txt", "two");
        fx.tracker.gate(&paths(&["a.txt"])).unwrap();
        fx.write("a.txt", "one");
        let gated = fx.tracker.gate(&paths(&["a.txt"])).unwrap();

        assert!(gated.is_empty());
        assert!(fx.tracker.gated_change("a.txt").unwrap().is_none());
        assert!(fx.reopen().gated_changes().is_empty());
        assert!(!fx.store.exists(&hash_content(b"two")).unwrap());
        assert!(fx.store.exists(&hash_content(b"one")).unwrap());
        assert!(matches!(
            fx.tracker.create_change_set_for("noop"),
            Err(Error::NoChanges)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_gate_directory_continues_past_unreadable_file() {
        use std::os::unix::fs::PermissionsExt;

        let fx = Fixture::new();
        fx.write("src/a.txt", "a");
        fx.write("src/locked.txt", "locked");
        fx.write("src/z.txt", "z");
        let locked = fx.dir.path().join("src/locked.txt");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        // Privileged users can still read the file.
        let readable = fs::read(&locked).is_ok();

        let gated = fx.tracker.gate(&paths(&["src"])).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();

        let expected = if readable {
            paths(&["src/a.txt", "src/locked.txt", "src/z.txt"])
        } else {
            paths(&["src/a.txt", "src/z.txt"])
        };
        assert_eq!(gated, expected);
        let stored: Vec<String> = fx.reopen().gated_changes().into_iter().map(|c| c.path).collect();
        assert_eq!(stored, expected);
    }

    #[test]
    fn test_history_matches_exact_path() {
        let fx = Fixture::new();
        fx.write("a", "plain");
        let plain = fx.commit_all("plain");
        fx.write("a:b.txt", "colon");
        fx.commit_all("colon");

        let history: Vec<Uuid> = fx
            .tracker
            .history("a")
            .unwrap()
            .into_iter()
            .map(|cs| cs.id)
            .collect();
        assert_eq!(history, vec![plain.id]);
        assert_eq!(fx.tracker.history("a:b.txt").unwrap().len(), 1);
    }

    #[test]
    fn test_ungate_leaves_blobs_alone() {
        let fx = Fixture::new();
        fx.write("a.txt", "content");
        fx.tracker.gate(&paths(&["a.txt"])).unwrap();
        let hash = hash_content(b"content");
        let before = fx.store.metadata(&hash).unwrap().ref_count;

        let removed = fx.tracker.ungate(&paths(&["a.txt"])).unwrap();
        assert_eq!(removed, vec!["a.txt".to_string()]);
        assert!(fx.tracker.gated_change("a.txt").unwrap().is_none());
        assert_eq!(fx.store.metadata(&hash).unwrap().ref_count, before);

        let status = fx.tracker.status().unwrap();
        assert_eq!(summary(&status), vec![("a.txt".to_string(), ChangeType::Untracked)]);

        assert!(fx.reopen().gated_changes().is_empty());
    }

    #[test]
    fn test_ungate_directory() {
        let fx = Fixture::new();
        fx.write("src/a.rs", "a");
        fx.write("src/b.rs", "b");
        fx.write("top.txt", "t");
        fx.tracker.gate(&paths(&["."])).unwrap();

        let removed = fx.tracker.ungate(&paths(&["src"])).unwrap();
        assert_eq!(removed, paths(&["src/a.rs", "src/b.rs"]));
        assert_eq!(fx.tracker.gated_changes().len(), 1);
    }

    #[test]
    fn test_cleanup_respects_blob_presence() {
        let fx = Fixture::new();
        fx.write("orphan.txt", "orphan");
        fx.write("kept.txt", "kept");
        fx.write("live.txt", "live");
        fx.tracker.gate(&paths(&["."])).unwrap();

        fx.remove("orphan.txt");
        fx.remove("kept.txt");
        fx.store.delete(&hash_content(b"orphan")).unwrap();

        let removed = fx.tracker.cleanup_gated_changes().unwrap();
        assert_eq!(removed, vec!["orphan.txt".to_string()]);

        let remaining: Vec<String> = fx
            .tracker
            .gated_changes()
            .into_iter()
            .map(|c| c.path)
            .collect();
        assert_eq!(remaining, paths(&["kept.txt", "live.txt"]));

        let reloaded: Vec<String> = fx.reopen().gated_changes().into_iter().map(|c| c.path).collect();
        assert_eq!(reloaded, remaining);
    }

    #[test]
    fn test_status_kinds() {
        let fx = Fixture::new();
        fx.write("a.txt", "alpha");
        fx.write("b.txt", "beta");
        fx.write("c.txt", "gamma");
        fx.commit_all("base");

        fx.write("a.txt", "alpha 2");
        fx.remove("b.txt");
        fs::rename(fx.dir.path().join("c.txt"), fx.dir.path().join("e.txt")).unwrap();
        fx.write("d.txt", "delta");
        fx.write("g.txt", "staged");
        fx.tracker.gate(&paths(&["g.txt"])).unwrap();

        let status = fx.tracker.status().unwrap();
        assert_eq!(
            summary(&status),
            vec![
                ("g.txt".to_string(), ChangeType::Add),
                ("a.txt".to_string(), ChangeType::Modify),
                ("d.txt".to_string(), ChangeType::Untracked),
                ("e.txt".to_string(), ChangeType::Rename),
                ("b.txt".to_string(), ChangeType::Delete),
            ]
        );

        assert!(status[0].gated);
        assert!(status[1..].iter().all(|c| !c.gated));
        assert_eq!(status[1].old_hash.as_deref(), Some(hash_content(b"alpha").as_str()));
        assert_eq!(status[3].old_path.as_deref(), Some("c.txt"));
        assert_eq!(status[4].old_hash.as_deref(), Some(hash_content(b"beta").as_str()));
    }

    #[test]
    fn test_status_clean_after_commit() {
        let fx = Fixture::new();
        fx.write("a.txt", "alpha");
        fx.write("node_modules/pkg/index.js", "ignored");
        fx.write(".env", "hidden");
        fx.commit_all("base");

        assert!(fx.tracker.status().unwrap().is_empty());
    }

    #[test]
    fn test_status_with_diffs() {
        let fx = Fixture::new();
        fx.write("a.txt", "a\nb\nc\n");
        fx.commit_all("base");
        fx.write("a.txt", "a\nx\nc\n");

        let status = fx.tracker.status_with_diffs().unwrap();
        assert_eq!(status.len(), 1);
        let hunks = status[0].diff_hunks.as_ref().unwrap();
        assert_eq!(hunks.len(), 1);
        assert!(status[0].diff.as_ref().unwrap().contains("-b\n+x\n"));
    }

    #[test]
    fn test_gate_directory_and_all() {
        let fx = Fixture::new();
        fx.write("src/a.rs", "a");
        fx.write("src/nested/b.rs", "b");
        fx.write("src/node_modules/x.js", "x");
        fx.write("src/.hidden", "h");
        fx.write("README.md", "readme");

        let gated = fx.tracker.gate(&paths(&["src"])).unwrap();
        assert_eq!(gated, paths(&["src/a.rs", "src/nested/b.rs"]));

        let gated = fx.tracker.gate(&paths(&["."])).unwrap();
        assert_eq!(gated, paths(&["README.md", "src/a.rs", "src/nested/b.rs"]));
        assert_eq!(fx.tracker.gated_changes().len(), 3);
    }

    #[test]
    fn test_gate_deleted_file() {
        let fx = Fixture::new();
        fx.write("a.txt", "alpha");
        fx.commit_all("base");
        fx.remove("a.txt");

        let gated = fx.tracker.gate(&paths(&["a.txt"])).unwrap();
        assert_eq!(gated, paths(&["a.txt"]));
        let change = fx.tracker.gated_change("a.txt").unwrap().unwrap();
        assert_eq!(change.change_type, ChangeType::Delete);
        assert_eq!(change.old_hash.as_deref(), Some(hash_content(b"alpha").as_str()));

        assert!(fx.tracker.gate(&paths(&["a.txt"])).unwrap().is_empty());
        assert_eq!(fx.tracker.gated_changes().len(), 1);
    }

    #[test]
    fn test_gate_all_picks_up_deletions() {
        let fx = Fixture::new();
        fx.write("a.txt", "alpha");
        fx.write("b.txt", "beta");
        fx.commit_all("base");
        fx.remove("b.txt");
        fx.write("a.txt", "alpha 2");

        let gated = fx.tracker.gate(&paths(&["."])).unwrap();
        assert_eq!(gated, paths(&["a.txt", "b.txt"]));
        assert_eq!(
            summary(&fx.tracker.gated_changes()),
            vec![
                ("a.txt".to_string(), ChangeType::Modify),
                ("b.txt".to_string(), ChangeType::Delete),
            ]
        );
    }

    #[test]
    fn test_gate_missing_file_is_skipped() {
        let fx = Fixture::new();
        fx.write("real.txt", "real");

        let gated = fx.tracker.gate(&paths(&["nope.txt", "real.txt"])).unwrap();
        assert_eq!(gated, paths(&["real.txt"]));
    }

    #[test]
    fn test_gate_rejects_paths_outside_root() {
        let fx = Fixture::new();
        let err = fx.tracker.gate(&paths(&["../outside.txt"])).unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
    }

    #[test]
    fn test_show_file_diff() {
        let fx = Fixture::new();
        fx.write("a.txt", "a\nb\nc\n");
        fx.commit_all("base");
        fx.write("a.txt", "a\nx\nc\n");

        let result = fx.tracker.show_file_diff("a.txt").unwrap();
        assert_eq!(result.stats.additions, 1);
        assert_eq!(result.stats.deletions, 1);
        assert_eq!(result.hunks[0].old_start, 2);
        assert_eq!(result.hunks[0].new_start, 2);
    }

    #[test]
    fn test_show_file_diff_new_and_deleted() {
        let fx = Fixture::new();
        fx.write("old.txt", "1\n2\n3\n");
        fx.commit_all("base");
        fx.write("new.txt", "x\ny\n");
        fx.remove("old.txt");

        let added = fx.tracker.show_file_diff("new.txt").unwrap();
        assert_eq!(added.stats.additions, 2);
        assert_eq!(added.stats.deletions, 0);

        let removed = fx.tracker.show_file_diff("old.txt").unwrap();
        assert_eq!(removed.stats.deletions, 3);
        assert_eq!(removed.stats.additions, 0);

        assert!(fx.tracker.show_file_diff("never.txt").unwrap_err().is_not_found());
    }

    #[test]
    fn test_show_file_diff_missing_blob_is_empty_old() {
        let fx = Fixture::new();
        fx.write("a.txt", "a\n");
        fx.commit_all("base");
        let hash = hash_content(b"a\n");
        fs::remove_file(fx.store.blob_path(&hash)).unwrap();

        let result = fx.tracker.show_file_diff("a.txt").unwrap();
        assert_eq!(result.stats.additions, 1);
        assert_eq!(result.stats.deletions, 0);
    }

    #[test]
    fn test_show_file_diff_surfaces_corruption() {
        let fx = Fixture::new();
        fx.write("a.txt", "a\n");
        fx.commit_all("base");
        let hash = hash_content(b"a\n");
        fs::write(fx.store.blob_path(&hash), b"tampered").unwrap();

        let err = fx.tracker.show_file_diff("a.txt").unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
    }

    #[test]
    fn test_save_and_load_are_idempotent() {
        let fx = Fixture::new();
        fx.write("a.txt", "a");
        fx.write("b.txt", "b");
        fx.tracker.gate(&paths(&["."])).unwrap();
        let before = fx.tracker.gated_changes();

        fx.tracker.save_gated_changes().unwrap();
        assert_eq!(fx.tracker.load_gated_changes().unwrap(), 2);
        fx.tracker.save_gated_changes().unwrap();

        assert_eq!(fx.tracker.gated_changes(), before);
        assert_eq!(fx.reopen().gated_changes(), before);
        assert_eq!(fx.kv.scan_prefix(keys::GATED).unwrap().len(), 2);
    }

    #[test]
    fn test_commit_clears_gated_and_links_parent() {
        let fx = Fixture::new();
        fx.write("a.txt", "one");
        let request = ChangeSetRequest::new("first").with_author("dev").with_tag("init");
        fx.tracker.gate(&paths(&["a.txt"])).unwrap();
        let first = fx.tracker.create_change_set(request).unwrap();

        assert!(first.verify());
        assert_eq!(first.parent_id, None);
        assert_eq!(first.author.as_deref(), Some("dev"));
        assert!(fx.tracker.gated_changes().is_empty());
        assert!(fx.tracker.status().unwrap().is_empty());
        assert_eq!(fx.tracker.get_change_set(first.id).unwrap(), first);
        assert_eq!(fx.tracker.head().unwrap(), Some(first.id));

        fx.write("a.txt", "two");
        let second = fx.commit_all("second");
        assert_eq!(second.parent_id, Some(first.id));

        let listed: Vec<Uuid> = fx
            .tracker
            .list_change_sets()
            .unwrap()
            .into_iter()
            .map(|cs| cs.id)
            .collect();
        assert_eq!(listed, vec![second.id, first.id]);

        let history: Vec<Uuid> = fx
            .tracker
            .history("a.txt")
            .unwrap()
            .into_iter()
            .map(|cs| cs.id)
            .collect();
        assert_eq!(history, vec![second.id, first.id]);
        assert!(fx.reopen().gated_changes().is_empty());
    }

    #[test]
    fn test_commit_without_changes() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.tracker.create_change_set_for("nothing"),
            Err(Error::NoChanges)
        ));
        assert!(fx.tracker.get_change_set(Uuid::new_v4()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_commit_delete_removes_file_state() {
        let fx = Fixture::new();
        fx.write("a.txt", "alpha");
        fx.commit_all("base");
        fx.remove("a.txt");
        fx.commit_all("remove");

        assert!(fx.tracker.status().unwrap().is_empty());
        assert!(fx.tracker.tracked().is_empty());
    }

    #[test]
    fn test_status_probe_never_persists() {
        let fx = Fixture::new();
        let empty = fx.tracker.create_change_set_for(STATUS_PROBE).unwrap();
        assert!(empty.changes.is_empty());

        fx.write("a.txt", "alpha");
        fx.tracker.gate(&paths(&["a.txt"])).unwrap();
        let probe = fx.tracker.create_change_set_for(STATUS_PROBE).unwrap();

        assert_eq!(probe.changes.len(), 1);
        assert_eq!(fx.tracker.gated_changes().len(), 1);
        assert!(fx.tracker.list_change_sets().unwrap().is_empty());
        assert_eq!(fx.tracker.head().unwrap(), None);
    }

    #[test]
    fn test_track_and_untrack() {
        let fx = Fixture::new();
        fx.write("a.txt", "alpha");
        fx.write("src/lib.rs", "lib");
        fx.commit_all("base");

        fx.tracker.untrack(&paths(&["a.txt"])).unwrap();
        assert_eq!(fx.tracker.tracked(), paths(&["src/lib.rs"]));
        let status = fx.tracker.status().unwrap();
        assert_eq!(summary(&status), vec![("a.txt".to_string(), ChangeType::Untracked)]);

        fx.tracker.track(&paths(&["a.txt", "missing.txt"])).unwrap();
        assert_eq!(fx.tracker.tracked(), paths(&["a.txt", "src/lib.rs"]));
        assert_eq!(fx.reopen().tracked(), paths(&["a.txt", "src/lib.rs"]));
    }

    #[test]
    fn test_tracked_missing_file_reports_delete() {
        let fx = Fixture::new();
        fx.write("draft.txt", "draft");
        fx.tracker.track(&paths(&["draft.txt"])).unwrap();
        fx.remove("draft.txt");

        let status = fx.tracker.status().unwrap();
        assert_eq!(summary(&status), vec![("draft.txt".to_string(), ChangeType::Delete)]);
        assert_eq!(status[0].old_hash, None);
    }

    #[test]
    fn test_apply_events() {
        let fx = Fixture::new();
        fx.write("a.txt", "a");
        fx.write("dir/x.txt", "x");
        fx.write("dir/y.txt", "y");

        fx.tracker
            .apply_events(&[
                PathEvent::Created("a.txt".into()),
                PathEvent::Created("dir".into()),
                PathEvent::Modified("ghost.txt".into()),
            ])
            .unwrap();
        assert_eq!(fx.tracker.tracked(), paths(&["a.txt", "dir/x.txt", "dir/y.txt"]));

        fs::rename(fx.dir.path().join("a.txt"), fx.dir.path().join("b.txt")).unwrap();
        fs::remove_dir_all(fx.dir.path().join("dir")).unwrap();
        fx.tracker
            .apply_events(&[
                PathEvent::Renamed {
                    from: "a.txt".into(),
                    to: "b.txt".into(),
                },
                PathEvent::Removed("dir".into()),
            ])
            .unwrap();
        assert_eq!(fx.tracker.tracked(), paths(&["b.txt"]));
        assert_eq!(fx.reopen().tracked(), paths(&["b.txt"]));
    }

    #[test]
    fn test_concurrent_gate_and_status() {
        let fx = Fixture::new();
        for i in 0..4 {
            fx.write(&format!("file{i}.txt"), &format!("content {i}"));
        }
        let tracker = Arc::new(fx.reopen());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    tracker.gate(&[format!("file{i}.txt")]).unwrap();
                    tracker.status().unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.gated_changes().len(), 4);
        let status = tracker.status().unwrap();
        assert!(status.iter().all(|c| c.gated));
    }
}
