use super::{LocalTracker, Tracker};
use crate::diff::DiffResult;
use crate::error::Result;
use crate::models::{Change, ChangeSet, ChangeSetRequest};
use crate::watcher::FileWatcher;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, Span};

/// Tracker that keeps the tracked set in step with the filesystem.
///
/// Every non-ignored file is tracked on startup; afterwards the watcher's
/// consumer thread applies create, write, rename and remove events to the
/// wrapped [`LocalTracker`]. All other operations delegate to it unchanged.
pub struct AutoTracker {
    inner: Arc<LocalTracker>,
    _watcher: FileWatcher,
    span: Span,
}

impl AutoTracker {
    pub fn new(inner: Arc<LocalTracker>, debounce: Duration, span: &Span) -> Result<Self> {
        let span = tracing::info_span!(parent: span, "auto_tracker");

        {
            let _enter = span.enter();
            inner.track(&[".".to_string()])?;
            info!(tracked = inner.tracked().len(), "initial tracking complete");
        }

        let consumer = Arc::clone(&inner);
        let watcher = FileWatcher::spawn(
            inner.root(),
            inner.ignore_rules().clone(),
            debounce,
            &span,
            move |events| {
                if let Err(e) = consumer.apply_events(&events) {
                    error!("Error applying file events: {}", e);
                }
            },
        )?;

        Ok(Self {
            inner,
            _watcher: watcher,
            span,
        })
    }

    pub fn local(&self) -> &Arc<LocalTracker> {
        &self.inner
    }
}

impl Tracker for AutoTracker {
    fn track(&self, paths: &[String]) -> Result<()> {
        let _enter = self.span.enter();
        debug!(count = paths.len(), "track is automatic, ignoring explicit request");
        Ok(())
    }

    fn untrack(&self, paths: &[String]) -> Result<()> {
        self.inner.untrack(paths)
    }

    fn status(&self) -> Result<Vec<Change>> {
        self.inner.status()
    }

    fn gate(&self, paths: &[String]) -> Result<Vec<String>> {
        self.inner.gate(paths)
    }

    fn ungate(&self, paths: &[String]) -> Result<Vec<String>> {
        self.inner.ungate(paths)
    }

    fn show_file_diff(&self, path: &str) -> Result<DiffResult> {
        self.inner.show_file_diff(path)
    }

    fn create_change_set(&self, request: ChangeSetRequest) -> Result<ChangeSet> {
        self.inner.create_change_set(request)
    }

    fn cleanup_gated_changes(&self) -> Result<Vec<String>> {
        self.inner.cleanup_gated_changes()
    }

    fn gated_change(&self, path: &str) -> Result<Option<Change>> {
        self.inner.gated_change(path)
    }

    fn gated_changes(&self) -> Vec<Change> {
        self.inner.gated_changes()
    }
}
