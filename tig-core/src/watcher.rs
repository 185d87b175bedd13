//! Debounced filesystem watching.
//!
//! The notify callback only normalizes raw events into [`PathEvent`]s and
//! forwards each debounced batch over a channel. A single consumer thread
//! hands the batches to the caller's handler, so the handler never runs on
//! notify's thread and batches are applied one at a time, in order.

use crate::error::{Error, Result};
use crate::ignore::IgnoreRules;
use crate::tracker::rel_string;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, DebouncedEvent, Debouncer, FileIdMap};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Span};

const CHANNEL_CAPACITY: usize = 100;

/// A filesystem change, with paths relative to the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathEvent {
    Created(String),
    Modified(String),
    Removed(String),
    Renamed { from: String, to: String },
}

pub struct FileWatcher {
    debouncer: Option<Debouncer<RecommendedWatcher, FileIdMap>>,
    consumer: Option<JoinHandle<()>>,
}

impl FileWatcher {
    /// Starts watching `root` recursively. `handler` receives every
    /// non-empty batch of events on a dedicated thread until the watcher is
    /// dropped.
    pub fn spawn<F>(root: &Path, ignore: IgnoreRules, debounce: Duration, span: &Span, mut handler: F) -> Result<Self>
    where
        F: FnMut(Vec<PathEvent>) + Send + 'static,
    {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let span = tracing::info_span!(parent: span, "watcher");
        let (tx, mut rx) = mpsc::channel::<Vec<PathEvent>>(CHANNEL_CAPACITY);

        let callback_root = root.clone();
        let callback_span = span.clone();
        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            let _enter = callback_span.enter();
            match result {
                Ok(events) => {
                    let batch = normalize(&callback_root, &ignore, &events);
                    if batch.is_empty() {
                        return;
                    }
                    if let Err(e) = tx.blocking_send(batch) {
                        error!("Failed to send event batch: {}", e);
                    }
                }
                Err(errors) => {
                    for e in errors {
                        error!("Watch error: {:?}", e);
                    }
                }
            }
        })?;

        debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;

        let consumer_span = span.clone();
        let consumer = std::thread::Builder::new()
            .name("tig-watcher".into())
            .spawn(move || {
                let _enter = consumer_span.enter();
                while let Some(batch) = rx.blocking_recv() {
                    debug!(events = batch.len(), "applying event batch");
                    handler(batch);
                }
                debug!("event channel closed");
            })
            .map_err(|e| Error::io("spawning watcher thread", &root, e))?;

        let _enter = span.enter();
        info!("File watcher started for {:?}", root);

        Ok(Self {
            debouncer: Some(debouncer),
            consumer: Some(consumer),
        })
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        // Stopping the debouncer drops the sender, which ends the consumer loop.
        if let Some(debouncer) = self.debouncer.take() {
            debouncer.stop();
        }
        if let Some(consumer) = self.consumer.take() {
            if consumer.join().is_err() {
                warn!("watcher consumer thread panicked");
            }
        }
    }
}

/// Converts debounced notify events into root-relative path events,
/// dropping anything outside the root or hidden by `ignore`.
pub fn normalize(root: &Path, ignore: &IgnoreRules, events: &[DebouncedEvent]) -> Vec<PathEvent> {
    let relative = |path: &PathBuf| -> Option<String> {
        let rel = path.strip_prefix(root).ok()?;
        if rel.as_os_str().is_empty() || ignore.is_ignored(rel) {
            return None;
        }
        Some(rel_string(rel))
    };

    let mut out = Vec::new();
    for event in events {
        let paths = &event.event.paths;
        match event.event.kind {
            EventKind::Create(_) => out.extend(paths.iter().filter_map(relative).map(PathEvent::Created)),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
                match (relative(&paths[0]), relative(&paths[1])) {
                    (Some(from), Some(to)) => out.push(PathEvent::Renamed { from, to }),
                    (Some(from), None) => out.push(PathEvent::Removed(from)),
                    (None, Some(to)) => out.push(PathEvent::Created(to)),
                    (None, None) => {}
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                out.extend(paths.iter().filter_map(relative).map(PathEvent::Removed))
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                out.extend(paths.iter().filter_map(relative).map(PathEvent::Created))
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                for path in paths {
                    if let Some(rel) = relative(path) {
                        out.push(if path.exists() {
                            PathEvent::Created(rel)
                        } else {
                            PathEvent::Removed(rel)
                        });
                    }
                }
            }
            EventKind::Modify(_) => out.extend(paths.iter().filter_map(relative).map(PathEvent::Modified)),
            EventKind::Remove(_) => out.extend(paths.iter().filter_map(relative).map(PathEvent::Removed)),
            _ => {}
        }
    }
    out
}
