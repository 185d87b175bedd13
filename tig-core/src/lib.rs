//! # tig-core
//!
//! Core library for tig: a content-addressed blob store, a line diff engine
//! and the change tracker that stages ("gates") working-tree changes into
//! change sets.
//!
//! Everything here is synchronous. Callers on an async runtime should run
//! workspace operations on a blocking thread.

pub mod compression;
pub mod config;
pub mod diff;
pub mod error;
pub mod ignore;
pub mod models;
pub mod storage;
pub mod store;
pub mod tracker;
pub mod watcher;
pub mod workspace;

pub use config::{TigConfig, TrackingMode};
pub use diff::{DiffEngine, DiffResult, Hunk, Line, LineType};
pub use error::{Error, ErrorKind, Result};
pub use models::{Change, ChangeSet, ChangeSetRequest, ChangeType, FileState};
pub use storage::{KvStore, SqliteKv};
pub use store::{ContentMeta, ContentStore, StoreStats};
pub use tracker::{AutoTracker, LocalTracker, Tracker};
pub use workspace::Workspace;
