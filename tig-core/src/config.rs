//! Repository configuration, read from `.tig/config.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.

use crate::error::{Error, IoResultExt, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TigConfig {
    pub store: StoreConfig,
    pub diff: DiffConfig,
    pub workspace: WorkspaceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Number of blobs kept in the in-memory cache. Zero disables caching.
    pub cache_capacity: usize,
    pub compression: CompressionOptions,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
            compression: CompressionOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionOptions {
    pub enabled: bool,
    /// Content smaller than this is stored raw.
    pub min_size: usize,
    /// zstd level.
    pub level: i32,
    /// Above this size the streaming encoder/decoder is used.
    pub streaming_threshold: usize,
    /// Extensions (with leading dot, lowercase) of already-compressed formats.
    pub skip_extensions: Vec<String>,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: 1024,
            level: 3,
            streaming_threshold: 50 * 1024 * 1024,
            skip_extensions: [
                ".zip", ".gz", ".zst", ".xz", ".bz2", ".png", ".jpg", ".jpeg", ".gif", ".webp",
                ".mp3", ".mp4", ".avi", ".mkv", ".pdf", ".docx", ".xlsx",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    pub context_lines: usize,
    /// A hunk is closed once it holds this many changed lines.
    pub max_hunk_lines: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            context_lines: 3,
            max_hunk_lines: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    #[default]
    Manual,
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub mode: TrackingMode,
    /// Extra path components to ignore, on top of the built-in list.
    pub ignore: Vec<String>,
    pub debounce_ms: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            mode: TrackingMode::Manual,
            ignore: Vec::new(),
            debounce_ms: 500,
        }
    }
}

impl TigConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_path("reading config", path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Loads `<tig_dir>/config.toml`, falling back to defaults when absent.
    pub fn load_or_default(tig_dir: &Path) -> Result<Self> {
        let path = tig_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}
