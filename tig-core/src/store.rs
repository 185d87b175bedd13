//! Content-addressed blob store with deduplication and reference counting.
//!
//! Blobs live on disk at `<root>/<hash[..2]>/<hash[2..]>`; their metadata
//! (size, reference count, compression flag, timestamps) lives in the
//! key-value backend under `content:<hash>`. A bounded LRU cache holds
//! decompressed content; it is purely a performance aid and can be disabled.
//!
//! Operations on the same hash are serialized through a striped
//! reader/writer lock: `store` and `delete` take the stripe exclusively,
//! reads share it. Blob files are written before their metadata and
//! metadata is removed before the blob, so a reader holding the stripe never
//! sees one without the other.

use crate::compression::Compressor;
use crate::config::StoreConfig;
use crate::error::{Error, IoResultExt, Result};
use crate::models::{hash_content, is_valid_hash};
use crate::storage::{get_json, keys, put_json, KvStore};
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn, Span};
use uuid::Uuid;

const LOCK_STRIPES: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMeta {
    pub hash: String,
    pub size: i64,
    pub ref_count: u32,
    pub compressed: bool,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

/// Diagnostic view of a blob as it sits on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobInfo {
    pub hash: String,
    pub path: PathBuf,
    pub stored_size: u64,
    pub decoded_size: u64,
    /// Whether the bytes on disk carry the zstd frame magic.
    pub detected_compressed: bool,
    pub meta: Option<ContentMeta>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub objects: u64,
    pub logical_bytes: u64,
    pub references: u64,
    pub compressed_objects: u64,
}

pub struct ContentStore {
    root: PathBuf,
    kv: Arc<dyn KvStore>,
    cache: Option<Mutex<LruCache<String, Arc<Vec<u8>>>>>,
    compressor: Compressor,
    stripes: Vec<RwLock<()>>,
    span: Span,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>, kv: Arc<dyn KvStore>, config: &StoreConfig, span: &Span) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).with_path("creating content root", &root)?;

        let cache = NonZeroUsize::new(config.cache_capacity).map(|cap| Mutex::new(LruCache::new(cap)));

        Ok(Self {
            root,
            kv,
            cache,
            compressor: Compressor::new(config.compression.clone()),
            stripes: (0..LOCK_STRIPES).map(|_| RwLock::new(())).collect(),
            span: tracing::info_span!(parent: span, "content_store"),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores `content` and returns its hash.
    pub fn store(&self, content: &[u8]) -> Result<String> {
        self.store_inner(None, content)
    }

    /// Like [`store`](Self::store), with the source path used to decide
    /// whether compression is worthwhile.
    pub fn store_file(&self, path: &Path, content: &[u8]) -> Result<String> {
        self.store_inner(Some(path), content)
    }

    fn store_inner(&self, path: Option<&Path>, content: &[u8]) -> Result<String> {
        let _enter = self.span.enter();
        let hash = hash_content(content);
        let _guard = self.stripe(&hash).write();

        let meta_key = keys::content(&hash);
        if let Some(mut meta) = get_json::<ContentMeta>(self.kv.as_ref(), &meta_key)? {
            meta.ref_count = meta.ref_count.saturating_add(1);
            put_json(self.kv.as_ref(), &meta_key, &meta)?;
            debug!(hash = %hash, refs = meta.ref_count, "content already stored");
            return Ok(hash);
        }

        let blob_path = self.blob_path(&hash);
        let (bytes, compressed) = match self
            .compressor
            .encode(path, content)
            .with_path("compressing", path.unwrap_or(&blob_path))?
        {
            Some(encoded) => (encoded, true),
            None => (content.to_vec(), false),
        };
        self.write_blob(&blob_path, &bytes)?;

        let now = Utc::now();
        let meta = ContentMeta {
            hash: hash.clone(),
            size: content.len() as i64,
            ref_count: 1,
            compressed,
            created_at: now,
            accessed_at: now,
        };
        if let Err(e) = put_json(self.kv.as_ref(), &meta_key, &meta) {
            if let Err(cleanup) = std::fs::remove_file(&blob_path) {
                warn!(path = %blob_path.display(), error = %cleanup, "failed to remove orphaned blob");
            }
            return Err(e);
        }

        self.cache_put(&hash, content.to_vec());
        debug!(hash = %hash, size = content.len(), compressed, "stored new content");
        Ok(hash)
    }

    /// Reads the content for `hash`, verifying it against the hash.
    pub fn get(&self, hash: &str) -> Result<Vec<u8>> {
        let _enter = self.span.enter();
        validate(hash)?;

        if let Some(content) = self.cache_get(hash) {
            return Ok(content.as_ref().clone());
        }

        let _guard = self.stripe(hash).read();
        let meta_key = keys::content(hash);
        let mut meta: ContentMeta = get_json(self.kv.as_ref(), &meta_key)?
            .ok_or_else(|| Error::NotFound(format!("content {hash}")))?;

        let content = self.read_verified(hash, meta.compressed)?;

        meta.accessed_at = Utc::now();
        put_json(self.kv.as_ref(), &meta_key, &meta)?;
        self.cache_put(hash, content.clone());

        Ok(content)
    }

    /// Drops one reference; the blob and its metadata go away with the last.
    pub fn delete(&self, hash: &str) -> Result<()> {
        let _enter = self.span.enter();
        validate(hash)?;
        let _guard = self.stripe(hash).write();

        let meta_key = keys::content(hash);
        let mut meta: ContentMeta = get_json(self.kv.as_ref(), &meta_key)?
            .ok_or_else(|| Error::NotFound(format!("content {hash}")))?;

        if meta.ref_count > 1 {
            meta.ref_count -= 1;
            put_json(self.kv.as_ref(), &meta_key, &meta)?;
            debug!(hash = %hash, refs = meta.ref_count, "released content reference");
            return Ok(());
        }

        self.kv.delete(&meta_key)?;
        let blob_path = self.blob_path(hash);
        match std::fs::remove_file(&blob_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(hash = %hash, "blob file already missing on delete");
            }
            Err(e) => return Err(Error::io("removing blob", blob_path, e)),
        }
        self.cache_remove(hash);
        debug!(hash = %hash, "removed content");

        Ok(())
    }

    pub fn exists(&self, hash: &str) -> Result<bool> {
        validate(hash)?;
        let _guard = self.stripe(hash).read();
        self.kv.contains(&keys::content(hash))
    }

    /// Re-reads the blob from disk, bypassing the cache, and checks its hash.
    pub fn verify(&self, hash: &str) -> Result<()> {
        let _enter = self.span.enter();
        validate(hash)?;
        let _guard = self.stripe(hash).read();

        let meta: ContentMeta = get_json(self.kv.as_ref(), &keys::content(hash))?
            .ok_or_else(|| Error::NotFound(format!("content {hash}")))?;
        self.read_verified(hash, meta.compressed).map(|_| ())
    }

    pub fn metadata(&self, hash: &str) -> Result<ContentMeta> {
        validate(hash)?;
        get_json(self.kv.as_ref(), &keys::content(hash))?
            .ok_or_else(|| Error::NotFound(format!("content {hash}")))
    }

    /// Stores every item; on failure the items already stored are released
    /// again before the error is returned.
    pub fn store_batch<T: AsRef<[u8]>>(&self, contents: &[T]) -> Result<Vec<String>> {
        let mut hashes = Vec::with_capacity(contents.len());
        for (index, content) in contents.iter().enumerate() {
            match self.store(content.as_ref()) {
                Ok(hash) => hashes.push(hash),
                Err(e) => {
                    let _enter = self.span.enter();
                    warn!(index, error = %e, "batch store failed, rolling back");
                    for hash in &hashes {
                        if let Err(rollback) = self.delete(hash) {
                            warn!(hash = %hash, error = %rollback, "rollback delete failed");
                        }
                    }
                    return Err(Error::Batch {
                        index,
                        source: Box::new(e),
                    });
                }
            }
        }
        Ok(hashes)
    }

    pub fn get_batch<S: AsRef<str>>(&self, hashes: &[S]) -> Result<Vec<Vec<u8>>> {
        hashes
            .iter()
            .enumerate()
            .map(|(index, hash)| {
                self.get(hash.as_ref()).map_err(|e| Error::Batch {
                    index,
                    source: Box::new(e),
                })
            })
            .collect()
    }

    /// Describes the on-disk blob without trusting the metadata's
    /// compression flag.
    pub fn inspect(&self, hash: &str) -> Result<BlobInfo> {
        validate(hash)?;
        let _guard = self.stripe(hash).read();

        let path = self.blob_path(hash);
        let raw = read_blob(&path, hash)?;
        let (decoded, detected_compressed) = self
            .compressor
            .decode_auto(&raw)
            .with_path("decoding blob", &path)?;
        let meta = get_json(self.kv.as_ref(), &keys::content(hash))?;

        Ok(BlobInfo {
            hash: hash.to_string(),
            path,
            stored_size: raw.len() as u64,
            decoded_size: decoded.len() as u64,
            detected_compressed,
            meta,
        })
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for (_, value) in self.kv.scan_prefix(keys::CONTENT)? {
            let meta: ContentMeta = serde_json::from_slice(&value)?;
            stats.objects += 1;
            stats.logical_bytes += meta.size.max(0) as u64;
            stats.references += u64::from(meta.ref_count);
            if meta.compressed {
                stats.compressed_objects += 1;
            }
        }
        Ok(stats)
    }

    pub fn blob_path(&self, hash: &str) -> PathBuf {
        self.root.join(&hash[..2]).join(&hash[2..])
    }

    fn read_verified(&self, hash: &str, compressed: bool) -> Result<Vec<u8>> {
        let path = self.blob_path(hash);
        let raw = read_blob(&path, hash)?;
        let content = if compressed {
            self.compressor
                .decode(&raw)
                .with_path("decompressing blob", &path)?
        } else {
            raw
        };

        let actual = hash_content(&content);
        if actual != hash {
            warn!(expected = %hash, actual = %actual, "content integrity check failed");
            return Err(Error::Integrity {
                expected: hash.to_string(),
                actual,
            });
        }
        Ok(content)
    }

    fn write_blob(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
        std::fs::create_dir_all(dir).with_path("creating shard directory", dir)?;

        let tmp = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        std::fs::write(&tmp, bytes).with_path("writing blob", &tmp)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            if let Err(cleanup) = std::fs::remove_file(&tmp) {
                warn!(path = %tmp.display(), error = %cleanup, "failed to remove temporary blob");
            }
            return Err(Error::io("renaming blob", path, e));
        }
        Ok(())
    }

    fn stripe(&self, hash: &str) -> &RwLock<()> {
        let idx = u8::from_str_radix(&hash[..2], 16).map_or(0, usize::from);
        &self.stripes[idx % self.stripes.len()]
    }

    fn cache_get(&self, hash: &str) -> Option<Arc<Vec<u8>>> {
        self.cache.as_ref()?.lock().get(hash).cloned()
    }

    fn cache_put(&self, hash: &str, content: Vec<u8>) {
        if let Some(cache) = &self.cache {
            cache.lock().put(hash.to_string(), Arc::new(content));
        }
    }

    fn cache_remove(&self, hash: &str) {
        if let Some(cache) = &self.cache {
            cache.lock().pop(hash);
        }
    }
}

fn validate(hash: &str) -> Result<()> {
    if is_valid_hash(hash) {
        Ok(())
    } else {
        Err(Error::InvalidHash(hash.to_string()))
    }
}

fn read_blob(path: &Path, hash: &str) -> Result<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::NotFound(format!("blob file for {hash}")))
        }
        Err(e) => Err(Error::io("reading blob", path, e)),
    }
}
