//! Per-application cache of generated content.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use axum::body::Bytes;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::content::compress::Encoding;

/// Servable bytes for one source file.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub source: PathBuf,
    pub content_type: String,
    pub identity: Bytes,
    pub gzip: Option<Bytes>,
    pub brotli: Option<Bytes>,
    /// Source mtime captured before the source was read.
    pub source_mtime: Option<SystemTime>,
    /// Files pulled in while generating, with their mtimes.
    pub dependencies: Vec<(PathBuf, Option<SystemTime>)>,
}

impl CacheEntry {
    /// Bytes for `encoding`, falling back to identity.
    pub fn payload(&self, encoding: Encoding) -> (Encoding, &Bytes) {
        match encoding {
            Encoding::Brotli => match &self.brotli {
                Some(bytes) => (Encoding::Brotli, bytes),
                None => (Encoding::Identity, &self.identity),
            },
            Encoding::Gzip => match &self.gzip {
                Some(bytes) => (Encoding::Gzip, bytes),
                None => (Encoding::Identity, &self.identity),
            },
            Encoding::Identity => (Encoding::Identity, &self.identity),
        }
    }

    /// True while the source and every dependency keep their captured mtimes.
    pub async fn is_fresh(&self) -> bool {
        if modified(&self.source).await != self.source_mtime {
            return false;
        }
        for (path, mtime) in &self.dependencies {
            if modified(path).await != *mtime {
                tracing::debug!(dependency = %path.display(), "dependency changed");
                return false;
            }
        }
        true
    }
}

pub(crate) async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

/// Entries keyed by absolute source path, plus one regeneration lock per path.
#[derive(Debug, Default)]
pub struct ContentCache {
    entries: DashMap<PathBuf, Arc<CacheEntry>>,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
    regenerations: AtomicU64,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<Arc<CacheEntry>> {
        self.entries.get(path).map(|entry| Arc::clone(entry.value()))
    }

    pub fn insert(&self, entry: CacheEntry) -> Arc<CacheEntry> {
        let entry = Arc::new(entry);
        self.entries.insert(entry.source.clone(), Arc::clone(&entry));
        entry
    }

    /// Lock held while regenerating `path`, so concurrent misses generate once.
    pub fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(path.to_path_buf()).or_default().value())
    }

    pub fn invalidate(&self, path: &Path) {
        self.entries.remove(path);
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.locks.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How many times content was generated since startup.
    pub fn regenerations(&self) -> u64 {
        self.regenerations.load(Ordering::Relaxed)
    }

    pub(crate) fn record_regeneration(&self) {
        self.regenerations.fetch_add(1, Ordering::Relaxed);
    }
}
