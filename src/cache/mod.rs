// src/cache/mod.rs

//! Content-addressable build cache
//!
//! Stores post-build source trees keyed by a digest over the recipe body
//! and its (sorted) source list, so the key is invariant under source
//! reordering. Entries are compressed tar archives next to a TOML index;
//! the index is the single mutation point and is rewritten atomically on
//! every change. Eviction is LRU down to 80% of the configured maximum.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::compression::{pack_dir, unpack_into, CompressionFormat};
use crate::error::{Error, Result};
use crate::hash::{Hasher, HashAlgorithm};

/// Fraction of `max_size` eviction shrinks the store down to
const EVICTION_WATERMARK: f64 = 0.80;

/// Index file name inside the cache directory
const INDEX_FILE: &str = "index.toml";

/// Configuration for the build cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory for cached archives and the index
    pub cache_dir: PathBuf,
    /// Maximum total size of backing archives in bytes
    pub max_size: u64,
    /// Compression for stored archives
    pub compression: CompressionFormat,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("/var/cache/pkgforge/builds"),
            max_size: 10 * 1024 * 1024 * 1024, // 10 GiB
            compression: CompressionFormat::Zstd,
        }
    }
}

/// One cached build, as recorded in the index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// 64-hex-character cache key
    pub key: String,
    /// Archive path relative to the cache directory
    pub path: String,
    /// Archive size in bytes
    pub size: u64,
    /// Last access, seconds since epoch
    pub timestamp: u64,
    pub access_count: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    #[serde(default)]
    entries: Vec<CacheEntry>,
}

impl CacheIndex {
    fn current_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    fn find_mut(&mut self, key: &str) -> Option<&mut CacheEntry> {
        self.entries.iter_mut().find(|e| e.key == key)
    }
}

/// Build cache over one directory; operations are serialized in-process.
#[derive(Debug)]
pub struct BuildCache {
    config: CacheConfig,
    index: Mutex<CacheIndex>,
}

/// Compute the cache key for a recipe body and its source list.
///
/// The digest covers the body bytes, then the source references in
/// lexicographic order, making the key order-insensitive.
pub fn cache_key(recipe_body: &str, sources: &[String]) -> String {
    let mut sorted: Vec<&String> = sources.iter().collect();
    sorted.sort();

    let mut hasher = Hasher::new(HashAlgorithm::Sha256);
    hasher.update(recipe_body.as_bytes());
    for source in sorted {
        hasher.update(source.as_bytes());
    }
    hasher.finalize()
}

impl BuildCache {
    /// Open (or initialize) a cache at the configured directory.
    pub fn new(config: CacheConfig) -> Result<Self> {
        fs::create_dir_all(&config.cache_dir)?;

        let index_path = config.cache_dir.join(INDEX_FILE);
        let index = if index_path.is_file() {
            let text = fs::read_to_string(&index_path)?;
            match toml::from_str::<CacheIndex>(&text) {
                Ok(index) => index,
                Err(e) => {
                    warn!("cache index unreadable, starting fresh: {}", e);
                    CacheIndex::default()
                }
            }
        } else {
            CacheIndex::default()
        };

        debug!(
            "cache opened: {} entries, {} bytes",
            index.entries.len(),
            index.current_size()
        );

        Ok(Self {
            config,
            index: Mutex::new(index),
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(CacheConfig::default())
    }

    fn archive_name(&self, key: &str) -> String {
        format!("{}.tar.{}", key, self.config.compression.suffix())
    }

    /// Look up a cached build.
    ///
    /// A hit bumps the entry's last-access timestamp and access count and
    /// returns the archive path. An index entry whose backing file is gone
    /// is dropped and reported as a miss.
    pub fn lookup(&self, key: &str) -> Result<Option<PathBuf>> {
        let mut index = self.index.lock().expect("cache index poisoned");

        let archive = match index.find_mut(key) {
            Some(entry) => {
                let archive = self.config.cache_dir.join(&entry.path);
                if archive.is_file() {
                    entry.timestamp = now_epoch();
                    entry.access_count += 1;
                    Some(archive)
                } else {
                    warn!("cache entry {} lost its backing file", &key[..16]);
                    None
                }
            }
            None => {
                debug!("cache miss: {}", &key[..16.min(key.len())]);
                return Ok(None);
            }
        };

        match archive {
            Some(archive) => {
                self.persist(&index)?;
                info!("cache hit: {}", &key[..16]);
                Ok(Some(archive))
            }
            None => {
                index.entries.retain(|e| e.key != key);
                self.persist(&index)?;
                Ok(None)
            }
        }
    }

    /// Compress `source_dir` into the store under `key`.
    ///
    /// An existing entry for the same key is replaced (last writer wins).
    pub fn store(&self, key: &str, source_dir: &Path) -> Result<PathBuf> {
        let name = self.archive_name(key);
        let archive = self.config.cache_dir.join(&name);

        // Pack into a unique temp file and rename over, so two pipelines
        // storing the same key cannot interleave writes; the last rename
        // wins and the loser's bytes are discarded
        let tmp = tempfile::Builder::new()
            .prefix(&format!("{}.", &key[..16.min(key.len())]))
            .suffix(".tmp")
            .tempfile_in(&self.config.cache_dir)?
            .into_temp_path();
        let size = pack_dir(source_dir, &tmp, self.config.compression)?;
        tmp.persist(&archive)
            .map_err(|e| Error::CacheCorruption(format!("failed to place archive: {e}")))?;

        let mut index = self.index.lock().expect("cache index poisoned");
        index.entries.retain(|e| e.key != key);
        index.entries.push(CacheEntry {
            key: key.to_string(),
            path: name,
            size,
            timestamp: now_epoch(),
            access_count: 1,
        });

        info!("cached build {} ({} bytes)", &key[..16], size);

        self.evict_if_needed(&mut index);
        self.persist(&index)?;

        Ok(archive)
    }

    /// Expand a cached archive into a destination directory.
    pub fn extract(&self, archive: &Path, destination: &Path) -> Result<()> {
        fs::create_dir_all(destination)?;
        unpack_into(archive, destination).map_err(|e| {
            Error::CacheCorruption(format!(
                "failed to extract {}: {}",
                archive.display(),
                e
            ))
        })
    }

    /// Evict least-recently-used entries until the store is at or below
    /// 80% of `max_size`. A store already within `max_size` is untouched.
    fn evict_if_needed(&self, index: &mut CacheIndex) {
        let mut current = index.current_size();
        if current <= self.config.max_size {
            return;
        }

        let target = (self.config.max_size as f64 * EVICTION_WATERMARK) as u64;
        index.entries.sort_by_key(|e| e.timestamp);

        let mut evicted = Vec::new();
        let mut kept = Vec::new();
        for entry in index.entries.drain(..) {
            if current > target {
                let path = self.config.cache_dir.join(&entry.path);
                debug!("evicting {} ({} bytes)", &entry.key[..16], entry.size);
                let _ = fs::remove_file(path);
                current = current.saturating_sub(entry.size);
                evicted.push(entry.key);
            } else {
                kept.push(entry);
            }
        }
        index.entries = kept;

        info!(
            "evicted {} cache entries, {} bytes remain",
            evicted.len(),
            current
        );
    }

    /// Rewrite the index atomically: write to a temp file, rename over.
    fn persist(&self, index: &CacheIndex) -> Result<()> {
        let text = toml::to_string(index)
            .map_err(|e| Error::CacheCorruption(format!("index serialization: {e}")))?;

        let tmp = self.config.cache_dir.join(format!("{INDEX_FILE}.tmp"));
        fs::write(&tmp, text)?;
        fs::rename(&tmp, self.config.cache_dir.join(INDEX_FILE))?;
        Ok(())
    }

    /// Remove every entry and backing archive.
    pub fn clear(&self) -> Result<u64> {
        let mut index = self.index.lock().expect("cache index poisoned");
        let mut removed = 0u64;
        for entry in index.entries.drain(..) {
            let _ = fs::remove_file(self.config.cache_dir.join(&entry.path));
            removed += 1;
        }
        self.persist(&index)?;
        info!("cleared {} cache entries", removed);
        Ok(removed)
    }

    pub fn entry_count(&self) -> usize {
        self.index.lock().expect("cache index poisoned").entries.len()
    }

    pub fn current_size(&self) -> u64 {
        self.index
            .lock()
            .expect("cache index poisoned")
            .current_size()
    }

    /// Access statistics for one key, for reporting and tests
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.index
            .lock()
            .expect("cache index poisoned")
            .entries
            .iter()
            .find(|e| e.key == key)
            .cloned()
    }
}

fn now_epoch() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_cache(dir: &Path, max_size: u64) -> BuildCache {
        BuildCache::new(CacheConfig {
            cache_dir: dir.to_path_buf(),
            max_size,
            compression: CompressionFormat::Zstd,
        })
        .unwrap()
    }

    fn source_tree(root: &Path, stamp: &str) -> PathBuf {
        let dir = root.join(format!("src-{stamp}"));
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("main.c"), format!("// {stamp}\nint main(){{}}")).unwrap();
        fs::write(dir.join("sub/util.c"), "void util(void) {}").unwrap();
        dir
    }

    #[test]
    fn test_key_is_order_insensitive() {
        let body = "name=hello\nversion=1.0.0\n";
        let forward = vec!["a.c".to_string(), "b.c".to_string(), "c.c".to_string()];
        let shuffled = vec!["c.c".to_string(), "a.c".to_string(), "b.c".to_string()];

        assert_eq!(cache_key(body, &forward), cache_key(body, &shuffled));
        assert_eq!(cache_key(body, &forward).len(), 64);
    }

    #[test]
    fn test_key_depends_on_body_and_sources() {
        let sources = vec!["a.c".to_string()];
        let k1 = cache_key("body one", &sources);
        let k2 = cache_key("body two", &sources);
        assert_ne!(k1, k2);

        let k3 = cache_key("body one", &["b.c".to_string()]);
        assert_ne!(k1, k3);
    }

    #[test]
    fn test_store_then_lookup_and_extract() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(&temp.path().join("cache"), u64::MAX);
        let tree = source_tree(temp.path(), "a");

        let key = cache_key("recipe body", &["main.c".to_string()]);
        cache.store(&key, &tree).unwrap();

        let hit = cache.lookup(&key).unwrap().expect("stored entry must hit");
        let dest = temp.path().join("restored");
        cache.extract(&hit, &dest).unwrap();

        // Extraction reproduces the stored tree
        assert_eq!(
            fs::read(dest.join("main.c")).unwrap(),
            fs::read(tree.join("main.c")).unwrap()
        );
        assert_eq!(
            fs::read(dest.join("sub/util.c")).unwrap(),
            fs::read(tree.join("sub/util.c")).unwrap()
        );
    }

    #[test]
    fn test_miss_on_unknown_key() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(temp.path(), u64::MAX);
        assert!(cache.lookup(&"0".repeat(64)).unwrap().is_none());
    }

    #[test]
    fn test_lookup_bumps_access_stats() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(&temp.path().join("cache"), u64::MAX);
        let tree = source_tree(temp.path(), "a");

        let key = cache_key("body", &[]);
        cache.store(&key, &tree).unwrap();
        assert_eq!(cache.entry(&key).unwrap().access_count, 1);

        cache.lookup(&key).unwrap();
        cache.lookup(&key).unwrap();
        assert_eq!(cache.entry(&key).unwrap().access_count, 3);
    }

    #[test]
    fn test_missing_backing_file_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(&temp.path().join("cache"), u64::MAX);
        let tree = source_tree(temp.path(), "a");

        let key = cache_key("body", &[]);
        let archive = cache.store(&key, &tree).unwrap();
        fs::remove_file(archive).unwrap();

        assert!(cache.lookup(&key).unwrap().is_none());
        // The stale entry is dropped from the index
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn test_index_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let cache_dir = temp.path().join("cache");
        let tree = source_tree(temp.path(), "a");
        let key = cache_key("body", &[]);

        {
            let cache = test_cache(&cache_dir, u64::MAX);
            cache.store(&key, &tree).unwrap();
        }

        let cache = test_cache(&cache_dir, u64::MAX);
        assert_eq!(cache.entry_count(), 1);
        assert!(cache.lookup(&key).unwrap().is_some());
    }

    #[test]
    fn test_corrupt_index_starts_fresh() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path()).unwrap();
        fs::write(temp.path().join(INDEX_FILE), "not [ valid toml").unwrap();

        let cache = test_cache(temp.path(), u64::MAX);
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn test_eviction_reaches_watermark() {
        let temp = TempDir::new().unwrap();
        let cache_dir = temp.path().join("cache");

        // First, measure one archive's size so the limit is meaningful
        let probe = test_cache(&cache_dir, u64::MAX);
        let tree = source_tree(temp.path(), "probe");
        let key = cache_key("probe", &[]);
        probe.store(&key, &tree).unwrap();
        let unit = probe.entry(&key).unwrap().size;
        probe.clear().unwrap();
        drop(probe);

        // Allow roughly three units; storing five must evict down to 80%
        let cache = test_cache(&cache_dir, unit * 3);
        for i in 0..5 {
            let tree = source_tree(temp.path(), &format!("e{i}"));
            let key = cache_key(&format!("body {i}"), &[]);
            cache.store(&key, &tree).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        // Whenever eviction ran it stopped at the 80% watermark, so the
        // store can never exceed its configured maximum
        assert!(
            cache.current_size() <= unit * 3,
            "size {} exceeds limit {}",
            cache.current_size(),
            unit * 3
        );
        assert!(cache.entry_count() < 5);

        // Evicted backing files are gone from disk
        let archives = fs::read_dir(&cache_dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tar.zst")
            })
            .count();
        assert_eq!(archives, cache.entry_count());
    }

    #[test]
    fn test_eviction_is_lru() {
        let temp = TempDir::new().unwrap();
        let cache_dir = temp.path().join("cache");

        let probe = test_cache(&cache_dir, u64::MAX);
        let tree = source_tree(temp.path(), "probe");
        let probe_key = cache_key("probe", &[]);
        probe.store(&probe_key, &tree).unwrap();
        let unit = probe.entry(&probe_key).unwrap().size;
        probe.clear().unwrap();
        drop(probe);

        // Room for three entries (plus slack for small size jitter); the
        // fourth store overflows
        let cache = test_cache(&cache_dir, unit * 3 + unit / 2);
        let tick = std::time::Duration::from_millis(1100);

        let keys: Vec<String> = ["a", "b", "c", "d"]
            .iter()
            .map(|s| cache_key(s, &[]))
            .collect();

        cache.store(&keys[0], &source_tree(temp.path(), "a")).unwrap();
        std::thread::sleep(tick);
        cache.store(&keys[1], &source_tree(temp.path(), "b")).unwrap();
        std::thread::sleep(tick);
        cache.store(&keys[2], &source_tree(temp.path(), "c")).unwrap();

        // Keep "a" warm, then overflow the store
        std::thread::sleep(tick);
        cache.lookup(&keys[0]).unwrap();
        std::thread::sleep(tick);
        cache.store(&keys[3], &source_tree(temp.path(), "d")).unwrap();

        // "b" and "c" were least recently used; "a" was touched last
        assert!(cache.entry(&keys[0]).is_some());
        assert!(cache.entry(&keys[1]).is_none());
        assert!(cache.entry(&keys[2]).is_none());
        assert!(cache.entry(&keys[3]).is_some());
    }

    #[test]
    fn test_store_same_key_replaces() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(&temp.path().join("cache"), u64::MAX);
        let key = cache_key("body", &[]);

        cache
            .store(&key, &source_tree(temp.path(), "one"))
            .unwrap();
        cache
            .store(&key, &source_tree(temp.path(), "two"))
            .unwrap();

        assert_eq!(cache.entry_count(), 1);

        let hit = cache.lookup(&key).unwrap().unwrap();
        let dest = temp.path().join("restored");
        cache.extract(&hit, &dest).unwrap();
        let content = fs::read_to_string(dest.join("main.c")).unwrap();
        assert!(content.contains("two"));
    }

    #[test]
    fn test_clear() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(&temp.path().join("cache"), u64::MAX);
        cache
            .store(&cache_key("a", &[]), &source_tree(temp.path(), "a"))
            .unwrap();
        cache
            .store(&cache_key("b", &[]), &source_tree(temp.path(), "b"))
            .unwrap();

        assert_eq!(cache.clear().unwrap(), 2);
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.current_size(), 0);
    }
}
