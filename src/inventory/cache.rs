//! Server list caching.
//!
//! The cache stores the unfiltered server list of an inventory source under a
//! key derived from the source path. Whether it is read, refreshed or ignored
//! is decided by [`resolve_servers`]:
//!
//! | `cache` option | `use_cache` | behavior                               |
//! |----------------|-------------|----------------------------------------|
//! | true           | true        | read; on a miss fetch and store        |
//! | true           | false       | always fetch and store (refresh)       |
//! | false          | any         | always fetch, never store              |

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use sha1::{Digest, Sha1};

use super::config::PLUGIN_NAMES;
use crate::error::{Error, Result};
use crate::server::{ServerRecord, ServerSource};

/// Storage for fetched server lists.
pub trait ServerCache: fmt::Debug {
    /// Look up a server list; expired entries are misses
    fn get(&mut self, key: &str) -> Result<Option<Vec<ServerRecord>>>;

    /// Store a server list
    fn set(&mut self, key: &str, servers: &[ServerRecord]) -> Result<()>;

    /// Drop an entry, returning whether one was present
    fn remove(&mut self, key: &str) -> Result<bool>;
}

/// Cache key for an inventory source path.
///
/// The key is the plugin name followed by short SHA-1 digests of the plugin
/// name and of the path, so two sources never share an entry.
pub fn cache_key(path: &str) -> String {
    let plugin = PLUGIN_NAMES[1];
    let plugin_digest = format!("{:x}", Sha1::digest(plugin.as_bytes()));
    let path_digest = format!("{:x}", Sha1::digest(path.as_bytes()));
    format!("{}_{}s_{}", plugin, &plugin_digest[..5], &path_digest[..5])
}

/// Fetch servers from `source`, going through `cache` as configured.
pub fn resolve_servers(
    source: &dyn ServerSource,
    cache: &mut dyn ServerCache,
    key: &str,
    cache_enabled: bool,
    use_cache: bool,
) -> Result<Vec<ServerRecord>> {
    let attempt_to_read = cache_enabled && use_cache;
    let mut needs_update = cache_enabled && !use_cache;

    if attempt_to_read {
        match cache.get(key)? {
            Some(servers) => {
                tracing::debug!(key, count = servers.len(), "server cache hit");
                return Ok(servers);
            }
            None => {
                tracing::debug!(key, "server cache miss");
                needs_update = true;
            }
        }
    }

    let servers = source.fetch_servers()?;

    if needs_update {
        tracing::debug!(key, count = servers.len(), "updating server cache");
        cache.set(key, &servers)?;
    }

    Ok(servers)
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    servers: Vec<ServerRecord>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process cache with an optional time to live.
#[derive(Debug, Clone, Default)]
pub struct MemoryServerCache {
    entries: HashMap<String, MemoryEntry>,
    ttl: Option<Duration>,
}

impl MemoryServerCache {
    /// Create a cache whose entries never expire
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache whose entries expire after `ttl`
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: Some(ttl),
        }
    }

    /// Number of stored entries, including expired ones
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ServerCache for MemoryServerCache {
    fn get(&mut self, key: &str) -> Result<Option<Vec<ServerRecord>>> {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired() => {
                self.entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.servers.clone())),
            None => Ok(None),
        }
    }

    fn set(&mut self, key: &str, servers: &[ServerRecord]) -> Result<()> {
        let entry = MemoryEntry {
            servers: servers.to_vec(),
            expires_at: self.ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }
}

/// One JSON file per key under a directory.
///
/// Entries older than the timeout (by modification time) are misses and get
/// deleted. A zero timeout never expires.
#[derive(Debug, Clone)]
pub struct JsonFileCache {
    dir: PathBuf,
    timeout: Duration,
}

impl JsonFileCache {
    /// Create a file cache rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
        }
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{}.json", safe_key))
    }

    fn is_expired(&self, path: &Path) -> Result<bool> {
        if self.timeout.is_zero() {
            return Ok(false);
        }
        let modified = std::fs::metadata(path)?.modified()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        Ok(age > self.timeout)
    }
}

impl ServerCache for JsonFileCache {
    fn get(&mut self, key: &str) -> Result<Option<Vec<ServerRecord>>> {
        let path = self.entry_path(key);
        if !path.is_file() {
            return Ok(None);
        }

        if self.is_expired(&path)? {
            tracing::debug!(path = %path.display(), "removing expired cache file");
            std::fs::remove_file(&path)?;
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&content) {
            Ok(servers) => Ok(Some(servers)),
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring unreadable cache file: {}", e);
                Ok(None)
            }
        }
    }

    fn set(&mut self, key: &str, servers: &[ServerRecord]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(servers)?;
        std::fs::write(self.entry_path(key), json).map_err(Error::from)
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    struct CountingSource {
        servers: Vec<ServerRecord>,
        calls: Cell<usize>,
    }

    impl CountingSource {
        fn new() -> Self {
            Self {
                servers: vec![ServerRecord::new("u1", "node1", "de/fra", "active")],
                calls: Cell::new(0),
            }
        }
    }

    impl ServerSource for CountingSource {
        fn fetch_servers(&self) -> Result<Vec<ServerRecord>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.servers.clone())
        }
    }

    #[test]
    fn test_cache_key_is_stable_per_path() {
        let a = cache_key("/etc/ansible/prod.gs_inventory.yml");
        let b = cache_key("/etc/ansible/prod.gs_inventory.yml");
        let c = cache_key("/etc/ansible/dev.gs_inventory.yml");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("bitnik.gridscale.gs_inventory_"));
        // name + "_" + 5 hex + "s_" + 5 hex
        assert_eq!(a.len(), "bitnik.gridscale.gs_inventory_".len() + 12);
    }

    #[test]
    fn test_resolve_reads_then_hits_cache() {
        let source = CountingSource::new();
        let mut cache = MemoryServerCache::new();

        resolve_servers(&source, &mut cache, "k", true, true).unwrap();
        let servers = resolve_servers(&source, &mut cache, "k", true, true).unwrap();

        assert_eq!(servers.len(), 1);
        assert_eq!(source.calls.get(), 1);
    }

    #[test]
    fn test_resolve_refresh_always_fetches() {
        let source = CountingSource::new();
        let mut cache = MemoryServerCache::new();

        resolve_servers(&source, &mut cache, "k", true, false).unwrap();
        resolve_servers(&source, &mut cache, "k", true, false).unwrap();

        assert_eq!(source.calls.get(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_resolve_disabled_never_writes() {
        let source = CountingSource::new();
        let mut cache = MemoryServerCache::new();

        resolve_servers(&source, &mut cache, "k", false, true).unwrap();
        resolve_servers(&source, &mut cache, "k", false, false).unwrap();

        assert_eq!(source.calls.get(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_memory_cache_ttl() {
        let mut cache = MemoryServerCache::with_ttl(Duration::ZERO);
        cache.set("k", &[]).unwrap();
        assert!(cache.get("k").unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_json_file_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = JsonFileCache::new(dir.path(), Duration::from_secs(3600));
        let servers = vec![ServerRecord::new("u1", "node1", "de/fra", "active").with_public_ip("1.2.3.4")];

        assert!(cache.get("k").unwrap().is_none());
        cache.set("k", &servers).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(servers));

        assert!(cache.remove("k").unwrap());
        assert!(!cache.remove("k").unwrap());
    }

    #[test]
    fn test_json_file_cache_sanitizes_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = JsonFileCache::new(dir.path(), Duration::ZERO);
        cache.set("a/b:c", &[]).unwrap();
        assert!(dir.path().join("a_b_c.json").is_file());
    }

    #[test]
    fn test_json_file_cache_ignores_garbage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("k.json"), "not json").unwrap();
        let mut cache = JsonFileCache::new(dir.path(), Duration::ZERO);
        assert!(cache.get("k").unwrap().is_none());
    }
}
