//! Two-tier content-addressed page cache.
//!
//! The memory tier is a bounded LRU and is authoritative on read. The
//! optional disk tier is a SQLite file sharing the same key space; a disk hit
//! is promoted back into memory. Keys are SHA-256 digests of the normalized
//! URL plus the fetch options that can change a response, so one cache can
//! be shared by many crawl sessions.

use chrono::{DateTime, TimeDelta, Utc};
use lru::LruCache;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::result::PageFetchResult;

pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry bound for the memory tier.
    pub max_entries: usize,
    pub default_ttl: Duration,
    /// SQLite file backing the persistent tier, if any.
    pub disk_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl: Duration::from_secs(3600),
            disk_path: None,
        }
    }
}

impl CacheConfig {
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_disk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk_path = Some(path.into());
        self
    }
}

/// The parts of a request that feed the cache key besides the URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchKeyOptions {
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
    pub extract_content: bool,
}

/// Stable hex SHA-256 of the normalized URL and fetch options.
pub fn cache_key(normalized_url: &str, options: &FetchKeyOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_url.as_bytes());
    hasher.update([0u8]);
    hasher.update(options.user_agent.as_bytes());
    hasher.update([0u8]);
    for (name, value) in &options.headers {
        hasher.update(name.to_lowercase().as_bytes());
        hasher.update(b":");
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update([u8::from(options.extract_content)]);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.disk_hits
    }
}

#[derive(Default)]
struct CacheCounters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: PageFetchResult,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

struct DiskTier {
    conn: Mutex<Connection>,
}

impl DiskTier {
    fn open(path: &Path) -> CacheResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS page_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_page_cache_expires ON page_cache(expires_at);
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, key: &str) -> CacheResult<Option<(String, i64)>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT value, expires_at FROM page_cache WHERE key = ?1",
                params![key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    fn put(&self, key: &str, value: &str, expires_at: i64) -> CacheResult<()> {
        self.lock().execute(
            "INSERT OR REPLACE INTO page_cache (key, value, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, value, expires_at, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> CacheResult<usize> {
        Ok(self
            .lock()
            .execute("DELETE FROM page_cache WHERE key = ?1", params![key])?)
    }

    /// Delete expired rows, returning their keys.
    fn purge_expired(&self, now_ms: i64) -> CacheResult<Vec<String>> {
        let conn = self.lock();
        let keys = {
            let mut stmt = conn.prepare("SELECT key FROM page_cache WHERE expires_at <= ?1")?;
            let rows = stmt.query_map(params![now_ms], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()?
        };
        conn.execute(
            "DELETE FROM page_cache WHERE expires_at <= ?1",
            params![now_ms],
        )?;
        Ok(keys)
    }

    fn clear(&self) -> CacheResult<()> {
        self.lock().execute("DELETE FROM page_cache", [])?;
        Ok(())
    }

    fn len(&self) -> CacheResult<usize> {
        let count: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM page_cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

pub struct PageCache {
    config: CacheConfig,
    memory: Mutex<LruCache<String, CacheEntry>>,
    disk: Option<DiskTier>,
    counters: CacheCounters,
}

impl PageCache {
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        let capacity = NonZeroUsize::new(config.max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        let disk = match &config.disk_path {
            Some(path) => {
                debug!(path = %path.display(), "Opening persistent page cache");
                Some(DiskTier::open(path)?)
            }
            None => None,
        };

        Ok(Self {
            config,
            memory: Mutex::new(LruCache::new(capacity)),
            disk,
            counters: CacheCounters::default(),
        })
    }

    /// Memory-only cache with default settings.
    pub fn in_memory() -> Self {
        Self {
            config: CacheConfig::default(),
            memory: Mutex::new(LruCache::new(
                NonZeroUsize::new(CacheConfig::default().max_entries).unwrap_or(NonZeroUsize::MIN),
            )),
            disk: None,
            counters: CacheCounters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn has_disk_tier(&self) -> bool {
        self.disk.is_some()
    }

    /// Memory first, then disk with promotion. Expired entries are dropped on access.
    pub fn get(&self, key: &str) -> CacheResult<Option<PageFetchResult>> {
        let now = Utc::now();

        {
            let mut memory = self.lock_memory();
            let expired = match memory.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => true,
                None => false,
            };
            if expired {
                memory.pop(key);
            }
        }

        if let Some(disk) = &self.disk
            && let Some((raw, expires_ms)) = disk.get(key)?
        {
            if expires_ms <= now.timestamp_millis() {
                disk.remove(key)?;
            } else {
                let value: PageFetchResult = match serde_json::from_str(&raw) {
                    Ok(value) => value,
                    Err(source) => {
                        warn!(key = %key, error = %source, "Dropping corrupt cache entry");
                        disk.remove(key)?;
                        return Err(CacheError::Corrupt {
                            key: key.to_string(),
                            source,
                        });
                    }
                };
                let expires_at = DateTime::<Utc>::from_timestamp_millis(expires_ms).unwrap_or(now);
                self.insert_memory(key, value.clone(), expires_at);
                self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Promoted disk cache entry to memory");
                return Ok(Some(value));
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    /// Store in memory and, when enabled, on disk. `None` uses the configured TTL.
    ///
    /// The memory tier is written first; a disk failure is returned but the
    /// entry stays readable from memory.
    pub fn set(&self, key: &str, value: PageFetchResult, ttl: Option<Duration>) -> CacheResult<()> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let now = Utc::now();
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let raw = match &self.disk {
            Some(_) => Some(serde_json::to_string(&value).map_err(|source| {
                CacheError::Corrupt {
                    key: key.to_string(),
                    source,
                }
            })?),
            None => None,
        };

        self.insert_memory(key, value, expires_at);
        self.counters.writes.fetch_add(1, Ordering::Relaxed);

        if let (Some(disk), Some(raw)) = (&self.disk, raw) {
            disk.put(key, &raw, expires_at.timestamp_millis())?;
        }
        Ok(())
    }

    pub fn remove(&self, key: &str) -> CacheResult<bool> {
        let in_memory = self.lock_memory().pop(key).is_some();
        let on_disk = match &self.disk {
            Some(disk) => disk.remove(key)? > 0,
            None => false,
        };
        Ok(in_memory || on_disk)
    }

    /// Remove expired entries from both tiers, returning how many distinct
    /// keys were dropped.
    pub fn purge_expired(&self) -> CacheResult<usize> {
        let now = Utc::now();
        let mut removed: HashSet<String> = {
            let mut memory = self.lock_memory();
            let expired: Vec<String> = memory
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                memory.pop(key);
            }
            expired.into_iter().collect()
        };

        if let Some(disk) = &self.disk {
            removed.extend(disk.purge_expired(now.timestamp_millis())?);
        }
        Ok(removed.len())
    }

    pub fn clear(&self) -> CacheResult<()> {
        self.lock_memory().clear();
        if let Some(disk) = &self.disk {
            disk.clear()?;
        }
        Ok(())
    }

    /// Entries currently held in memory.
    pub fn len(&self) -> usize {
        self.lock_memory().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn disk_len(&self) -> CacheResult<usize> {
        match &self.disk {
            Some(disk) => disk.len(),
            None => Ok(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            memory_hits: c.memory_hits.load(Ordering::Relaxed),
            disk_hits: c.disk_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
        }
    }

    fn insert_memory(&self, key: &str, value: PageFetchResult, expires_at: DateTime<Utc>) {
        let evicted = self
            .lock_memory()
            .push(key.to_string(), CacheEntry { value, expires_at });
        if let Some((evicted_key, _)) = evicted
            && evicted_key != key
        {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn lock_memory(&self) -> std::sync::MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
