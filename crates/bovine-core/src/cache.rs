//! Key/value cache abstraction and the in-memory backend.
//!
//! Two implementations share this capability set: [`MemoryCache`] and the
//! Redis-backed cache in [`crate::redis`]. They are interchangeable at
//! construction; callers hold an `Arc<dyn Cache>`.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Uniform key/value API with TTL.
///
/// A TTL of 0 means "no expiry": the entry persists until an explicit
/// delete. All operations are safe under arbitrary concurrent callers.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Look up a key. `Ok(None)` is a miss; expired entries are misses.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store a value under the backend's default TTL.
    async fn set(&self, key: &str, value: Bytes) -> Result<()>;

    /// Store a value with an explicit TTL in seconds (0 = no expiry).
    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl_secs: u64) -> Result<()>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Drop every entry.
    async fn clear(&self) -> Result<()>;
}

/// Key enumeration, needed by the reaper to scan forward mappings.
///
/// Patterns are Redis-style with a single trailing `*`; a pattern without
/// `*` matches exactly one key.
#[async_trait]
pub trait KeyScan: Send + Sync {
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
}

/// A cache that also supports key enumeration; what the registrar, the
/// redirects compiler, and the reaper operate on.
pub trait Store: Cache + KeyScan {}

impl<T: Cache + KeyScan> Store for T {}

struct Entry {
    data: Bytes,
    /// `None` = no expiry
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(data: Bytes, ttl: Duration) -> Self {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        Self { data, expires_at }
    }

    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

/// In-memory cache with TTL expiry and a background janitor sweep.
///
/// Entries past their deadline read as misses immediately; the janitor
/// merely reclaims their memory. The janitor runs at `max(1s, ttl/2)` and
/// is not started at all when the default TTL is 0.
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    default_ttl: Duration,
    janitor: CancellationToken,
}

impl MemoryCache {
    /// Create a cache whose `set` applies `default_ttl_secs` (0 = entries
    /// never expire and no janitor is spawned).
    pub fn new(default_ttl_secs: u64) -> Self {
        let entries: Arc<RwLock<HashMap<String, Entry>>> = Arc::new(RwLock::new(HashMap::new()));
        let janitor = CancellationToken::new();

        if default_ttl_secs > 0 {
            let sweep_every = Duration::from_secs((default_ttl_secs / 2).max(1));
            let entries = entries.clone();
            let cancel = janitor.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(sweep_every);
                // The first tick completes immediately; skip it.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            let mut map = entries.write().await;
                            map.retain(|_, entry| !entry.is_expired());
                        }
                    }
                }
            });
        }

        Self {
            entries,
            default_ttl: Duration::from_secs(default_ttl_secs),
            janitor,
        }
    }

    /// Stop the janitor task. Idempotent; also invoked on drop.
    pub fn close(&self) {
        self.janitor.cancel();
    }

    /// Number of live (unexpired) entries, for tests and diagnostics.
    pub async fn len(&self) -> usize {
        let map = self.entries.read().await;
        map.values().filter(|e| !e.is_expired()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        self.janitor.cancel();
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let map = self.entries.read().await;
        match map.get(key) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.data.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        let mut map = self.entries.write().await;
        map.insert(key.to_string(), Entry::new(value, self.default_ttl));
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl_secs: u64) -> Result<()> {
        let mut map = self.entries.write().await;
        map.insert(
            key.to_string(),
            Entry::new(value, Duration::from_secs(ttl_secs)),
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut map = self.entries.write().await;
        map.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut map = self.entries.write().await;
        map.clear();
        Ok(())
    }
}

#[async_trait]
impl KeyScan for MemoryCache {
    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let map = self.entries.read().await;
        let mut out: Vec<String> = match pattern.strip_suffix('*') {
            Some(prefix) => map
                .iter()
                .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired())
                .map(|(k, _)| k.clone())
                .collect(),
            None => map
                .get_key_value(pattern)
                .filter(|(_, e)| !e.is_expired())
                .map(|(k, _)| vec![k.clone()])
                .unwrap_or_default(),
        };
        out.sort();
        Ok(out)
    }
}
