//! Key/value cache with time-based expiry.
//!
//! Memoizes expensive aggregate computations (priority scalars, ranks).
//! Entries expire by TTL only; nothing is invalidated explicitly, so a value
//! may be stale for at most its TTL. Every cached value is recomputable, so
//! losing an entry is never an error.
//!
//! Backends expire entries against the wall clock. [`get_or_compute`] also
//! stamps each value with the caller's `now`, so a caller driving simulated
//! time sees values expire once that time moves past the TTL.
//!
//! Two backends:
//! - [`MemoryCache`] - per-process map, for long-running callers and tests
//! - [`SqliteCache`] - `cache_entry` table, so short CLI invocations share values

use crate::db;
use crate::error::Result;
use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Minimal cache contract the core depends on.
pub trait Cache: Send + Sync {
    /// Fetch a live entry.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value` under `key`. `None` means no expiry.
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Drop `key` if present.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Value stored by [`get_or_compute`], with the caller time it was computed at.
#[derive(Serialize, Deserialize)]
struct Stamped<T> {
    computed_at: i64,
    value: T,
}

/// Return the cached value for `key`, or compute, store and return it.
///
/// A hit must have been computed within `ttl` before `now` (and not after
/// it). An entry that no longer deserializes into `T` counts as a miss.
pub fn get_or_compute<T, F>(cache: &dyn Cache, key: &str, ttl: Duration, now: DateTime<Utc>, compute: F) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T>,
{
    let now_ts = db::to_timestamp(now);
    let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);

    if let Some(value) = cache.get(key)? {
        match serde_json::from_value::<Stamped<T>>(value) {
            Ok(hit) if (0..ttl_secs).contains(&(now_ts - hit.computed_at)) => {
                trace!("Cache hit for `{key}'");
                return Ok(hit.value);
            }
            Ok(hit) => debug!("Cache entry `{key}' computed at {} is stale at {now_ts}", hit.computed_at),
            Err(e) => debug!("Discarding unreadable cache entry `{key}': {e}"),
        }
    }

    debug!("Cache miss for `{key}', recomputing");
    let fresh = compute()?;
    let stamped = Stamped {
        computed_at: now_ts,
        value: fresh,
    };
    cache.set(key, serde_json::to_value(&stamped)?, Some(ttl))?;
    Ok(stamped.value)
}

/// Lock `mutex`, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Cache lock was poisoned by a panicking thread, continuing with its data");
        poisoned.into_inner()
    })
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// Unix seconds.
    expires_at: Option<u64>,
}

/// In-process cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, live or expired.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = lock(&self.entries);
        let expired = match entries.get(key) {
            None => return Ok(None),
            Some(entry) => entry.expires_at.is_some_and(|at| at <= now_secs()),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| now_secs() + ttl.as_secs());
        lock(&self.entries).insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// Cache persisted in a SQLite table.
///
/// Uses its own connection, separate from the catalog connection.
#[derive(Debug)]
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    /// Open the cache table in the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Use an already open connection (e.g. in-memory).
    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache_entry (
                key        TEXT    PRIMARY KEY,
                value      TEXT    NOT NULL,
                expires_at INTEGER
            )",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = lock(&self.conn);
        let removed = conn.execute(
            "DELETE FROM cache_entry WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            [now_secs()],
        )?;
        Ok(removed)
    }
}

impl Cache for SqliteCache {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = lock(&self.conn);
        let row: Option<(String, Option<u64>)> = conn
            .query_row(
                "SELECT value, expires_at FROM cache_entry WHERE key = ?1",
                [key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((_, Some(expires_at))) if expires_at <= now_secs() => {
                conn.execute("DELETE FROM cache_entry WHERE key = ?1", [key])?;
                Ok(None)
            }
            Some((text, _)) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let conn = lock(&self.conn);
        let expires_at = ttl.map(|ttl| now_secs() + ttl.as_secs());
        conn.execute(
            "INSERT INTO cache_entry (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, serde_json::to_string(&value)?, expires_at],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        lock(&self.conn).execute("DELETE FROM cache_entry WHERE key = ?1", [key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    fn exercise(cache: &dyn Cache) {
        assert_eq!(cache.get("missing").unwrap(), None);

        cache.set("k", json!([1.5, 2.0]), Some(Duration::from_secs(60))).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(json!([1.5, 2.0])));

        cache.set("k", json!("replaced"), None).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(json!("replaced")));

        cache.delete("k").unwrap();
        assert_eq!(cache.get("k").unwrap(), None);

        // Zero TTL expires immediately.
        cache.set("gone", json!(1), Some(Duration::ZERO)).unwrap();
        assert_eq!(cache.get("gone").unwrap(), None);
    }

    #[test]
    fn test_memory_cache_contract() {
        exercise(&MemoryCache::new());
    }

    #[test]
    fn test_sqlite_cache_contract() {
        let cache = SqliteCache::from_connection(Connection::open_in_memory().unwrap()).unwrap();
        exercise(&cache);
    }

    #[test]
    fn test_sqlite_cache_purge() {
        let cache = SqliteCache::from_connection(Connection::open_in_memory().unwrap()).unwrap();
        cache.set("old", json!(1), Some(Duration::ZERO)).unwrap();
        cache.set("new", json!(2), Some(Duration::from_secs(600))).unwrap();
        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert_eq!(cache.get("new").unwrap(), Some(json!(2)));
    }

    fn at(secs: i64) -> DateTime<Utc> {
        db::from_timestamp(1_700_000_000 + secs).unwrap()
    }

    #[test]
    fn test_get_or_compute_memoizes() -> Result<()> {
        let cache = MemoryCache::new();
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok((3_u32, 1.66_f64))
        };

        let first: (u32, f64) = get_or_compute(&cache, "pv", Duration::from_secs(60), at(0), compute)?;
        let second: (u32, f64) = get_or_compute(&cache, "pv", Duration::from_secs(60), at(59), compute)?;

        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.len(), 1);
        Ok(())
    }

    #[test]
    fn test_get_or_compute_expires_in_caller_time() -> Result<()> {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(7200);
        let calls = Cell::new(0_u32);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok(calls.get())
        };

        assert_eq!(get_or_compute(&cache, "v", ttl, at(0), compute)?, 1);
        assert_eq!(get_or_compute(&cache, "v", ttl, at(3600), compute)?, 1);
        // Three simulated days later, although no wall-clock time has passed.
        assert_eq!(get_or_compute(&cache, "v", ttl, at(3 * 86_400), compute)?, 2);
        // Time running backwards does not reuse a value from the future.
        assert_eq!(get_or_compute(&cache, "v", ttl, at(0), compute)?, 3);
        Ok(())
    }

    #[test]
    fn test_get_or_compute_replaces_unreadable_entry() -> Result<()> {
        let cache = MemoryCache::new();
        cache.set("n", json!("not a number"), None)?;
        let value: u32 = get_or_compute(&cache, "n", Duration::from_secs(60), at(0), || Ok(7))?;
        assert_eq!(value, 7);
        assert_eq!(cache.get("n")?, Some(json!({ "computed_at": 1_700_000_000, "value": 7 })));
        Ok(())
    }

    #[test]
    fn test_poisoned_lock_keeps_cache_usable() -> Result<()> {
        let cache = MemoryCache::new();
        cache.set("k", json!(1), None)?;
        let _ = std::thread::scope(|s| {
            s.spawn(|| {
                let _guard = cache.entries.lock().unwrap();
                panic!("panicking while holding the cache lock");
            })
            .join()
        });
        assert!(cache.entries.is_poisoned());

        assert_eq!(cache.get("k")?, Some(json!(1)));
        cache.set("k", json!(2), None)?;
        assert_eq!(cache.get("k")?, Some(json!(2)));
        Ok(())
    }
}
