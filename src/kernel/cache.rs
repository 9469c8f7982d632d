//! Key-value cache with TTL, backing the rules pipeline's allowlist,
//! seen-domain, IOC and dedupe lookups.
//!
//! The `Cache` trait is the seam; [`LruCache`] is the in-memory
//! implementation this crate ships. A remote cache is an external
//! collaborator reached through the same trait and is not implemented
//! here — [`NullRemoteCache`] stands in for it in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache as LruMap;
use tokio::sync::Mutex;

use crate::error::{MerrymakerError, Result};

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn set_ttl(&self, key: &str, ttl: Duration) -> Result<bool>;
    /// Writes `value` only if `key` is absent or expired. Returns `true`
    /// if the write happened.
    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool>;
}

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() < at,
            None => true,
        }
    }
}

/// In-memory, process-local LRU cache with per-entry TTL.
pub struct LruCache {
    map: Mutex<LruMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = std::num::NonZeroUsize::new(capacity.max(1)).expect("capacity > 0");
        Self {
            map: Mutex::new(LruMap::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn entry(expires_in: Duration, value: Vec<u8>) -> Entry {
        Entry {
            value,
            expires_at: if expires_in.is_zero() {
                None
            } else {
                Some(Instant::now() + expires_in)
            },
        }
    }

    fn check_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(MerrymakerError::validation("cache key must not be empty"));
        }
        Ok(())
    }
}

#[async_trait]
impl Cache for LruCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Self::check_key(key)?;
        let mut map = self.map.lock().await;
        match map.get(key) {
            Some(entry) if entry.is_live() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.value.clone()))
            }
            Some(_) => {
                map.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        Self::check_key(key)?;
        let mut map = self.map.lock().await;
        map.put(key.to_string(), Self::entry(ttl, value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Self::check_key(key)?;
        let mut map = self.map.lock().await;
        Ok(map.pop(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn set_ttl(&self, key: &str, ttl: Duration) -> Result<bool> {
        Self::check_key(key)?;
        let mut map = self.map.lock().await;
        match map.get_mut(key) {
            Some(entry) if entry.is_live() => {
                entry.expires_at = if ttl.is_zero() {
                    None
                } else {
                    Some(Instant::now() + ttl)
                };
                Ok(true)
            }
            Some(_) => {
                map.pop(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool> {
        Self::check_key(key)?;
        let mut map = self.map.lock().await;
        let occupied = matches!(map.get(key), Some(entry) if entry.is_live());
        if occupied {
            return Ok(false);
        }
        map.put(key.to_string(), Self::entry(ttl, value));
        Ok(true)
    }
}

/// No-op stand-in for a remote cache tier. Always a miss, every write
/// succeeds without persisting anything.
pub struct NullRemoteCache;

#[async_trait]
impl Cache for NullRemoteCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    async fn exists(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    async fn set_ttl(&self, _key: &str, _ttl: Duration) -> Result<bool> {
        Ok(false)
    }

    async fn set_if_absent(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<bool> {
        Ok(true)
    }
}

pub type SharedCache = Arc<dyn Cache>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = LruCache::new(10);
        cache.set("k", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(cache.hits(), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = LruCache::new(10);
        cache.set("k", b"v".to_vec(), Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_if_absent_suppresses_second_write() {
        let cache = LruCache::new(10);
        assert!(cache.set_if_absent("k", b"v1".to_vec(), Duration::from_secs(60)).await.unwrap());
        assert!(!cache.set_if_absent("k", b"v2".to_vec(), Duration::from_secs(60)).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let cache = LruCache::new(10);
        assert!(cache.get("").await.is_err());
    }

    #[tokio::test]
    async fn set_ttl_on_missing_key_returns_false() {
        let cache = LruCache::new(10);
        assert!(!cache.set_ttl("missing", Duration::from_secs(5)).await.unwrap());
    }
}
