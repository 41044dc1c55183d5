use crate::error::AppError;
use crate::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Key/value cache the resolution layer memoizes lookups in. Implementations may be backed
/// by a shared process; every call is allowed to fail.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;
    fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;
    fn invalidate(&self, key: &str) -> Result<(), CacheError>;
}

/// Typed cache namespace; the value type travels with the token.
pub struct CacheDef<V> {
    pub name: &'static str,
    _marker: PhantomData<fn() -> V>,
}

impl<V> CacheDef<V> {
    pub const fn new(name: &'static str) -> Self {
        Self { name, _marker: PhantomData }
    }

    pub fn key(&self, suffix: &str) -> String {
        format!("pointers:{}:{}", self.name, suffix)
    }
}

struct Entry {
    value: Value,
    /// `None` never expires.
    expires_at: Option<Instant>,
}

/// In-process bounded cache with per-entry expiry.
pub struct LruCache {
    inner: Mutex<lru::LruCache<String, Entry>>,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { inner: Mutex::new(lru::LruCache::new(capacity)) }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for LruCache {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut cache = self.inner.lock().map_err(|e| CacheError::Unavailable(e.to_string()))?;
        let expired = match cache.get(key) {
            Some(entry) if entry.expires_at.map_or(true, |at| at > Instant::now()) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            cache.pop(key);
        }
        Ok(None)
    }

    fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let mut cache = self.inner.lock().map_err(|e| CacheError::Unavailable(e.to_string()))?;
        cache.put(key.to_string(), Entry { value, expires_at: Instant::now().checked_add(ttl) });
        Ok(())
    }

    fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        let mut cache = self.inner.lock().map_err(|e| CacheError::Unavailable(e.to_string()))?;
        cache.pop(key);
        Ok(())
    }
}

/// Never stores anything.
pub struct NoCache;

impl Cache for NoCache {
    fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
        Ok(None)
    }

    fn put(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    fn invalidate(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Memoizes lookups in a [`Cache`]. Cache trouble of any kind degrades to computing the
/// value directly; it is logged, never returned.
#[derive(Clone)]
pub struct CacheFacade {
    backend: Arc<dyn Cache>,
    ttl: Duration,
    negative_ttl: Duration,
}

impl CacheFacade {
    pub fn new(backend: Arc<dyn Cache>, ttl: Duration, negative_ttl: Duration) -> Self {
        Self { backend, ttl, negative_ttl }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NoCache), Duration::ZERO, Duration::ZERO)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn negative_ttl(&self) -> Duration {
        self.negative_ttl
    }

    pub fn get_or_compute<V, F>(&self, def: &CacheDef<V>, suffix: &str, compute: F) -> Result<V, AppError>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<V, AppError>,
    {
        let key = def.key(suffix);
        if let Some(value) = self.lookup::<V>(&key) {
            return Ok(value);
        }
        let value = compute()?;
        self.store(&key, &value, self.ttl);
        Ok(value)
    }

    /// Like [`get_or_compute`](Self::get_or_compute) but remembers `None` for the shorter
    /// negative ttl.
    pub fn get_or_compute_opt<V, F>(&self, def: &CacheDef<V>, suffix: &str, compute: F) -> Result<Option<V>, AppError>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<Option<V>, AppError>,
    {
        let key = def.key(suffix);
        if let Some(value) = self.lookup::<Option<V>>(&key) {
            return Ok(value);
        }
        let value = compute()?;
        let ttl = if value.is_some() { self.ttl } else { self.negative_ttl };
        self.store(&key, &value, ttl);
        Ok(value)
    }

    pub fn invalidate<V>(&self, def: &CacheDef<V>, suffix: &str) {
        let key = def.key(suffix);
        if let Err(err) = self.backend.invalidate(&key) {
            warn!("Cache invalidation of {} failed: {}", key, err);
        }
    }

    fn lookup<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        match self.backend.get(key) {
            Ok(Some(raw)) => match serde_json::from_value(raw) {
                Ok(value) => {
                    debug!("Cache hit {}", key);
                    Some(value)
                }
                Err(err) => {
                    warn!("Dropping undecodable cache entry {}: {}", key, err);
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!("Cache read of {} failed, computing directly: {}", key, err);
                None
            }
        }
    }

    fn store<V: Serialize>(&self, key: &str, value: &V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let raw = match serde_json::to_value(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("Not caching {}: {}", key, err);
                return;
            }
        };
        if let Err(err) = self.backend.put(key, raw, ttl) {
            warn!("Cache write of {} failed: {}", key, err);
        }
    }
}
