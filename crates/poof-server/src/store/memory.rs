use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::time::Instant;

use super::SecretStore;

struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |exp| now < exp)
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Slot>,
    counters: HashMap<String, i64>,
}

/// Process-local [`SecretStore`]. Entries vanish with the process.
///
/// Expiry follows the tokio clock, so tests can drive it with paused time.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries, counters excluded.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().entries.values().filter(|s| s.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current value of a counter, zero if it was never bumped.
    pub fn counter(&self, key: &str) -> i64 {
        self.lock().counters.get(key).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned map is still structurally valid; keep serving it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn deadline(now: Instant, ttl: Option<Duration>) -> Result<Option<Instant>> {
        ttl.map(|t| now.checked_add(t).context("ttl out of range"))
            .transpose()
    }

    fn live_value<'a>(inner: &'a mut Inner, key: &str, now: Instant) -> Option<&'a String> {
        if inner.entries.get(key).is_some_and(|s| !s.is_live(now)) {
            inner.entries.remove(key);
        }
        inner.entries.get(key).map(|s| &s.value)
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = Self::deadline(Instant::now(), ttl)?;
        self.lock().entries.insert(
            key.to_owned(),
            Slot {
                value: value.to_owned(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let now = Instant::now();
        let expires_at = Self::deadline(now, ttl)?;
        let mut inner = self.lock();
        if Self::live_value(&mut inner, key, now).is_some() {
            return Ok(false);
        }
        inner.entries.insert(
            key.to_owned(),
            Slot {
                value: value.to_owned(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.lock();
        Ok(Self::live_value(&mut inner, key, Instant::now()).cloned())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.lock().entries.remove(key);
        Ok(())
    }

    async fn remove_if(&self, key: &str, expected: &str) -> Result<bool> {
        let mut inner = self.lock();
        let matches =
            Self::live_value(&mut inner, key, Instant::now()).is_some_and(|v| v == expected);
        if matches {
            inner.entries.remove(key);
        }
        Ok(matches)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut inner = self.lock();
        let n = inner.counters.entry(key.to_owned()).or_insert(0);
        *n += 1;
        Ok(*n)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_del() {
        let s = MemoryStore::new();
        s.set("k", "v", None).await.unwrap();
        assert_eq!(s.get("k").await.unwrap().as_deref(), Some("v"));
        s.del("k").await.unwrap();
        assert_eq!(s.get("k").await.unwrap(), None);
        // Deleting again is fine.
        s.del("k").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_with_the_clock() {
        let s = MemoryStore::new();
        s.set("k", "v", Some(Duration::from_secs(1))).await.unwrap();
        tokio::time::advance(Duration::from_millis(900)).await;
        assert!(s.get("k").await.unwrap().is_some());
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(s.get("k").await.unwrap().is_none());
        assert!(s.is_empty());
    }

    #[tokio::test]
    async fn set_if_absent_keeps_existing() {
        let s = MemoryStore::new();
        assert!(s.set_if_absent("k", "first", None).await.unwrap());
        assert!(!s.set_if_absent("k", "second", None).await.unwrap());
        assert_eq!(s.get("k").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn remove_if_requires_matching_value() {
        let s = MemoryStore::new();
        s.set("k", "v1", None).await.unwrap();
        assert!(!s.remove_if("k", "other").await.unwrap());
        assert!(s.remove_if("k", "v1").await.unwrap());
        assert!(!s.remove_if("k", "v1").await.unwrap());
    }

    #[tokio::test]
    async fn unrepresentable_ttl_is_an_error() {
        let s = MemoryStore::new();
        let forever = Some(Duration::from_secs(i64::MAX as u64));
        assert!(s.set("k", "v", forever).await.is_err());
        assert!(s.set_if_absent("k", "v", forever).await.is_err());
        assert!(s.is_empty());
    }

    #[tokio::test]
    async fn counters_start_at_zero() {
        let s = MemoryStore::new();
        assert_eq!(s.counter("c"), 0);
        assert_eq!(s.incr("c").await.unwrap(), 1);
        assert_eq!(s.incr("c").await.unwrap(), 2);
        assert_eq!(s.counter("c"), 2);
        assert!(s.is_empty());
    }
}
