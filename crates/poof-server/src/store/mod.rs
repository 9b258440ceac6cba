pub mod crypto;
pub mod db;
pub mod memory;
pub mod model;
pub mod redis;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub use self::db::RedbStore;
pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Key of the counter bumped on every successful create.
pub const TOTAL_CREATED: &str = "stats:total_created";
/// Key of the counter bumped on every successful retrieval.
pub const TOTAL_VIEWED: &str = "stats:total_viewed";

/// Narrow contract over a TTL-capable key-value store.
///
/// Every method is atomic on its own; callers never need a transaction
/// spanning more than one key. A `ttl` of `None` means the entry never
/// expires.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Insert or overwrite `key`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Insert `key` only if it has no live value. Returns whether it was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

    /// Fetch the live value of `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn del(&self, key: &str) -> Result<()>;

    /// Remove `key` only while it still holds `expected`.
    /// Returns true for exactly one caller when several race on the same value.
    async fn remove_if(&self, key: &str, expected: &str) -> Result<bool>;

    /// Atomically increment a counter, starting from zero, and return the new value.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<()>;
}

/// Which [`SecretStore`] implementation backs the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Redb,
    Memory,
}

impl StoreBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Some(Self::Redis),
            "redb" => Some(Self::Redb),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::Redb => "redb",
            Self::Memory => "memory",
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names() {
        assert_eq!(StoreBackend::parse("redis"), Some(StoreBackend::Redis));
        assert_eq!(StoreBackend::parse(" REDB "), Some(StoreBackend::Redb));
        assert_eq!(StoreBackend::parse("memory"), Some(StoreBackend::Memory));
        assert_eq!(StoreBackend::parse("postgres"), None);
        assert_eq!(StoreBackend::Redb.to_string(), "redb");
    }
}
