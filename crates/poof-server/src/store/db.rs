use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use tokio::time;
use tracing::{debug, info, warn};

use super::model::StoredEntry;
use super::SecretStore;

const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

/// Embedded [`SecretStore`] on a single redb file.
///
/// redb has no native expiry, so each entry carries its own deadline.
/// Expired entries are invisible to reads, evicted lazily when touched and
/// removed in bulk by [`RedbStore::spawn_sweep`].
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        // Ensure all tables exist.
        let write_txn = db.begin_write()?;
        write_txn.open_table(ENTRIES)?;
        write_txn.open_table(COUNTERS)?;
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    fn entry(value: &str, ttl: Option<Duration>) -> Result<StoredEntry> {
        let now = Self::now();
        let expires_at = ttl
            .map(|t| {
                i64::try_from(t.as_millis())
                    .ok()
                    .and_then(|ms| now.checked_add(ms))
                    .context("ttl out of range")
            })
            .transpose()?;
        Ok(StoredEntry {
            value: value.to_owned(),
            created_at: now,
            expires_at,
        })
    }

    fn put(&self, key: &str, entry: &StoredEntry, only_if_absent: bool) -> Result<bool> {
        let bytes = encode(entry)?;
        let now = Self::now();

        let write_txn = self.db.begin_write()?;
        let written = {
            let mut table = write_txn.open_table(ENTRIES)?;

            let occupied = if only_if_absent {
                let raw: Option<Vec<u8>> = table.get(key)?.map(|guard| guard.value().to_vec());
                match raw {
                    Some(raw) => !decode(&raw)?.is_expired(now),
                    None => false,
                }
            } else {
                false
            };

            if !occupied {
                table.insert(key, bytes.as_slice())?;
            }
            !occupied
        };
        write_txn.commit()?;

        if written {
            debug!(key = %key, "stored entry");
        }
        Ok(written)
    }

    fn fetch(&self, key: &str) -> Result<Option<String>> {
        let now = Self::now();
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTRIES)?;

        let raw: Option<Vec<u8>> = table.get(key)?.map(|guard| guard.value().to_vec());
        let Some(raw) = raw else {
            return Ok(None);
        };
        let entry = decode(&raw)?;
        if entry.is_expired(now) {
            drop(table);
            drop(read_txn);
            self.evict_if_expired(key)?;
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    fn evict_if_expired(&self, key: &str) -> Result<()> {
        let now = Self::now();
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTRIES)?;
            let raw: Option<Vec<u8>> = table.get(key)?.map(|guard| guard.value().to_vec());
            if let Some(raw) = raw {
                if decode(&raw)?.is_expired(now) {
                    table.remove(key)?;
                    debug!(key = %key, "lazy-evicted expired entry");
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn remove(&self, key: &str, expected: Option<&str>) -> Result<bool> {
        let now = Self::now();
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(ENTRIES)?;
            let raw: Option<Vec<u8>> = table.get(key)?.map(|guard| guard.value().to_vec());
            match raw {
                None => false,
                Some(raw) => {
                    let entry = decode(&raw)?;
                    let matches = !entry.is_expired(now)
                        && expected.map_or(true, |want| entry.value == want);
                    if matches || entry.is_expired(now) {
                        table.remove(key)?;
                    }
                    matches
                }
            }
        };
        write_txn.commit()?;
        Ok(removed)
    }

    fn bump(&self, key: &str) -> Result<i64> {
        let write_txn = self.db.begin_write()?;
        let value = {
            let mut counters = write_txn.open_table(COUNTERS)?;
            let next = counters.get(key)?.map(|g| g.value()).unwrap_or(0) + 1;
            counters.insert(key, next)?;
            next
        };
        write_txn.commit()?;
        Ok(value as i64)
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn prune(&self) -> Result<usize> {
        let now = Self::now();

        // Collect expired keys in a read pass first.
        let expired_keys: Vec<String> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(ENTRIES)?;
            let mut keys = Vec::new();
            for item in table.iter()? {
                let (k, v) = item?;
                if decode(v.value())?.is_expired(now) {
                    keys.push(k.value().to_owned());
                }
            }
            keys
        };

        if expired_keys.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTRIES)?;
            for key in &expired_keys {
                table.remove(key.as_str())?;
            }
        }
        write_txn.commit()?;

        let removed = expired_keys.len();
        info!(removed, "pruned expired entries");
        Ok(removed)
    }

    /// Spawn a background Tokio task that calls `prune()` every `interval`.
    pub fn spawn_sweep(self, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                if let Err(e) = self.prune() {
                    warn!(error = %e, "background sweep error");
                }
            }
        });
    }
}

#[async_trait]
impl SecretStore for RedbStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.put(key, &Self::entry(value, ttl)?, false)?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        self.put(key, &Self::entry(value, ttl)?, true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.fetch(key)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.remove(key, None)?;
        Ok(())
    }

    async fn remove_if(&self, key: &str, expected: &str) -> Result<bool> {
        self.remove(key, Some(expected))
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.bump(key)
    }

    async fn ping(&self) -> Result<()> {
        self.db.begin_read().context("redb read transaction")?;
        Ok(())
    }
}

fn encode(entry: &StoredEntry) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(entry, bincode::config::standard()).context("bincode encode")
}

fn decode(bytes: &[u8]) -> Result<StoredEntry> {
    let (entry, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .context("bincode decode")?;
    Ok(entry)
}
