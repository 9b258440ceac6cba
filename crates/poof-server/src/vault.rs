//! Lifecycle of a one-time text drop.
//!
//! Creation: validate → generate id → encrypt → insert (with optional TTL).
//! Retrieval: validate id → fetch → decrypt → compare-and-delete.
//!
//! The delete only happens after a successful decrypt, and it only succeeds
//! for the reader that still sees the exact ciphertext it decrypted. Two
//! concurrent readers of the same id can both reach the delete step, but
//! only one of them gets the text back.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{VaultError, VaultResult, MAX_TEXT_BYTES, MAX_TTL};
use crate::id::{generate_id, is_valid_id};
use crate::store::crypto::{self, EncryptionKey};
use crate::store::{SecretStore, TOTAL_CREATED, TOTAL_VIEWED};

/// Attempts at finding an unused id before giving up.
const MAX_ID_ATTEMPTS: usize = 3;

/// Telemetry counters kept next to the entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Created,
    Viewed,
}

impl Counter {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Created => TOTAL_CREATED,
            Self::Viewed => TOTAL_VIEWED,
        }
    }
}

/// Sink for best-effort usage counters.
#[async_trait]
pub trait Counters: Send + Sync {
    async fn bump(&self, counter: Counter) -> Result<i64>;
}

/// Counts through the secret store's own atomic increment.
pub struct StoreCounters(pub Arc<dyn SecretStore>);

#[async_trait]
impl Counters for StoreCounters {
    async fn bump(&self, counter: Counter) -> Result<i64> {
        self.0.incr(counter.key()).await
    }
}

pub struct Vault {
    store: Arc<dyn SecretStore>,
    counters: Arc<dyn Counters>,
    key: Option<EncryptionKey>,
}

impl Vault {
    /// Build a vault whose key is derived from `passphrase`.
    /// An empty passphrase is accepted here but every create/take fails with
    /// [`VaultError::MissingKey`] before reaching the store.
    pub fn new(
        store: Arc<dyn SecretStore>,
        counters: Arc<dyn Counters>,
        passphrase: &str,
    ) -> Self {
        Self {
            store,
            counters,
            key: crypto::derive_key(passphrase).ok(),
        }
    }

    /// Shorthand for a vault that counts into its own store.
    pub fn with_store_counters(store: Arc<dyn SecretStore>, passphrase: &str) -> Self {
        let counters = Arc::new(StoreCounters(store.clone()));
        Self::new(store, counters, passphrase)
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    fn key(&self) -> VaultResult<&EncryptionKey> {
        self.key.as_ref().ok_or(VaultError::MissingKey)
    }

    /// Encrypt and store `text`, returning its new id.
    /// `ttl` of `None` keeps the entry until it is read.
    pub async fn create(&self, text: &str, ttl: Option<Duration>) -> VaultResult<String> {
        if text.is_empty() {
            return Err(VaultError::EmptyText);
        }
        if text.len() > MAX_TEXT_BYTES {
            return Err(VaultError::TextTooLarge(text.len()));
        }
        if let Some(t) = ttl.filter(|t| *t > MAX_TTL) {
            return Err(VaultError::TtlTooLong(t.as_secs()));
        }
        let key = self.key()?;

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let id = generate_id()?;
            let blob = crypto::encrypt(key, text)?;

            let inserted = self
                .store
                .set_if_absent(&id, &blob, ttl)
                .await
                .map_err(VaultError::store("save entry"))?;

            if inserted {
                self.record(Counter::Created).await;
                info!(id = %id, ttl_secs = ?ttl.map(|t| t.as_secs()), "created entry");
                return Ok(id);
            }
            warn!(id = %id, attempt, "id already in use, regenerating");
        }
        Err(VaultError::IdCollision)
    }

    /// Decrypt the entry behind `id` and destroy it.
    ///
    /// A missing, expired, malformed or concurrently consumed id is
    /// [`VaultError::NotFound`]. An entry that fails to decrypt is left in
    /// place.
    pub async fn take(&self, id: &str) -> VaultResult<String> {
        if id.is_empty() {
            return Err(VaultError::MissingId);
        }
        if !is_valid_id(id) {
            return Err(VaultError::NotFound);
        }
        let key = self.key()?;

        let blob = self
            .store
            .get(id)
            .await
            .map_err(VaultError::store("retrieve entry"))?
            .ok_or(VaultError::NotFound)?;

        let text = crypto::decrypt(key, &blob)?;

        let removed = self
            .store
            .remove_if(id, &blob)
            .await
            .map_err(VaultError::store("delete entry"))?;
        if !removed {
            debug!(id = %id, "entry consumed by a concurrent reader");
            return Err(VaultError::NotFound);
        }

        self.record(Counter::Viewed).await;
        info!(id = %id, "entry viewed and destroyed");
        Ok(text)
    }

    async fn record(&self, counter: Counter) {
        if let Err(e) = self.counters.bump(counter).await {
            warn!(counter = counter.key(), error = %e, "failed to bump counter");
        }
    }
}
