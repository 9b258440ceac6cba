use std::time::Duration;

use thiserror::Error;

/// Largest accepted plaintext, in bytes.
pub const MAX_TEXT_BYTES: usize = 1_048_576;

/// Longest accepted lifetime (365 days).
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("text is required")]
    EmptyText,

    #[error("text exceeds 1 MiB limit")]
    TextTooLarge(usize),

    #[error("ttl must not be negative")]
    InvalidTtl(i64),

    #[error("ttl exceeds 1 year limit")]
    TtlTooLong(u64),

    #[error("id is required")]
    MissingId,

    #[error("entry not found")]
    NotFound,

    #[error("encryption key is required")]
    MissingKey,

    #[error("failed to encrypt text")]
    Encryption(String),

    #[error("failed to decrypt text")]
    DecryptionFailed(String),

    #[error("failed to generate id")]
    IdGeneration(String),

    #[error("failed to allocate a unique id")]
    IdCollision,

    #[error("failed to {action}")]
    Store {
        action: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl VaultError {
    pub(crate) fn store(action: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Store { action, source }
    }

    /// True for errors caused by the request itself rather than the server.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            Self::EmptyText
                | Self::TextTooLarge(_)
                | Self::InvalidTtl(_)
                | Self::TtlTooLong(_)
                | Self::MissingId
                | Self::NotFound
        )
    }
}
