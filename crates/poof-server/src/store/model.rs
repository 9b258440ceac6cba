use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

/// Stored in redb as bincode-encoded bytes.
/// `value` is the base64 ciphertext handed over by the vault; the store never
/// sees plaintext. Expiry metadata stays readable so the sweep can evict
/// without touching the value.
#[derive(Debug, Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct StoredEntry {
    pub value: String,
    /// Unix timestamp (milliseconds) when the entry was written.
    pub created_at: i64,
    /// Optional Unix timestamp (milliseconds) from which the entry is gone.
    pub expires_at: Option<i64>,
}

impl StoredEntry {
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(exp) if now >= exp)
    }
}
