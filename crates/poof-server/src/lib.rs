pub mod dirs;
pub mod error;
pub mod handlers;
pub mod id;
pub mod server;
pub mod store;
pub mod vault;

use std::sync::Arc;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub vault: Arc<vault::Vault>,
    /// Service name reported by `/health`.
    pub service: Arc<str>,
}

pub use error::{VaultError, VaultResult};
pub use server::{build_router, read_key_file, resolve_encryption_key, run, ServerConfig};
pub use vault::Vault;
