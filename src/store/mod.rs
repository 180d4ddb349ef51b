//! User store consumed by the authenticator.
//!
//! One row per identity: `{id, rotation_digest, contact_address}`.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryUserStore;
pub use sqlite::SqliteUserStore;

use crate::config::StoreConfig;
use async_trait::async_trait;
use std::sync::Arc;

/// A stored user row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub contact_address: String,
    /// PHC digest of the active refresh artifact; `None` before first issue.
    pub rotation_digest: Option<String>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Whether a row exists for `identity`.
    async fn exists(&self, identity: &str) -> anyhow::Result<bool>;

    /// Fetch the row for `identity`; `None` when absent.
    async fn lookup(&self, identity: &str) -> anyhow::Result<Option<UserRecord>>;

    /// Replace the rotation digest.
    ///
    /// With `expected = None` the write is unconditional. With
    /// `Some(current)` it only happens if the stored digest still equals
    /// `current` (compare-and-swap). Returns `false` when no row changed.
    async fn update_rotation_digest(
        &self,
        identity: &str,
        new_digest: &str,
        expected: Option<&str>,
    ) -> anyhow::Result<bool>;
}

/// Factory: create the configured user store.
pub fn create_user_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn UserStore>> {
    match config.kind.as_str() {
        "sqlite" => Ok(Arc::new(SqliteUserStore::open(&config.path)?)),
        "memory" => Ok(Arc::new(MemoryUserStore::new())),
        other if other.trim().is_empty() => {
            anyhow::bail!("store.kind cannot be empty. Supported values: sqlite, memory")
        }
        other => anyhow::bail!("Unknown store kind '{other}'. Supported values: sqlite, memory"),
    }
}
