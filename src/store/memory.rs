//! In-process user store. Nothing is written to disk.

use super::{UserRecord, UserStore};
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<String, UserRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision a user with no active rotation digest.
    pub fn insert_user(&self, id: &str, contact_address: &str) -> Result<()> {
        let id = id.trim();
        if id.is_empty() {
            bail!("User id cannot be empty");
        }
        let contact_address = contact_address.trim();
        if contact_address.is_empty() {
            bail!("Contact address cannot be empty");
        }

        let mut users = self.users.lock();
        if users.contains_key(id) {
            bail!("User '{}' already exists", id);
        }
        users.insert(
            id.to_owned(),
            UserRecord {
                id: id.to_owned(),
                contact_address: contact_address.to_owned(),
                rotation_digest: None,
            },
        );
        Ok(())
    }

    /// Drop a user row, e.g. to simulate deletion between calls.
    pub fn remove_user(&self, id: &str) -> bool {
        self.users.lock().remove(id).is_some()
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().len()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn exists(&self, identity: &str) -> Result<bool> {
        Ok(self.users.lock().contains_key(identity))
    }

    async fn lookup(&self, identity: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.lock().get(identity).cloned())
    }

    async fn update_rotation_digest(
        &self,
        identity: &str,
        new_digest: &str,
        expected: Option<&str>,
    ) -> Result<bool> {
        let mut users = self.users.lock();
        let Some(record) = users.get_mut(identity) else {
            return Ok(false);
        };
        if let Some(current) = expected {
            if record.rotation_digest.as_deref() != Some(current) {
                return Ok(false);
            }
        }
        record.rotation_digest = Some(new_digest.to_owned());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_reflects_updates() {
        let store = MemoryUserStore::new();
        store.insert_user("u1", "u1@mail").unwrap();
        assert!(store.exists("u1").await.unwrap());

        assert!(store.update_rotation_digest("u1", "d1", None).await.unwrap());
        let record = store.lookup("u1").await.unwrap().unwrap();
        assert_eq!(record.rotation_digest.as_deref(), Some("d1"));
    }

    #[tokio::test]
    async fn insert_trims_and_rejects_empty_fields() {
        let store = MemoryUserStore::new();
        assert!(store.insert_user("  ", "a@mail").is_err());
        assert!(store.insert_user("u1", "").is_err());
        assert_eq!(store.user_count(), 0);

        store.insert_user(" u1 ", " u1@mail ").unwrap();
        let record = store.lookup("u1").await.unwrap().unwrap();
        assert_eq!(record.contact_address, "u1@mail");
        assert!(store.insert_user("u1", "other@mail").is_err());
    }

    #[tokio::test]
    async fn stale_swap_is_refused() {
        let store = MemoryUserStore::new();
        store.insert_user("u1", "u1@mail").unwrap();
        store.update_rotation_digest("u1", "d1", None).await.unwrap();

        assert!(!store.update_rotation_digest("u1", "d2", Some("d0")).await.unwrap());
        assert!(store.update_rotation_digest("u1", "d2", Some("d1")).await.unwrap());
        assert!(!store.update_rotation_digest("u1", "d3", Some("d1")).await.unwrap());
    }

    #[tokio::test]
    async fn swap_against_missing_digest_is_refused() {
        let store = MemoryUserStore::new();
        store.insert_user("u1", "u1@mail").unwrap();
        assert!(!store.update_rotation_digest("u1", "d1", Some("d0")).await.unwrap());
    }

    #[tokio::test]
    async fn removed_user_disappears() {
        let store = MemoryUserStore::new();
        store.insert_user("u1", "u1@mail").unwrap();
        assert!(store.remove_user("u1"));
        assert!(!store.exists("u1").await.unwrap());
        assert!(!store.update_rotation_digest("u1", "d1", None).await.unwrap());
        assert_eq!(store.user_count(), 0);
    }

    #[test]
    fn duplicate_insert_fails() {
        let store = MemoryUserStore::new();
        store.insert_user("u1", "a@mail").unwrap();
        assert!(store.insert_user("u1", "b@mail").is_err());
    }
}
