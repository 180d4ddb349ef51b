//! SQLite-backed user store.
//!
//! Table:
//! - `users`: id, rotation_digest, contact_address

use super::{UserRecord, UserStore};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

pub struct SqliteUserStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteUserStore {
    /// Open (or create) the user database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create store directory {}", parent.display())
                })?;
            }
        }
        let conn = rusqlite::Connection::open(db_path)
            .with_context(|| format!("Failed to open user store at {}", db_path.display()))?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &rusqlite::Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                rotation_digest TEXT,
                contact_address TEXT NOT NULL
            );",
        )?;
        Ok(())
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

        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO users (id, contact_address) VALUES (?1, ?2)",
            rusqlite::params![id, contact_address],
        );

        match result {
            Ok(_) => {
                tracing::info!(identity = id, "User provisioned");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                bail!("User '{}' already exists", id)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Count provisioned users.
    pub fn user_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Run a query on the blocking pool so a slow disk never stalls the runtime.
    async fn with_conn<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .with_context(|| format!("sqlite {op} task failed"))?
        .with_context(|| format!("sqlite {op}"))
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn exists(&self, identity: &str) -> Result<bool> {
        let identity = identity.to_owned();
        self.with_conn("exists", move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                rusqlite::params![identity],
                |row| row.get::<_, bool>(0),
            )
        })
        .await
    }

    async fn lookup(&self, identity: &str) -> Result<Option<UserRecord>> {
        let identity = identity.to_owned();
        self.with_conn("lookup", move |conn| {
            let row = conn.query_row(
                "SELECT id, contact_address, rotation_digest FROM users WHERE id = ?1",
                rusqlite::params![identity],
                |row| {
                    Ok(UserRecord {
                        id: row.get(0)?,
                        contact_address: row.get(1)?,
                        rotation_digest: row.get(2)?,
                    })
                },
            );

            match row {
                Ok(record) => Ok(Some(record)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn update_rotation_digest(
        &self,
        identity: &str,
        new_digest: &str,
        expected: Option<&str>,
    ) -> Result<bool> {
        let identity = identity.to_owned();
        let new_digest = new_digest.to_owned();
        let expected = expected.map(str::to_owned);
        let updated = self
            .with_conn("update_rotation_digest", move |conn| match expected {
                Some(current) => conn.execute(
                    "UPDATE users SET rotation_digest = ?1
                     WHERE id = ?2 AND rotation_digest = ?3",
                    rusqlite::params![new_digest, identity, current],
                ),
                None => conn.execute(
                    "UPDATE users SET rotation_digest = ?1 WHERE id = ?2",
                    rusqlite::params![new_digest, identity],
                ),
            })
            .await?;
        Ok(updated > 0)
    }
}
