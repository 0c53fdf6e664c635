//! Durable local key-value store backed by libSQL.
//!
//! The [`Store`] wraps a local database holding opaque serialized records:
//! the bearer credential, the fallback session record, the raw identity
//! record. Semantics are last-write-wins per key; multi-key mutations run
//! inside a single transaction so a crash mid-write cannot leave a partial
//! subset behind.

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};

use chatdoc_shared::{ChatDocError, Result};

/// Primary store handle wrapping a libSQL database.
pub struct Store {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Store {
    /// Open or create a database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ChatDocError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ChatDocError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| ChatDocError::Storage(e.to_string()))?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    ChatDocError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Key-value operations
    // -----------------------------------------------------------------------

    /// Read the value stored under `key`, if any.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM kv WHERE key = ?1", params![key])
            .await
            .map_err(|e| ChatDocError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row.get::<String>(0)
                    .map_err(|e| ChatDocError::Storage(e.to_string()))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(ChatDocError::Storage(e.to_string())),
        }
    }

    /// Write `value` under `key`, replacing any prior value.
    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                params![key, value, now.as_str()],
            )
            .await
            .map_err(|e| ChatDocError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Remove the record under `key`. Removing an absent key is not an error.
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .await
            .map_err(|e| ChatDocError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Write several records in one transaction: either every entry lands
    /// or none does.
    pub async fn put_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        self.begin().await?;
        let now = Utc::now().to_rfc3339();
        for (key, value) in entries {
            let write = self
                .conn
                .execute(
                    "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET
                       value = excluded.value,
                       updated_at = excluded.updated_at",
                    params![*key, *value, now.as_str()],
                )
                .await;
            if let Err(e) = write {
                self.rollback().await;
                return Err(ChatDocError::Storage(e.to_string()));
            }
        }
        self.commit().await
    }

    /// Remove several records in one transaction.
    pub async fn remove_many(&self, keys: &[&str]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        self.begin().await?;
        for key in keys {
            let delete = self
                .conn
                .execute("DELETE FROM kv WHERE key = ?1", params![*key])
                .await;
            if let Err(e) = delete {
                self.rollback().await;
                return Err(ChatDocError::Storage(e.to_string()));
            }
        }
        self.commit().await
    }

    async fn begin(&self) -> Result<()> {
        self.conn
            .execute("BEGIN IMMEDIATE", params![])
            .await
            .map_err(|e| ChatDocError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.conn
            .execute("COMMIT", params![])
            .await
            .map_err(|e| ChatDocError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn rollback(&self) {
        if let Err(e) = self.conn.execute("ROLLBACK", params![]).await {
            tracing::warn!(error = %e, "rollback failed");
        }
    }
}
