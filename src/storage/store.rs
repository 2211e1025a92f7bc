use std::path::Path;

use rusqlite::{Connection, Result as SqliteResult};
use thiserror::Error;

use crate::calendar::{Happening, OccurrenceOverride};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Failed to create database directory: {0}")]
    IoError(#[from] std::io::Error),
}

/// Local SQLite copy of happenings and their overrides. Records are kept as
/// JSON blobs with the columns needed for lookups alongside.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self::new(Connection::open(path)?);
        store.initialize()?;
        tracing::debug!("Opened store at {}", path.display());
        Ok(store)
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS happenings (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS overrides (
                id TEXT PRIMARY KEY,
                happening_id TEXT NOT NULL,
                date TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS overrides_by_key ON overrides (happening_id, date)",
            [],
        )?;

        Ok(())
    }

    pub fn upsert_happening(&self, happening: &Happening) -> Result<(), StoreError> {
        let data = serde_json::to_string(happening)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO happenings (id, title, data, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                &happening.id,
                &happening.title,
                &data,
                happening.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn load_happening(&self, id: &str) -> Result<Option<Happening>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT data FROM happenings WHERE id = ?1")?;
        let mut rows = stmt.query([id])?;

        if let Some(row) = rows.next()? {
            let data: String = row.get(0)?;
            let happening: Happening = serde_json::from_str(&data)?;
            Ok(Some(happening))
        } else {
            Ok(None)
        }
    }

    pub fn list_happenings(&self) -> Result<Vec<Happening>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT data FROM happenings ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut happenings = Vec::new();
        for data in rows {
            happenings.push(serde_json::from_str(&data?)?);
        }
        Ok(happenings)
    }

    /// Removes the happening together with its overrides.
    pub fn delete_happening(&mut self, id: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM overrides WHERE happening_id = ?1", [id])?;
        tx.execute("DELETE FROM happenings WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn upsert_override(&self, item: &OccurrenceOverride) -> Result<(), StoreError> {
        let data = serde_json::to_string(item)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO overrides (id, happening_id, date, data, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                &item.id,
                &item.happening_id,
                item.date.to_string(),
                &data,
                item.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_overrides(&self) -> Result<Vec<OccurrenceOverride>, StoreError> {
        self.query_overrides("SELECT data FROM overrides ORDER BY happening_id, date, id", [])
    }

    pub fn overrides_for(&self, happening_id: &str) -> Result<Vec<OccurrenceOverride>, StoreError> {
        self.query_overrides(
            "SELECT data FROM overrides WHERE happening_id = ?1 ORDER BY date, id",
            [happening_id],
        )
    }

    pub fn delete_override(&self, id: &str) -> Result<(), StoreError> {
        self.conn.execute("DELETE FROM overrides WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn table_exists(&self, table_name: &str) -> bool {
        let result: SqliteResult<i32> = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        );
        result.unwrap_or(0) > 0
    }

    fn query_overrides<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<OccurrenceOverride>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;

        let mut overrides = Vec::new();
        for data in rows {
            overrides.push(serde_json::from_str(&data?)?);
        }
        Ok(overrides)
    }
}
