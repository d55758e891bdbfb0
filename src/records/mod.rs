//! Record persistence: the `records` table and the operations over it.
//!
//! Records are append-only. Identifiers come from SQLite's `AUTOINCREMENT`
//! rowid, so they are strictly increasing and never reused.

use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::{Database, DatabaseError};

/// A stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub data: String,
}

impl Record {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            data: row.get(1)?,
        })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(i64),

    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Creates, fetches, and lists records through the shared pool.
#[derive(Debug, Clone)]
pub struct RecordStore {
    db: Database,
}

impl RecordStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts `data` under a freshly assigned identifier.
    pub async fn create(&self, data: String) -> StoreResult<Record> {
        let record = self
            .db
            .with_connection(move |conn| {
                conn.execute("INSERT INTO records (data) VALUES (?1)", params![data])?;
                Ok(Record {
                    id: conn.last_insert_rowid(),
                    data,
                })
            })
            .await?;
        tracing::debug!(id = record.id, "record created");
        Ok(record)
    }

    pub async fn get_by_id(&self, id: i64) -> StoreResult<Record> {
        self.db
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT id, data FROM records WHERE id = ?1",
                    params![id],
                    Record::from_row,
                )
                .optional()
            })
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    /// Every record, oldest first. Empty when nothing has been stored.
    pub async fn list_all(&self) -> StoreResult<Vec<Record>> {
        let records = self
            .db
            .with_connection(|conn| {
                let mut stmt = conn.prepare_cached("SELECT id, data FROM records ORDER BY id")?;
                let rows = stmt.query_map([], Record::from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(records)
    }
}
