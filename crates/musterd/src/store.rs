//! Persistent identity registry and attendance ledger.
//!
//! [`Store`] is the only interface the services use; [`SqliteStore`] backs it
//! with a single SQLite connection driven by `tokio-rusqlite`. Every write is
//! one transaction. The attendance table is append-only, enforced by triggers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use muster_core::{
    AttendanceRecord, Embedding, Identity, IdentityCache, IdentityId, LoadReport, MalformedRecord,
    RecordId,
};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS people (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  external_id TEXT NOT NULL UNIQUE,
  display_name TEXT,
  embedding BLOB NOT NULL,
  created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  person_id INTEGER NOT NULL REFERENCES people(id),
  timestamp INTEGER NOT NULL,
  source TEXT
);

CREATE INDEX IF NOT EXISTS idx_attendance_timestamp ON attendance(timestamp);
CREATE INDEX IF NOT EXISTS idx_attendance_person ON attendance(person_id, timestamp);

CREATE TRIGGER IF NOT EXISTS trg_attendance_no_update
BEFORE UPDATE ON attendance
BEGIN
  SELECT RAISE(FAIL, 'attendance is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_attendance_no_delete
BEFORE DELETE ON attendance
BEGIN
  SELECT RAISE(FAIL, 'attendance is append-only');
END;
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("sqlite: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error(transparent)]
    Malformed(#[from] MalformedRecord),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Sqlite(tokio_rusqlite::Error::Rusqlite(err))
    }
}

/// A persisted identity row with its embedding still encoded.
#[derive(Debug, Clone)]
pub struct IdentityRecord {
    pub id: IdentityId,
    pub external_id: String,
    pub display_name: Option<String>,
    pub embedding: Vec<u8>,
}

impl IdentityRecord {
    pub fn decode(self) -> Result<Identity, MalformedRecord> {
        match Embedding::from_blob(&self.embedding) {
            Ok(embedding) => Ok(Identity {
                id: self.id,
                external_id: self.external_id,
                display_name: self.display_name,
                embedding,
            }),
            Err(source) => Err(MalformedRecord {
                id: self.id,
                external_id: self.external_id,
                source,
            }),
        }
    }
}

/// Result of an enrollment write.
#[derive(Debug, Clone)]
pub struct Upserted {
    pub identity: Identity,
    /// False when an existing identity was overwritten.
    pub created: bool,
}

/// Public view of an enrolled identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Person {
    #[serde(skip)]
    pub id: IdentityId,
    pub external_id: String,
    pub display_name: Option<String>,
}

/// Attendance record joined with its identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceEntry {
    pub record_id: RecordId,
    pub external_id: String,
    pub display_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source: Option<String>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Every persisted identity, embeddings undecoded, in ascending id order.
    async fn identities(&self) -> Result<Vec<IdentityRecord>, StoreError>;

    async fn identity(&self, id: IdentityId) -> Result<Option<Identity>, StoreError>;

    /// Create or overwrite the identity keyed by `external_id`.
    /// `display_name: None` keeps the stored name.
    async fn upsert_identity(
        &self,
        external_id: &str,
        display_name: Option<&str>,
        embedding: &Embedding,
    ) -> Result<Upserted, StoreError>;

    async fn append_attendance(
        &self,
        identity: IdentityId,
        timestamp: DateTime<Utc>,
        source: Option<&str>,
    ) -> Result<AttendanceRecord, StoreError>;

    async fn people(&self) -> Result<Vec<Person>, StoreError>;

    /// Internal key of the identity enrolled under `external_id`.
    async fn identity_id(&self, external_id: &str) -> Result<Option<IdentityId>, StoreError>;

    /// Full ledger joined with identities, newest first.
    async fn attendance(&self) -> Result<Vec<AttendanceEntry>, StoreError>;

    /// Ledger entries of one identity, newest first.
    async fn attendance_for(&self, identity: IdentityId)
        -> Result<Vec<AttendanceRecord>, StoreError>;
}

/// Rebuild `cache` from every identity in `store`.
///
/// Fails only if the store cannot be read; malformed rows are skipped.
pub async fn warm_cache(store: &dyn Store, cache: &IdentityCache) -> Result<LoadReport, StoreError> {
    let records = store.identities().await?;
    let report = cache.load(records.into_iter().map(IdentityRecord::decode));
    tracing::info!(
        loaded = report.loaded,
        skipped = report.skipped,
        "identity cache loaded"
    );
    Ok(report)
}

pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::Unavailable(format!("create {}: {e}", parent.display()))
            })?;
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("open {}: {e}", path.display())))?;
        let store = Self { conn };
        store.init().await?;
        tracing::info!(path = %path.display(), "store opened");
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Unavailable(format!("open in-memory: {e}")))?;
        let store = Self { conn };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await
            .map_err(|e| StoreError::Unavailable(format!("apply schema: {e}")))
    }
}

fn micros_to_utc(column: usize, micros: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Integer,
            format!("timestamp out of range: {micros}").into(),
        )
    })
}

fn attendance_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: RecordId(row.get(0)?),
        identity: IdentityId(row.get(1)?),
        timestamp: micros_to_utc(2, row.get(2)?)?,
        source: row.get(3)?,
    })
}

fn person(row: &rusqlite::Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: IdentityId(row.get(0)?),
        external_id: row.get(1)?,
        display_name: row.get(2)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn identities(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let records = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, external_id, display_name, embedding FROM people ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(IdentityRecord {
                        id: IdentityId(row.get(0)?),
                        external_id: row.get(1)?,
                        display_name: row.get(2)?,
                        embedding: row.get(3)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(records)
    }

    async fn identity(&self, id: IdentityId) -> Result<Option<Identity>, StoreError> {
        let record = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, external_id, display_name, embedding FROM people WHERE id = ?1",
                        params![id.0],
                        |row| {
                            Ok(IdentityRecord {
                                id: IdentityId(row.get(0)?),
                                external_id: row.get(1)?,
                                display_name: row.get(2)?,
                                embedding: row.get(3)?,
                            })
                        },
                    )
                    .optional()?)
            })
            .await?;
        Ok(record.map(IdentityRecord::decode).transpose()?)
    }

    async fn upsert_identity(
        &self,
        external_id: &str,
        display_name: Option<&str>,
        embedding: &Embedding,
    ) -> Result<Upserted, StoreError> {
        let key = external_id.to_string();
        let name = display_name.map(str::to_string);
        let blob = embedding.to_blob();
        let now = Utc::now().timestamp_micros();

        let (id, display_name, created) = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<(i64, Option<String>)> = tx
                    .query_row(
                        "SELECT id, display_name FROM people WHERE external_id = ?1",
                        params![key],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;

                let outcome = match existing {
                    Some((id, current)) => {
                        let name = name.or(current);
                        tx.execute(
                            "UPDATE people SET display_name = ?1, embedding = ?2 WHERE id = ?3",
                            params![name, blob, id],
                        )?;
                        (id, name, false)
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO people (external_id, display_name, embedding, created_at)
                             VALUES (?1, ?2, ?3, ?4)",
                            params![key, name, blob, now],
                        )?;
                        (tx.last_insert_rowid(), name, true)
                    }
                };
                tx.commit()?;
                Ok(outcome)
            })
            .await?;

        Ok(Upserted {
            identity: Identity {
                id: IdentityId(id),
                external_id: external_id.to_string(),
                display_name,
                embedding: embedding.clone(),
            },
            created,
        })
    }

    async fn append_attendance(
        &self,
        identity: IdentityId,
        timestamp: DateTime<Utc>,
        source: Option<&str>,
    ) -> Result<AttendanceRecord, StoreError> {
        let source_owned = source.map(str::to_string);
        let micros = timestamp.timestamp_micros();

        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attendance (person_id, timestamp, source) VALUES (?1, ?2, ?3)",
                    params![identity.0, micros, source_owned],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        Ok(AttendanceRecord {
            id: RecordId(id),
            identity,
            timestamp: micros_to_utc(0, micros)?,
            source: source.map(str::to_string),
        })
    }

    async fn people(&self) -> Result<Vec<Person>, StoreError> {
        let people = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, external_id, display_name FROM people ORDER BY id")?;
                let rows = stmt.query_map([], person)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(people)
    }

    async fn identity_id(&self, external_id: &str) -> Result<Option<IdentityId>, StoreError> {
        let key = external_id.to_string();
        let found = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id FROM people WHERE external_id = ?1",
                        params![key],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()?)
            })
            .await?;
        Ok(found.map(IdentityId))
    }

    async fn attendance(&self) -> Result<Vec<AttendanceEntry>, StoreError> {
        let entries = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT a.id, p.external_id, p.display_name, a.timestamp, a.source
                     FROM attendance a JOIN people p ON p.id = a.person_id
                     ORDER BY a.timestamp DESC, a.id DESC",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(AttendanceEntry {
                        record_id: RecordId(row.get(0)?),
                        external_id: row.get(1)?,
                        display_name: row.get(2)?,
                        timestamp: micros_to_utc(3, row.get(3)?)?,
                        source: row.get(4)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(entries)
    }

    async fn attendance_for(
        &self,
        identity: IdentityId,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let records = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, person_id, timestamp, source FROM attendance
                     WHERE person_id = ?1
                     ORDER BY timestamp DESC, id DESC",
                )?;
                let rows = stmt.query_map(params![identity.0], attendance_record)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(records)
    }
}
