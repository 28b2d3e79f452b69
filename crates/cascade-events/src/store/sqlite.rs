//! SQLite fallback store.
//!
//! The relational half of the hybrid gateway: an r2d2-pooled rusqlite
//! database holding the flat event records. List and map fields are
//! stored as JSON text columns; timestamps as fixed-width RFC 3339 so
//! `ORDER BY timestamp` is chronological.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use tracing::debug;

use cascade_core::EventStatus;

use crate::errors::Result;
use crate::store::record::EventRecord;
use crate::store::EventStore;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id              TEXT PRIMARY KEY,
    event_type      TEXT NOT NULL,
    source          TEXT NOT NULL,
    conversation_id TEXT,
    user_id         TEXT,
    session_id      TEXT,
    timestamp       TEXT NOT NULL,
    parent_events   TEXT NOT NULL DEFAULT '[]',
    root_event_id   TEXT,
    data            TEXT NOT NULL DEFAULT '{}',
    metadata        TEXT NOT NULL DEFAULT '{}',
    status          TEXT NOT NULL DEFAULT 'pending',
    processed_by    TEXT NOT NULL DEFAULT '[]',
    error_message   TEXT
);
CREATE INDEX IF NOT EXISTS idx_events_conversation ON events (conversation_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_events_root ON events (root_event_id);
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events (timestamp);
";

const SELECT_COLUMNS: &str = "id, event_type, source, conversation_id, user_id, session_id,
    timestamp, parent_events, root_event_id, data, metadata, status, processed_by, error_message";

/// SQLite-backed event store.
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (or create) a store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        Self::from_manager(manager, 4)
    }

    /// Open an in-memory store. The pool is pinned to a single
    /// connection — separate connections would each get their own
    /// private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::from_manager(SqliteConnectionManager::memory(), 1)
    }

    fn from_manager(manager: SqliteConnectionManager, max_size: u32) -> Result<Self> {
        let pool = Pool::builder().max_size(max_size).build(manager)?;
        {
            let conn = pool.get()?;
            conn.execute_batch(SCHEMA)?;
        }
        Ok(Self { pool })
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<EventRecord> {
        let timestamp: String = row.get(6)?;
        let status: String = row.get(11)?;
        Ok(EventRecord {
            id: row.get(0)?,
            event_type: row.get(1)?,
            source: row.get(2)?,
            conversation_id: row.get(3)?,
            user_id: row.get(4)?,
            session_id: row.get(5)?,
            timestamp: parse_timestamp(&timestamp),
            parent_events: parse_json_list(row.get::<_, String>(7)?),
            root_event_id: row.get(8)?,
            data: parse_json_map(row.get::<_, String>(9)?),
            metadata: parse_json_map(row.get::<_, String>(10)?),
            status: parse_status(&status),
            processed_by: parse_json_list(row.get::<_, String>(12)?),
            error_message: row.get(13)?,
        })
    }

    fn query_records(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<EventRecord>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// Read-path parsers are deliberately forgiving: a malformed column
// degrades to a default instead of failing the whole read.

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            debug!(raw, "unparseable stored timestamp, defaulting to epoch");
            DateTime::<Utc>::UNIX_EPOCH
        })
}

fn parse_json_list(raw: String) -> Vec<String> {
    serde_json::from_str(&raw).unwrap_or_default()
}

fn parse_json_map(raw: String) -> Map<String, Value> {
    serde_json::from_str(&raw).unwrap_or_default()
}

fn parse_status(raw: &str) -> EventStatus {
    match raw {
        "processing" => EventStatus::Processing,
        "completed" => EventStatus::Completed,
        "failed" => EventStatus::Failed,
        "cancelled" => EventStatus::Cancelled,
        _ => EventStatus::Pending,
    }
}

impl EventStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn is_available(&self) -> bool {
        self.pool.get().is_ok()
    }

    fn store(&self, record: &EventRecord) -> Result<bool> {
        let conn = self.pool.get()?;
        // Duplicate delivery is success: the record already exists.
        let _ = conn.execute(
            "INSERT INTO events (id, event_type, source, conversation_id, user_id, session_id,
                 timestamp, parent_events, root_event_id, data, metadata, status, processed_by,
                 error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO NOTHING",
            params![
                record.id,
                record.event_type,
                record.source,
                record.conversation_id,
                record.user_id,
                record.session_id,
                encode_timestamp(record.timestamp),
                serde_json::to_string(&record.parent_events)?,
                record.root_event_id,
                serde_json::to_string(&record.data)?,
                serde_json::to_string(&record.metadata)?,
                record.status.to_string(),
                serde_json::to_string(&record.processed_by)?,
                record.error_message,
            ],
        )?;
        Ok(true)
    }

    fn get(&self, event_id: &str) -> Result<Option<EventRecord>> {
        let conn = self.pool.get()?;
        let record = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM events WHERE id = ?1"),
                params![event_id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn conversation_events(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<EventRecord>> {
        let conn = self.pool.get()?;
        let limit = limit.map_or(-1, |l| l as i64);
        Self::query_records(
            &conn,
            &format!(
                "SELECT {SELECT_COLUMNS} FROM events
                 WHERE conversation_id = ?1
                 ORDER BY timestamp LIMIT ?2 OFFSET ?3"
            ),
            &[&conversation_id, &limit, &(offset as i64)],
        )
    }

    fn recent_events(
        &self,
        limit: usize,
        conversation_id: Option<&str>,
        event_type: Option<&str>,
    ) -> Result<Vec<EventRecord>> {
        let conn = self.pool.get()?;
        Self::query_records(
            &conn,
            &format!(
                "SELECT {SELECT_COLUMNS} FROM events
                 WHERE (?1 IS NULL OR conversation_id = ?1)
                   AND (?2 IS NULL OR event_type = ?2)
                 ORDER BY timestamp DESC LIMIT ?3"
            ),
            &[&conversation_id, &event_type, &(limit as i64)],
        )
    }

    fn children_of(&self, parent_id: &str) -> Result<Vec<EventRecord>> {
        let conn = self.pool.get()?;
        Self::query_records(
            &conn,
            &format!(
                "SELECT {SELECT_COLUMNS} FROM events
                 WHERE EXISTS (
                     SELECT 1 FROM json_each(events.parent_events)
                     WHERE json_each.value = ?1
                 )
                 ORDER BY timestamp"
            ),
            &[&parent_id],
        )
    }

    fn events_with_root(&self, root_id: &str) -> Result<Vec<EventRecord>> {
        let conn = self.pool.get()?;
        Self::query_records(
            &conn,
            &format!(
                "SELECT {SELECT_COLUMNS} FROM events
                 WHERE root_event_id = ?1 OR id = ?1
                 ORDER BY timestamp"
            ),
            &[&root_id],
        )
    }
}
