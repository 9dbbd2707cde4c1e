//! Persisted event log.
//!
//! Closed events are appended to a local SQLite database so that history
//! survives restarts and can be inspected with `sentry_events`. The store
//! is strictly local; nothing is indexed or uploaded anywhere.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::Event;

pub trait EventStore: Send {
    fn append_event(&mut self, ev: &Event) -> Result<()>;

    /// Most recent events first, up to `limit`.
    fn list_events(&mut self, limit: usize) -> Result<Vec<Event>>;

    /// Delete events older than `retention`.
    fn enforce_retention(&mut self, retention: Duration) -> Result<()>;
}

fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

// ----------------------------------------------------------------------------
// SQLite store
// ----------------------------------------------------------------------------

pub struct SqliteEventStore {
    conn: Connection,
}

impl SqliteEventStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at INTEGER NOT NULL,
              event_id TEXT NOT NULL UNIQUE,
              label TEXT NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at);
            CREATE INDEX IF NOT EXISTS idx_events_label ON events(label);
            "#,
        )?;
        Ok(())
    }
}

impl EventStore for SqliteEventStore {
    fn append_event(&mut self, ev: &Event) -> Result<()> {
        let created_at = i64::try_from(ev.started_at_ms / 1000)
            .map_err(|_| anyhow!("event timestamp exceeds i64 range"))?;
        let payload_json = serde_json::to_string(ev)?;

        self.conn.execute(
            r#"
            INSERT INTO events(created_at, event_id, label, payload_json)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![created_at, ev.id.as_str(), ev.label, payload_json],
        )?;

        Ok(())
    }

    fn list_events(&mut self, limit: usize) -> Result<Vec<Event>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload_json FROM events ORDER BY id DESC LIMIT ?1")?;
        let mut rows = stmt.query(params![limit as i64])?;

        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            let payload: String = row.get(0)?;
            events.push(serde_json::from_str(&payload)?);
        }
        Ok(events)
    }

    fn enforce_retention(&mut self, retention: Duration) -> Result<()> {
        let now = now_s()? as i64;
        let cutoff = now - retention.as_secs() as i64;
        let removed = self
            .conn
            .execute("DELETE FROM events WHERE created_at < ?1", params![cutoff])?;
        if removed > 0 {
            log::debug!("pruned {} events older than {}s", removed, retention.as_secs());
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// In-memory store for tests
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryEventStore {
    events: Vec<Event>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for InMemoryEventStore {
    fn append_event(&mut self, ev: &Event) -> Result<()> {
        self.events.push(ev.clone());
        Ok(())
    }

    fn list_events(&mut self, limit: usize) -> Result<Vec<Event>> {
        Ok(self.events.iter().rev().take(limit).cloned().collect())
    }

    fn enforce_retention(&mut self, retention: Duration) -> Result<()> {
        let cutoff_s = now_s()?.saturating_sub(retention.as_secs());
        self.events
            .retain(|ev| ev.started_at_ms / 1000 >= cutoff_s);
        Ok(())
    }
}
