//! Persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Services hand finished entities to a `Journal`; they never execute SQL.
//!
//! Entities are stored whole as JSON payloads. A handful of columns are
//! lifted out of the payload so lookups and listings can use an index.

use crate::{
    alert::Alert,
    client::Client,
    drawer::{CashDrawerState, DrawerChange, Movement},
    error::{DeskError, DeskResult},
    event::EventLogEntry,
    operation::Operation,
    types::Timestamp,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Mutex, MutexGuard};

mod entities;
mod folio;
mod memory;

pub use folio::SqliteFolioSequence;
pub use memory::MemoryJournal;

/// Durable record of everything the desk commits.
pub trait Journal: Send + Sync {
    // ── Operations ──────────────────────────────────────
    fn append_operation(&self, op: &Operation) -> DeskResult<()>;
    fn update_operation(&self, op: &Operation) -> DeskResult<()>;
    fn operation_by_folio(&self, folio: &str) -> DeskResult<Option<Operation>>;
    /// Every stored operation, oldest first.
    fn operations(&self) -> DeskResult<Vec<Operation>>;

    // ── Alerts ──────────────────────────────────────────
    fn append_alert(&self, alert: &Alert) -> DeskResult<()>;
    fn update_alert(&self, alert: &Alert) -> DeskResult<()>;
    fn alert_by_id(&self, id: &str) -> DeskResult<Option<Alert>>;
    fn alerts(&self) -> DeskResult<Vec<Alert>>;

    // ── Clients and drawers ─────────────────────────────
    fn upsert_client(&self, client: &Client) -> DeskResult<()>;
    fn client_by_id(&self, id: &str) -> DeskResult<Option<Client>>;
    fn clients(&self) -> DeskResult<Vec<Client>>;
    fn remove_client(&self, id: &str) -> DeskResult<()>;
    /// Stores the state without its movements. A state whose `version` is
    /// older than the stored one is ignored.
    fn upsert_drawer(&self, state: &CashDrawerState) -> DeskResult<()>;
    /// Insert-only; a movement already stored for (drawer, shift, seq) is kept.
    fn append_movements(&self, drawer_id: &str, shift: u64, movements: &[Movement]) -> DeskResult<()>;
    /// The stored state with the movements of its current shift.
    fn drawer_by_id(&self, id: &str) -> DeskResult<Option<CashDrawerState>>;

    fn record_drawer(&self, change: &DrawerChange) -> DeskResult<()> {
        self.append_movements(&change.state.id, change.state.shift, &change.new_movements)?;
        self.upsert_drawer(&change.state)
    }

    // ── Event log ───────────────────────────────────────
    fn append_event(&self, entry: &EventLogEntry) -> DeskResult<()>;
    /// Events in insertion order, optionally restricted to one type.
    fn events(&self, event_type: Option<&str>) -> DeskResult<Vec<EventLogEntry>>;
}

/// Fixed-width RFC 3339 so stored timestamps sort as text.
pub(crate) fn ts(at: Timestamp) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> DeskResult<Timestamp> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DeskError::Other(anyhow::anyhow!("bad timestamp '{raw}': {e}")))
}

pub struct SqliteJournal {
    conn: Mutex<Connection>,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl SqliteJournal {
    pub fn open(path: &str) -> DeskResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (:memory: ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> DeskResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases this returns a fresh, isolated database.
    pub fn reopen(&self) -> DeskResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> DeskResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../../migrations/001_cambio.sql"))?;
        conn.execute_batch(include_str!("../../../migrations/002_drawer_movements.sql"))?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> DeskResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DeskError::LockPoisoned("sqlite connection"))
    }

    // ── Event log ──────────────────────────────────────────────

    fn insert_event(&self, entry: &EventLogEntry) -> DeskResult<()> {
        self.conn()?.execute(
            "INSERT INTO event_log (at, source, event_type, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![ts(entry.at), entry.source, entry.event_type, entry.payload],
        )?;
        Ok(())
    }

    fn select_events(&self, event_type: Option<&str>) -> DeskResult<Vec<EventLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, at, source, event_type, payload
             FROM event_log
             WHERE ?1 IS NULL OR event_type = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![event_type], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, at, source, event_type, payload)| {
                Ok(EventLogEntry {
                    id: Some(id),
                    at: parse_ts(&at)?,
                    source,
                    event_type,
                    payload,
                })
            })
            .collect()
    }

    /// Bump and return the folio counter for (`prefix`, `business_date`).
    pub fn next_folio_seq(&self, prefix: &str, business_date: &str) -> DeskResult<u64> {
        let value: i64 = self.conn()?.query_row(
            "INSERT INTO folio_sequence (prefix, business_date, last_value)
             VALUES (?1, ?2, 1)
             ON CONFLICT(prefix, business_date)
             DO UPDATE SET last_value = last_value + 1
             RETURNING last_value",
            params![prefix, business_date],
            |r| r.get(0),
        )?;
        Ok(value as u64)
    }

    /// Current folio counter without advancing it.
    pub fn folio_seq(&self, prefix: &str, business_date: &str) -> DeskResult<u64> {
        let value: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT last_value FROM folio_sequence WHERE prefix = ?1 AND business_date = ?2",
                params![prefix, business_date],
                |r| r.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0) as u64)
    }
}

impl Journal for SqliteJournal {
    fn append_operation(&self, op: &Operation) -> DeskResult<()> {
        self.insert_operation(op)
    }

    fn update_operation(&self, op: &Operation) -> DeskResult<()> {
        self.replace_operation(op)
    }

    fn operation_by_folio(&self, folio: &str) -> DeskResult<Option<Operation>> {
        self.select_operation(folio)
    }

    fn operations(&self) -> DeskResult<Vec<Operation>> {
        self.select_operations()
    }

    fn append_alert(&self, alert: &Alert) -> DeskResult<()> {
        self.insert_alert(alert)
    }

    fn update_alert(&self, alert: &Alert) -> DeskResult<()> {
        self.replace_alert(alert)
    }

    fn alert_by_id(&self, id: &str) -> DeskResult<Option<Alert>> {
        self.select_alert(id)
    }

    fn alerts(&self) -> DeskResult<Vec<Alert>> {
        self.select_alerts()
    }

    fn upsert_client(&self, client: &Client) -> DeskResult<()> {
        self.save_client(client)
    }

    fn client_by_id(&self, id: &str) -> DeskResult<Option<Client>> {
        self.select_client(id)
    }

    fn clients(&self) -> DeskResult<Vec<Client>> {
        self.select_clients()
    }

    fn remove_client(&self, id: &str) -> DeskResult<()> {
        self.delete_client(id)
    }

    fn upsert_drawer(&self, state: &CashDrawerState) -> DeskResult<()> {
        self.save_drawer(state)
    }

    fn append_movements(&self, drawer_id: &str, shift: u64, movements: &[Movement]) -> DeskResult<()> {
        self.insert_movements(drawer_id, shift, movements)
    }

    fn drawer_by_id(&self, id: &str) -> DeskResult<Option<CashDrawerState>> {
        self.select_drawer(id)
    }

    fn append_event(&self, entry: &EventLogEntry) -> DeskResult<()> {
        self.insert_event(entry)
    }

    fn events(&self, event_type: Option<&str>) -> DeskResult<Vec<EventLogEntry>> {
        self.select_events(event_type)
    }
}
