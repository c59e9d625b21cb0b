//! In-process journal for tests and throwaway desks.

use super::Journal;
use crate::{
    alert::Alert,
    client::Client,
    drawer::{CashDrawerState, Movement},
    error::{DeskError, DeskResult},
    event::EventLogEntry,
    operation::Operation,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    operations: Vec<Operation>,
    alerts: Vec<Alert>,
    clients: HashMap<String, Client>,
    drawers: HashMap<String, CashDrawerState>,
    movements: HashMap<(String, u64), BTreeMap<u64, Movement>>,
    events: Vec<EventLogEntry>,
}

/// Same contract as `SqliteJournal`, nothing survives the process.
#[derive(Default)]
pub struct MemoryJournal {
    tables: RwLock<Tables>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> DeskResult<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| DeskError::LockPoisoned("memory journal"))
    }

    fn write(&self) -> DeskResult<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| DeskError::LockPoisoned("memory journal"))
    }
}

impl Journal for MemoryJournal {
    fn append_operation(&self, op: &Operation) -> DeskResult<()> {
        let mut t = self.write()?;
        if t.operations.iter().any(|o| o.folio == op.folio) {
            return Err(DeskError::InvariantViolation(format!(
                "folio {} already journaled",
                op.folio
            )));
        }
        t.operations.push(op.clone());
        Ok(())
    }

    fn update_operation(&self, op: &Operation) -> DeskResult<()> {
        let mut t = self.write()?;
        let slot = t
            .operations
            .iter_mut()
            .find(|o| o.folio == op.folio)
            .ok_or_else(|| DeskError::OperationNotFound(op.folio.clone()))?;
        *slot = op.clone();
        Ok(())
    }

    fn operation_by_folio(&self, folio: &str) -> DeskResult<Option<Operation>> {
        Ok(self.read()?.operations.iter().find(|o| o.folio == folio).cloned())
    }

    fn operations(&self) -> DeskResult<Vec<Operation>> {
        Ok(self.read()?.operations.clone())
    }

    fn append_alert(&self, alert: &Alert) -> DeskResult<()> {
        self.write()?.alerts.push(alert.clone());
        Ok(())
    }

    fn update_alert(&self, alert: &Alert) -> DeskResult<()> {
        let mut t = self.write()?;
        let slot = t
            .alerts
            .iter_mut()
            .find(|a| a.id == alert.id)
            .ok_or_else(|| DeskError::AlertNotFound(alert.id.clone()))?;
        *slot = alert.clone();
        Ok(())
    }

    fn alert_by_id(&self, id: &str) -> DeskResult<Option<Alert>> {
        Ok(self.read()?.alerts.iter().find(|a| a.id == id).cloned())
    }

    fn alerts(&self) -> DeskResult<Vec<Alert>> {
        Ok(self.read()?.alerts.clone())
    }

    fn upsert_client(&self, client: &Client) -> DeskResult<()> {
        self.write()?.clients.insert(client.id.clone(), client.clone());
        Ok(())
    }

    fn client_by_id(&self, id: &str) -> DeskResult<Option<Client>> {
        Ok(self.read()?.clients.get(id).cloned())
    }

    fn clients(&self) -> DeskResult<Vec<Client>> {
        let mut all: Vec<Client> = self.read()?.clients.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    fn remove_client(&self, id: &str) -> DeskResult<()> {
        self.write()?.clients.remove(id);
        Ok(())
    }

    fn upsert_drawer(&self, state: &CashDrawerState) -> DeskResult<()> {
        let mut t = self.write()?;
        if t.drawers.get(&state.id).is_some_and(|stored| stored.version > state.version) {
            return Ok(());
        }
        let mut row = state.clone();
        row.movements.clear();
        t.drawers.insert(state.id.clone(), row);
        Ok(())
    }

    fn append_movements(&self, drawer_id: &str, shift: u64, movements: &[Movement]) -> DeskResult<()> {
        let mut t = self.write()?;
        let stored = t.movements.entry((drawer_id.to_string(), shift)).or_default();
        for m in movements {
            stored.entry(m.seq).or_insert_with(|| m.clone());
        }
        Ok(())
    }

    fn drawer_by_id(&self, id: &str) -> DeskResult<Option<CashDrawerState>> {
        let t = self.read()?;
        Ok(t.drawers.get(id).map(|row| {
            let mut state = row.clone();
            state.movements = t
                .movements
                .get(&(id.to_string(), state.shift))
                .map(|m| m.values().cloned().collect())
                .unwrap_or_default();
            state
        }))
    }

    fn append_event(&self, entry: &EventLogEntry) -> DeskResult<()> {
        let mut t = self.write()?;
        let mut entry = entry.clone();
        entry.id = Some(t.events.len() as i64 + 1);
        t.events.push(entry);
        Ok(())
    }

    fn events(&self, event_type: Option<&str>) -> DeskResult<Vec<EventLogEntry>> {
        Ok(self
            .read()?
            .events
            .iter()
            .filter(|e| event_type.map_or(true, |t| e.event_type == t))
            .cloned()
            .collect())
    }
}
