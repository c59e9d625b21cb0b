//! Operation, alert, client and drawer rows.

use super::{ts, SqliteJournal};
use crate::{
    alert::Alert,
    client::Client,
    drawer::{CashDrawerState, Movement},
    error::{DeskError, DeskResult},
    operation::Operation,
};
use rusqlite::{params, OptionalExtension};

impl SqliteJournal {
    // ── Operations ─────────────────────────────────────────────

    pub(super) fn insert_operation(&self, op: &Operation) -> DeskResult<()> {
        let payload = serde_json::to_string(op)?;
        self.conn()?.execute(
            "INSERT INTO operation (id, folio, client_id, status, created_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                op.id,
                op.folio,
                op.client_id,
                op.status.as_str(),
                ts(op.created_at),
                payload,
            ],
        )?;
        Ok(())
    }

    pub(super) fn replace_operation(&self, op: &Operation) -> DeskResult<()> {
        let payload = serde_json::to_string(op)?;
        let changed = self.conn()?.execute(
            "UPDATE operation SET status = ?2, payload = ?3 WHERE folio = ?1",
            params![op.folio, op.status.as_str(), payload],
        )?;
        if changed == 0 {
            return Err(DeskError::OperationNotFound(op.folio.clone()));
        }
        Ok(())
    }

    pub(super) fn select_operation(&self, folio: &str) -> DeskResult<Option<Operation>> {
        let payload: Option<String> = self
            .conn()?
            .query_row(
                "SELECT payload FROM operation WHERE folio = ?1",
                params![folio],
                |r| r.get(0),
            )
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(DeskError::from))
            .transpose()
    }

    pub(super) fn select_operations(&self) -> DeskResult<Vec<Operation>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT payload FROM operation ORDER BY created_at ASC, folio ASC")?;
        let payloads = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(DeskError::from))
            .collect()
    }

    // ── Alerts ─────────────────────────────────────────────────

    pub(super) fn insert_alert(&self, alert: &Alert) -> DeskResult<()> {
        let payload = serde_json::to_string(alert)?;
        self.conn()?.execute(
            "INSERT INTO alert (id, client_id, severity, resolved, created_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                alert.id,
                alert.client_id,
                alert.severity.label(),
                alert.resolved as i32,
                ts(alert.created_at),
                payload,
            ],
        )?;
        Ok(())
    }

    pub(super) fn replace_alert(&self, alert: &Alert) -> DeskResult<()> {
        let payload = serde_json::to_string(alert)?;
        let changed = self.conn()?.execute(
            "UPDATE alert SET resolved = ?2, payload = ?3 WHERE id = ?1",
            params![alert.id, alert.resolved as i32, payload],
        )?;
        if changed == 0 {
            return Err(DeskError::AlertNotFound(alert.id.clone()));
        }
        Ok(())
    }

    pub(super) fn select_alert(&self, id: &str) -> DeskResult<Option<Alert>> {
        let payload: Option<String> = self
            .conn()?
            .query_row("SELECT payload FROM alert WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(DeskError::from))
            .transpose()
    }

    pub(super) fn select_alerts(&self) -> DeskResult<Vec<Alert>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT payload FROM alert ORDER BY created_at ASC, id ASC")?;
        let payloads = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(DeskError::from))
            .collect()
    }

    // ── Clients ────────────────────────────────────────────────

    pub(super) fn save_client(&self, client: &Client) -> DeskResult<()> {
        let payload = serde_json::to_string(client)?;
        let updated_at = client.modified_at.unwrap_or(client.created_at);
        self.conn()?.execute(
            "INSERT INTO client (id, full_name, status, updated_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                full_name = excluded.full_name,
                status = excluded.status,
                updated_at = excluded.updated_at,
                payload = excluded.payload",
            params![
                client.id,
                client.full_name,
                serde_json::to_string(&client.status)?,
                ts(updated_at),
                payload,
            ],
        )?;
        Ok(())
    }

    pub(super) fn select_client(&self, id: &str) -> DeskResult<Option<Client>> {
        let payload: Option<String> = self
            .conn()?
            .query_row("SELECT payload FROM client WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(DeskError::from))
            .transpose()
    }

    pub(super) fn select_clients(&self) -> DeskResult<Vec<Client>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT payload FROM client ORDER BY id ASC")?;
        let payloads = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(DeskError::from))
            .collect()
    }

    pub(super) fn delete_client(&self, id: &str) -> DeskResult<()> {
        self.conn()?
            .execute("DELETE FROM client WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ── Drawers ────────────────────────────────────────────────

    pub(super) fn save_drawer(&self, state: &CashDrawerState) -> DeskResult<()> {
        let mut payload = serde_json::to_value(state)?;
        if let Some(fields) = payload.as_object_mut() {
            fields.remove("movements");
        }
        let payload = serde_json::to_string(&payload)?;
        let updated_at = state.opened_at.map(ts).unwrap_or_default();
        let written = self.conn()?.execute(
            "INSERT INTO drawer_state (id, status, updated_at, payload)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at,
                payload = excluded.payload
             WHERE json_extract(excluded.payload, '$.version')
                >= COALESCE(json_extract(drawer_state.payload, '$.version'), 0)",
            params![
                state.id,
                serde_json::to_string(&state.status)?,
                updated_at,
                payload,
            ],
        )?;
        if written == 0 {
            log::debug!("drawer {} v{} is older than the stored state", state.id, state.version);
        }
        Ok(())
    }

    pub(super) fn insert_movements(&self, drawer_id: &str, shift: u64, movements: &[Movement]) -> DeskResult<()> {
        if movements.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO drawer_movement (drawer_id, shift, seq, at, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(drawer_id, shift, seq) DO NOTHING",
            )?;
            for m in movements {
                stmt.execute(params![
                    drawer_id,
                    shift as i64,
                    m.seq as i64,
                    ts(m.at),
                    serde_json::to_string(m)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn select_movements(&self, drawer_id: &str, shift: u64) -> DeskResult<Vec<Movement>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM drawer_movement
             WHERE drawer_id = ?1 AND shift = ?2
             ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map(params![drawer_id, shift as i64], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|p| serde_json::from_str(p).map_err(DeskError::from))
            .collect()
    }

    pub(super) fn select_drawer(&self, id: &str) -> DeskResult<Option<CashDrawerState>> {
        let payload: Option<String> = self
            .conn()?
            .query_row(
                "SELECT payload FROM drawer_state WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(payload) = payload else {
            return Ok(None);
        };
        let mut state: CashDrawerState = serde_json::from_str(&payload)?;
        state.movements = self.select_movements(id, state.shift)?;
        Ok(Some(state))
    }
}
