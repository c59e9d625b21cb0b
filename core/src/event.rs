//! Audit events written to the journal's event log.
//!
//! RULE: Every state change the desk makes is mirrored by exactly one event.
//! Variants are only ever appended, never removed or reordered.

use crate::{
    alert::{AlertCategory, Severity},
    client::KycLevel,
    currency::Currency,
    error::DeskResult,
    quote::Direction,
    store::Journal,
    types::{EntityId, Timestamp},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeskEvent {
    // ── Drawer ─────────────────────────────────────
    DrawerOpened {
        drawer_id: String,
        operator_id: String,
    },
    DrawerClosed {
        drawer_id: String,
        operations: u64,
        shift_margin: Decimal,
        balanced: bool,
    },

    // ── Operations ─────────────────────────────────
    OperationExecuted {
        folio: String,
        direction: Direction,
        currency_given: Currency,
        currency_received: Currency,
        amount_given: Decimal,
        amount_received: Decimal,
        usd_equivalent: Decimal,
        client_id: Option<EntityId>,
        fraud_score: u8,
    },
    OperationRejected {
        quotation_id: EntityId,
        reason: String,
    },
    OperationReversed {
        folio: String,
        by: String,
        reason: String,
    },

    // ── Fraud ──────────────────────────────────────
    AlertRaised {
        alert_id: EntityId,
        category: AlertCategory,
        severity: Severity,
        score: u8,
        client_id: Option<EntityId>,
        blocked: bool,
    },
    AlertResolved {
        alert_id: EntityId,
        by: String,
        false_positive: bool,
    },

    // ── Clients ────────────────────────────────────
    ClientCreated {
        client_id: EntityId,
        kyc_level: KycLevel,
    },
    ClientUpdated {
        client_id: EntityId,
        by: String,
    },
    KycVerified {
        client_id: EntityId,
        level: KycLevel,
        by: String,
    },
    ClientBlocked {
        client_id: EntityId,
        reason: String,
        by: String,
    },

    // ── Pricing ────────────────────────────────────
    PairRepriced {
        pair_id: String,
        buy_price: Decimal,
        sell_price: Decimal,
    },

    // ── Maintenance ────────────────────────────────
    MaintenanceRun {
        quotes_purged: usize,
        window_entries_pruned: usize,
    },
}

impl DeskEvent {
    /// Stable name for the `event_type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::DrawerOpened { .. }      => "drawer_opened",
            Self::DrawerClosed { .. }      => "drawer_closed",
            Self::OperationExecuted { .. } => "operation_executed",
            Self::OperationRejected { .. } => "operation_rejected",
            Self::OperationReversed { .. } => "operation_reversed",
            Self::AlertRaised { .. }       => "alert_raised",
            Self::AlertResolved { .. }     => "alert_resolved",
            Self::ClientCreated { .. }     => "client_created",
            Self::ClientUpdated { .. }     => "client_updated",
            Self::KycVerified { .. }       => "kyc_verified",
            Self::ClientBlocked { .. }     => "client_blocked",
            Self::PairRepriced { .. }      => "pair_repriced",
            Self::MaintenanceRun { .. }    => "maintenance_run",
        }
    }

    /// The service that emitted the event.
    pub fn source(&self) -> &'static str {
        match self {
            Self::DrawerOpened { .. } | Self::DrawerClosed { .. } => "drawer",
            Self::OperationExecuted { .. }
            | Self::OperationRejected { .. }
            | Self::OperationReversed { .. } => "executor",
            Self::AlertRaised { .. } | Self::AlertResolved { .. } => "fraud",
            Self::ClientCreated { .. }
            | Self::ClientUpdated { .. }
            | Self::KycVerified { .. }
            | Self::ClientBlocked { .. } => "clients",
            Self::PairRepriced { .. } => "pricing",
            Self::MaintenanceRun { .. } => "engine",
        }
    }
}

/// The event log entry as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub at: Timestamp,
    pub source: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized DeskEvent
}

impl EventLogEntry {
    pub fn from_event(event: &DeskEvent, at: Timestamp) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: None,
            at,
            source: event.source().to_string(),
            event_type: event.type_name().to_string(),
            payload: serde_json::to_string(event)?,
        })
    }

    pub fn event(&self) -> Result<DeskEvent, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

/// Serialize `event` and append it to the journal's event log.
pub fn emit(journal: &dyn Journal, event: &DeskEvent, at: Timestamp) -> DeskResult<()> {
    journal.append_event(&EventLogEntry::from_event(event, at)?)
}
