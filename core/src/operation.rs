//! Executed currency operations and folio issuance.
//!
//! RULE: An operation is immutable once completed. The only permitted change
//! afterwards is the explicit `Completed -> Reversed` transition.

use crate::{
    currency::Currency,
    error::{DeskError, DeskResult},
    quote::Direction,
    types::{EntityId, Timestamp},
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Completed,
    Cancelled,
    Reversed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Reversed => "reversed",
        }
    }

    pub fn can_transition_to(&self, to: OperationStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Completed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Completed, Self::Reversed)
        )
    }
}

/// A counted bundle of one denomination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenominationCount {
    pub value: Decimal,
    pub count: u32,
}

impl DenominationCount {
    pub fn subtotal(&self) -> Decimal {
        self.value * Decimal::from(self.count)
    }
}

/// Official identification shown at the counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdDocument {
    pub kind: String,
    pub number: String,
}

impl IdDocument {
    pub fn is_complete(&self) -> bool {
        !self.kind.trim().is_empty() && !self.number.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: EntityId,
    pub folio: String,
    pub quotation_id: EntityId,
    pub direction: Direction,
    pub currency_given: Currency,
    pub currency_received: Currency,
    pub amount_given: Decimal,
    pub amount_received: Decimal,
    pub applied_rate: Decimal,
    pub spread_pct: Decimal,
    pub fee: Decimal,
    pub margin: Decimal,
    pub usd_equivalent: Decimal,
    pub drawer_id: String,
    pub operator_id: String,
    pub operator_name: String,
    pub client_id: Option<EntityId>,
    pub client_name: String,
    pub client_phone: Option<String>,
    pub identification: Option<IdDocument>,
    pub received_counts: Vec<DenominationCount>,
    pub delivered_counts: Vec<DenominationCount>,
    pub fraud_score: u8,
    pub status: OperationStatus,
    pub created_at: Timestamp,
    /// Local business date the folio was issued for.
    pub business_date: NaiveDate,
    pub reversed_by: Option<String>,
    pub reversed_at: Option<Timestamp>,
    pub reversal_reason: Option<String>,
}

impl Operation {
    pub fn transition(&mut self, to: OperationStatus) -> DeskResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(DeskError::InvalidTransition {
                entity: format!("operation {}", self.folio),
                from: self.status.as_str().into(),
                to: to.as_str().into(),
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn reverse(&mut self, by: &str, reason: &str, now: Timestamp) -> DeskResult<()> {
        self.transition(OperationStatus::Reversed)?;
        self.reversed_by = Some(by.to_string());
        self.reversed_at = Some(now);
        self.reversal_reason = Some(reason.to_string());
        Ok(())
    }
}

// ── Folios ─────────────────────────────────────────────────────────

/// `PREFIX` + `YYMMDD` + `-` + four-digit sequence, e.g. `PRF251017-0001`.
pub fn format_folio(prefix: &str, date: NaiveDate, seq: u64) -> String {
    format!("{prefix}{}-{seq:04}", date.format("%y%m%d"))
}

/// Source of folio sequence numbers, one counter per prefix and business day.
pub trait FolioSequence: Send + Sync {
    /// Next number for (`prefix`, `date`), starting at 1.
    fn next(&self, prefix: &str, date: NaiveDate) -> DeskResult<u64>;

    fn issue(&self, prefix: &str, date: NaiveDate) -> DeskResult<String> {
        let seq = self.next(prefix, date)?;
        Ok(format_folio(prefix, date, seq))
    }
}

/// In-process sequence. Not shared between processes; use
/// `store::SqliteFolioSequence` when several desks write one database.
#[derive(Default)]
pub struct DailySequence {
    counters: Mutex<HashMap<(String, NaiveDate), u64>>,
}

impl DailySequence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FolioSequence for DailySequence {
    fn next(&self, prefix: &str, date: NaiveDate) -> DeskResult<u64> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| DeskError::LockPoisoned("folio sequence"))?;
        let counter = counters.entry((prefix.to_string(), date)).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}
