//! Cash drawer (till) ledger.
//!
//! RULE: Every balance mutation happens inside a single acquisition of the
//! drawer mutex. The payout check and the mutation it protects are never
//! split across two lock acquisitions.
//!
//! RULE: For every currency, opening + credits − debits recorded in the
//! movement history equals the current balance. `reconcile()` checks it.
//!
//! Denomination counts are advisory. They follow the counts supplied with
//! each operation and never block a commit.

use crate::{
    currency::Currency,
    error::{DeskError, DeskResult},
    operation::{DenominationCount, Operation},
    quote::Direction,
    types::Timestamp,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawerStatus {
    Closed,
    Open,
    Reconciling,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrencyBalance {
    pub amount: Decimal,
    /// Denomination value → pieces on hand.
    pub denominations: BTreeMap<Decimal, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawerAlertKind {
    LowBalance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawerAlert {
    pub kind: DrawerAlertKind,
    pub currency: Currency,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ShiftVolume {
    /// Received into the drawer.
    pub bought: Decimal,
    /// Paid out of the drawer.
    pub sold: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Opening,
    Credit,
    Debit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub seq: u64,
    pub at: Timestamp,
    pub currency: Currency,
    pub kind: MovementKind,
    pub amount: Decimal,
    pub folio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashDrawerState {
    pub id: String,
    pub name: String,
    pub status: DrawerStatus,
    pub operator_id: Option<String>,
    pub operator_name: Option<String>,
    pub opened_at: Option<Timestamp>,
    pub balances: BTreeMap<Currency, CurrencyBalance>,
    pub operations: u64,
    /// Operations where the house bought foreign currency.
    pub buys: u64,
    /// Operations where the house sold foreign currency.
    pub sells: u64,
    pub reversals: u64,
    pub bought_volume_usd: Decimal,
    pub sold_volume_usd: Decimal,
    pub shift_margin: Decimal,
    pub volumes: BTreeMap<Currency, ShiftVolume>,
    pub alerts: Vec<DrawerAlert>,
    /// Bumped by every mutation. A journal never replaces a newer state
    /// with an older one.
    #[serde(default)]
    pub version: u64,
    /// Incremented on every open; movements are journaled per shift.
    #[serde(default)]
    pub shift: u64,
    /// Current shift only. Journaled row by row, not inside the state.
    #[serde(default)]
    pub movements: Vec<Movement>,
}

impl CashDrawerState {
    pub fn balance(&self, currency: Currency) -> Decimal {
        self.balances
            .get(&currency)
            .map(|b| b.amount)
            .unwrap_or(Decimal::ZERO)
    }
}

/// What one mutation left behind, captured under the drawer lock: the
/// state without its movement history, plus the movements it appended.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawerChange {
    pub state: CashDrawerState,
    pub new_movements: Vec<Movement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationLine {
    pub currency: Currency,
    pub expected: Decimal,
    pub actual: Decimal,
    pub balanced: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeSummary {
    pub bought: Decimal,
    pub sold: Decimal,
    pub net: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftSummary {
    pub drawer_id: String,
    pub operator_id: Option<String>,
    pub operator_name: Option<String>,
    pub opened_at: Option<Timestamp>,
    pub closed_at: Timestamp,
    pub operations: u64,
    pub buys: u64,
    pub sells: u64,
    pub reversals: u64,
    pub bought_volume_usd: Decimal,
    pub sold_volume_usd: Decimal,
    pub volumes: BTreeMap<Currency, VolumeSummary>,
    pub shift_margin: Decimal,
    pub closing_balances: BTreeMap<Currency, Decimal>,
    pub reconciliation: Vec<ReconciliationLine>,
    pub balanced: bool,
}

/// Greedy split of an amount into physical pieces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub counts: Vec<DenominationCount>,
    /// What the denominations could not cover (coins below the smallest
    /// piece, or the full amount for currencies without denominations).
    pub remainder: Decimal,
}

/// Greedy decomposition over the currency's descending denominations.
pub fn decompose(amount: Decimal, currency: Currency) -> Breakdown {
    let mut remaining = amount.max(Decimal::ZERO);
    let mut counts = Vec::new();
    for &value in currency.denominations() {
        if remaining >= value {
            let pieces = (remaining / value).floor();
            remaining = currency.round(remaining - pieces * value);
            let count = pieces.to_u32().unwrap_or(u32::MAX);
            counts.push(DenominationCount { value, count });
        }
    }
    Breakdown {
        counts,
        remainder: remaining,
    }
}

fn reconcile_state(state: &CashDrawerState) -> Vec<ReconciliationLine> {
    let mut expected: BTreeMap<Currency, Decimal> = BTreeMap::new();
    for m in &state.movements {
        let entry = expected.entry(m.currency).or_default();
        match m.kind {
            MovementKind::Opening | MovementKind::Credit => *entry += m.amount,
            MovementKind::Debit => *entry -= m.amount,
        }
    }
    Currency::ALL
        .into_iter()
        .filter(|c| expected.contains_key(c) || state.balances.contains_key(c))
        .map(|currency| {
            let expected = expected.get(&currency).copied().unwrap_or_default();
            let actual = state.balance(currency);
            ReconciliationLine {
                currency,
                expected,
                actual,
                balanced: expected == actual,
            }
        })
        .collect()
}

pub struct CashDrawerLedger {
    state: Mutex<CashDrawerState>,
    low_balance: BTreeMap<Currency, Decimal>,
}

impl CashDrawerLedger {
    /// A closed drawer holding `opening_float`.
    pub fn new(
        id: &str,
        name: &str,
        opening_float: &BTreeMap<Currency, Decimal>,
        low_balance: BTreeMap<Currency, Decimal>,
        now: Timestamp,
    ) -> Self {
        let balances = opening_float
            .iter()
            .map(|(&currency, &amount)| {
                let denominations = decompose(amount, currency)
                    .counts
                    .into_iter()
                    .map(|d| (d.value, u64::from(d.count)))
                    .collect();
                (currency, CurrencyBalance { amount, denominations })
            })
            .collect();
        let mut state = CashDrawerState {
            id: id.to_string(),
            name: name.to_string(),
            status: DrawerStatus::Closed,
            operator_id: None,
            operator_name: None,
            opened_at: None,
            balances,
            operations: 0,
            buys: 0,
            sells: 0,
            reversals: 0,
            bought_volume_usd: Decimal::ZERO,
            sold_volume_usd: Decimal::ZERO,
            shift_margin: Decimal::ZERO,
            volumes: BTreeMap::new(),
            alerts: Vec::new(),
            version: 0,
            shift: 0,
            movements: Vec::new(),
        };
        record_opening(&mut state, now);
        Self::from_state(state, low_balance)
    }

    /// Resume from a persisted state.
    pub fn from_state(state: CashDrawerState, low_balance: BTreeMap<Currency, Decimal>) -> Self {
        Self {
            state: Mutex::new(state),
            low_balance,
        }
    }

    fn lock(&self) -> DeskResult<MutexGuard<'_, CashDrawerState>> {
        self.state
            .lock()
            .map_err(|_| DeskError::LockPoisoned("cash drawer"))
    }

    pub fn snapshot(&self) -> DeskResult<CashDrawerState> {
        Ok(self.lock()?.clone())
    }

    pub fn status(&self) -> DeskResult<DrawerStatus> {
        Ok(self.lock()?.status)
    }

    pub fn balance(&self, currency: Currency) -> DeskResult<Decimal> {
        Ok(self.lock()?.balance(currency))
    }

    pub fn movements(&self) -> DeskResult<Vec<Movement>> {
        Ok(self.lock()?.movements.clone())
    }

    pub fn reconcile(&self) -> DeskResult<Vec<ReconciliationLine>> {
        let state = self.lock()?;
        Ok(reconcile_state(&state))
    }

    /// The whole current shift as one change, for a first write.
    pub fn full_change(&self) -> DeskResult<DrawerChange> {
        let mut state = self.lock()?;
        Ok(change_since(&mut state, 0))
    }

    pub fn open(&self, operator_id: &str, operator_name: &str, now: Timestamp) -> DeskResult<DrawerChange> {
        let mut state = self.lock()?;
        if state.status != DrawerStatus::Closed {
            return Err(DeskError::DrawerAlreadyOpen {
                operator_id: state.operator_id.clone().unwrap_or_default(),
            });
        }
        state.status = DrawerStatus::Open;
        state.operator_id = Some(operator_id.to_string());
        state.operator_name = Some(operator_name.to_string());
        state.opened_at = Some(now);
        state.shift += 1;
        state.version += 1;
        reset_shift(&mut state);
        record_opening(&mut state, now);
        self.refresh_alerts(&mut state);
        log::info!("drawer {} opened by {operator_name} (shift {})", state.id, state.shift);
        Ok(change_since(&mut state, 0))
    }

    pub fn close(&self, now: Timestamp) -> DeskResult<(ShiftSummary, DrawerChange)> {
        let mut state = self.lock()?;
        if state.status != DrawerStatus::Open {
            return Err(DeskError::DrawerClosed);
        }
        state.status = DrawerStatus::Reconciling;

        let reconciliation = reconcile_state(&state);
        let balanced = reconciliation.iter().all(|l| l.balanced);
        if !balanced {
            log::error!("drawer {} does not reconcile at close: {reconciliation:?}", state.id);
        }
        let volumes = state
            .volumes
            .iter()
            .map(|(&c, v)| {
                (c, VolumeSummary {
                    bought: v.bought,
                    sold: v.sold,
                    net: v.bought - v.sold,
                })
            })
            .collect();
        let summary = ShiftSummary {
            drawer_id: state.id.clone(),
            operator_id: state.operator_id.clone(),
            operator_name: state.operator_name.clone(),
            opened_at: state.opened_at,
            closed_at: now,
            operations: state.operations,
            buys: state.buys,
            sells: state.sells,
            reversals: state.reversals,
            bought_volume_usd: state.bought_volume_usd,
            sold_volume_usd: state.sold_volume_usd,
            volumes,
            shift_margin: state.shift_margin,
            closing_balances: state.balances.iter().map(|(&c, b)| (c, b.amount)).collect(),
            reconciliation,
            balanced,
        };

        reset_shift(&mut state);
        state.operator_id = None;
        state.operator_name = None;
        state.status = DrawerStatus::Closed;
        state.version += 1;
        log::info!(
            "drawer {} closed: {} operations, margin {}",
            summary.drawer_id, summary.operations, summary.shift_margin
        );
        let from = state.movements.len();
        Ok((summary, change_since(&mut state, from)))
    }

    /// Fails with `DrawerClosed` or `InsufficientCash` without mutating.
    pub fn ensure_can_pay(&self, currency: Currency, amount: Decimal) -> DeskResult<()> {
        let state = self.lock()?;
        check_payable(&state, currency, amount)
    }

    /// Commit a completed operation: credit what the client handed over,
    /// debit what the client takes away.
    pub fn apply_operation(&self, op: &Operation) -> DeskResult<DrawerChange> {
        let mut state = self.lock()?;
        check_payable(&state, op.currency_received, op.amount_received)?;

        let from = state.movements.len();
        let seq_base = from as u64;
        credit(&mut state, op.currency_given, op.amount_given, &op.received_counts);
        debit(&mut state, op.currency_received, op.amount_received, &op.delivered_counts);
        state.movements.push(Movement {
            seq: seq_base,
            at: op.created_at,
            currency: op.currency_given,
            kind: MovementKind::Credit,
            amount: op.amount_given,
            folio: Some(op.folio.clone()),
        });
        state.movements.push(Movement {
            seq: seq_base + 1,
            at: op.created_at,
            currency: op.currency_received,
            kind: MovementKind::Debit,
            amount: op.amount_received,
            folio: Some(op.folio.clone()),
        });

        state.operations += 1;
        match op.direction {
            Direction::ClientSells => {
                state.buys += 1;
                state.bought_volume_usd += op.usd_equivalent;
            }
            Direction::ClientBuys => {
                state.sells += 1;
                state.sold_volume_usd += op.usd_equivalent;
            }
        }
        state.volumes.entry(op.currency_given).or_default().bought += op.amount_given;
        state.volumes.entry(op.currency_received).or_default().sold += op.amount_received;
        state.shift_margin += op.margin;
        state.version += 1;

        check_non_negative(&state, op.currency_received)?;
        self.refresh_alerts(&mut state);
        Ok(change_since(&mut state, from))
    }

    /// Undo a committed operation with the inverse movement.
    pub fn reverse_operation(&self, op: &Operation, now: Timestamp) -> DeskResult<DrawerChange> {
        let mut state = self.lock()?;
        check_payable(&state, op.currency_given, op.amount_given)?;

        let from = state.movements.len();
        let seq_base = from as u64;
        debit(&mut state, op.currency_given, op.amount_given, &op.received_counts);
        credit(&mut state, op.currency_received, op.amount_received, &op.delivered_counts);
        state.movements.push(Movement {
            seq: seq_base,
            at: now,
            currency: op.currency_given,
            kind: MovementKind::Debit,
            amount: op.amount_given,
            folio: Some(op.folio.clone()),
        });
        state.movements.push(Movement {
            seq: seq_base + 1,
            at: now,
            currency: op.currency_received,
            kind: MovementKind::Credit,
            amount: op.amount_received,
            folio: Some(op.folio.clone()),
        });

        state.reversals += 1;
        let given = state.volumes.entry(op.currency_given).or_default();
        given.bought -= op.amount_given;
        let received = state.volumes.entry(op.currency_received).or_default();
        received.sold -= op.amount_received;
        match op.direction {
            Direction::ClientSells => state.bought_volume_usd -= op.usd_equivalent,
            Direction::ClientBuys => state.sold_volume_usd -= op.usd_equivalent,
        }
        state.shift_margin -= op.margin;
        state.version += 1;

        check_non_negative(&state, op.currency_given)?;
        self.refresh_alerts(&mut state);
        log::warn!("operation {} reversed at drawer {}", op.folio, state.id);
        Ok(change_since(&mut state, from))
    }

    fn refresh_alerts(&self, state: &mut CashDrawerState) {
        let alerts = self
            .low_balance
            .iter()
            .filter(|(currency, threshold)| state.balance(**currency) < **threshold)
            .map(|(&currency, threshold)| DrawerAlert {
                kind: DrawerAlertKind::LowBalance,
                currency,
                message: format!(
                    "{currency} balance {} is below {threshold}",
                    state.balance(currency)
                ),
            })
            .collect();
        state.alerts = alerts;
    }
}

// ── State helpers (caller holds the lock) ──────────────────────────

fn check_payable(state: &CashDrawerState, currency: Currency, amount: Decimal) -> DeskResult<()> {
    if state.status != DrawerStatus::Open {
        return Err(DeskError::DrawerClosed);
    }
    let available = state.balance(currency);
    if available < amount {
        return Err(DeskError::InsufficientCash {
            currency,
            required: amount,
            available,
        });
    }
    Ok(())
}

fn check_non_negative(state: &CashDrawerState, currency: Currency) -> DeskResult<()> {
    let balance = state.balance(currency);
    if balance < Decimal::ZERO {
        log::error!("drawer {} went negative in {currency}: {balance}", state.id);
        return Err(DeskError::InvariantViolation(format!(
            "negative {currency} balance {balance} in drawer {}",
            state.id
        )));
    }
    Ok(())
}

fn credit(state: &mut CashDrawerState, currency: Currency, amount: Decimal, counts: &[DenominationCount]) {
    let balance = state.balances.entry(currency).or_default();
    balance.amount += amount;
    for d in counts {
        *balance.denominations.entry(d.value).or_insert(0) += u64::from(d.count);
    }
}

fn debit(state: &mut CashDrawerState, currency: Currency, amount: Decimal, counts: &[DenominationCount]) {
    let balance = state.balances.entry(currency).or_default();
    balance.amount -= amount;
    for d in counts {
        let pieces = balance.denominations.entry(d.value).or_insert(0);
        *pieces = pieces.saturating_sub(u64::from(d.count));
    }
}

fn change_since(state: &mut CashDrawerState, from: usize) -> DrawerChange {
    let movements = std::mem::take(&mut state.movements);
    let header = state.clone();
    let new_movements = movements.get(from..).unwrap_or_default().to_vec();
    state.movements = movements;
    DrawerChange {
        state: header,
        new_movements,
    }
}

fn reset_shift(state: &mut CashDrawerState) {
    state.operations = 0;
    state.buys = 0;
    state.sells = 0;
    state.reversals = 0;
    state.bought_volume_usd = Decimal::ZERO;
    state.sold_volume_usd = Decimal::ZERO;
    state.shift_margin = Decimal::ZERO;
    state.volumes.clear();
    state.alerts.clear();
}

fn record_opening(state: &mut CashDrawerState, now: Timestamp) {
    state.movements.clear();
    let opening: Vec<_> = state.balances.iter().map(|(&c, b)| (c, b.amount)).collect();
    for (seq, (currency, amount)) in opening.into_iter().enumerate() {
        state.movements.push(Movement {
            seq: seq as u64,
            at: now,
            currency,
            kind: MovementKind::Opening,
            amount,
            folio: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decompose_is_greedy_and_keeps_the_remainder() {
        let b = decompose(dec!(1985.50), Currency::Mxn);
        let pieces: Vec<(Decimal, u32)> = b.counts.iter().map(|d| (d.value, d.count)).collect();
        assert_eq!(
            pieces,
            vec![
                (dec!(1000), 1),
                (dec!(500), 1),
                (dec!(200), 2),
                (dec!(50), 1),
                (dec!(20), 1),
                (dec!(10), 1),
                (dec!(5), 1),
            ]
        );
        assert_eq!(b.remainder, dec!(0.50));
        let covered: Decimal = b.counts.iter().map(|d| d.subtotal()).sum();
        assert_eq!(covered + b.remainder, dec!(1985.50));
    }

    #[test]
    fn currencies_without_denominations_keep_everything_as_remainder() {
        let b = decompose(dec!(250), Currency::Usdt);
        assert!(b.counts.is_empty());
        assert_eq!(b.remainder, dec!(250));
    }
}
