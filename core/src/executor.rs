//! Operation execution: the validation → commit pipeline.
//!
//! RULE: Every check runs before anything is mutated. The first failing
//! check short-circuits, and a rejected request leaves the quote book,
//! drawer, client and fraud windows exactly as they were.
//!
//! RULE: Once consumed, a quotation is only put back when the commit itself
//! fails. A committed operation is never rolled back by later bookkeeping
//! errors; it is reversed explicitly.
//!
//! RULE: Checks and commit of one execution, and every reversal, run under
//! the counter lock. Limits, fraud windows and the drawer are always judged
//! against the state the previous operation left behind.
//!
//! ORDER (fixed):
//!   1. quotation live
//!   2. identification when the amount requires it
//!   3. drawer open and able to pay out
//!   4. client not blocked, within limits
//!   5. fraud screening
//!   then: consume → folio → journal (pending) → drawer → completed →
//!   client → profile → fraud windows → event

use crate::{
    alert::{Alert, AlertStore},
    client::{ClientHistoryEntry, ClientRegistry},
    clock::Clock,
    drawer::{CashDrawerLedger, DrawerChange},
    error::{DeskError, DeskResult},
    event::{emit, DeskEvent},
    fraud::{FraudAnalysis, FraudDetectionEngine, OperationProbe},
    operation::{DenominationCount, FolioSequence, IdDocument, Operation, OperationStatus},
    profile::ProfileBook,
    quote::{Direction, QuoteEngine, Quotation},
    store::Journal,
    types::{new_id, EntityId, Timestamp},
};
use chrono::{FixedOffset, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Who is at the counter. An unknown `client_id` is served as a walk-in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: Option<EntityId>,
    pub name: String,
    pub phone: Option<String>,
    pub identification: Option<IdDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub quotation_id: EntityId,
    pub client: ClientInfo,
    /// Pieces the client hands over.
    #[serde(default)]
    pub received_counts: Vec<DenominationCount>,
    /// Pieces paid out to the client.
    #[serde(default)]
    pub delivered_counts: Vec<DenominationCount>,
    pub operator_id: String,
    pub operator_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub operation: Operation,
    pub analysis: FraudAnalysis,
    /// The stored alert, referencing the operation's folio.
    pub alert: Option<Alert>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationFilter {
    pub date: Option<NaiveDate>,
    pub direction: Option<Direction>,
    pub client_id: Option<EntityId>,
}

impl OperationFilter {
    fn matches(&self, op: &Operation) -> bool {
        self.date.is_none_or(|d| op.business_date == d)
            && self.direction.is_none_or(|d| op.direction == d)
            && self
                .client_id
                .as_deref()
                .is_none_or(|id| op.client_id.as_deref() == Some(id))
    }
}

/// Everything the checks established, carried into the commit.
struct Cleared {
    quotation: Quotation,
    client_id: Option<EntityId>,
    client_name: String,
    client_phone: Option<String>,
    identification: Option<IdDocument>,
    analysis: FraudAnalysis,
}

pub struct OperationExecutor {
    quotes: Arc<QuoteEngine>,
    drawer: Arc<CashDrawerLedger>,
    clients: Arc<ClientRegistry>,
    profiles: Arc<ProfileBook>,
    fraud: Arc<FraudDetectionEngine>,
    alerts: Arc<AlertStore>,
    journal: Arc<dyn Journal>,
    folios: Arc<dyn FolioSequence>,
    clock: Arc<dyn Clock>,
    drawer_id: String,
    folio_prefix: String,
    offset: FixedOffset,
    counter: Mutex<()>,
}

impl OperationExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        quotes: Arc<QuoteEngine>,
        drawer: Arc<CashDrawerLedger>,
        clients: Arc<ClientRegistry>,
        profiles: Arc<ProfileBook>,
        fraud: Arc<FraudDetectionEngine>,
        alerts: Arc<AlertStore>,
        journal: Arc<dyn Journal>,
        folios: Arc<dyn FolioSequence>,
        clock: Arc<dyn Clock>,
        drawer_id: &str,
        folio_prefix: &str,
        offset: FixedOffset,
    ) -> Self {
        Self {
            quotes,
            drawer,
            clients,
            profiles,
            fraud,
            alerts,
            journal,
            folios,
            clock,
            drawer_id: drawer_id.to_string(),
            folio_prefix: folio_prefix.to_string(),
            offset,
            counter: Mutex::new(()),
        }
    }

    fn counter(&self) -> DeskResult<MutexGuard<'_, ()>> {
        self.counter
            .lock()
            .map_err(|_| DeskError::LockPoisoned("execution counter"))
    }

    pub fn execute(&self, request: &ExecutionRequest) -> DeskResult<ExecutionResult> {
        let _counter = self.counter()?;
        let now = self.clock.now();
        let cleared = match self.clear(request, now) {
            Ok(cleared) => cleared,
            Err(e) => {
                if e.is_rejection() {
                    log::warn!("quotation {} rejected: {e}", request.quotation_id);
                    self.emit_quietly(
                        &DeskEvent::OperationRejected {
                            quotation_id: request.quotation_id.clone(),
                            reason: e.to_string(),
                        },
                        now,
                    );
                }
                return Err(e);
            }
        };
        self.commit(request, cleared, now)
    }

    // ── Checks ─────────────────────────────────────────────────────

    fn clear(&self, request: &ExecutionRequest, now: Timestamp) -> DeskResult<Cleared> {
        let quotation = self
            .quotes
            .book()
            .get(&request.quotation_id, now)
            .ok_or_else(|| DeskError::QuoteExpired {
                quotation_id: request.quotation_id.clone(),
            })?;

        let registered = request
            .client
            .client_id
            .as_deref()
            .and_then(|id| self.clients.get(id));
        if registered.is_none() {
            if let Some(id) = &request.client.client_id {
                log::warn!("client {id} is not registered, serving as walk-in");
            }
        }

        let identification = request
            .client
            .identification
            .clone()
            .filter(IdDocument::is_complete)
            .or_else(|| registered.as_ref().and_then(|c| c.id_document()));
        if quotation.requires_id && identification.is_none() {
            return Err(DeskError::IdentificationRequired);
        }

        self.drawer
            .ensure_can_pay(quotation.currency_received, quotation.amount_received)?;

        if let Some(client) = &registered {
            if client.is_blocked() {
                return Err(DeskError::ClientBlocked {
                    client_id: client.id.clone(),
                    reason: client.block_reason.clone().unwrap_or_default(),
                });
            }
            let check = self.clients.check_limits(&client.id, quotation.usd_equivalent)?;
            if !check.allowed {
                return Err(DeskError::LimitExceeded {
                    reason: check.reason.unwrap_or_default(),
                    remaining_daily: check.remaining_daily,
                });
            }
        }

        let client_name = match (&registered, request.client.name.trim()) {
            (Some(c), "") => c.full_name.clone(),
            (_, name) => name.to_string(),
        };
        let client_phone = request
            .client
            .phone
            .clone()
            .or_else(|| registered.as_ref().and_then(|c| c.phone.clone()));
        let client_id = registered.map(|c| c.id);

        let probe = OperationProbe {
            reference: quotation.id.clone(),
            client_id: client_id.clone(),
            client_name: client_name.clone(),
            amount_usd: quotation.usd_equivalent,
            at: now,
        };
        let analysis = self.fraud.analyze(&probe, now)?;
        if !analysis.approved {
            if let Some(alert) = &analysis.alert {
                self.raise_alert(alert.clone(), now)?;
            }
            return Err(DeskError::FraudBlocked {
                score: analysis.score,
                factors: analysis.factor_names(),
            });
        }

        Ok(Cleared {
            quotation,
            client_id,
            client_name,
            client_phone,
            identification,
            analysis,
        })
    }

    // ── Commit ─────────────────────────────────────────────────────

    fn commit(&self, request: &ExecutionRequest, cleared: Cleared, now: Timestamp) -> DeskResult<ExecutionResult> {
        let quotation = self.quotes.book().consume(&cleared.quotation.id, now)?;

        let (operation, drawer_change) = match self.book_operation(request, &cleared, &quotation, now) {
            Ok(booked) => booked,
            Err(e) => {
                if let Err(restore) = self.quotes.book().restore(quotation) {
                    log::error!("could not restore quotation {}: {restore}", cleared.quotation.id);
                }
                if let Some(alert) = &cleared.analysis.alert {
                    self.raise_alert(alert.clone(), now)?;
                }
                return Err(e);
            }
        };

        self.journal.record_drawer(&drawer_change)?;

        let amount_usd = operation.usd_equivalent;
        if let Some(client_id) = &operation.client_id {
            let entry = ClientHistoryEntry::from_operation(&operation);
            let client = self.clients.record_operation(client_id, entry, amount_usd, now)?;
            self.journal.upsert_client(&client)?;
            self.profiles
                .update(client_id, amount_usd.to_f64().unwrap_or(0.0), now)?;
        }

        self.fraud.record(&OperationProbe {
            reference: operation.folio.clone(),
            client_id: operation.client_id.clone(),
            client_name: operation.client_name.clone(),
            amount_usd,
            at: now,
        })?;

        let alert = match cleared.analysis.alert.clone() {
            Some(mut alert) => {
                alert.operation_ref = operation.folio.clone();
                self.raise_alert(alert.clone(), now)?;
                Some(alert)
            }
            None => None,
        };

        emit(
            self.journal.as_ref(),
            &DeskEvent::OperationExecuted {
                folio: operation.folio.clone(),
                direction: operation.direction,
                currency_given: operation.currency_given,
                currency_received: operation.currency_received,
                amount_given: operation.amount_given,
                amount_received: operation.amount_received,
                usd_equivalent: operation.usd_equivalent,
                client_id: operation.client_id.clone(),
                fraud_score: operation.fraud_score,
            },
            now,
        )?;
        log::info!(
            "operation {} executed: {} {} -> {} {} for {} (score {})",
            operation.folio,
            operation.amount_given,
            operation.currency_given,
            operation.amount_received,
            operation.currency_received,
            operation.client_name,
            operation.fraud_score,
        );

        Ok(ExecutionResult {
            operation,
            analysis: cleared.analysis,
            alert,
        })
    }

    /// Folio, pending journal row, drawer movement, completion.
    /// A failure here leaves the drawer untouched and the row cancelled.
    fn book_operation(
        &self,
        request: &ExecutionRequest,
        cleared: &Cleared,
        quotation: &Quotation,
        now: Timestamp,
    ) -> DeskResult<(Operation, DrawerChange)> {
        let business_date = now.with_timezone(&self.offset).date_naive();
        let folio = self.folios.issue(&self.folio_prefix, business_date)?;
        let mut op = Operation {
            id: new_id("op"),
            folio,
            quotation_id: quotation.id.clone(),
            direction: quotation.direction,
            currency_given: quotation.currency_given,
            currency_received: quotation.currency_received,
            amount_given: quotation.amount_given,
            amount_received: quotation.amount_received,
            applied_rate: quotation.applied_rate,
            spread_pct: quotation.spread_pct,
            fee: quotation.fee,
            margin: quotation.estimated_margin,
            usd_equivalent: quotation.usd_equivalent,
            drawer_id: self.drawer_id.clone(),
            operator_id: request.operator_id.clone(),
            operator_name: request.operator_name.clone(),
            client_id: cleared.client_id.clone(),
            client_name: cleared.client_name.clone(),
            client_phone: cleared.client_phone.clone(),
            identification: cleared.identification.clone(),
            received_counts: request.received_counts.clone(),
            delivered_counts: request.delivered_counts.clone(),
            fraud_score: cleared.analysis.score,
            status: OperationStatus::Pending,
            created_at: now,
            business_date,
            reversed_by: None,
            reversed_at: None,
            reversal_reason: None,
        };
        self.journal.append_operation(&op)?;

        let change = match self.drawer.apply_operation(&op) {
            Ok(change) => change,
            Err(e) => {
                op.transition(OperationStatus::Cancelled)?;
                self.journal.update_operation(&op)?;
                log::warn!("operation {} cancelled: {e}", op.folio);
                return Err(e);
            }
        };
        op.transition(OperationStatus::Completed)?;
        self.journal.update_operation(&op)?;
        Ok((op, change))
    }

    fn raise_alert(&self, alert: Alert, now: Timestamp) -> DeskResult<()> {
        log::warn!(
            "alert {} ({}, score {}) on {}",
            alert.id,
            alert.severity.label(),
            alert.score,
            alert.operation_ref
        );
        self.journal.append_alert(&alert)?;
        emit(
            self.journal.as_ref(),
            &DeskEvent::AlertRaised {
                alert_id: alert.id.clone(),
                category: alert.category,
                severity: alert.severity,
                score: alert.score,
                client_id: alert.client_id.clone(),
                blocked: alert.blocked,
            },
            now,
        )?;
        self.alerts.insert(alert)
    }

    fn emit_quietly(&self, event: &DeskEvent, at: Timestamp) {
        if let Err(e) = emit(self.journal.as_ref(), event, at) {
            log::error!("could not journal {} event: {e}", event.type_name());
        }
    }

    // ── Reversal and lookup ────────────────────────────────────────

    /// `Completed → Reversed` with the inverse drawer movement.
    pub fn reverse(&self, folio: &str, by: &str, reason: &str) -> DeskResult<Operation> {
        let _counter = self.counter()?;
        let now = self.clock.now();
        let mut op = self
            .journal
            .operation_by_folio(folio)?
            .ok_or_else(|| DeskError::OperationNotFound(folio.to_string()))?;
        let original = op.clone();
        op.reverse(by, reason, now)?;

        let change = self.drawer.reverse_operation(&original, now)?;
        self.journal.update_operation(&op)?;
        self.journal.record_drawer(&change)?;

        if let Some(client_id) = &op.client_id {
            match self.clients.record_reversal(client_id, op.usd_equivalent, op.created_at) {
                Ok(client) => self.journal.upsert_client(&client)?,
                Err(DeskError::ClientNotFound(_)) => {
                    log::warn!("reversed {folio} for client {client_id}, who is no longer registered")
                }
                Err(e) => return Err(e),
            }
        }

        emit(
            self.journal.as_ref(),
            &DeskEvent::OperationReversed {
                folio: folio.to_string(),
                by: by.to_string(),
                reason: reason.to_string(),
            },
            now,
        )?;
        Ok(op)
    }

    pub fn operation_by_folio(&self, folio: &str) -> DeskResult<Option<Operation>> {
        self.journal.operation_by_folio(folio)
    }

    /// Matching operations, newest first.
    pub fn operations(&self, filter: &OperationFilter) -> DeskResult<Vec<Operation>> {
        let mut ops: Vec<Operation> = self
            .journal
            .operations()?
            .into_iter()
            .filter(|op| filter.matches(op))
            .collect();
        ops.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.folio.cmp(&a.folio))
        });
        Ok(ops)
    }
}
