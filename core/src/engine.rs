//! The desk facade: builds every service once and exposes the operations
//! a front end calls.
//!
//! WIRING ORDER (leaf first, fixed):
//!   1. Currency pairs
//!   2. Quote engine
//!   3. Cash drawer (resumed from the journal when present)
//!   4. Client registry (resumed from the journal)
//!   5. Behaviour profiles and fraud windows (replayed from operations)
//!   6. Alert store (resumed from the journal)
//!   7. Executor, forecaster, spread advisor
//!
//! RULES:
//!   - No service reaches for a global; everything is injected here.
//!   - Every state change made through the facade is journaled and
//!     mirrored by one event in the event log.

use crate::{
    alert::{Alert, AlertFilter, AlertStats, AlertStore},
    client::{
        Client, ClientFilter, ClientHistoryEntry, ClientRegistry, ClientStats, CustomLimits,
        DeleteOutcome, Identification, KycLevel, NewClient, ClientUpdate,
    },
    clock::Clock,
    config::DeskConfig,
    currency::Currency,
    drawer::{CashDrawerLedger, CashDrawerState, ShiftSummary},
    error::{DeskError, DeskResult},
    event::{emit, DeskEvent, EventLogEntry},
    executor::{ExecutionRequest, ExecutionResult, OperationExecutor, OperationFilter},
    forecast::{DemandForecast, DemandForecaster, SpreadAdvisor, SpreadRecommendation},
    fraud::{FraudAnalysis, FraudDetectionEngine, OperationProbe, PruneReport},
    operation::{DailySequence, FolioSequence, Operation, OperationStatus},
    pair::{CurrencyPairConfig, CurrencyPairRegistry},
    profile::ProfileBook,
    quote::{QuoteEngine, QuoteRequest, Quotation},
    store::{Journal, MemoryJournal, SqliteFolioSequence, SqliteJournal},
    types::Page,
};
use chrono::{Duration, Timelike};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub quotes_purged: usize,
    pub windows: PruneReport,
}

pub struct DeskEngine {
    config: DeskConfig,
    clock: Arc<dyn Clock>,
    journal: Arc<dyn Journal>,
    pairs: Arc<CurrencyPairRegistry>,
    quotes: Arc<QuoteEngine>,
    drawer: Arc<CashDrawerLedger>,
    clients: Arc<ClientRegistry>,
    profiles: Arc<ProfileBook>,
    fraud: Arc<FraudDetectionEngine>,
    alerts: Arc<AlertStore>,
    executor: OperationExecutor,
    forecaster: DemandForecaster,
    advisor: SpreadAdvisor,
}

impl DeskEngine {
    /// A desk whose journal lives only in memory.
    pub fn in_memory(config: DeskConfig, clock: Arc<dyn Clock>) -> DeskResult<Self> {
        Self::build(
            config,
            clock,
            Arc::new(MemoryJournal::new()),
            Arc::new(DailySequence::new()),
        )
    }

    /// A desk journaling to the SQLite file at `path` (migrated on open).
    pub fn open_sqlite(config: DeskConfig, clock: Arc<dyn Clock>, path: &str) -> DeskResult<Self> {
        let journal = Arc::new(SqliteJournal::open(path)?);
        journal.migrate()?;
        Self::with_sqlite(config, clock, journal)
    }

    /// A desk on an already opened and migrated SQLite journal.
    pub fn with_sqlite(
        config: DeskConfig,
        clock: Arc<dyn Clock>,
        journal: Arc<SqliteJournal>,
    ) -> DeskResult<Self> {
        let folios = Arc::new(SqliteFolioSequence::new(journal.clone()));
        Self::build(config, clock, journal, folios)
    }

    /// Wire every service and resume whatever the journal already holds.
    pub fn build(
        config: DeskConfig,
        clock: Arc<dyn Clock>,
        journal: Arc<dyn Journal>,
        folios: Arc<dyn FolioSequence>,
    ) -> DeskResult<Self> {
        config.validate()?;
        let now = clock.now();
        let offset = config.desk.local_offset();

        let pairs = Arc::new(CurrencyPairRegistry::from_seeds(&config.pairs, now)?);
        let quotes = Arc::new(QuoteEngine::new(
            pairs.clone(),
            clock.clone(),
            config.desk.quote_ttl_secs,
        ));

        let drawer = match journal.drawer_by_id(&config.desk.drawer_id)? {
            Some(state) => {
                log::info!("drawer {} resumed ({:?})", state.id, state.status);
                CashDrawerLedger::from_state(state, config.desk.low_balance.clone())
            }
            None => {
                let ledger = CashDrawerLedger::new(
                    &config.desk.drawer_id,
                    &config.desk.drawer_name,
                    &config.desk.opening_float,
                    config.desk.low_balance.clone(),
                    now,
                );
                journal.record_drawer(&ledger.full_change()?)?;
                ledger
            }
        };
        let drawer = Arc::new(drawer);

        let clients = Arc::new(ClientRegistry::new(
            config.kyc.clone(),
            config.risk.clone(),
            clock.clone(),
            offset,
        ));
        let profiles = Arc::new(ProfileBook::new());
        let fraud = Arc::new(FraudDetectionEngine::new(
            config.fraud.clone(),
            offset,
            profiles.clone(),
        ));
        let alerts = Arc::new(AlertStore::new());

        resume(&*journal, &clients, &profiles, &fraud, &alerts, &config, now)?;

        let executor = OperationExecutor::new(
            quotes.clone(),
            drawer.clone(),
            clients.clone(),
            profiles.clone(),
            fraud.clone(),
            alerts.clone(),
            journal.clone(),
            folios,
            clock.clone(),
            &config.desk.drawer_id,
            &config.desk.folio_prefix,
            offset,
        );

        Ok(Self {
            forecaster: DemandForecaster::new(config.forecast.clone()),
            advisor: SpreadAdvisor::new(config.forecast.clone()),
            config,
            clock,
            journal,
            pairs,
            quotes,
            drawer,
            clients,
            profiles,
            fraud,
            alerts,
            executor,
        })
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn config(&self) -> &DeskConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn journal(&self) -> &Arc<dyn Journal> {
        &self.journal
    }

    pub fn pairs(&self) -> &CurrencyPairRegistry {
        &self.pairs
    }

    pub fn quotes(&self) -> &QuoteEngine {
        &self.quotes
    }

    pub fn drawer(&self) -> &CashDrawerLedger {
        &self.drawer
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn profiles(&self) -> &ProfileBook {
        &self.profiles
    }

    pub fn fraud(&self) -> &FraudDetectionEngine {
        &self.fraud
    }

    pub fn alert_store(&self) -> &AlertStore {
        &self.alerts
    }

    fn emit(&self, event: DeskEvent) -> DeskResult<()> {
        emit(self.journal.as_ref(), &event, self.clock.now())
    }

    // ── Quoting and execution ──────────────────────────────────────

    pub fn quote(&self, request: &QuoteRequest) -> DeskResult<Quotation> {
        self.quotes.quote(request)
    }

    pub fn execute(&self, request: &ExecutionRequest) -> DeskResult<ExecutionResult> {
        self.executor.execute(request)
    }

    pub fn reverse_operation(&self, folio: &str, by: &str, reason: &str) -> DeskResult<Operation> {
        self.executor.reverse(folio, by, reason)
    }

    pub fn operation_by_folio(&self, folio: &str) -> DeskResult<Option<Operation>> {
        self.executor.operation_by_folio(folio)
    }

    pub fn operations(&self, filter: &OperationFilter) -> DeskResult<Vec<Operation>> {
        self.executor.operations(filter)
    }

    pub fn update_prices(
        &self,
        pair_id: &str,
        buy_price: Decimal,
        sell_price: Decimal,
    ) -> DeskResult<CurrencyPairConfig> {
        let pair = self
            .pairs
            .update_prices(pair_id, buy_price, sell_price, self.clock.now())?;
        self.emit(DeskEvent::PairRepriced {
            pair_id: pair.id.clone(),
            buy_price,
            sell_price,
        })?;
        Ok(pair)
    }

    // ── Drawer ─────────────────────────────────────────────────────

    pub fn open_drawer(&self, operator_id: &str, operator_name: &str) -> DeskResult<CashDrawerState> {
        let change = self.drawer.open(operator_id, operator_name, self.clock.now())?;
        self.journal.record_drawer(&change)?;
        // A fresh shift holds only its opening movements.
        let mut state = change.state;
        state.movements = change.new_movements;
        self.emit(DeskEvent::DrawerOpened {
            drawer_id: state.id.clone(),
            operator_id: operator_id.to_string(),
        })?;
        Ok(state)
    }

    pub fn close_drawer(&self) -> DeskResult<ShiftSummary> {
        let (summary, change) = self.drawer.close(self.clock.now())?;
        self.journal.record_drawer(&change)?;
        self.emit(DeskEvent::DrawerClosed {
            drawer_id: summary.drawer_id.clone(),
            operations: summary.operations,
            shift_margin: summary.shift_margin,
            balanced: summary.balanced,
        })?;
        Ok(summary)
    }

    // ── Clients ────────────────────────────────────────────────────

    pub fn create_client(&self, new: NewClient) -> DeskResult<Client> {
        let client = self.clients.create(new)?;
        self.journal.upsert_client(&client)?;
        self.emit(DeskEvent::ClientCreated {
            client_id: client.id.clone(),
            kyc_level: client.kyc_level,
        })?;
        Ok(client)
    }

    pub fn create_quick_client(&self, name: &str, phone: Option<&str>, by: &str) -> DeskResult<Client> {
        let client = self.clients.create_quick(name, phone, by)?;
        self.journal.upsert_client(&client)?;
        self.emit(DeskEvent::ClientCreated {
            client_id: client.id.clone(),
            kyc_level: client.kyc_level,
        })?;
        Ok(client)
    }

    fn saved(&self, client: Client, by: &str) -> DeskResult<Client> {
        self.journal.upsert_client(&client)?;
        self.emit(DeskEvent::ClientUpdated {
            client_id: client.id.clone(),
            by: by.to_string(),
        })?;
        Ok(client)
    }

    pub fn update_client(&self, id: &str, update: ClientUpdate, by: &str) -> DeskResult<Client> {
        let client = self.clients.update(id, update, by)?;
        self.saved(client, by)
    }

    pub fn add_identification(&self, id: &str, identification: Identification, by: &str) -> DeskResult<Client> {
        let client = self.clients.add_identification(id, identification, by)?;
        self.saved(client, by)
    }

    pub fn set_custom_limits(&self, id: &str, limits: CustomLimits, by: &str) -> DeskResult<Client> {
        let client = self.clients.set_custom_limits(id, limits, by)?;
        self.saved(client, by)
    }

    pub fn reset_limits(&self, id: &str, by: &str) -> DeskResult<Client> {
        let client = self.clients.reset_limits(id, by)?;
        self.saved(client, by)
    }

    pub fn add_to_watch_list(&self, id: &str, reason: &str, by: &str) -> DeskResult<Client> {
        let client = self.clients.add_to_watch_list(id, reason, by)?;
        self.saved(client, by)
    }

    pub fn unblock_client(&self, id: &str, by: &str) -> DeskResult<Client> {
        let client = self.clients.unblock(id, by)?;
        self.saved(client, by)
    }

    pub fn verify_kyc(&self, id: &str, level: KycLevel, by: &str) -> DeskResult<Client> {
        let client = self.clients.verify_kyc(id, level, by)?;
        self.journal.upsert_client(&client)?;
        self.emit(DeskEvent::KycVerified {
            client_id: client.id.clone(),
            level,
            by: by.to_string(),
        })?;
        Ok(client)
    }

    pub fn block_client(&self, id: &str, reason: &str, by: &str) -> DeskResult<Client> {
        let client = self.clients.block(id, reason, by)?;
        self.journal.upsert_client(&client)?;
        self.emit(DeskEvent::ClientBlocked {
            client_id: client.id.clone(),
            reason: reason.to_string(),
            by: by.to_string(),
        })?;
        Ok(client)
    }

    pub fn delete_client(&self, id: &str, by: &str) -> DeskResult<DeleteOutcome> {
        let outcome = self.clients.delete(id, by)?;
        match outcome {
            DeleteOutcome::Deactivated => {
                if let Some(client) = self.clients.get(id) {
                    self.journal.upsert_client(&client)?;
                }
            }
            DeleteOutcome::Removed => self.journal.remove_client(id)?,
        }
        self.emit(DeskEvent::ClientUpdated {
            client_id: id.to_string(),
            by: by.to_string(),
        })?;
        Ok(outcome)
    }

    pub fn search_clients(&self, filter: &ClientFilter, page: usize, page_size: usize) -> DeskResult<Page<Client>> {
        self.clients.search(filter, page, page_size)
    }

    pub fn client_stats(&self) -> ClientStats {
        self.clients.stats()
    }

    // ── Fraud and alerts ───────────────────────────────────────────

    /// Score a probe without touching the rolling windows.
    pub fn analyze(&self, probe: &OperationProbe) -> DeskResult<FraudAnalysis> {
        self.fraud.analyze(probe, self.clock.now())
    }

    pub fn alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.alerts.list(filter)
    }

    pub fn alert_stats(&self) -> AlertStats {
        self.alerts.stats()
    }

    pub fn resolve_alert(
        &self,
        id: &str,
        resolution: &str,
        by: &str,
        false_positive: bool,
    ) -> DeskResult<Alert> {
        let alert = self
            .alerts
            .resolve(id, resolution, by, false_positive, self.clock.now())?;
        self.journal.update_alert(&alert)?;
        if let (true, Some(client_id)) = (false_positive, &alert.client_id) {
            self.profiles.note_false_positive(client_id)?;
        }
        self.emit(DeskEvent::AlertResolved {
            alert_id: alert.id.clone(),
            by: by.to_string(),
            false_positive,
        })?;
        Ok(alert)
    }

    // ── Forecasting ────────────────────────────────────────────────

    /// Project demand for the days after today (local business date).
    pub fn forecast_demand(&self, currency: Currency, days_ahead: u32) -> DeskResult<Vec<DemandForecast>> {
        let today = self.config.desk.local_time(self.clock.now()).date_naive();
        let history = self.journal.operations()?;
        Ok(self.forecaster.forecast(currency, days_ahead, today, &history))
    }

    /// Advice on the pair's sell-side spread for the current local hour.
    pub fn recommend_spread(&self, pair_id: &str) -> DeskResult<SpreadRecommendation> {
        let pair = self.pairs.get(pair_id).ok_or_else(|| DeskError::InvalidPair {
            pair_id: pair_id.to_string(),
            reason: "no such pair".into(),
        })?;
        let now = self.clock.now();
        let hour = self.config.desk.local_time(now).hour();
        Ok(self.advisor.recommend(pair_id, pair.spread_sell_pct, hour, now))
    }

    // ── Maintenance ────────────────────────────────────────────────

    /// Hourly housekeeping: drop expired quotations and stale window entries.
    pub fn run_maintenance(&self) -> DeskResult<MaintenanceReport> {
        let now = self.clock.now();
        let quotes_purged = self.quotes.book().purge_expired(now)?;
        let windows = self.fraud.prune(now)?;
        self.emit(DeskEvent::MaintenanceRun {
            quotes_purged,
            window_entries_pruned: windows.client_entries + windows.system_entries,
        })?;
        log::info!(
            "maintenance: {quotes_purged} quotations purged, {} window entries pruned",
            windows.client_entries + windows.system_entries
        );
        Ok(MaintenanceReport { quotes_purged, windows })
    }

    pub fn events(&self, event_type: Option<&str>) -> DeskResult<Vec<EventLogEntry>> {
        self.journal.events(event_type)
    }
}

/// Rebuild in-memory state from the journal: clients and their history,
/// behaviour profiles, recent fraud windows, and alerts.
fn resume(
    journal: &dyn Journal,
    clients: &ClientRegistry,
    profiles: &ProfileBook,
    fraud: &FraudDetectionEngine,
    alerts: &AlertStore,
    config: &DeskConfig,
    now: crate::types::Timestamp,
) -> DeskResult<()> {
    let stored_clients = journal.clients()?;
    let client_count = stored_clients.len();
    for client in stored_clients {
        clients.restore(client)?;
    }

    let operations = journal.operations()?;
    let max_age = Duration::hours(config.fraud.window.max_age_hours);
    let mut histories: HashMap<String, Vec<ClientHistoryEntry>> = HashMap::new();
    // Reversals keep their history entry, profile sample and window entry.
    let committed = operations
        .iter()
        .filter(|op| matches!(op.status, OperationStatus::Completed | OperationStatus::Reversed));
    for op in committed {
        if let Some(client_id) = &op.client_id {
            histories
                .entry(client_id.clone())
                .or_default()
                .push(ClientHistoryEntry::from_operation(op));
            profiles.update(
                client_id,
                op.usd_equivalent.to_f64().unwrap_or(0.0),
                op.created_at,
            )?;
        }
        if now - op.created_at <= max_age {
            fraud.record(&OperationProbe {
                reference: op.folio.clone(),
                client_id: op.client_id.clone(),
                client_name: op.client_name.clone(),
                amount_usd: op.usd_equivalent,
                at: op.created_at,
            })?;
        }
    }
    for (client_id, entries) in histories {
        match clients.restore_history(&client_id, entries) {
            Ok(()) | Err(DeskError::ClientNotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }

    let stored_alerts = journal.alerts()?;
    let alert_count = stored_alerts.len();
    for alert in stored_alerts {
        if alert.false_positive {
            if let Some(client_id) = &alert.client_id {
                profiles.note_false_positive(client_id)?;
            }
        }
        alerts.insert(alert)?;
    }

    if client_count + operations.len() + alert_count > 0 {
        log::info!(
            "resumed {client_count} clients, {} operations, {alert_count} alerts",
            operations.len()
        );
    }
    Ok(())
}
