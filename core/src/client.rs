//! Client registry: KYC levelling, limits, risk rating, history and search.
//!
//! RULE: Non-custom limits always derive from the KYC level. Once limits are
//! marked custom they stay frozen until `reset_limits`.
//!
//! RULE: Automatic KYC recalculation only ever upgrades a client.
//!
//! Daily and monthly running totals are keyed by local business date and
//! roll over lazily the first time they are read or written on a new day.

use crate::{
    clock::Clock,
    config::{ClientRiskRules, KycLimitsTable},
    currency::Currency,
    error::{DeskError, DeskResult},
    operation::{IdDocument, Operation},
    quote::Direction,
    types::{new_id, EntityId, Page, Timestamp},
};
use chrono::{Datelike, FixedOffset, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

// ── Enums ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycLevel {
    Basic,
    Intermediate,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Active,
    Inactive,
    Blocked,
    PendingVerification,
    UnderReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdKind {
    Ine,
    Passport,
    DriverLicense,
    ProfessionalId,
    Fm2,
    Fm3,
    Visa,
}

impl IdKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ine => "INE",
            Self::Passport => "PASSPORT",
            Self::DriverLicense => "DRIVER_LICENSE",
            Self::ProfessionalId => "PROFESSIONAL_ID",
            Self::Fm2 => "FM2",
            Self::Fm3 => "FM3",
            Self::Visa => "VISA",
        }
    }
}

// ── Records ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    pub kind: IdKind,
    pub number: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub issued_at: Option<NaiveDate>,
    #[serde(default)]
    pub expires_at: Option<NaiveDate>,
}

impl Identification {
    pub fn new(kind: IdKind, number: &str) -> Self {
        Self {
            kind,
            number: number.to_string(),
            verified: false,
            issued_at: None,
            expires_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub exterior_number: Option<String>,
    pub interior_number: Option<String>,
    pub neighborhood: String,
    pub postal_code: String,
    pub city: String,
    pub state: String,
    pub country: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientLimits {
    pub per_operation: Decimal,
    pub daily: Decimal,
    pub monthly: Decimal,
    pub custom: bool,
}

/// Running operation totals, all amounts in USD equivalent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientTotals {
    pub lifetime_operations: u64,
    pub lifetime_usd: Decimal,
    pub month_operations: u64,
    pub month_usd: Decimal,
    pub day_operations: u64,
    pub day_usd: Decimal,
    /// Local date the day counters belong to.
    pub day: Option<NaiveDate>,
    /// `year * 100 + month` the month counters belong to.
    pub month: Option<i32>,
}

impl ClientTotals {
    fn month_key(date: NaiveDate) -> i32 {
        date.year() * 100 + date.month() as i32
    }

    /// Reset day and month counters if `today` starts a new period.
    pub fn roll(&mut self, today: NaiveDate) {
        if self.day != Some(today) {
            self.day = Some(today);
            self.day_operations = 0;
            self.day_usd = Decimal::ZERO;
        }
        let month = Self::month_key(today);
        if self.month != Some(month) {
            self.month = Some(month);
            self.month_operations = 0;
            self.month_usd = Decimal::ZERO;
        }
    }

    /// Copy of the totals as they stand on `today`.
    pub fn as_of(&self, today: NaiveDate) -> Self {
        let mut rolled = self.clone();
        rolled.roll(today);
        rolled
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: EntityId,
    pub first_name: String,
    pub paternal_surname: String,
    pub maternal_surname: Option<String>,
    pub full_name: String,
    pub birth_date: Option<NaiveDate>,
    pub identifications: Vec<Identification>,
    /// RFC.
    pub tax_id: Option<String>,
    /// CURP.
    pub national_id: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<Address>,
    pub nationality: String,
    pub foreign_resident: bool,
    pub pep: bool,
    pub occupation: Option<String>,
    pub kyc_level: KycLevel,
    pub kyc_verified_by: Option<String>,
    pub kyc_verified_at: Option<Timestamp>,
    pub totals: ClientTotals,
    pub last_operation_at: Option<Timestamp>,
    pub limits: ClientLimits,
    pub risk_level: RiskLevel,
    pub risk_factors: Vec<String>,
    pub watch_list: bool,
    pub watch_list_reason: Option<String>,
    pub status: ClientStatus,
    pub block_reason: Option<String>,
    pub blocked_by: Option<String>,
    pub blocked_at: Option<Timestamp>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: Timestamp,
    pub modified_by: Option<String>,
    pub modified_at: Option<Timestamp>,
}

impl Client {
    pub fn primary_identification(&self) -> Option<&Identification> {
        self.identifications.first()
    }

    pub fn id_document(&self) -> Option<IdDocument> {
        self.primary_identification().map(|id| IdDocument {
            kind: id.kind.as_str().to_string(),
            number: id.number.clone(),
        })
    }

    pub fn is_blocked(&self) -> bool {
        self.status == ClientStatus::Blocked
    }

    /// The level the client's documents support.
    pub fn documented_kyc_level(&self) -> KycLevel {
        let has_id = !self.identifications.is_empty();
        if has_id && self.tax_id.is_some() && self.national_id.is_some() && self.address.is_some() {
            KycLevel::Complete
        } else if has_id {
            KycLevel::Intermediate
        } else {
            KycLevel::Basic
        }
    }

    fn touch(&mut self, by: &str, now: Timestamp) {
        self.modified_by = Some(by.to_string());
        self.modified_at = Some(now);
    }
}

fn full_name(first: &str, paternal: &str, maternal: Option<&str>) -> String {
    [Some(first), Some(paternal), maternal]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

// ── Requests and results ───────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewClient {
    pub first_name: String,
    pub paternal_surname: String,
    pub maternal_surname: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub identification: Option<Identification>,
    pub tax_id: Option<String>,
    pub national_id: Option<String>,
    pub address: Option<Address>,
    pub nationality: Option<String>,
    pub occupation: Option<String>,
    pub foreign_resident: bool,
    pub pep: bool,
    pub tags: Vec<String>,
    pub created_by: String,
}

/// Partial update. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientUpdate {
    pub first_name: Option<String>,
    pub paternal_surname: Option<String>,
    pub maternal_surname: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub tax_id: Option<String>,
    pub national_id: Option<String>,
    pub address: Option<Address>,
    pub nationality: Option<String>,
    pub occupation: Option<String>,
    pub foreign_resident: Option<bool>,
    pub pep: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomLimits {
    pub per_operation: Option<Decimal>,
    pub daily: Option<Decimal>,
    pub monthly: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientHistoryEntry {
    pub operation_id: EntityId,
    pub folio: String,
    pub at: Timestamp,
    pub direction: Direction,
    pub currency_given: Currency,
    pub currency_received: Currency,
    pub amount_given: Decimal,
    pub amount_received: Decimal,
    pub applied_rate: Decimal,
    pub margin: Decimal,
    pub operator: String,
    pub drawer_id: String,
}

impl ClientHistoryEntry {
    pub fn from_operation(op: &Operation) -> Self {
        Self {
            operation_id: op.id.clone(),
            folio: op.folio.clone(),
            at: op.created_at,
            direction: op.direction,
            currency_given: op.currency_given,
            currency_received: op.currency_received,
            amount_given: op.amount_given,
            amount_received: op.amount_received,
            applied_rate: op.applied_rate,
            margin: op.margin,
            operator: op.operator_name.clone(),
            drawer_id: op.drawer_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitCheck {
    pub allowed: bool,
    pub reason: Option<String>,
    pub remaining_daily: Option<Decimal>,
}

impl LimitCheck {
    fn allowed(remaining_daily: Option<Decimal>) -> Self {
        Self { allowed: true, reason: None, remaining_daily }
    }

    fn refused(reason: String, remaining_daily: Option<Decimal>) -> Self {
        Self { allowed: false, reason: Some(reason), remaining_daily }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientFilter {
    /// Case-insensitive match over name, phone, email, tax id and
    /// identification numbers.
    pub text: Option<String>,
    pub status: Option<ClientStatus>,
    pub kyc_level: Option<KycLevel>,
    pub risk_level: Option<RiskLevel>,
    pub nationality: Option<String>,
    pub has_operations: Option<bool>,
    pub watch_list: Option<bool>,
    pub pep: Option<bool>,
    pub tag: Option<String>,
}

impl ClientFilter {
    fn matches(&self, c: &Client) -> bool {
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            let hit = c.full_name.to_lowercase().contains(&needle)
                || c.phone.as_deref().is_some_and(|p| p.contains(&needle))
                || c.email.as_deref().is_some_and(|e| e.to_lowercase().contains(&needle))
                || c.tax_id.as_deref().is_some_and(|t| t.to_lowercase().contains(&needle))
                || c.identifications.iter().any(|i| i.number.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        self.status.is_none_or(|s| c.status == s)
            && self.kyc_level.is_none_or(|k| c.kyc_level == k)
            && self.risk_level.is_none_or(|r| c.risk_level == r)
            && self.nationality.as_deref().is_none_or(|n| c.nationality == n)
            && self
                .has_operations
                .is_none_or(|has| (c.totals.lifetime_operations > 0) == has)
            && self.watch_list.is_none_or(|w| c.watch_list == w)
            && self.pep.is_none_or(|p| c.pep == p)
            && self.tag.as_deref().is_none_or(|t| c.tags.iter().any(|x| x == t))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientStats {
    pub total: usize,
    pub active: usize,
    pub blocked: usize,
    pub watch_listed: usize,
    pub by_kyc: BTreeMap<KycLevel, usize>,
    pub by_risk: BTreeMap<RiskLevel, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The client had operations and was marked inactive.
    Deactivated,
    Removed,
}

// ── Registry ───────────────────────────────────────────────────────

#[derive(Default)]
struct ClientBook {
    clients: HashMap<EntityId, Client>,
    history: HashMap<EntityId, Vec<ClientHistoryEntry>>,
}

pub struct ClientRegistry {
    book: RwLock<ClientBook>,
    kyc_limits: KycLimitsTable,
    risk_rules: ClientRiskRules,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl ClientRegistry {
    pub fn new(
        kyc_limits: KycLimitsTable,
        risk_rules: ClientRiskRules,
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            book: RwLock::new(ClientBook::default()),
            kyc_limits,
            risk_rules,
            clock,
            offset,
        }
    }

    fn today(&self, now: Timestamp) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    fn read(&self) -> DeskResult<std::sync::RwLockReadGuard<'_, ClientBook>> {
        self.book.read().map_err(|_| DeskError::LockPoisoned("client registry"))
    }

    fn write(&self) -> DeskResult<std::sync::RwLockWriteGuard<'_, ClientBook>> {
        self.book.write().map_err(|_| DeskError::LockPoisoned("client registry"))
    }

    fn default_limits(&self, level: KycLevel) -> ClientLimits {
        let l = self.kyc_limits.for_level(level);
        ClientLimits {
            per_operation: l.per_operation,
            daily: l.daily,
            monthly: l.monthly,
            custom: false,
        }
    }

    /// Apply `f` to a stored client and return the updated copy.
    fn modify<F>(&self, id: &str, f: F) -> DeskResult<Client>
    where
        F: FnOnce(&mut Client) -> DeskResult<()>,
    {
        let mut book = self.write()?;
        let client = book
            .clients
            .get_mut(id)
            .ok_or_else(|| DeskError::ClientNotFound(id.to_string()))?;
        f(client)?;
        Ok(client.clone())
    }

    // ── Create ─────────────────────────────────────────────────────

    pub fn create(&self, new: NewClient) -> DeskResult<Client> {
        let now = self.clock.now();
        let mut client = Client {
            id: new_id("cli"),
            full_name: full_name(
                &new.first_name,
                &new.paternal_surname,
                new.maternal_surname.as_deref(),
            ),
            first_name: new.first_name,
            paternal_surname: new.paternal_surname,
            maternal_surname: new.maternal_surname,
            birth_date: new.birth_date,
            identifications: new.identification.into_iter().collect(),
            tax_id: new.tax_id,
            national_id: new.national_id,
            phone: new.phone,
            email: new.email,
            address: new.address,
            nationality: new.nationality.unwrap_or_else(|| "Mexicana".to_string()),
            foreign_resident: new.foreign_resident,
            pep: new.pep,
            occupation: new.occupation,
            kyc_level: KycLevel::Basic,
            kyc_verified_by: None,
            kyc_verified_at: None,
            totals: ClientTotals::default(),
            last_operation_at: None,
            limits: self.default_limits(KycLevel::Basic),
            risk_level: RiskLevel::Low,
            risk_factors: Vec::new(),
            watch_list: false,
            watch_list_reason: None,
            status: ClientStatus::Active,
            block_reason: None,
            blocked_by: None,
            blocked_at: None,
            tags: new.tags,
            notes: None,
            created_by: new.created_by,
            created_at: now,
            modified_by: None,
            modified_at: None,
        };
        self.recalculate_kyc_level(&mut client);
        self.recalculate_risk(&mut client, self.today(now));

        let mut book = self.write()?;
        book.history.insert(client.id.clone(), Vec::new());
        book.clients.insert(client.id.clone(), client.clone());
        log::info!(
            "client {} created: {} ({:?})",
            client.id, client.full_name, client.kyc_level
        );
        Ok(client)
    }

    /// Walk-in registration from a single name string:
    /// first word, paternal surname, then everything else.
    pub fn create_quick(&self, name: &str, phone: Option<&str>, by: &str) -> DeskResult<Client> {
        let mut parts = name.split_whitespace();
        let first = parts.next().unwrap_or_default().to_string();
        let paternal = parts.next().unwrap_or_default().to_string();
        let rest = parts.collect::<Vec<_>>().join(" ");
        self.create(NewClient {
            first_name: first,
            paternal_surname: paternal,
            maternal_surname: (!rest.is_empty()).then_some(rest),
            phone: phone.map(str::to_string),
            created_by: by.to_string(),
            ..NewClient::default()
        })
    }

    /// Re-insert a client loaded from storage.
    pub fn restore(&self, client: Client) -> DeskResult<()> {
        let mut book = self.write()?;
        book.history.entry(client.id.clone()).or_default();
        book.clients.insert(client.id.clone(), client);
        Ok(())
    }

    /// Replace a restored client's history. Entries are kept newest first.
    pub fn restore_history(&self, id: &str, mut entries: Vec<ClientHistoryEntry>) -> DeskResult<()> {
        entries.sort_by(|a, b| b.at.cmp(&a.at));
        let mut book = self.write()?;
        if !book.clients.contains_key(id) {
            return Err(DeskError::ClientNotFound(id.to_string()));
        }
        book.history.insert(id.to_string(), entries);
        Ok(())
    }

    // ── Read ───────────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Option<Client> {
        self.read().ok()?.clients.get(id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Client> {
        let needle = name.to_lowercase();
        let book = self.read().ok()?;
        let mut hits: Vec<&Client> = book
            .clients
            .values()
            .filter(|c| {
                c.full_name.to_lowercase().contains(&needle) || c.first_name.to_lowercase() == needle
            })
            .collect();
        hits.sort_by_key(|c| c.created_at);
        hits.first().map(|c| (*c).clone())
    }

    /// Match on digits only, so `55-1234-5678` finds `5512345678`.
    pub fn find_by_phone(&self, phone: &str) -> Option<Client> {
        let wanted = digits(phone);
        if wanted.is_empty() {
            return None;
        }
        let book = self.read().ok()?;
        book.clients
            .values()
            .find(|c| c.phone.as_deref().is_some_and(|p| digits(p) == wanted))
            .cloned()
    }

    pub fn find_by_identification(&self, number: &str) -> Option<Client> {
        let book = self.read().ok()?;
        book.clients
            .values()
            .find(|c| c.identifications.iter().any(|i| i.number == number))
            .cloned()
    }

    /// Newest first.
    pub fn list(&self, limit: usize) -> Vec<Client> {
        let Ok(book) = self.read() else {
            return Vec::new();
        };
        let mut all: Vec<Client> = book.clients.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        all
    }

    pub fn history(&self, id: &str) -> Vec<ClientHistoryEntry> {
        self.read()
            .ok()
            .and_then(|b| b.history.get(id).cloned())
            .unwrap_or_default()
    }

    /// Filtered, ordered by last operation (never-operated last), paged from 1.
    pub fn search(&self, filter: &ClientFilter, page: usize, page_size: usize) -> DeskResult<Page<Client>> {
        let book = self.read()?;
        let mut hits: Vec<Client> = book
            .clients
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        hits.sort_by(|a, b| match (a.last_operation_at, b.last_operation_at) {
            (Some(x), Some(y)) => y.cmp(&x).then_with(|| a.id.cmp(&b.id)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)),
        });
        Ok(Page::from_sorted(hits, page, page_size))
    }

    pub fn stats(&self) -> ClientStats {
        let Ok(book) = self.read() else {
            return ClientStats::default();
        };
        let mut stats = ClientStats {
            total: book.clients.len(),
            ..ClientStats::default()
        };
        for c in book.clients.values() {
            match c.status {
                ClientStatus::Active => stats.active += 1,
                ClientStatus::Blocked => stats.blocked += 1,
                _ => {}
            }
            if c.watch_list {
                stats.watch_listed += 1;
            }
            *stats.by_kyc.entry(c.kyc_level).or_default() += 1;
            *stats.by_risk.entry(c.risk_level).or_default() += 1;
        }
        stats
    }

    // ── Update ─────────────────────────────────────────────────────

    pub fn update(&self, id: &str, update: ClientUpdate, by: &str) -> DeskResult<Client> {
        let now = self.clock.now();
        let today = self.today(now);
        let client = self.modify(id, |c| {
            let renamed = update.first_name.is_some()
                || update.paternal_surname.is_some()
                || update.maternal_surname.is_some();
            if let Some(v) = update.first_name { c.first_name = v; }
            if let Some(v) = update.paternal_surname { c.paternal_surname = v; }
            if let Some(v) = update.maternal_surname { c.maternal_surname = Some(v); }
            if renamed {
                c.full_name = full_name(&c.first_name, &c.paternal_surname, c.maternal_surname.as_deref());
            }
            if let Some(v) = update.birth_date { c.birth_date = Some(v); }
            if let Some(v) = update.phone { c.phone = Some(v); }
            if let Some(v) = update.email { c.email = Some(v); }
            if let Some(v) = update.tax_id { c.tax_id = Some(v); }
            if let Some(v) = update.national_id { c.national_id = Some(v); }
            if let Some(v) = update.address { c.address = Some(v); }
            if let Some(v) = update.nationality { c.nationality = v; }
            if let Some(v) = update.occupation { c.occupation = Some(v); }
            if let Some(v) = update.foreign_resident { c.foreign_resident = v; }
            if let Some(v) = update.pep { c.pep = v; }
            if let Some(v) = update.tags { c.tags = v; }
            if let Some(v) = update.notes { c.notes = Some(v); }
            self.recalculate_kyc_level(c);
            self.recalculate_risk(c, today);
            c.touch(by, now);
            Ok(())
        })?;
        log::info!("client {id} updated by {by}");
        Ok(client)
    }

    pub fn add_identification(&self, id: &str, identification: Identification, by: &str) -> DeskResult<Client> {
        let now = self.clock.now();
        let today = self.today(now);
        let kind = identification.kind;
        let client = self.modify(id, |c| {
            c.identifications.push(identification);
            self.recalculate_kyc_level(c);
            self.recalculate_risk(c, today);
            c.touch(by, now);
            Ok(())
        })?;
        log::info!("identification {} added to client {id}", kind.as_str());
        Ok(client)
    }

    /// Explicit verification by an officer. Sets the level even downwards
    /// and resets non-custom limits to the level's defaults.
    pub fn verify_kyc(&self, id: &str, level: KycLevel, by: &str) -> DeskResult<Client> {
        let now = self.clock.now();
        let today = self.today(now);
        let defaults = self.default_limits(level);
        let client = self.modify(id, |c| {
            c.kyc_level = level;
            c.kyc_verified_by = Some(by.to_string());
            c.kyc_verified_at = Some(now);
            if !c.limits.custom {
                c.limits = defaults;
            }
            self.recalculate_risk(c, today);
            c.touch(by, now);
            Ok(())
        })?;
        log::info!("client {id} KYC verified as {level:?} by {by}");
        Ok(client)
    }

    pub fn set_custom_limits(&self, id: &str, limits: CustomLimits, by: &str) -> DeskResult<Client> {
        let now = self.clock.now();
        let client = self.modify(id, |c| {
            if let Some(v) = limits.per_operation { c.limits.per_operation = v; }
            if let Some(v) = limits.daily { c.limits.daily = v; }
            if let Some(v) = limits.monthly { c.limits.monthly = v; }
            c.limits.custom = true;
            c.touch(by, now);
            Ok(())
        })?;
        log::info!("client {id} custom limits set by {by}: {:?}", client.limits);
        Ok(client)
    }

    /// Drop custom limits and return to the KYC level's defaults.
    pub fn reset_limits(&self, id: &str, by: &str) -> DeskResult<Client> {
        let now = self.clock.now();
        self.modify(id, |c| {
            c.limits = self.default_limits(c.kyc_level);
            c.touch(by, now);
            Ok(())
        })
    }

    pub fn block(&self, id: &str, reason: &str, by: &str) -> DeskResult<Client> {
        let now = self.clock.now();
        let client = self.modify(id, |c| {
            c.status = ClientStatus::Blocked;
            c.block_reason = Some(reason.to_string());
            c.blocked_by = Some(by.to_string());
            c.blocked_at = Some(now);
            c.touch(by, now);
            Ok(())
        })?;
        log::warn!("client {id} blocked by {by}: {reason}");
        Ok(client)
    }

    pub fn unblock(&self, id: &str, by: &str) -> DeskResult<Client> {
        let now = self.clock.now();
        let client = self.modify(id, |c| {
            if c.status != ClientStatus::Blocked {
                return Err(DeskError::InvalidTransition {
                    entity: format!("client {}", c.id),
                    from: format!("{:?}", c.status),
                    to: "Active".into(),
                });
            }
            c.status = ClientStatus::Active;
            c.block_reason = None;
            c.blocked_by = None;
            c.blocked_at = None;
            c.touch(by, now);
            Ok(())
        })?;
        log::info!("client {id} unblocked by {by}");
        Ok(client)
    }

    pub fn add_to_watch_list(&self, id: &str, reason: &str, by: &str) -> DeskResult<Client> {
        let now = self.clock.now();
        let client = self.modify(id, |c| {
            c.watch_list = true;
            c.watch_list_reason = Some(reason.to_string());
            c.touch(by, now);
            Ok(())
        })?;
        log::warn!("client {id} added to watch list: {reason}");
        Ok(client)
    }

    /// Limit check for an operation of `amount_usd`. Unknown ids are
    /// walk-ins and pass; blocked clients always fail.
    pub fn check_limits(&self, id: &str, amount_usd: Decimal) -> DeskResult<LimitCheck> {
        let today = self.today(self.clock.now());
        let book = self.read()?;
        let Some(client) = book.clients.get(id) else {
            return Ok(LimitCheck::allowed(None));
        };
        let limits = client.limits;
        let totals = client.totals.as_of(today);
        let remaining_today = (limits.daily - totals.day_usd).max(Decimal::ZERO);
        if client.is_blocked() {
            return Ok(LimitCheck::refused(
                format!(
                    "client blocked: {}",
                    client.block_reason.as_deref().unwrap_or("no reason recorded")
                ),
                Some(remaining_today),
            ));
        }
        if amount_usd > limits.per_operation {
            return Ok(LimitCheck::refused(
                format!("exceeds per-operation limit (${} USD)", limits.per_operation),
                Some(remaining_today),
            ));
        }
        if totals.day_usd + amount_usd > limits.daily {
            return Ok(LimitCheck::refused(
                format!(
                    "exceeds daily limit (${} USD); operated today ${}",
                    limits.daily, totals.day_usd
                ),
                Some(remaining_today),
            ));
        }
        if totals.month_usd + amount_usd > limits.monthly {
            return Ok(LimitCheck::refused(
                format!(
                    "exceeds monthly limit (${} USD); operated this month ${}",
                    limits.monthly, totals.month_usd
                ),
                Some(remaining_today),
            ));
        }
        Ok(LimitCheck::allowed(Some(remaining_today - amount_usd)))
    }

    /// Add a completed operation to the client's history and totals and
    /// re-rate the client.
    pub fn record_operation(
        &self,
        id: &str,
        entry: ClientHistoryEntry,
        amount_usd: Decimal,
        now: Timestamp,
    ) -> DeskResult<Client> {
        let today = self.today(now);
        let mut book = self.write()?;
        let client = book
            .clients
            .get_mut(id)
            .ok_or_else(|| DeskError::ClientNotFound(id.to_string()))?;
        client.totals.roll(today);
        client.totals.lifetime_operations += 1;
        client.totals.lifetime_usd += amount_usd;
        client.totals.month_operations += 1;
        client.totals.month_usd += amount_usd;
        client.totals.day_operations += 1;
        client.totals.day_usd += amount_usd;
        client.last_operation_at = Some(now);
        self.recalculate_risk(client, today);
        let updated = client.clone();
        book.history.entry(id.to_string()).or_default().insert(0, entry);
        Ok(updated)
    }

    /// Remove an operation's amount from the running totals after a reversal.
    /// History keeps the entry.
    pub fn record_reversal(&self, id: &str, amount_usd: Decimal, at: Timestamp) -> DeskResult<Client> {
        let today = self.today(self.clock.now());
        let op_day = self.today(at);
        self.modify(id, |c| {
            c.totals.roll(today);
            c.totals.lifetime_operations = c.totals.lifetime_operations.saturating_sub(1);
            c.totals.lifetime_usd -= amount_usd;
            if ClientTotals::month_key(op_day) == ClientTotals::month_key(today) {
                c.totals.month_operations = c.totals.month_operations.saturating_sub(1);
                c.totals.month_usd -= amount_usd;
            }
            if op_day == today {
                c.totals.day_operations = c.totals.day_operations.saturating_sub(1);
                c.totals.day_usd -= amount_usd;
            }
            self.recalculate_risk(c, today);
            Ok(())
        })
    }

    // ── Delete ─────────────────────────────────────────────────────

    /// Clients with operations are only deactivated.
    pub fn delete(&self, id: &str, by: &str) -> DeskResult<DeleteOutcome> {
        let now = self.clock.now();
        let mut book = self.write()?;
        let client = book
            .clients
            .get_mut(id)
            .ok_or_else(|| DeskError::ClientNotFound(id.to_string()))?;
        if client.totals.lifetime_operations > 0 {
            client.status = ClientStatus::Inactive;
            client.touch(by, now);
            log::info!("client {id} deactivated by {by} (has operations)");
            return Ok(DeleteOutcome::Deactivated);
        }
        book.clients.remove(id);
        book.history.remove(id);
        log::info!("client {id} deleted by {by}");
        Ok(DeleteOutcome::Removed)
    }

    // ── Rating ─────────────────────────────────────────────────────

    /// Upgrade the KYC level to what the documents support. Never downgrades.
    pub fn recalculate_kyc_level(&self, client: &mut Client) {
        let documented = client.documented_kyc_level();
        if documented > client.kyc_level {
            client.kyc_level = documented;
            if !client.limits.custom {
                client.limits = self.default_limits(documented);
            }
        }
    }

    pub fn recalculate_risk(&self, client: &mut Client, today: NaiveDate) {
        let rules = &self.risk_rules;
        let totals = client.totals.as_of(today);
        let mut score = 0;
        let mut factors = Vec::new();
        if client.pep {
            score += rules.pep_weight;
            factors.push("politically exposed person".to_string());
        }
        if client.kyc_level != KycLevel::Complete {
            score += rules.incomplete_kyc_weight;
            factors.push("incomplete KYC".to_string());
        }
        if client.foreign_resident {
            score += rules.foreign_resident_weight;
            factors.push("foreign resident".to_string());
        }
        if totals.day_operations >= u64::from(rules.daily_operations_threshold) {
            score += rules.daily_operations_weight;
            factors.push("multiple operations today".to_string());
        }
        if totals.month_usd > rules.monthly_volume_threshold_usd {
            score += rules.monthly_volume_weight;
            factors.push("high monthly volume".to_string());
        }
        client.risk_level = if score >= rules.critical_at {
            RiskLevel::Critical
        } else if score >= rules.high_at {
            RiskLevel::High
        } else if score >= rules.medium_at {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };
        client.risk_factors = factors;
    }
}
