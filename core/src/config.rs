use crate::{client::KycLevel, currency::Currency, types::Timestamp};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Desk ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskSettings {
    pub drawer_id: String,
    pub drawer_name: String,
    /// Folio prefix, e.g. `PRF` → `PRF251017-0001`.
    pub folio_prefix: String,
    pub quote_ttl_secs: i64,
    /// Offset of the branch's local time from UTC, in minutes.
    pub utc_offset_minutes: i32,
    /// Balances loaded into a freshly built drawer.
    pub opening_float: BTreeMap<Currency, Decimal>,
    /// A drawer alert is raised when a balance drops below this level.
    pub low_balance: BTreeMap<Currency, Decimal>,
}

impl Default for DeskSettings {
    fn default() -> Self {
        Self {
            drawer_id: "caja_profit_01".into(),
            drawer_name: "Caja Principal Profit".into(),
            folio_prefix: "PRF".into(),
            quote_ttl_secs: 60,
            utc_offset_minutes: -360,
            opening_float: BTreeMap::from([
                (Currency::Mxn, dec!(50000)),
                (Currency::Usd, dec!(2000)),
                (Currency::Eur, dec!(500)),
                (Currency::Usdt, dec!(0)),
                (Currency::Cad, dec!(200)),
                (Currency::Gbp, dec!(100)),
            ]),
            low_balance: BTreeMap::from([
                (Currency::Mxn, dec!(10000)),
                (Currency::Usd, dec!(300)),
                (Currency::Eur, dec!(100)),
            ]),
        }
    }
}

impl DeskSettings {
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Convert a stored UTC instant into branch-local time.
    pub fn local_time(&self, at: Timestamp) -> DateTime<FixedOffset> {
        at.with_timezone(&self.local_offset())
    }
}

// ── Currency pairs ─────────────────────────────────────────────────

/// A pair as it appears in configuration. The registry derives the id
/// (`USD_MXN`) and stamps `updated_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairSeed {
    pub base: Currency,
    pub quote: Currency,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub reference_price: Decimal,
    pub spread_buy_pct: Decimal,
    pub spread_sell_pct: Decimal,
    #[serde(default)]
    pub fixed_fee: Decimal,
    pub min_per_operation: Decimal,
    pub max_per_operation: Decimal,
    pub daily_client_limit: Decimal,
    pub id_threshold_usd: Decimal,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

#[allow(clippy::too_many_arguments)]
fn seed(
    base: Currency,
    buy: Decimal,
    sell: Decimal,
    reference: Decimal,
    spread: Decimal,
    max: Decimal,
    daily: Decimal,
    id_threshold: Decimal,
    min: Decimal,
) -> PairSeed {
    PairSeed {
        base,
        quote: Currency::LOCAL,
        buy_price: buy,
        sell_price: sell,
        reference_price: reference,
        spread_buy_pct: spread,
        spread_sell_pct: spread,
        fixed_fee: Decimal::ZERO,
        min_per_operation: min,
        max_per_operation: max,
        daily_client_limit: daily,
        id_threshold_usd: id_threshold,
        active: true,
    }
}

pub fn default_pairs() -> Vec<PairSeed> {
    vec![
        seed(Currency::Usd,  dec!(19.85), dec!(20.45), dec!(20.15), dec!(1.5), dec!(10000), dec!(50000),  dec!(3000), dec!(1)),
        seed(Currency::Eur,  dec!(21.65), dec!(22.35), dec!(22.00), dec!(1.6), dec!(5000),  dec!(25000),  dec!(2500), dec!(1)),
        seed(Currency::Usdt, dec!(19.75), dec!(20.35), dec!(20.05), dec!(1.5), dec!(50000), dec!(100000), dec!(5000), dec!(10)),
        seed(Currency::Cad,  dec!(14.50), dec!(15.10), dec!(14.80), dec!(2.0), dec!(5000),  dec!(20000),  dec!(4000), dec!(1)),
        seed(Currency::Gbp,  dec!(25.20), dec!(26.00), dec!(25.60), dec!(1.6), dec!(3000),  dec!(15000),  dec!(2000), dec!(1)),
    ]
}

// ── KYC limits ─────────────────────────────────────────────────────

/// Per-operation, daily and monthly ceilings, in USD equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KycLimits {
    pub per_operation: Decimal,
    pub daily: Decimal,
    pub monthly: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KycLimitsTable {
    pub basic: KycLimits,
    pub intermediate: KycLimits,
    pub complete: KycLimits,
}

impl Default for KycLimitsTable {
    fn default() -> Self {
        Self {
            basic: KycLimits {
                per_operation: dec!(500),
                daily: dec!(1000),
                monthly: dec!(3000),
            },
            intermediate: KycLimits {
                per_operation: dec!(5000),
                daily: dec!(10000),
                monthly: dec!(30000),
            },
            complete: KycLimits {
                per_operation: dec!(50000),
                daily: dec!(100000),
                monthly: dec!(500000),
            },
        }
    }
}

impl KycLimitsTable {
    pub fn for_level(&self, level: KycLevel) -> KycLimits {
        match level {
            KycLevel::Basic => self.basic,
            KycLevel::Intermediate => self.intermediate,
            KycLevel::Complete => self.complete,
        }
    }
}

// ── Client risk ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientRiskRules {
    pub pep_weight: u32,
    pub incomplete_kyc_weight: u32,
    pub foreign_resident_weight: u32,
    pub daily_operations_threshold: u32,
    pub daily_operations_weight: u32,
    pub monthly_volume_threshold_usd: Decimal,
    pub monthly_volume_weight: u32,
    pub medium_at: u32,
    pub high_at: u32,
    pub critical_at: u32,
}

impl Default for ClientRiskRules {
    fn default() -> Self {
        Self {
            pep_weight: 3,
            incomplete_kyc_weight: 1,
            foreign_resident_weight: 1,
            daily_operations_threshold: 5,
            daily_operations_weight: 2,
            monthly_volume_threshold_usd: dec!(50000),
            monthly_volume_weight: 2,
            medium_at: 2,
            high_at: 4,
            critical_at: 6,
        }
    }
}

// ── Fraud rules ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentationRules {
    /// Prior operations today at or above which the daily-count factor fires.
    pub max_operations_per_day: usize,
    pub daily_count_weight: f64,
    /// Cumulative USD today at or above which small operations look structured.
    pub cumulative_threshold_usd: Decimal,
    /// An operation counts as "small" below this fraction of the threshold.
    pub small_operation_ratio: Decimal,
    pub structuring_weight: f64,
    pub burst_window_minutes: i64,
    pub burst_min_prior_operations: usize,
    pub burst_weight: f64,
}

impl Default for FragmentationRules {
    fn default() -> Self {
        Self {
            max_operations_per_day: 5,
            daily_count_weight: 0.4,
            cumulative_threshold_usd: dec!(5000),
            small_operation_ratio: dec!(0.3),
            structuring_weight: 0.9,
            burst_window_minutes: 60,
            burst_min_prior_operations: 2,
            burst_weight: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityRules {
    /// System-wide operations in the last hour at or above which velocity fires.
    pub max_operations_per_hour: usize,
    pub weight: f64,
}

impl Default for VelocityRules {
    fn default() -> Self {
        Self {
            max_operations_per_hour: 30,
            weight: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmountAnomalyRules {
    pub min_samples: u64,
    pub z_threshold: f64,
    pub weight: f64,
}

impl Default for AmountAnomalyRules {
    fn default() -> Self {
        Self {
            min_samples: 5,
            z_threshold: 2.5,
            weight: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OffHoursRules {
    /// First local business hour (inclusive).
    pub start_hour: u32,
    /// Local hour at which business ends (exclusive).
    pub end_hour: u32,
    pub weight: f64,
}

impl Default for OffHoursRules {
    fn default() -> Self {
        Self {
            start_hour: 8,
            end_hour: 20,
            weight: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreThresholds {
    pub low: u8,
    pub medium: u8,
    pub high: u8,
    pub critical: u8,
    /// Execution is refused at or above this score.
    pub block: u8,
}

impl Default for ScoreThresholds {
    fn default() -> Self {
        Self {
            low: 30,
            medium: 50,
            high: 70,
            critical: 85,
            block: 70,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub max_age_hours: i64,
    pub per_client_capacity: usize,
    pub system_capacity: usize,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            max_age_hours: 24,
            per_client_capacity: 256,
            system_capacity: 4096,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FraudRules {
    pub fragmentation: FragmentationRules,
    pub velocity: VelocityRules,
    pub amount_anomaly: AmountAnomalyRules,
    pub off_hours: OffHoursRules,
    pub thresholds: ScoreThresholds,
    pub window: WindowSettings,
}

// ── Forecasting ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSettings {
    pub seed: u64,
    pub base_buy_demand: Decimal,
    pub base_sell_demand: Decimal,
    /// Maximum relative swing applied to a day's projection (0.15 = ±15%).
    pub variation: f64,
    pub peak_start_hour: u32,
    pub peak_end_hour: u32,
    pub peak_spread_factor: Decimal,
    pub base_volume: Decimal,
    pub recommendation_validity_hours: i64,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            seed: 42,
            base_buy_demand: dec!(5000),
            base_sell_demand: dec!(4500),
            variation: 0.15,
            peak_start_hour: 10,
            peak_end_hour: 14,
            peak_spread_factor: dec!(0.95),
            base_volume: dec!(10000),
            recommendation_validity_hours: 4,
        }
    }
}

// ── Top level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskConfig {
    pub desk: DeskSettings,
    pub pairs: Vec<PairSeed>,
    pub kyc: KycLimitsTable,
    pub risk: ClientRiskRules,
    pub fraud: FraudRules,
    pub forecast: ForecastSettings,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            desk: DeskSettings::default(),
            pairs: default_pairs(),
            kyc: KycLimitsTable::default(),
            risk: ClientRiskRules::default(),
            fraud: FraudRules::default(),
            forecast: ForecastSettings::default(),
        }
    }
}

impl DeskConfig {
    /// Load from a JSON file. Missing sections fall back to defaults.
    /// In tests, use DeskConfig::default().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: DeskConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let t = &self.fraud.thresholds;
        if !(t.low <= t.medium && t.medium <= t.high && t.high <= t.critical && t.critical <= 100) {
            anyhow::bail!(
                "fraud thresholds must be ascending and <= 100 (low {}, medium {}, high {}, critical {})",
                t.low, t.medium, t.high, t.critical
            );
        }
        if self.fraud.off_hours.start_hour >= self.fraud.off_hours.end_hour
            || self.fraud.off_hours.end_hour > 24
        {
            anyhow::bail!("off-hours window must satisfy start < end <= 24");
        }
        if self.desk.quote_ttl_secs <= 0 {
            anyhow::bail!("quote_ttl_secs must be positive");
        }
        for pair in &self.pairs {
            if !(pair.buy_price <= pair.reference_price && pair.reference_price <= pair.sell_price) {
                anyhow::bail!(
                    "pair {}/{} violates buy <= reference <= sell",
                    pair.base, pair.quote
                );
            }
        }
        Ok(())
    }
}
