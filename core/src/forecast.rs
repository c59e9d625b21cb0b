//! Demand forecasting and spread advice.
//!
//! Deterministic: the only noise comes from a seeded `DeskRng` stream, so the
//! same seed, currency, start date and history always give the same forecast.

use crate::{
    config::ForecastSettings,
    currency::Currency,
    operation::{Operation, OperationStatus},
    quote::Direction,
    rng::{DeskRng, StreamSlot},
    types::Timestamp,
};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecommendation {
    pub optimal: Decimal,
    pub minimum: Decimal,
    pub maximum: Decimal,
}

/// One projected day, amounts in USD equivalent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandForecast {
    pub date: NaiveDate,
    pub currency: Currency,
    /// What clients are expected to sell to the house.
    pub expected_buy_demand: Decimal,
    /// What clients are expected to buy from the house.
    pub expected_sell_demand: Decimal,
    pub confidence: f64,
    pub influence_factors: Vec<String>,
    pub inventory: InventoryRecommendation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadRecommendation {
    pub pair_id: String,
    pub current_spread: Decimal,
    pub recommended_spread: Decimal,
    pub reason: String,
    pub expected_volume: Decimal,
    pub estimated_gain: Decimal,
    pub valid_until: Timestamp,
}

const OCCASIONAL_FACTORS: [&str; 3] = [
    "Exchange-rate trend",
    "Remittance season",
    "Upcoming economic events",
];

fn whole(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

fn weekday_factor(day: Weekday) -> Decimal {
    match day {
        Weekday::Sun => dec!(0.3),
        Weekday::Sat => dec!(0.7),
        Weekday::Fri => dec!(1.3),
        Weekday::Mon => dec!(1.2),
        _ => Decimal::ONE,
    }
}

fn weekday_factors(day: Weekday) -> Vec<String> {
    match day {
        Weekday::Fri => vec!["Friday: higher demand ahead of the weekend".to_string()],
        Weekday::Mon => vec!["Monday: start of the business week".to_string()],
        Weekday::Sat | Weekday::Sun => vec!["Weekend: lower operation volume".to_string()],
        _ => Vec::new(),
    }
}

/// Average daily USD volume per side for `currency`, over the business days
/// present in `history`. `None` when no completed operation touches it.
fn historical_base(currency: Currency, history: &[Operation]) -> Option<(Decimal, Decimal)> {
    let mut bought = Decimal::ZERO;
    let mut sold = Decimal::ZERO;
    let mut days = BTreeSet::new();
    for op in history.iter().filter(|op| op.status == OperationStatus::Completed) {
        match op.direction {
            Direction::ClientSells if op.currency_given == currency => bought += op.usd_equivalent,
            Direction::ClientBuys if op.currency_received == currency => sold += op.usd_equivalent,
            _ => continue,
        }
        days.insert(op.business_date);
    }
    if days.is_empty() {
        return None;
    }
    let n = Decimal::from(days.len() as u64);
    Some((bought / n, sold / n))
}

pub struct DemandForecaster {
    settings: ForecastSettings,
}

impl DemandForecaster {
    pub fn new(settings: ForecastSettings) -> Self {
        Self { settings }
    }

    fn stream(&self, currency: Currency) -> DeskRng {
        let salt = Currency::ALL
            .iter()
            .position(|c| *c == currency)
            .unwrap_or_default() as u64;
        DeskRng::new(self.settings.seed ^ (salt + 1), StreamSlot::Forecast as u64)
            .with_name(StreamSlot::Forecast.name())
    }

    /// Project `days_ahead` days starting the day after `from`.
    pub fn forecast(
        &self,
        currency: Currency,
        days_ahead: u32,
        from: NaiveDate,
        history: &[Operation],
    ) -> Vec<DemandForecast> {
        let (base_buy, base_sell) = historical_base(currency, history)
            .unwrap_or((self.settings.base_buy_demand, self.settings.base_sell_demand));
        let mut rng = self.stream(currency);

        (1..=days_ahead)
            .map(|i| {
                let date = from + Duration::days(i64::from(i));
                let factor = weekday_factor(date.weekday());
                let variation = Decimal::from_f64(rng.symmetric(self.settings.variation))
                    .unwrap_or_default();
                let swing = factor * (Decimal::ONE + variation);
                let buy = whole(base_buy * swing);
                let sell = whole(base_sell * swing);

                let mut influence_factors = weekday_factors(date.weekday());
                if rng.chance(0.5) {
                    if let Some(extra) = rng.pick(&OCCASIONAL_FACTORS) {
                        influence_factors.push((*extra).to_string());
                    }
                }

                DemandForecast {
                    date,
                    currency,
                    expected_buy_demand: buy,
                    expected_sell_demand: sell,
                    confidence: (0.95 - 0.05 * f64::from(i)).max(0.5),
                    influence_factors,
                    inventory: InventoryRecommendation {
                        optimal: whole((buy + sell) / dec!(2)),
                        minimum: whole(sell * dec!(0.8)),
                        maximum: whole(buy * dec!(1.5)),
                    },
                }
            })
            .collect()
    }
}

pub struct SpreadAdvisor {
    settings: ForecastSettings,
}

impl SpreadAdvisor {
    pub fn new(settings: ForecastSettings) -> Self {
        Self { settings }
    }

    pub fn is_peak(&self, local_hour: u32) -> bool {
        (self.settings.peak_start_hour..=self.settings.peak_end_hour).contains(&local_hour)
    }

    pub fn recommend(
        &self,
        pair_id: &str,
        current_spread: Decimal,
        local_hour: u32,
        now: Timestamp,
    ) -> SpreadRecommendation {
        let (recommended, reason) = if self.is_peak(local_hour) {
            (
                current_spread * self.settings.peak_spread_factor,
                "Lower the spread during peak hours to win volume",
            )
        } else {
            (current_spread, "Keep the current spread")
        };
        let change = if current_spread.is_zero() {
            Decimal::ZERO
        } else {
            (current_spread - recommended) / current_spread
        };
        let expected_volume = self.settings.base_volume * (Decimal::ONE + change * dec!(2));
        let estimated_gain = expected_volume * recommended / dec!(100);
        log::debug!(
            "spread advice for {pair_id}: {current_spread} -> {recommended} (hour {local_hour}, gain {:.0})",
            estimated_gain.to_f64().unwrap_or_default()
        );
        SpreadRecommendation {
            pair_id: pair_id.to_string(),
            current_spread,
            recommended_spread: recommended,
            reason: reason.to_string(),
            expected_volume: whole(expected_volume),
            estimated_gain: whole(estimated_gain),
            valid_until: now + Duration::hours(self.settings.recommendation_validity_hours),
        }
    }
}
