//! Currency-pair registry.
//!
//! RULE: A stored pair always satisfies `buy_price <= reference_price <= sell_price`.
//! Inserts and price updates that would break it are refused with `InvalidPair`.

use crate::{
    config::PairSeed,
    currency::Currency,
    error::{DeskError, DeskResult},
    types::Timestamp,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyPairConfig {
    /// `BASE_QUOTE`, e.g. `USD_MXN`.
    pub id: String,
    pub base: Currency,
    pub quote: Currency,
    /// Price at which the house buys one unit of `base`.
    pub buy_price: Decimal,
    /// Price at which the house sells one unit of `base`.
    pub sell_price: Decimal,
    pub reference_price: Decimal,
    pub spread_buy_pct: Decimal,
    pub spread_sell_pct: Decimal,
    pub fixed_fee: Decimal,
    pub min_per_operation: Decimal,
    pub max_per_operation: Decimal,
    pub daily_client_limit: Decimal,
    pub id_threshold_usd: Decimal,
    pub active: bool,
    pub updated_at: Timestamp,
}

impl CurrencyPairConfig {
    pub fn pair_id(base: Currency, quote: Currency) -> String {
        format!("{}_{}", base.code(), quote.code())
    }

    pub fn from_seed(seed: &PairSeed, now: Timestamp) -> Self {
        Self {
            id: Self::pair_id(seed.base, seed.quote),
            base: seed.base,
            quote: seed.quote,
            buy_price: seed.buy_price,
            sell_price: seed.sell_price,
            reference_price: seed.reference_price,
            spread_buy_pct: seed.spread_buy_pct,
            spread_sell_pct: seed.spread_sell_pct,
            fixed_fee: seed.fixed_fee,
            min_per_operation: seed.min_per_operation,
            max_per_operation: seed.max_per_operation,
            daily_client_limit: seed.daily_client_limit,
            id_threshold_usd: seed.id_threshold_usd,
            active: seed.active,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> DeskResult<()> {
        let invalid = |reason: String| DeskError::InvalidPair {
            pair_id: self.id.clone(),
            reason,
        };
        if self.base == self.quote {
            return Err(invalid("base and quote must differ".into()));
        }
        if self.buy_price <= Decimal::ZERO {
            return Err(invalid(format!("buy price {} must be positive", self.buy_price)));
        }
        if self.buy_price > self.reference_price || self.reference_price > self.sell_price {
            return Err(invalid(format!(
                "expected buy {} <= reference {} <= sell {}",
                self.buy_price, self.reference_price, self.sell_price
            )));
        }
        if self.min_per_operation > self.max_per_operation {
            return Err(invalid(format!(
                "min per operation {} exceeds max {}",
                self.min_per_operation, self.max_per_operation
            )));
        }
        Ok(())
    }
}

/// Spread of `price` around `reference`, as a percentage of the reference.
fn spread_pct(price: Decimal, reference: Decimal) -> Decimal {
    if reference.is_zero() {
        return Decimal::ZERO;
    }
    ((price - reference).abs() / reference * dec!(100)).round_dp(4)
}

pub struct CurrencyPairRegistry {
    pairs: RwLock<HashMap<String, CurrencyPairConfig>>,
}

impl CurrencyPairRegistry {
    pub fn new() -> Self {
        Self {
            pairs: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_seeds(seeds: &[PairSeed], now: Timestamp) -> DeskResult<Self> {
        let registry = Self::new();
        for seed in seeds {
            registry.insert(CurrencyPairConfig::from_seed(seed, now))?;
        }
        Ok(registry)
    }

    pub fn insert(&self, pair: CurrencyPairConfig) -> DeskResult<()> {
        pair.validate()?;
        let mut pairs = self
            .pairs
            .write()
            .map_err(|_| DeskError::LockPoisoned("pair registry"))?;
        log::info!(
            "pair {} configured: buy {} / sell {} (ref {})",
            pair.id, pair.buy_price, pair.sell_price, pair.reference_price
        );
        pairs.insert(pair.id.clone(), pair);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<CurrencyPairConfig> {
        self.pairs.read().ok()?.get(id).cloned()
    }

    /// The active pair quoted as `base`/`quote`, if any.
    pub fn active(&self, base: Currency, quote: Currency) -> Option<CurrencyPairConfig> {
        self.get(&CurrencyPairConfig::pair_id(base, quote))
            .filter(|p| p.active)
    }

    pub fn active_pairs(&self) -> Vec<CurrencyPairConfig> {
        let Ok(pairs) = self.pairs.read() else {
            return Vec::new();
        };
        let mut active: Vec<_> = pairs.values().filter(|p| p.active).cloned().collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    /// Set new buy/sell prices. The reference becomes the midpoint and both
    /// spread percentages are recomputed from it.
    pub fn update_prices(
        &self,
        id: &str,
        buy_price: Decimal,
        sell_price: Decimal,
        now: Timestamp,
    ) -> DeskResult<CurrencyPairConfig> {
        let mut pairs = self
            .pairs
            .write()
            .map_err(|_| DeskError::LockPoisoned("pair registry"))?;
        let current = pairs.get(id).ok_or_else(|| DeskError::InvalidPair {
            pair_id: id.to_string(),
            reason: "no such pair".into(),
        })?;

        let reference = (buy_price + sell_price) / dec!(2);
        let updated = CurrencyPairConfig {
            buy_price,
            sell_price,
            reference_price: reference,
            spread_buy_pct: spread_pct(buy_price, reference),
            spread_sell_pct: spread_pct(sell_price, reference),
            updated_at: now,
            ..current.clone()
        };
        updated.validate()?;

        log::info!(
            "pair {id} repriced: buy {buy_price} / sell {sell_price} (ref {reference})"
        );
        pairs.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    pub fn set_active(&self, id: &str, active: bool) -> DeskResult<()> {
        let mut pairs = self
            .pairs
            .write()
            .map_err(|_| DeskError::LockPoisoned("pair registry"))?;
        let pair = pairs.get_mut(id).ok_or_else(|| DeskError::InvalidPair {
            pair_id: id.to_string(),
            reason: "no such pair".into(),
        })?;
        pair.active = active;
        Ok(())
    }

    /// Reference price of one USD in the local currency, when USD is quoted.
    pub fn usd_reference(&self) -> Option<Decimal> {
        self.active(Currency::Usd, Currency::LOCAL)
            .map(|p| p.reference_price)
    }

    /// Convert `amount` of `currency` into USD using reference prices.
    /// Falls back to dividing by `fallback_reference` when no USD pair exists.
    pub fn usd_equivalent(
        &self,
        amount: Decimal,
        currency: Currency,
        fallback_reference: Decimal,
    ) -> Decimal {
        if currency == Currency::Usd {
            return amount;
        }
        let usd_ref = self.usd_reference();
        let local_amount = if currency == Currency::LOCAL {
            Some(amount)
        } else {
            self.active(currency, Currency::LOCAL)
                .map(|p| amount * p.reference_price)
        };
        match (local_amount, usd_ref) {
            (Some(local), Some(usd_ref)) if !usd_ref.is_zero() => local / usd_ref,
            _ if !fallback_reference.is_zero() => amount / fallback_reference,
            _ => amount,
        }
    }
}

impl Default for CurrencyPairRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_pairs;
    use chrono::Utc;

    #[test]
    fn update_prices_recomputes_reference_and_spreads() {
        let registry = CurrencyPairRegistry::from_seeds(&default_pairs(), Utc::now()).unwrap();
        let updated = registry
            .update_prices("USD_MXN", dec!(19.80), dec!(20.60), Utc::now())
            .unwrap();
        assert_eq!(updated.reference_price, dec!(20.20));
        assert_eq!(updated.spread_buy_pct, dec!(1.9802));
        assert_eq!(updated.spread_sell_pct, dec!(1.9802));
    }

    #[test]
    fn inverted_prices_are_refused() {
        let registry = CurrencyPairRegistry::from_seeds(&default_pairs(), Utc::now()).unwrap();
        let err = registry
            .update_prices("USD_MXN", dec!(21.00), dec!(20.00), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DeskError::InvalidPair { .. }));
        assert_eq!(
            registry.get("USD_MXN").unwrap().buy_price,
            dec!(19.85),
            "refused update must leave the pair untouched"
        );
    }
}
