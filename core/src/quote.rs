//! Quoting: pair resolution, applied rate, rounding and the quote book.
//!
//! RULE: Rates are never rounded. Only the two amounts are rounded, each to
//! the precision of its own currency.
//!
//! RULE: The direction must agree with the legs. Handing over a pair's base
//! is a sale by the client, handing over its quote currency is a purchase.
//! The applied rate is therefore never above the reference rate.
//!
//! RULE: A quotation is executed through `QuoteBook::consume`, which removes
//! it under the write lock. A quotation can therefore back at most one
//! operation.

use crate::{
    clock::Clock,
    currency::{round_money, Currency},
    error::{DeskError, DeskResult},
    pair::{CurrencyPairConfig, CurrencyPairRegistry},
    types::{new_id, EntityId, Timestamp},
};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Seen from the client's side of the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// The client buys foreign currency; the house sells at `sell_price`.
    ClientBuys,
    /// The client sells foreign currency; the house buys at `buy_price`.
    ClientSells,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientBuys => "client_buys",
            Self::ClientSells => "client_sells",
        }
    }
}

/// How the quoted pair was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// `GIVEN_RECEIVED` is configured.
    Direct,
    /// Only `RECEIVED_GIVEN` is configured; prices are inverted.
    Inverse,
    /// Two legs through the local currency.
    CrossLocal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub direction: Direction,
    pub currency_given: Currency,
    pub currency_received: Currency,
    pub amount: Decimal,
    /// `amount` is what the client wants to receive rather than hand over.
    #[serde(default)]
    pub amount_is_target: bool,
    #[serde(default)]
    pub client_id: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quotation {
    pub id: EntityId,
    pub direction: Direction,
    pub currency_given: Currency,
    pub currency_received: Currency,
    pub amount_given: Decimal,
    pub amount_received: Decimal,
    /// Units of `currency_received` per unit of `currency_given`.
    pub applied_rate: Decimal,
    pub reference_rate: Decimal,
    pub spread_pct: Decimal,
    pub fee: Decimal,
    pub estimated_margin: Decimal,
    pub usd_equivalent: Decimal,
    pub requires_id: bool,
    pub route: Route,
    pub pair_id: String,
    pub client_id: Option<EntityId>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl Quotation {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.expires_at
    }
}

// ── Pair resolution ────────────────────────────────────────────────

/// Rate, reference and pair metadata for one quote, before amounts.
#[derive(Debug, Clone)]
struct ResolvedPrice {
    route: Route,
    pair_id: String,
    rate: Decimal,
    reference: Decimal,
    spread_pct: Decimal,
    fee: Decimal,
    id_threshold_usd: Decimal,
    /// Pair legs, used for range checks and USD fallback.
    legs: Vec<CurrencyPairConfig>,
}

fn price_for(pair: &CurrencyPairConfig, direction: Direction) -> (Decimal, Decimal) {
    match direction {
        Direction::ClientBuys => (pair.sell_price, pair.spread_sell_pct),
        Direction::ClientSells => (pair.buy_price, pair.spread_buy_pct),
    }
}

/// A client handing over a pair's base sells it to the house; handing over
/// the quote currency buys the base. Any other pairing is refused.
fn check_direction(
    requested: Direction,
    implied: Direction,
    given: Currency,
    received: Currency,
) -> DeskResult<()> {
    if requested != implied {
        return Err(DeskError::DirectionMismatch {
            direction: requested.as_str(),
            given,
            received,
        });
    }
    Ok(())
}

fn resolve(
    pairs: &CurrencyPairRegistry,
    direction: Direction,
    given: Currency,
    received: Currency,
) -> DeskResult<ResolvedPrice> {
    let unavailable = || DeskError::PairUnavailable { given, received };
    if given == received {
        return Err(unavailable());
    }

    if let Some(pair) = pairs.active(given, received) {
        check_direction(direction, Direction::ClientSells, given, received)?;
        let (price, spread) = price_for(&pair, direction);
        return Ok(ResolvedPrice {
            route: Route::Direct,
            pair_id: pair.id.clone(),
            rate: price,
            reference: pair.reference_price,
            spread_pct: spread,
            fee: pair.fixed_fee,
            id_threshold_usd: pair.id_threshold_usd,
            legs: vec![pair],
        });
    }

    if let Some(pair) = pairs.active(received, given) {
        check_direction(direction, Direction::ClientBuys, given, received)?;
        let (price, spread) = price_for(&pair, direction);
        if price.is_zero() || pair.reference_price.is_zero() {
            return Err(unavailable());
        }
        return Ok(ResolvedPrice {
            route: Route::Inverse,
            pair_id: pair.id.clone(),
            rate: Decimal::ONE / price,
            reference: Decimal::ONE / pair.reference_price,
            spread_pct: spread,
            fee: pair.fixed_fee,
            id_threshold_usd: pair.id_threshold_usd,
            legs: vec![pair],
        });
    }

    if given == Currency::LOCAL || received == Currency::LOCAL {
        return Err(unavailable());
    }

    // Cross through the local currency: the house buys what is given and
    // sells what is received, whichever side the request names.
    let given_leg = pairs.active(given, Currency::LOCAL).ok_or_else(unavailable)?;
    let received_leg = pairs.active(received, Currency::LOCAL).ok_or_else(unavailable)?;
    if received_leg.sell_price.is_zero() || received_leg.reference_price.is_zero() {
        return Err(unavailable());
    }
    Ok(ResolvedPrice {
        route: Route::CrossLocal,
        pair_id: format!("{}+{}", given_leg.id, received_leg.id),
        rate: given_leg.buy_price / received_leg.sell_price,
        reference: given_leg.reference_price / received_leg.reference_price,
        spread_pct: given_leg.spread_buy_pct + received_leg.spread_sell_pct,
        fee: given_leg.fixed_fee + received_leg.fixed_fee,
        id_threshold_usd: given_leg.id_threshold_usd.min(received_leg.id_threshold_usd),
        legs: vec![given_leg, received_leg],
    })
}

fn check_range(pair: &CurrencyPairConfig, amount: Decimal) -> DeskResult<()> {
    if amount < pair.min_per_operation || amount > pair.max_per_operation {
        return Err(DeskError::AmountOutOfRange {
            currency: pair.base,
            amount,
            min: pair.min_per_operation,
            max: pair.max_per_operation,
        });
    }
    Ok(())
}

// ── Quote book ─────────────────────────────────────────────────────

/// Outstanding quotations keyed by id. Expiry is checked at read time.
#[derive(Default)]
pub struct QuoteBook {
    quotes: RwLock<HashMap<EntityId, Quotation>>,
}

impl QuoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, quotation: Quotation) -> DeskResult<()> {
        self.quotes
            .write()
            .map_err(|_| DeskError::LockPoisoned("quote book"))?
            .insert(quotation.id.clone(), quotation);
        Ok(())
    }

    /// The quotation, if it exists and has not expired at `now`.
    pub fn get(&self, id: &str, now: Timestamp) -> Option<Quotation> {
        let quotes = self.quotes.read().ok()?;
        quotes.get(id).filter(|q| !q.is_expired(now)).cloned()
    }

    /// Remove and return a live quotation. Expired or unknown ids fail
    /// with `QuoteExpired`; an expired entry is dropped on the way.
    pub fn consume(&self, id: &str, now: Timestamp) -> DeskResult<Quotation> {
        let mut quotes = self
            .quotes
            .write()
            .map_err(|_| DeskError::LockPoisoned("quote book"))?;
        match quotes.remove(id) {
            Some(q) if !q.is_expired(now) => Ok(q),
            _ => Err(DeskError::QuoteExpired {
                quotation_id: id.to_string(),
            }),
        }
    }

    /// Put back a quotation whose execution failed after `consume`.
    pub fn restore(&self, quotation: Quotation) -> DeskResult<()> {
        self.insert(quotation)
    }

    pub fn purge_expired(&self, now: Timestamp) -> DeskResult<usize> {
        let mut quotes = self
            .quotes
            .write()
            .map_err(|_| DeskError::LockPoisoned("quote book"))?;
        let before = quotes.len();
        quotes.retain(|_, q| !q.is_expired(now));
        let purged = before - quotes.len();
        if purged > 0 {
            log::debug!("purged {purged} expired quotations");
        }
        Ok(purged)
    }

    pub fn len(&self) -> usize {
        self.quotes.read().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Engine ─────────────────────────────────────────────────────────

pub struct QuoteEngine {
    pairs: Arc<CurrencyPairRegistry>,
    clock: Arc<dyn Clock>,
    book: QuoteBook,
    ttl: Duration,
}

impl QuoteEngine {
    pub fn new(pairs: Arc<CurrencyPairRegistry>, clock: Arc<dyn Clock>, ttl_secs: i64) -> Self {
        Self {
            pairs,
            clock,
            book: QuoteBook::new(),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    pub fn book(&self) -> &QuoteBook {
        &self.book
    }

    pub fn pairs(&self) -> &CurrencyPairRegistry {
        &self.pairs
    }

    /// Price a request and store the resulting quotation.
    pub fn quote(&self, request: &QuoteRequest) -> DeskResult<Quotation> {
        let quotation = self.price(request)?;
        self.book.insert(quotation.clone())?;
        log::info!(
            "quote {} issued: {} {} -> {} {} @ {} ({:?})",
            quotation.id,
            quotation.amount_given,
            quotation.currency_given,
            quotation.amount_received,
            quotation.currency_received,
            quotation.applied_rate,
            quotation.route,
        );
        Ok(quotation)
    }

    /// Price a request without storing it.
    pub fn price(&self, request: &QuoteRequest) -> DeskResult<Quotation> {
        if request.amount <= Decimal::ZERO {
            return Err(DeskError::InvalidAmount(request.amount));
        }
        let given = request.currency_given;
        let received = request.currency_received;
        let resolved = resolve(&self.pairs, request.direction, given, received)?;

        let (amount_given, amount_received) = if request.amount_is_target {
            (given.round(request.amount / resolved.rate), received.round(request.amount))
        } else {
            (given.round(request.amount), received.round(request.amount * resolved.rate))
        };
        if amount_given <= Decimal::ZERO || amount_received <= Decimal::ZERO {
            return Err(DeskError::InvalidAmount(request.amount));
        }

        // Range check on the foreign side of every leg.
        for leg in &resolved.legs {
            if leg.base == given {
                check_range(leg, amount_given)?;
            } else if leg.base == received {
                check_range(leg, amount_received)?;
            }
        }

        // In units of the received currency; negative means the house pays
        // out more than the reference value.
        let estimated_margin =
            round_money(amount_given * (resolved.reference - resolved.rate));

        let fallback_reference = resolved
            .legs
            .first()
            .map(|p| p.reference_price)
            .unwrap_or(Decimal::ONE);
        let usd_equivalent = round_money(if given == Currency::Usd {
            amount_given
        } else if received == Currency::Usd {
            amount_received
        } else if received == Currency::LOCAL {
            self.pairs.usd_equivalent(amount_received, received, fallback_reference)
        } else {
            self.pairs.usd_equivalent(amount_given, given, fallback_reference)
        });

        let now = self.clock.now();
        Ok(Quotation {
            id: new_id("cot"),
            direction: request.direction,
            currency_given: given,
            currency_received: received,
            amount_given,
            amount_received,
            applied_rate: resolved.rate,
            reference_rate: resolved.reference,
            spread_pct: resolved.spread_pct,
            fee: resolved.fee,
            estimated_margin,
            usd_equivalent,
            requires_id: usd_equivalent >= resolved.id_threshold_usd,
            route: resolved.route,
            pair_id: resolved.pair_id,
            client_id: request.client_id.clone(),
            created_at: now,
            expires_at: now + self.ttl,
        })
    }

    pub fn get(&self, id: &str) -> Option<Quotation> {
        self.book.get(id, self.clock.now())
    }
}
