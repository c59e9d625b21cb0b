use cambio_core::{
    clock::ManualClock,
    config::DeskConfig,
    currency::Currency,
    engine::DeskEngine,
    error::DeskError,
    types::Timestamp,
};
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

fn desk_at(config: DeskConfig, at: Timestamp) -> DeskEngine {
    DeskEngine::in_memory(config, Arc::new(ManualClock::new(at))).unwrap()
}

/// Friday 2025-10-17, 11:00 local.
fn friday_morning() -> Timestamp {
    Utc.with_ymd_and_hms(2025, 10, 17, 17, 0, 0).unwrap()
}

fn without_noise() -> DeskConfig {
    let mut config = DeskConfig::default();
    config.forecast.variation = 0.0;
    config
}

#[test]
fn forecast_is_reproducible_for_a_seed() {
    let a = desk_at(DeskConfig::default(), friday_morning())
        .forecast_demand(Currency::Usd, 7)
        .unwrap();
    let b = desk_at(DeskConfig::default(), friday_morning())
        .forecast_demand(Currency::Usd, 7)
        .unwrap();
    assert_eq!(a, b, "same seed, same day, same history");

    let mut reseeded = DeskConfig::default();
    reseeded.forecast.seed = 7;
    let c = desk_at(reseeded, friday_morning())
        .forecast_demand(Currency::Usd, 7)
        .unwrap();
    assert_ne!(
        a.iter().map(|d| d.expected_buy_demand).collect::<Vec<_>>(),
        c.iter().map(|d| d.expected_buy_demand).collect::<Vec<_>>()
    );
}

#[test]
fn forecast_starts_tomorrow_and_loses_confidence() {
    let days = desk_at(DeskConfig::default(), friday_morning())
        .forecast_demand(Currency::Eur, 10)
        .unwrap();
    assert_eq!(days.len(), 10);
    assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2025, 10, 18).unwrap());
    assert_eq!(days[9].date, NaiveDate::from_ymd_opt(2025, 10, 27).unwrap());
    assert!((days[0].confidence - 0.9).abs() < 1e-9);
    assert!(days.windows(2).all(|w| w[1].confidence <= w[0].confidence));
    assert!((days[9].confidence - 0.5).abs() < 1e-9, "confidence floors at 0.5");
    assert!(days.iter().all(|d| d.currency == Currency::Eur));
}

#[test]
fn weekday_pattern_drives_demand_without_noise() {
    let days = desk_at(without_noise(), friday_morning())
        .forecast_demand(Currency::Usd, 3)
        .unwrap();

    let saturday = &days[0];
    assert_eq!(saturday.expected_buy_demand, dec!(3500));
    assert_eq!(saturday.expected_sell_demand, dec!(3150));
    assert!(saturday.influence_factors[0].starts_with("Weekend"));

    let sunday = &days[1];
    assert_eq!(sunday.expected_buy_demand, dec!(1500));
    assert_eq!(sunday.expected_sell_demand, dec!(1350));
    assert_eq!(sunday.inventory.optimal, dec!(1425));
    assert_eq!(sunday.inventory.minimum, dec!(1080));
    assert_eq!(sunday.inventory.maximum, dec!(2250));

    let monday = &days[2];
    assert_eq!(monday.expected_buy_demand, dec!(6000));
    assert!(monday.influence_factors[0].starts_with("Monday"));
}

#[test]
fn peak_hours_lower_the_spread() {
    let engine = desk_at(DeskConfig::default(), friday_morning());
    let advice = engine.recommend_spread("USD_MXN").unwrap();

    assert_eq!(advice.current_spread, dec!(1.5));
    assert_eq!(advice.recommended_spread, dec!(1.425));
    assert_eq!(advice.expected_volume, dec!(11000));
    assert_eq!(advice.estimated_gain, dec!(157));
    assert_eq!(advice.valid_until, friday_morning() + Duration::hours(4));
}

#[test]
fn off_peak_keeps_the_spread() {
    // 16:00 local.
    let afternoon = Utc.with_ymd_and_hms(2025, 10, 17, 22, 0, 0).unwrap();
    let advice = desk_at(DeskConfig::default(), afternoon)
        .recommend_spread("USD_MXN")
        .unwrap();
    assert_eq!(advice.recommended_spread, dec!(1.5));
    assert_eq!(advice.expected_volume, dec!(10000));
    assert_eq!(advice.estimated_gain, dec!(150));
    assert_eq!(advice.reason, "Keep the current spread");
}

#[test]
fn spread_advice_needs_a_known_pair() {
    let engine = desk_at(DeskConfig::default(), friday_morning());
    assert!(matches!(
        engine.recommend_spread("JPY_MXN"),
        Err(DeskError::InvalidPair { .. })
    ));
}
