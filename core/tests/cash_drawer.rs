use cambio_core::{
    clock::ManualClock,
    config::DeskConfig,
    currency::Currency,
    drawer::DrawerStatus,
    engine::DeskEngine,
    error::DeskError,
    executor::{ClientInfo, ExecutionRequest},
    quote::{Direction, QuoteRequest},
};
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn desk() -> DeskEngine {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 10, 17, 17, 0, 0).unwrap(),
    ));
    DeskEngine::in_memory(DeskConfig::default(), clock).unwrap()
}

fn walk_in(quotation_id: &str) -> ExecutionRequest {
    ExecutionRequest {
        quotation_id: quotation_id.to_string(),
        client: ClientInfo {
            name: "Ana Ruiz Torres".into(),
            ..ClientInfo::default()
        },
        received_counts: Vec::new(),
        delivered_counts: Vec::new(),
        operator_id: "op_1".into(),
        operator_name: "Cajera Uno".into(),
    }
}

fn sell_usd(engine: &DeskEngine, amount: Decimal) -> String {
    engine
        .quote(&QuoteRequest {
            direction: Direction::ClientSells,
            currency_given: Currency::Usd,
            currency_received: Currency::Mxn,
            amount,
            amount_is_target: false,
            client_id: None,
        })
        .unwrap()
        .id
}

#[test]
fn closed_drawer_refuses_execution_and_keeps_balances() {
    let engine = desk();
    let before = engine.drawer().snapshot().unwrap();
    assert_eq!(before.status, DrawerStatus::Closed, "a new drawer starts closed");

    let quotation_id = sell_usd(&engine, dec!(100));
    let err = engine.execute(&walk_in(&quotation_id)).unwrap_err();
    assert!(matches!(err, DeskError::DrawerClosed), "got {err:?}");

    let after = engine.drawer().snapshot().unwrap();
    assert_eq!(after.balances, before.balances, "no balance may move");
    assert!(
        engine.quotes().get(&quotation_id).is_some(),
        "a rejected request must not consume the quotation"
    );
    assert_eq!(engine.events(Some("operation_rejected")).unwrap().len(), 1);
}

#[test]
fn drawer_cannot_be_opened_twice() {
    let engine = desk();
    engine.open_drawer("op_1", "Cajera Uno").unwrap();
    let err = engine.open_drawer("op_2", "Cajero Dos").unwrap_err();
    match err {
        DeskError::DrawerAlreadyOpen { operator_id } => assert_eq!(operator_id, "op_1"),
        other => panic!("expected DrawerAlreadyOpen, got {other:?}"),
    }
}

#[test]
fn shift_reconciles_and_summarises_on_close() {
    let engine = desk();
    engine.open_drawer("op_1", "Cajera Uno").unwrap();

    let quotation_id = sell_usd(&engine, dec!(100));
    engine.execute(&walk_in(&quotation_id)).unwrap();

    let drawer = engine.drawer();
    assert_eq!(drawer.balance(Currency::Usd).unwrap(), dec!(2100));
    assert_eq!(drawer.balance(Currency::Mxn).unwrap(), dec!(48015.00));
    assert!(
        drawer.reconcile().unwrap().iter().all(|line| line.balanced),
        "movements must explain every balance"
    );

    let summary = engine.close_drawer().unwrap();
    assert_eq!(summary.operations, 1);
    assert_eq!(summary.buys, 1);
    assert_eq!(summary.sells, 0);
    assert_eq!(summary.bought_volume_usd, dec!(100));
    assert_eq!(summary.shift_margin, dec!(30.00));
    assert!(summary.balanced);
    assert_eq!(summary.closing_balances[&Currency::Mxn], dec!(48015.00));
    assert_eq!(engine.drawer().status().unwrap(), DrawerStatus::Closed);

    let closed = engine.events(Some("drawer_closed")).unwrap();
    assert_eq!(closed.len(), 1);
}

#[test]
fn closing_a_closed_drawer_fails() {
    let engine = desk();
    assert!(matches!(engine.close_drawer(), Err(DeskError::DrawerClosed)));
}

#[test]
fn payout_beyond_the_float_is_refused() {
    let engine = desk();
    engine.open_drawer("op_1", "Cajera Uno").unwrap();

    let q = engine
        .quote(&QuoteRequest {
            direction: Direction::ClientBuys,
            currency_given: Currency::Mxn,
            currency_received: Currency::Usd,
            amount: dec!(2500),
            amount_is_target: true,
            client_id: None,
        })
        .unwrap();
    let err = engine.execute(&walk_in(&q.id)).unwrap_err();
    match err {
        DeskError::InsufficientCash { currency, required, available } => {
            assert_eq!(currency, Currency::Usd);
            assert_eq!(required, dec!(2500));
            assert_eq!(available, dec!(2000));
        }
        other => panic!("expected InsufficientCash, got {other:?}"),
    }
    assert_eq!(engine.drawer().balance(Currency::Usd).unwrap(), dec!(2000));
}

#[test]
fn low_balance_alert_appears_when_a_currency_runs_down() {
    let engine = desk();
    engine.open_drawer("op_1", "Cajera Uno").unwrap();
    assert!(engine.drawer().snapshot().unwrap().alerts.is_empty());

    let q = engine
        .quote(&QuoteRequest {
            direction: Direction::ClientBuys,
            currency_given: Currency::Mxn,
            currency_received: Currency::Usd,
            amount: dec!(1800),
            amount_is_target: true,
            client_id: None,
        })
        .unwrap();
    engine.execute(&walk_in(&q.id)).unwrap();

    let state = engine.drawer().snapshot().unwrap();
    assert_eq!(state.balance(Currency::Usd), dec!(200));
    assert!(
        state.alerts.iter().any(|a| a.currency == Currency::Usd),
        "USD fell below its 300 threshold: {:?}",
        state.alerts
    );
}
