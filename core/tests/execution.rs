use cambio_core::{
    client::{IdKind, Identification, KycLevel, NewClient},
    clock::ManualClock,
    config::DeskConfig,
    currency::Currency,
    engine::DeskEngine,
    error::DeskError,
    executor::{ClientInfo, ExecutionRequest, OperationFilter},
    operation::{DailySequence, IdDocument, OperationStatus},
    quote::{Direction, QuoteRequest},
    store::{Journal, MemoryJournal},
};
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::thread;

fn build(config: DeskConfig) -> (DeskEngine, Arc<ManualClock>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 10, 17, 17, 0, 0).unwrap(),
    ));
    let engine = DeskEngine::in_memory(config, clock.clone()).unwrap();
    engine.open_drawer("op_1", "Cajera Uno").unwrap();
    (engine, clock)
}

fn desk() -> (DeskEngine, Arc<ManualClock>) {
    build(DeskConfig::default())
}

/// Enough pesos in the drawer to buy a few thousand dollars.
fn deep_float() -> DeskConfig {
    let mut config = DeskConfig::default();
    config.desk.opening_float.insert(Currency::Mxn, dec!(200000));
    config
}

fn sell_usd(engine: &DeskEngine, amount: Decimal, client_id: Option<&str>) -> String {
    engine
        .quote(&QuoteRequest {
            direction: Direction::ClientSells,
            currency_given: Currency::Usd,
            currency_received: Currency::Mxn,
            amount,
            amount_is_target: false,
            client_id: client_id.map(str::to_string),
        })
        .unwrap()
        .id
}

fn request(quotation_id: &str, client: ClientInfo) -> ExecutionRequest {
    ExecutionRequest {
        quotation_id: quotation_id.to_string(),
        client,
        received_counts: Vec::new(),
        delivered_counts: Vec::new(),
        operator_id: "op_1".into(),
        operator_name: "Cajera Uno".into(),
    }
}

fn walk_in(name: &str) -> ClientInfo {
    ClientInfo {
        name: name.into(),
        ..ClientInfo::default()
    }
}

fn registered(id: &str) -> ClientInfo {
    ClientInfo {
        client_id: Some(id.into()),
        ..ClientInfo::default()
    }
}

fn new_client(engine: &DeskEngine, with_id: bool) -> String {
    engine
        .create_client(NewClient {
            first_name: "Luis".into(),
            paternal_surname: "Mendoza".into(),
            maternal_surname: Some("Ríos".into()),
            phone: Some("5512345678".into()),
            identification: with_id.then(|| Identification::new(IdKind::Ine, "INE0001234567")),
            created_by: "op_1".into(),
            ..NewClient::default()
        })
        .unwrap()
        .id
}

#[test]
fn execution_issues_a_folio_and_journals_the_operation() {
    let (engine, _) = desk();
    let q = sell_usd(&engine, dec!(100), None);
    let result = engine.execute(&request(&q, walk_in("Ana Ruiz"))).unwrap();

    let op = &result.operation;
    assert_eq!(op.folio, "PRF251017-0001");
    assert_eq!(op.status, OperationStatus::Completed);
    assert_eq!(op.amount_received, dec!(1985.00));
    assert_eq!(op.client_name, "Ana Ruiz");
    assert_eq!(op.client_id, None);
    assert_eq!(result.analysis.score, 0);
    assert!(result.alert.is_none());

    let stored = engine.operation_by_folio("PRF251017-0001").unwrap().unwrap();
    assert_eq!(&stored, op, "journal holds the completed row");
    assert_eq!(engine.events(Some("operation_executed")).unwrap().len(), 1);

    let q2 = sell_usd(&engine, dec!(20), None);
    let second = engine.execute(&request(&q2, walk_in("Pedro Cruz"))).unwrap();
    assert_eq!(second.operation.folio, "PRF251017-0002");
}

#[test]
fn a_quotation_executes_at_most_once() {
    let (engine, _) = desk();
    let q = sell_usd(&engine, dec!(100), None);
    engine.execute(&request(&q, walk_in("Ana Ruiz"))).unwrap();

    let err = engine.execute(&request(&q, walk_in("Ana Ruiz"))).unwrap_err();
    assert!(matches!(err, DeskError::QuoteExpired { .. }), "got {err:?}");
    assert_eq!(engine.drawer().balance(Currency::Usd).unwrap(), dec!(2100));
    assert_eq!(engine.operations(&OperationFilter::default()).unwrap().len(), 1);
}

#[test]
fn expired_quotation_is_refused() {
    let (engine, clock) = desk();
    let q = sell_usd(&engine, dec!(100), None);
    clock.advance_minutes(2);
    assert!(matches!(
        engine.execute(&request(&q, walk_in("Ana Ruiz"))),
        Err(DeskError::QuoteExpired { .. })
    ));
}

#[test]
fn large_amounts_need_identification() {
    let (engine, _) = build(deep_float());
    let q = sell_usd(&engine, dec!(3000), None);

    let err = engine.execute(&request(&q, walk_in("Ana Ruiz"))).unwrap_err();
    assert!(matches!(err, DeskError::IdentificationRequired));

    let incomplete = ClientInfo {
        identification: Some(IdDocument { kind: "INE".into(), number: "  ".into() }),
        ..walk_in("Ana Ruiz")
    };
    assert!(
        matches!(engine.execute(&request(&q, incomplete)), Err(DeskError::IdentificationRequired)),
        "a blank document number does not count"
    );

    let with_id = ClientInfo {
        identification: Some(IdDocument { kind: "PASSPORT".into(), number: "G12345678".into() }),
        ..walk_in("Ana Ruiz")
    };
    let result = engine.execute(&request(&q, with_id)).unwrap();
    assert_eq!(result.operation.identification.unwrap().number, "G12345678");
}

#[test]
fn registered_client_document_on_file_satisfies_identification() {
    let (engine, _) = build(deep_float());
    let client_id = new_client(&engine, true);
    let q = sell_usd(&engine, dec!(3000), Some(&client_id));

    let result = engine.execute(&request(&q, registered(&client_id))).unwrap();
    let op = result.operation;
    assert_eq!(op.client_id.as_deref(), Some(client_id.as_str()));
    assert_eq!(op.client_name, "Luis Mendoza Ríos", "name comes from the registry");
    assert_eq!(
        op.identification,
        Some(IdDocument { kind: "INE".into(), number: "INE0001234567".into() })
    );

    let client = engine.clients().get(&client_id).unwrap();
    assert_eq!(client.totals.lifetime_operations, 1);
    assert_eq!(client.totals.day_usd, dec!(3000));
    assert_eq!(engine.clients().history(&client_id).len(), 1);
    assert_eq!(engine.profiles().get(&client_id).unwrap().count, 1);
}

#[test]
fn blocked_client_is_refused_before_anything_moves() {
    let (engine, _) = desk();
    let client_id = new_client(&engine, true);
    engine.block_client(&client_id, "document mismatch", "oficial").unwrap();

    let q = sell_usd(&engine, dec!(100), Some(&client_id));
    let err = engine.execute(&request(&q, registered(&client_id))).unwrap_err();
    match err {
        DeskError::ClientBlocked { client_id: id, reason } => {
            assert_eq!(id, client_id);
            assert_eq!(reason, "document mismatch");
        }
        other => panic!("expected ClientBlocked, got {other:?}"),
    }
    assert!(engine.quotes().get(&q).is_some());
    assert_eq!(engine.drawer().balance(Currency::Usd).unwrap(), dec!(2000));
}

#[test]
fn basic_kyc_limits_are_enforced() {
    let (engine, _) = desk();
    let client_id = new_client(&engine, false);

    let q = sell_usd(&engine, dec!(600), Some(&client_id));
    let err = engine.execute(&request(&q, registered(&client_id))).unwrap_err();
    assert!(
        matches!(err, DeskError::LimitExceeded { remaining_daily: Some(r), .. } if r == dec!(1000)),
        "600 is over the 500 per-operation limit with the whole day left, got {err:?}"
    );

    for _ in 0..2 {
        let q = sell_usd(&engine, dec!(400), Some(&client_id));
        engine.execute(&request(&q, registered(&client_id))).unwrap();
    }
    let q = sell_usd(&engine, dec!(400), Some(&client_id));
    match engine.execute(&request(&q, registered(&client_id))).unwrap_err() {
        DeskError::LimitExceeded { remaining_daily, .. } => {
            assert_eq!(remaining_daily, Some(dec!(200)), "1000 daily minus 800 used");
        }
        other => panic!("expected LimitExceeded, got {other:?}"),
    }
}

#[test]
fn unknown_client_id_is_served_as_walk_in() {
    let (engine, _) = desk();
    let q = sell_usd(&engine, dec!(50), None);
    let client = ClientInfo {
        client_id: Some("cli_missing".into()),
        name: "Jorge Díaz".into(),
        ..ClientInfo::default()
    };
    let op = engine.execute(&request(&q, client)).unwrap().operation;
    assert_eq!(op.client_id, None);
    assert_eq!(op.client_name, "Jorge Díaz");
}

#[test]
fn fraud_block_stops_execution_and_keeps_the_alert() {
    let mut config = DeskConfig::default();
    config.fraud.thresholds.block = 50;
    let (engine, clock) = build(config);

    for _ in 0..2 {
        let q = sell_usd(&engine, dec!(100), None);
        engine.execute(&request(&q, walk_in("Raúl Ortiz"))).unwrap();
        clock.advance_minutes(5);
    }
    let usd_before = engine.drawer().balance(Currency::Usd).unwrap();

    let q = sell_usd(&engine, dec!(100), None);
    let err = engine.execute(&request(&q, walk_in("Raúl Ortiz"))).unwrap_err();
    match &err {
        DeskError::FraudBlocked { score, factors } => {
            assert_eq!(*score, 50);
            assert_eq!(factors, &vec!["Operation burst".to_string()]);
        }
        other => panic!("expected FraudBlocked, got {other:?}"),
    }
    assert!(err.is_rejection());

    assert_eq!(engine.drawer().balance(Currency::Usd).unwrap(), usd_before);
    assert!(engine.quotes().get(&q).is_some(), "blocked quotation stays unconsumed");

    let alerts = engine.journal().alerts().unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].blocked);
    assert_eq!(alerts[0].operation_ref, q, "refused operations are referenced by quotation");
}

#[test]
fn reversal_restores_the_drawer_and_the_client() {
    let (engine, _) = desk();
    let client_id = new_client(&engine, true);
    let q = sell_usd(&engine, dec!(100), Some(&client_id));
    let folio = engine
        .execute(&request(&q, registered(&client_id)))
        .unwrap()
        .operation
        .folio;

    let reversed = engine.reverse_operation(&folio, "supervisor", "wrong currency").unwrap();
    assert_eq!(reversed.status, OperationStatus::Reversed);
    assert_eq!(reversed.reversed_by.as_deref(), Some("supervisor"));
    assert_eq!(engine.drawer().balance(Currency::Usd).unwrap(), dec!(2000));
    assert_eq!(engine.drawer().balance(Currency::Mxn).unwrap(), dec!(50000));

    let client = engine.clients().get(&client_id).unwrap();
    assert_eq!(client.totals.day_usd, dec!(0));
    assert_eq!(client.totals.lifetime_operations, 0);

    let again = engine.reverse_operation(&folio, "supervisor", "twice").unwrap_err();
    assert!(matches!(again, DeskError::InvalidTransition { .. }));
    assert!(matches!(
        engine.reverse_operation("PRF000000-9999", "supervisor", "typo"),
        Err(DeskError::OperationNotFound(_))
    ));
}

#[test]
fn operations_list_newest_first_and_filters() {
    let (engine, clock) = desk();
    let q1 = sell_usd(&engine, dec!(10), None);
    engine.execute(&request(&q1, walk_in("Ana Ruiz"))).unwrap();
    clock.advance_minutes(30);
    let q2 = engine
        .quote(&QuoteRequest {
            direction: Direction::ClientBuys,
            currency_given: Currency::Mxn,
            currency_received: Currency::Usd,
            amount: dec!(10),
            amount_is_target: true,
            client_id: None,
        })
        .unwrap();
    engine.execute(&request(&q2.id, walk_in("Pedro Cruz"))).unwrap();

    let all = engine.operations(&OperationFilter::default()).unwrap();
    let folios: Vec<&str> = all.iter().map(|op| op.folio.as_str()).collect();
    assert_eq!(folios, vec!["PRF251017-0002", "PRF251017-0001"]);

    let buys = engine
        .operations(&OperationFilter {
            direction: Some(Direction::ClientBuys),
            ..OperationFilter::default()
        })
        .unwrap();
    assert_eq!(buys.len(), 1);
    assert_eq!(buys[0].client_name, "Pedro Cruz");
}

/// Fraud screening out of the way so only limits and the drawer decide.
fn unscreened() -> DeskConfig {
    let mut config = deep_float();
    config.fraud.thresholds.block = 100;
    config
}

#[test]
fn concurrent_executions_for_one_client_respect_the_daily_limit() {
    let (engine, _) = build(unscreened());
    let client_id = new_client(&engine, true);
    assert_eq!(engine.clients().get(&client_id).unwrap().kyc_level, KycLevel::Intermediate);
    for _ in 0..2 {
        let q = sell_usd(&engine, dec!(2900), Some(&client_id));
        engine.execute(&request(&q, registered(&client_id))).unwrap();
    }
    assert_eq!(engine.clients().get(&client_id).unwrap().totals.day_usd, dec!(5800));

    // 5800 + 2900 fits the 10000 daily limit once, not twice.
    let quotes = [
        sell_usd(&engine, dec!(2900), Some(&client_id)),
        sell_usd(&engine, dec!(2900), Some(&client_id)),
    ];
    let engine = &engine;
    let client_id = client_id.as_str();
    let outcomes: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = quotes
            .iter()
            .map(|q| s.spawn(move || engine.execute(&request(q, registered(client_id)))))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1, "got {outcomes:?}");
    let refused = outcomes.into_iter().find_map(Result::err).unwrap();
    assert!(
        matches!(refused, DeskError::LimitExceeded { remaining_daily: Some(r), .. } if r == dec!(1300)),
        "got {refused:?}"
    );
    assert_eq!(engine.clients().get(client_id).unwrap().totals.day_usd, dec!(8700));
    assert_eq!(engine.drawer().balance(Currency::Usd).unwrap(), dec!(10700));
}

#[test]
fn journaled_drawer_matches_the_live_one_after_parallel_executions() {
    let _ = env_logger::builder().is_test(true).try_init();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 10, 17, 17, 0, 0).unwrap(),
    ));
    let journal = Arc::new(MemoryJournal::new());
    let engine = DeskEngine::build(
        unscreened(),
        clock.clone(),
        journal.clone(),
        Arc::new(DailySequence::new()),
    )
    .unwrap();
    engine.open_drawer("op_1", "Cajera Uno").unwrap();

    let engine_ref = &engine;
    thread::scope(|s| {
        for teller in 0..4 {
            s.spawn(move || {
                for n in 0..10 {
                    let q = sell_usd(engine_ref, dec!(10), None);
                    let name = format!("Cliente {teller}-{n}");
                    engine_ref.execute(&request(&q, walk_in(&name))).unwrap();
                }
            });
        }
    });

    let live = engine.drawer().snapshot().unwrap();
    assert_eq!(live.operations, 40);
    assert_eq!(live.balance(Currency::Usd), dec!(2400));
    let stored = journal.drawer_by_id(&live.id).unwrap().unwrap();
    assert_eq!(stored, live, "the journal holds the latest state with every movement");

    let resumed = DeskEngine::build(unscreened(), clock, journal, Arc::new(DailySequence::new())).unwrap();
    assert_eq!(resumed.drawer().balance(Currency::Usd).unwrap(), dec!(2400));
    assert!(resumed.drawer().reconcile().unwrap().iter().all(|line| line.balanced));
}
