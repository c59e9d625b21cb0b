use cambio_core::{
    alert::AlertFilter,
    client::{IdKind, Identification, NewClient},
    clock::ManualClock,
    config::DeskConfig,
    currency::Currency,
    drawer::DrawerStatus,
    engine::DeskEngine,
    error::DeskError,
    executor::{ClientInfo, ExecutionRequest},
    operation::{FolioSequence, OperationStatus},
    quote::{Direction, QuoteRequest},
    store::{Journal, MemoryJournal, SqliteFolioSequence, SqliteJournal},
};
use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn journal() -> Arc<SqliteJournal> {
    let _ = env_logger::builder().is_test(true).try_init();
    let journal = SqliteJournal::in_memory().unwrap();
    journal.migrate().unwrap();
    Arc::new(journal)
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 10, 17, 17, 0, 0).unwrap(),
    ))
}

fn sell_usd(engine: &DeskEngine, amount: Decimal, client_id: Option<&str>) -> String {
    let q = engine
        .quote(&QuoteRequest {
            direction: Direction::ClientSells,
            currency_given: Currency::Usd,
            currency_received: Currency::Mxn,
            amount,
            amount_is_target: false,
            client_id: client_id.map(str::to_string),
        })
        .unwrap();
    engine
        .execute(&ExecutionRequest {
            quotation_id: q.id,
            client: ClientInfo {
                client_id: client_id.map(str::to_string),
                name: if client_id.is_some() { String::new() } else { "Ana Ruiz".into() },
                ..ClientInfo::default()
            },
            received_counts: Vec::new(),
            delivered_counts: Vec::new(),
            operator_id: "op_1".into(),
            operator_name: "Cajera Uno".into(),
        })
        .unwrap()
        .operation
        .folio
}

#[test]
fn sqlite_journal_round_trips_what_the_desk_writes() {
    let journal = journal();
    let engine = DeskEngine::with_sqlite(DeskConfig::default(), clock(), journal.clone()).unwrap();
    engine.open_drawer("op_1", "Cajera Uno").unwrap();
    let folio = sell_usd(&engine, dec!(100), None);

    let stored = journal.operation_by_folio(&folio).unwrap().unwrap();
    assert_eq!(stored.status, OperationStatus::Completed);
    assert_eq!(stored.amount_received, dec!(1985.00));
    assert_eq!(stored.amount_received.to_string(), "1985.00", "scale survives storage");
    assert!(journal.operation_by_folio("PRF251017-9999").unwrap().is_none());

    let drawer = journal.drawer_by_id("caja_profit_01").unwrap().unwrap();
    assert_eq!(drawer.status, DrawerStatus::Open);
    assert_eq!(drawer.balance(Currency::Usd), dec!(2100));

    let client = engine.create_quick_client("Luis Mendoza", None, "op_1").unwrap();
    assert_eq!(journal.clients().unwrap().len(), 1);
    engine.delete_client(&client.id, "op_1").unwrap();
    assert!(journal.client_by_id(&client.id).unwrap().is_none());

    let executed = journal.events(Some("operation_executed")).unwrap();
    assert_eq!(executed.len(), 1);
    let all = journal.events(None).unwrap();
    assert!(all.len() > executed.len());
    assert!(all.windows(2).all(|w| w[0].id < w[1].id), "insertion order");
}

#[test]
fn folio_sequence_is_per_prefix_and_day() {
    let journal = journal();
    let folios = SqliteFolioSequence::new(journal.clone());
    let friday = NaiveDate::from_ymd_opt(2025, 10, 17).unwrap();
    let saturday = NaiveDate::from_ymd_opt(2025, 10, 18).unwrap();

    assert_eq!(folios.issue("PRF", friday).unwrap(), "PRF251017-0001");
    assert_eq!(folios.issue("PRF", friday).unwrap(), "PRF251017-0002");
    assert_eq!(folios.issue("PRF", saturday).unwrap(), "PRF251018-0001");
    assert_eq!(folios.issue("SUC", friday).unwrap(), "SUC251017-0001");
    assert_eq!(journal.folio_seq("PRF", "2025-10-17").unwrap(), 2);
    assert_eq!(journal.folio_seq("PRF", "2025-10-19").unwrap(), 0);
}

#[test]
fn journal_refuses_a_duplicate_folio() {
    let memory = Arc::new(MemoryJournal::new());
    let engine = DeskEngine::build(
        DeskConfig::default(),
        clock(),
        memory.clone(),
        Arc::new(cambio_core::operation::DailySequence::new()),
    )
    .unwrap();
    engine.open_drawer("op_1", "Cajera Uno").unwrap();
    let folio = sell_usd(&engine, dec!(10), None);

    let op = memory.operation_by_folio(&folio).unwrap().unwrap();
    let err = memory.append_operation(&op).unwrap_err();
    assert!(matches!(err, DeskError::InvariantViolation(_)), "got {err:?}");

    let sqlite = journal();
    sqlite.append_operation(&op).unwrap();
    assert!(matches!(
        sqlite.append_operation(&op),
        Err(DeskError::Database(_))
    ));
}

#[test]
fn restarted_desk_resumes_from_the_journal() {
    let journal = journal();
    let clock = clock();
    let client_id;
    let movements;
    {
        let first = DeskEngine::with_sqlite(DeskConfig::default(), clock.clone(), journal.clone()).unwrap();
        first.open_drawer("op_1", "Cajera Uno").unwrap();
        client_id = first
            .create_client(NewClient {
                first_name: "Luis".into(),
                paternal_surname: "Mendoza".into(),
                identification: Some(Identification::new(IdKind::Ine, "INE0001")),
                created_by: "op_1".into(),
                ..NewClient::default()
            })
            .unwrap()
            .id;
        for _ in 0..3 {
            sell_usd(&first, dec!(100), Some(&client_id));
            clock.advance_minutes(5);
        }
        assert_eq!(first.alert_store().stats().total, 1, "the third operation is a burst");
        movements = first.drawer().movements().unwrap();
    }

    let second = DeskEngine::with_sqlite(DeskConfig::default(), clock.clone(), journal.clone()).unwrap();
    assert_eq!(second.drawer().status().unwrap(), DrawerStatus::Open);
    assert_eq!(second.drawer().balance(Currency::Usd).unwrap(), dec!(2300));
    assert_eq!(second.drawer().movements().unwrap(), movements, "movements come back row by row");
    assert!(second.drawer().reconcile().unwrap().iter().all(|line| line.balanced));

    let client = second.clients().get(&client_id).unwrap();
    assert_eq!(client.totals.lifetime_operations, 3);
    assert_eq!(second.clients().history(&client_id).len(), 3);
    assert_eq!(second.profiles().get(&client_id).unwrap().count, 3);
    assert_eq!(second.fraud().client_window_len(&client_id), 3);
    assert_eq!(second.alerts(&AlertFilter::default()).len(), 1);

    let folio = sell_usd(&second, dec!(100), Some(&client_id));
    assert_eq!(folio, "PRF251017-0004", "the durable sequence continues");
}

#[test]
fn reversed_operations_still_count_after_a_restart() {
    let journal = journal();
    let clock = clock();
    let folio = {
        let first = DeskEngine::with_sqlite(DeskConfig::default(), clock.clone(), journal.clone()).unwrap();
        first.open_drawer("op_1", "Cajera Uno").unwrap();
        let folio = sell_usd(&first, dec!(100), None);
        first.reverse_operation(&folio, "supervisor", "wrong amount").unwrap();
        folio
    };

    let second = DeskEngine::with_sqlite(DeskConfig::default(), clock, journal).unwrap();
    let op = second.operation_by_folio(&folio).unwrap().unwrap();
    assert_eq!(op.status, OperationStatus::Reversed);
    assert_eq!(second.drawer().balance(Currency::Usd).unwrap(), dec!(2000));
    assert_eq!(second.fraud().client_window_len("Ana Ruiz"), 1);
}

#[test]
fn stale_drawer_state_never_replaces_a_newer_one() {
    let journal = journal();
    let engine = DeskEngine::with_sqlite(DeskConfig::default(), clock(), journal.clone()).unwrap();
    let opened = engine.open_drawer("op_1", "Cajera Uno").unwrap();
    sell_usd(&engine, dec!(100), None);

    journal.upsert_drawer(&opened).unwrap();
    let stored = journal.drawer_by_id(&opened.id).unwrap().unwrap();
    assert!(stored.version > opened.version);
    assert_eq!(stored.balance(Currency::Usd), dec!(2100));
    assert_eq!(stored.movements.len(), opened.movements.len() + 2);
}
