use cambio_core::{
    client::{
        Address, ClientFilter, ClientStatus, ClientUpdate, CustomLimits, DeleteOutcome, IdKind,
        Identification, KycLevel, NewClient, RiskLevel,
    },
    clock::ManualClock,
    config::DeskConfig,
    currency::Currency,
    engine::DeskEngine,
    error::DeskError,
    event::DeskEvent,
    executor::{ClientInfo, ExecutionRequest},
    quote::{Direction, QuoteRequest},
};
use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

fn desk() -> (DeskEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 10, 17, 17, 0, 0).unwrap(),
    ));
    let engine = DeskEngine::in_memory(DeskConfig::default(), clock.clone()).unwrap();
    (engine, clock)
}

fn basic(first: &str, paternal: &str) -> NewClient {
    NewClient {
        first_name: first.into(),
        paternal_surname: paternal.into(),
        created_by: "op_1".into(),
        ..NewClient::default()
    }
}

fn home() -> Address {
    Address {
        street: "Av. Juárez".into(),
        exterior_number: Some("120".into()),
        neighborhood: "Centro".into(),
        postal_code: "06000".into(),
        city: "Ciudad de México".into(),
        state: "CDMX".into(),
        country: "México".into(),
        ..Address::default()
    }
}

#[test]
fn kyc_level_follows_the_documents_on_file() {
    let (engine, _) = desk();

    let bare = engine.create_client(basic("Ana", "Ruiz")).unwrap();
    assert_eq!(bare.kyc_level, KycLevel::Basic);
    assert_eq!(bare.limits.per_operation, dec!(500));
    assert_eq!(bare.limits.daily, dec!(1000));
    assert_eq!(bare.limits.monthly, dec!(3000));

    let with_id = engine
        .create_client(NewClient {
            identification: Some(Identification::new(IdKind::Ine, "INE111")),
            ..basic("Luis", "Mendoza")
        })
        .unwrap();
    assert_eq!(with_id.kyc_level, KycLevel::Intermediate);
    assert_eq!(with_id.limits.per_operation, dec!(5000));

    let full = engine
        .create_client(NewClient {
            identification: Some(Identification::new(IdKind::Passport, "G998877")),
            tax_id: Some("MERL800101ABC".into()),
            national_id: Some("MERL800101HDFNSS09".into()),
            address: Some(home()),
            ..basic("Laura", "Méndez")
        })
        .unwrap();
    assert_eq!(full.kyc_level, KycLevel::Complete);
    assert_eq!(full.limits.monthly, dec!(500000));
    assert_eq!(full.risk_level, RiskLevel::Low);

    let upgraded = engine
        .add_identification(&bare.id, Identification::new(IdKind::DriverLicense, "LIC42"), "op_1")
        .unwrap();
    assert_eq!(upgraded.kyc_level, KycLevel::Intermediate, "adding an ID upgrades the level");
    assert_eq!(upgraded.limits.daily, dec!(10000));
}

#[test]
fn risk_level_adds_up_client_factors() {
    let (engine, _) = desk();
    let pep = engine
        .create_client(NewClient { pep: true, ..basic("Rosa", "Salinas") })
        .unwrap();
    assert_eq!(pep.risk_level, RiskLevel::High, "pep 3 + incomplete KYC 1");
    assert!(pep.risk_factors.iter().any(|f| f == "politically exposed person"));

    let plain = engine.create_client(basic("Omar", "Vega")).unwrap();
    assert_eq!(plain.risk_level, RiskLevel::Low, "incomplete KYC alone is 1 point");

    let foreign = engine
        .update_client(
            &plain.id,
            ClientUpdate { foreign_resident: Some(true), ..ClientUpdate::default() },
            "op_1",
        )
        .unwrap();
    assert_eq!(foreign.risk_level, RiskLevel::Medium);
    assert_eq!(foreign.modified_by.as_deref(), Some("op_1"));
}

#[test]
fn officer_verification_sets_level_and_is_logged() {
    let (engine, _) = desk();
    let client = engine.create_client(basic("Ana", "Ruiz")).unwrap();

    let verified = engine.verify_kyc(&client.id, KycLevel::Complete, "oficial").unwrap();
    assert_eq!(verified.kyc_level, KycLevel::Complete);
    assert_eq!(verified.kyc_verified_by.as_deref(), Some("oficial"));
    assert_eq!(verified.limits.per_operation, dec!(50000));

    let events = engine.events(Some("kyc_verified")).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].event().unwrap(),
        DeskEvent::KycVerified {
            client_id: client.id.clone(),
            level: KycLevel::Complete,
            by: "oficial".into(),
        }
    );
    let stored = engine.journal().client_by_id(&client.id).unwrap().unwrap();
    assert_eq!(stored.kyc_level, KycLevel::Complete);
}

#[test]
fn custom_limits_survive_level_changes_until_reset() {
    let (engine, _) = desk();
    let client = engine.create_client(basic("Ana", "Ruiz")).unwrap();

    let custom = engine
        .set_custom_limits(
            &client.id,
            CustomLimits { daily: Some(dec!(250)), ..CustomLimits::default() },
            "oficial",
        )
        .unwrap();
    assert!(custom.limits.custom);
    assert_eq!(custom.limits.daily, dec!(250));
    assert_eq!(custom.limits.per_operation, dec!(500), "unset fields keep their value");

    let upgraded = engine
        .add_identification(&client.id, Identification::new(IdKind::Ine, "INE222"), "op_1")
        .unwrap();
    assert_eq!(upgraded.kyc_level, KycLevel::Intermediate);
    assert_eq!(upgraded.limits.daily, dec!(250), "custom limits are not overwritten");

    let reset = engine.reset_limits(&client.id, "oficial").unwrap();
    assert!(!reset.limits.custom);
    assert_eq!(reset.limits.daily, dec!(10000));
}

#[test]
fn search_filters_and_pages() {
    let (engine, clock) = desk();
    for (first, paternal) in [
        ("Ana", "Ruiz"),
        ("Luis", "Ruiz"),
        ("Marta", "Ruiz"),
        ("Pedro", "Ruiz"),
        ("Sofía", "Ruiz"),
    ] {
        engine.create_client(basic(first, paternal)).unwrap();
        clock.advance_minutes(1);
    }
    engine.create_client(basic("Jorge", "Díaz")).unwrap();

    let filter = ClientFilter { text: Some("ruiz".into()), ..ClientFilter::default() };
    let first = engine.search_clients(&filter, 1, 2).unwrap();
    assert_eq!(first.total, 5);
    assert_eq!(first.total_pages, 3);
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.items[0].first_name, "Sofía", "never-operated clients are newest first");

    let last = engine.search_clients(&filter, 3, 2).unwrap();
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.items[0].first_name, "Ana");

    let stats = engine.client_stats();
    assert_eq!(stats.total, 6);
    assert_eq!(stats.active, 6);
    assert_eq!(stats.by_kyc[&KycLevel::Basic], 6);
}

#[test]
fn phone_lookup_ignores_formatting() {
    let (engine, _) = desk();
    let client = engine
        .create_quick_client("María José Hernández López", Some("55-1234-5678"), "op_1")
        .unwrap();
    assert_eq!(client.first_name, "María");
    assert_eq!(client.paternal_surname, "José");
    assert_eq!(client.maternal_surname.as_deref(), Some("Hernández López"));

    let found = engine.clients().find_by_phone("5512345678").unwrap();
    assert_eq!(found.id, client.id);
    assert!(engine.clients().find_by_phone("").is_none());
}

#[test]
fn blocking_and_unblocking() {
    let (engine, _) = desk();
    let client = engine.create_client(basic("Ana", "Ruiz")).unwrap();

    let err = engine.unblock_client(&client.id, "oficial").unwrap_err();
    assert!(matches!(err, DeskError::InvalidTransition { .. }), "active clients cannot be unblocked");

    let blocked = engine.block_client(&client.id, "false documents", "oficial").unwrap();
    assert_eq!(blocked.status, ClientStatus::Blocked);
    let check = engine.clients().check_limits(&client.id, dec!(1)).unwrap();
    assert!(!check.allowed);
    assert_eq!(check.remaining_daily, Some(dec!(1000)), "the refusal still reports the allowance");

    let active = engine.unblock_client(&client.id, "oficial").unwrap();
    assert_eq!(active.status, ClientStatus::Active);
    assert!(active.block_reason.is_none());
    assert_eq!(engine.events(Some("client_blocked")).unwrap().len(), 1);
}

#[test]
fn delete_removes_only_clients_without_operations() {
    let (engine, _) = desk();
    engine.open_drawer("op_1", "Cajera Uno").unwrap();
    let idle = engine.create_client(basic("Ana", "Ruiz")).unwrap();
    let regular = engine.create_client(basic("Luis", "Mendoza")).unwrap();

    let q = engine
        .quote(&QuoteRequest {
            direction: Direction::ClientSells,
            currency_given: Currency::Usd,
            currency_received: Currency::Mxn,
            amount: dec!(100),
            amount_is_target: false,
            client_id: Some(regular.id.clone()),
        })
        .unwrap();
    engine
        .execute(&ExecutionRequest {
            quotation_id: q.id,
            client: ClientInfo { client_id: Some(regular.id.clone()), ..ClientInfo::default() },
            received_counts: Vec::new(),
            delivered_counts: Vec::new(),
            operator_id: "op_1".into(),
            operator_name: "Cajera Uno".into(),
        })
        .unwrap();

    assert_eq!(engine.delete_client(&idle.id, "oficial").unwrap(), DeleteOutcome::Removed);
    assert!(engine.clients().get(&idle.id).is_none());
    assert!(engine.journal().client_by_id(&idle.id).unwrap().is_none());

    assert_eq!(engine.delete_client(&regular.id, "oficial").unwrap(), DeleteOutcome::Deactivated);
    let kept = engine.journal().client_by_id(&regular.id).unwrap().unwrap();
    assert_eq!(kept.status, ClientStatus::Inactive);
    assert_eq!(engine.clients().history(&regular.id).len(), 1);

    assert!(matches!(
        engine.delete_client("cli_nobody", "oficial"),
        Err(DeskError::ClientNotFound(_))
    ));
}

#[test]
fn watch_list_is_counted() {
    let (engine, _) = desk();
    let client = engine.create_client(basic("Ana", "Ruiz")).unwrap();
    let listed = engine.add_to_watch_list(&client.id, "structuring suspicion", "oficial").unwrap();
    assert!(listed.watch_list);
    assert_eq!(engine.client_stats().watch_listed, 1);

    let hits = engine
        .search_clients(&ClientFilter { watch_list: Some(true), ..ClientFilter::default() }, 1, 10)
        .unwrap();
    assert_eq!(hits.total, 1);
}
