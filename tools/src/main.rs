//! desk-runner: headless runner for the exchange desk.
//!
//! Usage:
//!   desk-runner --seed 12345 --ops 60 --db desk.db
//!   desk-runner --config data/desk_config.json --date 2025-10-17 --json
//!   desk-runner --ipc-mode --db desk.db

use anyhow::{Context, Result};
use cambio_core::{
    alert::{AlertFilter, AlertStats},
    client::{Client, IdKind, Identification, NewClient},
    clock::{Clock, ManualClock, SystemClock},
    config::DeskConfig,
    currency::Currency,
    drawer::{DrawerStatus, ShiftSummary},
    engine::{DeskEngine, MaintenanceReport},
    executor::{ClientInfo, ExecutionRequest},
    forecast::{DemandForecast, SpreadRecommendation},
    name_generator::NameGenerator,
    operation::IdDocument,
    quote::{Direction, QuoteRequest},
    rng::{DeskRng, RngBank, StreamSlot},
};
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

const OPERATOR_ID: &str = "op_demo";
const OPERATOR_NAME: &str = "Cajero Demo";

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetState,
    OpenDrawer { operator_id: String, operator_name: String },
    CloseDrawer,
    Quote { request: QuoteRequest },
    Execute { request: ExecutionRequest },
    Reverse { folio: String, by: String, reason: String },
    ResolveAlert {
        alert_id: String,
        resolution: String,
        by: String,
        #[serde(default)]
        false_positive: bool,
    },
    Forecast { currency: Currency, days: u32 },
    RecommendSpread { pair_id: String },
    Maintenance,
    Quit,
}

#[derive(serde::Serialize)]
struct UiState {
    drawer_status: DrawerStatus,
    operator: Option<String>,
    balances: BTreeMap<Currency, Decimal>,
    operations: u64,
    shift_margin: Decimal,
    alerts: AlertStats,
}

#[derive(serde::Serialize)]
struct DaySummary {
    seed: u64,
    business_date: NaiveDate,
    attempted: u64,
    executed: u64,
    rejections: BTreeMap<String, u64>,
    alerts: AlertStats,
    maintenance: MaintenanceReport,
    shift: ShiftSummary,
    forecast: Vec<DemandForecast>,
    spread: SpreadRecommendation,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let ops = parse_arg(&args, "--ops", 40u64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let json = args.iter().any(|a| a == "--json");
    let db = str_arg(&args, "--db").unwrap_or(":memory:");
    let config_path = str_arg(&args, "--config");
    let business_date = match str_arg(&args, "--date") {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .with_context(|| format!("--date expects YYYY-MM-DD, got {raw}"))?,
        None => Utc::now().date_naive(),
    };

    let config = match config_path {
        Some(path) => DeskConfig::load(path)?,
        None => DeskConfig::default(),
    };

    if ipc_mode {
        let engine = build_engine(config, Arc::new(SystemClock), db)?;
        return run_ipc_loop(&engine);
    }

    if !json {
        println!("Casa de cambio: desk-runner");
        println!("  seed:   {seed}");
        println!("  ops:    {ops}");
        println!("  db:     {db}");
        println!("  date:   {business_date}");
        println!();
    }

    let clock = Arc::new(ManualClock::new(opening_time(&config, business_date)));
    let engine = build_engine(config, clock.clone(), db)?;
    let summary = run_demo_day(&engine, &clock, seed, ops, business_date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn build_engine(config: DeskConfig, clock: Arc<dyn Clock>, db: &str) -> Result<DeskEngine> {
    let engine = if db == ":memory:" {
        DeskEngine::in_memory(config, clock)?
    } else {
        DeskEngine::open_sqlite(config, clock, db)?
    };
    Ok(engine)
}

/// 09:00 branch-local on `date`, as UTC.
fn opening_time(config: &DeskConfig, date: NaiveDate) -> cambio_core::types::Timestamp {
    let local = date.and_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default());
    config
        .desk
        .local_offset()
        .from_local_datetime(&local)
        .single()
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local))
}

// ── Demo day ───────────────────────────────────────────────────────

fn run_demo_day(
    engine: &DeskEngine,
    clock: &ManualClock,
    seed: u64,
    ops: u64,
    business_date: NaiveDate,
) -> Result<DaySummary> {
    let bank = RngBank::new(seed);
    let mut people = bank.stream(StreamSlot::DemoClients);
    let mut flow = bank.stream(StreamSlot::DemoOperations);

    let regulars = register_regulars(engine, &mut people, 8)?;
    engine.open_drawer(OPERATOR_ID, OPERATOR_NAME)?;

    let foreign = [Currency::Usd, Currency::Usd, Currency::Usd, Currency::Eur, Currency::Cad, Currency::Gbp];
    let mut executed = 0u64;
    let mut rejections: BTreeMap<String, u64> = BTreeMap::new();

    for _ in 0..ops {
        clock.advance_minutes(1 + flow.next_u64_below(14) as i64);

        let currency = flow.pick(&foreign).copied().unwrap_or(Currency::Usd);
        let direction = if flow.chance(0.55) {
            Direction::ClientSells
        } else {
            Direction::ClientBuys
        };
        let amount = Decimal::from_f64(flow.pareto(40.0, 1.6).min(4000.0).round()).unwrap_or(Decimal::ONE_HUNDRED);
        let regular = if flow.chance(0.6) { flow.pick(&regulars) } else { None };

        let (currency_given, currency_received, amount_is_target) = match direction {
            Direction::ClientSells => (currency, Currency::Mxn, false),
            Direction::ClientBuys => (Currency::Mxn, currency, true),
        };
        let request = QuoteRequest {
            direction,
            currency_given,
            currency_received,
            amount,
            amount_is_target,
            client_id: regular.map(|c| c.id.clone()),
        };

        let outcome = engine.quote(&request).and_then(|quotation| {
            let client = match regular {
                Some(c) => ClientInfo {
                    client_id: Some(c.id.clone()),
                    name: c.full_name.clone(),
                    phone: c.phone.clone(),
                    identification: None,
                },
                None => walk_in(&mut people, quotation.requires_id),
            };
            engine.execute(&ExecutionRequest {
                quotation_id: quotation.id,
                client,
                received_counts: Vec::new(),
                delivered_counts: Vec::new(),
                operator_id: OPERATOR_ID.to_string(),
                operator_name: OPERATOR_NAME.to_string(),
            })
        });

        match outcome {
            Ok(_) => executed += 1,
            Err(e) if e.is_rejection() => {
                *rejections.entry(rejection_label(&e.to_string())).or_default() += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let maintenance = engine.run_maintenance()?;
    let spread = engine.recommend_spread("USD_MXN")?;
    let shift = engine.close_drawer()?;
    let forecast = engine.forecast_demand(Currency::Usd, 3)?;

    Ok(DaySummary {
        seed,
        business_date,
        attempted: ops,
        executed,
        rejections,
        alerts: engine.alert_stats(),
        maintenance,
        shift,
        forecast,
        spread,
    })
}

/// Regular customers with a voter card on file.
fn register_regulars(engine: &DeskEngine, rng: &mut DeskRng, count: usize) -> Result<Vec<Client>> {
    (0..count)
        .map(|i| {
            let name = NameGenerator::generate(rng);
            let client = engine.create_client(NewClient {
                first_name: name.first_name.to_string(),
                paternal_surname: name.paternal_surname.to_string(),
                maternal_surname: Some(name.maternal_surname.to_string()),
                phone: Some(NameGenerator::generate_phone(rng)),
                identification: Some(Identification::new(IdKind::Ine, &format!("INE{seq:010}", seq = 1000 + i))),
                created_by: OPERATOR_ID.to_string(),
                ..NewClient::default()
            })?;
            Ok(client)
        })
        .collect()
}

fn walk_in(rng: &mut DeskRng, requires_id: bool) -> ClientInfo {
    ClientInfo {
        client_id: None,
        name: NameGenerator::generate_full_name(rng),
        phone: None,
        identification: requires_id.then(|| IdDocument {
            kind: IdKind::Passport.as_str().to_string(),
            number: format!("P{:08}", rng.next_u64_below(100_000_000)),
        }),
    }
}

/// First clause of the error message, used as a tally key.
fn rejection_label(message: &str) -> String {
    message
        .split([':', '('])
        .next()
        .unwrap_or(message)
        .trim()
        .to_string()
}

fn print_summary(s: &DaySummary) {
    println!("=== SHIFT SUMMARY ===");
    println!("  date:           {}", s.business_date);
    println!("  attempted:      {}", s.attempted);
    println!("  executed:       {}", s.executed);
    println!("  buys / sells:   {} / {}", s.shift.buys, s.shift.sells);
    println!("  bought (USD):   {}", s.shift.bought_volume_usd);
    println!("  sold (USD):     {}", s.shift.sold_volume_usd);
    println!("  shift margin:   {} MXN", s.shift.shift_margin);
    println!("  balanced:       {}", s.shift.balanced);
    for (reason, count) in &s.rejections {
        println!("  rejected:       {count} × {reason}");
    }

    println!();
    println!("=== CLOSING BALANCES ===");
    for (currency, amount) in &s.shift.closing_balances {
        println!("  {currency:<5} {amount}");
    }

    println!();
    println!("=== FRAUD ===");
    println!("  alerts raised:  {}", s.alerts.total);
    println!("  open:           {}", s.alerts.open);
    println!(
        "  windows pruned: {} client entries, {} system entries",
        s.maintenance.windows.client_entries, s.maintenance.windows.system_entries
    );

    println!();
    println!("=== OUTLOOK (USD) ===");
    for f in &s.forecast {
        println!(
            "  {} | buy {} | sell {} | optimal stock {} | confidence {:.2}",
            f.date, f.expected_buy_demand, f.expected_sell_demand, f.inventory.optimal, f.confidence
        );
    }
    println!(
        "  spread {}: {} -> {} ({})",
        s.spread.pair_id, s.spread.current_spread, s.spread.recommended_spread, s.spread.reason
    );
}

// ── IPC ────────────────────────────────────────────────────────────

fn run_ipc_loop(engine: &DeskEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let reply = match handle_command(engine, cmd) {
            Ok(value) => value,
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(engine: &DeskEngine, cmd: IpcCommand) -> Result<serde_json::Value> {
    let value = match cmd {
        IpcCommand::GetState => serde_json::to_value(build_ui_state(engine)?)?,
        IpcCommand::OpenDrawer { operator_id, operator_name } => {
            serde_json::to_value(engine.open_drawer(&operator_id, &operator_name)?)?
        }
        IpcCommand::CloseDrawer => serde_json::to_value(engine.close_drawer()?)?,
        IpcCommand::Quote { request } => serde_json::to_value(engine.quote(&request)?)?,
        IpcCommand::Execute { request } => serde_json::to_value(engine.execute(&request)?)?,
        IpcCommand::Reverse { folio, by, reason } => {
            serde_json::to_value(engine.reverse_operation(&folio, &by, &reason)?)?
        }
        IpcCommand::ResolveAlert { alert_id, resolution, by, false_positive } => serde_json::to_value(
            engine.resolve_alert(&alert_id, &resolution, &by, false_positive)?,
        )?,
        IpcCommand::Forecast { currency, days } => {
            serde_json::to_value(engine.forecast_demand(currency, days)?)?
        }
        IpcCommand::RecommendSpread { pair_id } => {
            serde_json::to_value(engine.recommend_spread(&pair_id)?)?
        }
        IpcCommand::Maintenance => serde_json::to_value(engine.run_maintenance()?)?,
        IpcCommand::Quit => serde_json::Value::Null,
    };
    Ok(value)
}

fn build_ui_state(engine: &DeskEngine) -> Result<UiState> {
    let drawer = engine.drawer().snapshot()?;
    let open_alerts = engine.alerts(&AlertFilter {
        resolved: Some(false),
        ..AlertFilter::default()
    });
    log::debug!("ui state requested, {} open alerts", open_alerts.len());
    Ok(UiState {
        drawer_status: drawer.status,
        operator: drawer.operator_name.clone(),
        balances: drawer
            .balances
            .iter()
            .map(|(currency, balance)| (*currency, balance.amount))
            .collect(),
        operations: drawer.operations,
        shift_margin: drawer.shift_margin,
        alerts: engine.alert_stats(),
    })
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

