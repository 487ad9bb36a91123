//! cycle-runner: command-line front end for the ticket consolidation engine.
//!
//! Usage:
//!   cycle-runner ingest   --db lottery.db --cycle 2024-03-04 --morning am.csv --evening pm.csv
//!   cycle-runner ingest   --db lottery.db --daily tickets_20240304.csv [--cycle 2024-03-04]
//!   cycle-runner inbox    --db lottery.db --dir ./inbox
//!   cycle-runner snapshot --db lottery.db [--cycle 2024-03-04] [--out current.csv]
//!   cycle-runner player   --db lottery.db --mobile 0551234567
//!   cycle-runner ledger   --db lottery.db
//!   cycle-runner mockgen  --seed 42 --players 100 --start 2024-03-01 --days 30 --out ./inbox
//!                         [--drop-session morning --drop-on 2024-03-05]
//!
//! Every command except mockgen reads engine_config.json from --data-dir
//! (default ./data).

mod inbox;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, Local, NaiveDate};
use lottery_core::{
    config::EngineConfig,
    cycle::CycleOutcome,
    engine::CycleEngine,
    export,
    mockgen::{self, MockGenerator, SessionDrop},
    types::Session,
};
use std::env;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::Path;

#[derive(serde::Serialize)]
struct PlayerReport {
    player:  lottery_core::registry::Player,
    history: Vec<lottery_core::store::PlayerCycleRecord>,
    audit:   lottery_core::store::PlayerAudit,
    /// The player's line in the current snapshot.
    current: Option<lottery_core::snapshot::SnapshotRow>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");

    match command {
        "ingest" => run_ingest(&args),
        "inbox" => run_inbox(&args),
        "snapshot" => run_snapshot(&args),
        "player" => run_player(&args),
        "ledger" => run_ledger(&args),
        "mockgen" => run_mockgen(&args),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn open_engine(args: &[String]) -> Result<CycleEngine> {
    let db = flag(args, "--db").unwrap_or("lottery.db");
    let data_dir = flag(args, "--data-dir").unwrap_or("./data");
    let config = EngineConfig::load(data_dir)?;
    log::debug!("Opening {db} with config from {data_dir}");
    Ok(CycleEngine::open(db, config)?)
}

fn run_ingest(args: &[String]) -> Result<()> {
    let mut engine = open_engine(args)?;
    let cycle = flag(args, "--cycle").map(parse_date).transpose()?;

    let outcome = match flag(args, "--daily") {
        Some(daily) => engine.submit_daily_file(cycle, Path::new(daily)),
        None => {
            let cycle = cycle.ok_or_else(|| anyhow!("--cycle is required with session files"))?;
            let morning = flag(args, "--morning").map(Path::new);
            let evening = flag(args, "--evening").map(Path::new);
            if morning.is_none() && evening.is_none() {
                bail!("Give --daily, or at least one of --morning/--evening");
            }
            engine.submit_session_files(cycle, morning, evening)
        }
    };

    match outcome {
        CycleOutcome::Consolidated(receipt) => {
            println!("=== CYCLE {} CONSOLIDATED ===", receipt.snapshot_version);
            println!("  attempt:         {}", receipt.attempt_id);
            println!("  partial:         {}", receipt.partial);
            println!("  players updated: {}", receipt.players_updated);
            println!("  players created: {}", receipt.players_created);
            println!("  tickets:         {}", receipt.tickets_total);
            for w in &receipt.warnings {
                println!("  warning:         {}", serde_json::to_string(w)?);
            }
            Ok(())
        }
        CycleOutcome::Rejected(rejection) => Err(anyhow!("{rejection}")),
    }
}

fn run_inbox(args: &[String]) -> Result<()> {
    let dir = flag(args, "--dir").ok_or_else(|| anyhow!("--dir is required"))?;
    let mut engine = open_engine(args)?;
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let report = inbox::process_inbox(&mut engine, Path::new(dir), &stamp)?;

    println!("=== INBOX {dir} ===");
    println!("  consolidated: {}", report.processed.len());
    println!("  failed:       {}", report.failed.len());
    for (path, reason) in &report.failed {
        println!("  {}: {reason}", path.display());
    }
    for (path, reason) in report.export_failures.iter().chain(&report.unmoved) {
        println!("  not filed: {}: {reason}", path.display());
    }
    Ok(())
}

fn run_snapshot(args: &[String]) -> Result<()> {
    let engine = open_engine(args)?;
    let snapshot = match flag(args, "--cycle").map(parse_date).transpose()? {
        Some(cycle) => engine.get_snapshot(cycle)?,
        None => engine.get_current_snapshot()?,
    };
    let Some(snapshot) = snapshot else {
        bail!("No consolidated snapshot found");
    };

    let rows = match flag(args, "--out") {
        Some(out) => {
            let file = File::create(out).with_context(|| format!("Cannot create {out}"))?;
            export::write_snapshot_csv(&snapshot, BufWriter::new(file))?
        }
        None => export::write_snapshot_csv(&snapshot, io::stdout().lock())?,
    };

    eprintln!("Snapshot {}: {rows} player(s)", snapshot.version());
    for (segment, count) in snapshot.segment_counts() {
        eprintln!("  segment {segment}: {count}");
    }
    Ok(())
}

fn run_player(args: &[String]) -> Result<()> {
    let mobile = flag(args, "--mobile").ok_or_else(|| anyhow!("--mobile is required"))?;
    let engine = open_engine(args)?;
    let player = engine.get_player(mobile)?;
    let current = engine
        .get_current_snapshot()?
        .and_then(|snapshot| snapshot.row(&player.mobile).cloned());
    let report = PlayerReport {
        history: engine.player_history(mobile)?,
        audit:   engine.audit_player(mobile)?,
        player,
        current,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.audit.is_consistent() {
        log::warn!("Stored derived values for {mobile} disagree with its window or history");
    }
    Ok(())
}

fn run_ledger(args: &[String]) -> Result<()> {
    let engine = open_engine(args)?;
    let ledger = engine.cycle_ledger()?;
    if ledger.is_empty() {
        println!("  (No cycles consolidated yet)");
    }
    for entry in ledger {
        println!(
            "  {} | {} | partial: {} | rows: {} am / {} pm | attempt {}",
            entry.cycle,
            entry.status,
            entry.partial,
            entry.morning_rows,
            entry.evening_rows,
            entry.attempt_id
        );
    }
    println!("  registered players: {}", engine.store().player_count()?);
    Ok(())
}

fn run_mockgen(args: &[String]) -> Result<()> {
    let seed = parse_arg(args, "--seed", 42u64);
    let players = parse_arg(args, "--players", 100usize);
    let days = parse_arg(args, "--days", 30i64);
    let out = flag(args, "--out").unwrap_or("./inbox");
    let start = match flag(args, "--start") {
        Some(s) => parse_date(s)?,
        None => Local::now().date_naive() - Duration::days(days),
    };
    let drop_session = flag(args, "--drop-session")
        .map(|s| s.parse::<Session>())
        .transpose()
        .map_err(|e| anyhow!("{e}"))?;
    let drop_on = flag(args, "--drop-on").map(parse_date).transpose()?;

    fs::create_dir_all(out).with_context(|| format!("Cannot create {out}"))?;
    let mut generator = MockGenerator::new(seed, players);

    println!("cycle-runner mockgen");
    println!("  seed:     {seed}");
    println!("  players:  {players}");
    println!("  start:    {start}");
    println!("  days:     {days}");
    println!();

    for offset in 0..days {
        let date = start + Duration::days(offset);
        let drop = match (drop_session, drop_on) {
            (Some(session), Some(on)) if on == date => SessionDrop::Drop(session),
            (Some(session), None) => SessionDrop::Drop(session),
            _ => SessionDrop::None,
        };
        let tickets = generator.generate_day(date, drop);
        let path = Path::new(out).join(mockgen::daily_file_name(date));
        let file = File::create(&path).with_context(|| format!("Cannot create {}", path.display()))?;
        let rows = mockgen::write_tickets_csv(&tickets, BufWriter::new(file))?;
        println!("  {} with {rows} ticket(s)", path.display());
    }
    Ok(())
}

fn print_usage() {
    println!("cycle-runner <ingest|inbox|snapshot|player|ledger|mockgen> [flags]");
    println!("  common flags: --db <file> (default lottery.db), --data-dir <dir> (default ./data)");
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == name)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Expected a YYYY-MM-DD date, got '{raw}'"))
}
