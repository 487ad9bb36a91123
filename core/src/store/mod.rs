//! SQLite persistence layer.
//!
//! RULE: Only store/ talks to the database.
//! Pipeline stages call store methods; they never execute SQL directly.
//!
//! Reads go through `&self`. The only write path is `commit_cycle`, which
//! applies a whole cycle inside one IMMEDIATE transaction.

use chrono::NaiveDate;
use log::info;
use rusqlite::{Connection, TransactionBehavior};

use crate::{
    aggregator::DailyFacts,
    cycle::CycleLedgerEntry,
    error::{EngineError, EngineResult},
    event::CycleEvent,
    registry::Player,
    snapshot::ConsolidatedSnapshot,
};

mod cycle;
mod player;
mod snapshot;

pub use player::{PlayerAudit, PlayerCycleRecord};

pub struct Store {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

/// Everything one cycle writes. Built by the consolidator, applied by
/// `Store::commit_cycle` all at once.
pub struct CycleCommit<'a> {
    pub ledger:   CycleLedgerEntry,
    /// Latest consolidated cycle the registry was loaded against.
    pub base:     Option<NaiveDate>,
    pub players:  &'a [Player],
    pub facts:    &'a DailyFacts,
    pub snapshot: &'a ConsolidatedSnapshot,
    pub events:   &'a [CycleEvent],
}

impl Store {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based databases, this opens the same file.
    pub fn reopen(&self) -> EngineResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order. Safe to run on every start.
    pub fn migrate(&self) -> EngineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_players.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_snapshots.sql"))?;
        Ok(())
    }

    // ── Commit ─────────────────────────────────────────────────────

    /// Write one cycle atomically: ledger entry, players, history,
    /// snapshot, pointer and events. Any error rolls the whole cycle back.
    ///
    /// The duplicate and base checks are repeated inside the transaction so
    /// two writers racing on the same database cannot both land.
    pub fn commit_cycle(&mut self, commit: &CycleCommit<'_>) -> EngineResult<()> {
        let cycle_date = commit.ledger.cycle;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if cycle::is_consolidated(&tx, cycle_date)? {
            return Err(EngineError::DuplicateCycle { cycle: cycle_date });
        }
        let found = cycle::latest_consolidated(&tx)?;
        if found != commit.base {
            return Err(EngineError::StaleRegistry {
                cycle: cycle_date,
                expected: commit.base,
                found,
            });
        }

        cycle::insert_ledger_entry(&tx, &commit.ledger)?;
        for p in commit.players {
            player::upsert(&tx, p)?;
        }
        for (mobile, fact) in commit.facts.iter().filter(|(_, f)| f.purchased()) {
            player::insert_cycle_record(&tx, mobile, cycle_date, fact)?;
        }
        snapshot::insert(&tx, commit.snapshot)?;
        cycle::set_pointer(&tx, cycle_date)?;
        for event in commit.events {
            cycle::append_event(&tx, cycle_date, event)?;
        }

        tx.commit()?;
        info!(
            "Committed cycle {cycle_date}: {} player(s), {} event(s)",
            commit.players.len(),
            commit.events.len()
        );
        Ok(())
    }
}
