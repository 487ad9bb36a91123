//! The cycle consolidator: one submitted cycle, one pipeline run.
//!
//! EXECUTION ORDER (fixed, never reordered):
//!   1. Parse       (file submissions only; rows are already typed otherwise)
//!   2. Validate    duplicate guard, ledger order, calendar, row consistency
//!   3. Aggregate   rows → per-player daily facts, partitioned by mobile hash
//!   4. Stage       registry working copy: get_or_create + apply_cycle_fact
//!   5. Commit      ledger, players, history, snapshot, pointer, events
//!
//! Steps 4 and 5 together are the Committing stage. A date that is already
//! consolidated is refused before any input is read.
//!
//! RULES:
//!   - Nothing before step 5 touches durable state.
//!   - Step 5 is a single store transaction; it either lands whole or not at all.
//!   - Every registered player receives a fact every cycle, zero when absent,
//!     so all windows advance together.
//!   - One engine owns the store, and submission takes `&mut self`, so a
//!     process commits at most one cycle at a time.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use chrono::NaiveDate;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::{
    aggregator::{self, DailyFact, DailyFacts},
    config::EngineConfig,
    cycle::{CycleLedgerEntry, CycleOutcome, CycleReceipt, CycleRejection, CycleStage},
    error::{EngineError, EngineResult, ParseError, RowError},
    event::{CycleEvent, EventLogEntry},
    parser::{self, ParseContext, TicketRow},
    registry::{Player, PlayerRegistry},
    snapshot::{ConsolidatedSnapshot, CycleWarning, SnapshotMeta, SnapshotRow},
    store::{CycleCommit, PlayerAudit, PlayerCycleRecord, Store},
    types::{MobileNumber, Session},
    validator,
};

/// Skipped-row warnings list at most this many source lines.
const SKIPPED_LINES_SHOWN: usize = 5;

/// Rows gathered for one cycle before validation.
#[derive(Default)]
struct Intake {
    morning:  Vec<TicketRow>,
    evening:  Vec<TicketRow>,
    warnings: Vec<CycleWarning>,
    /// Sessions that arrived with rows, all of them skipped, and how many.
    emptied:  Vec<(Session, usize)>,
}

/// Where one submission currently is.
struct Attempt {
    id:    Uuid,
    cycle: Option<NaiveDate>,
    stage: CycleStage,
}

impl Attempt {
    fn new(cycle: Option<NaiveDate>) -> Self {
        let attempt = Self {
            id: Uuid::new_v4(),
            cycle,
            stage: CycleStage::Received,
        };
        debug!("Attempt {} received for cycle {:?}", attempt.id, cycle);
        attempt
    }

    fn enter(&mut self, stage: CycleStage) {
        debug_assert!(!self.stage.is_terminal(), "attempt {} already {}", self.id, self.stage);
        debug!("Attempt {}: {} → {}", self.id, self.stage, stage);
        self.stage = stage;
    }
}

pub struct CycleEngine {
    config: EngineConfig,
    store:  Store,
}

impl CycleEngine {
    /// The store must already be migrated.
    pub fn new(config: EngineConfig, store: Store) -> Self {
        Self { config, store }
    }

    /// Open (or create) a database file and bring its schema up to date.
    pub fn open(path: &str, config: EngineConfig) -> EngineResult<Self> {
        let store = Store::open(path)?;
        store.migrate()?;
        Ok(Self::new(config, store))
    }

    /// In-memory engine with the test configuration.
    pub fn build_test() -> EngineResult<Self> {
        Self::build_test_with(EngineConfig::default_test())
    }

    pub fn build_test_with(config: EngineConfig) -> EngineResult<Self> {
        let store = Store::in_memory()?;
        store.migrate()?;
        Ok(Self::new(config, store))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // ── Submission ─────────────────────────────────────────────────

    /// Consolidate one cycle from already-parsed session rows.
    pub fn submit_cycle(
        &mut self,
        cycle: NaiveDate,
        morning: Vec<TicketRow>,
        evening: Vec<TicketRow>,
    ) -> CycleOutcome {
        let mut attempt = Attempt::new(Some(cycle));
        let intake = Intake {
            morning,
            evening,
            ..Intake::default()
        };
        let result = self.consolidate(&mut attempt, cycle, intake);
        self.finish(attempt, result)
    }

    /// Consolidate one cycle from per-session CSV sources. A missing
    /// session (`None`) makes the cycle partial.
    pub fn submit_session_readers<M: Read, E: Read>(
        &mut self,
        cycle: NaiveDate,
        morning: Option<M>,
        evening: Option<E>,
    ) -> CycleOutcome {
        let mut attempt = Attempt::new(Some(cycle));
        attempt.enter(CycleStage::Validating);
        let result = self
            .refuse_duplicate(cycle)
            .and_then(|()| self.parse_sessions(cycle, morning, evening))
            .and_then(|intake| self.consolidate(&mut attempt, cycle, intake));
        self.finish(attempt, result)
    }

    pub fn submit_session_files(
        &mut self,
        cycle: NaiveDate,
        morning: Option<&Path>,
        evening: Option<&Path>,
    ) -> CycleOutcome {
        let mut attempt = Attempt::new(Some(cycle));
        attempt.enter(CycleStage::Validating);
        let result = self
            .refuse_duplicate(cycle)
            .and_then(|()| Ok((open_optional(morning)?, open_optional(evening)?)))
            .and_then(|(m, e)| self.parse_sessions(cycle, m, e))
            .and_then(|intake| self.consolidate(&mut attempt, cycle, intake));
        self.finish(attempt, result)
    }

    /// Consolidate a combined daily file carrying both sessions. Each row's
    /// session comes from its SESSION column or its purchase hour. Without
    /// an explicit `cycle`, the date is taken from the first row.
    pub fn submit_daily_reader<R: Read>(
        &mut self,
        cycle: Option<NaiveDate>,
        reader: R,
    ) -> CycleOutcome {
        let mut attempt = Attempt::new(cycle);
        attempt.enter(CycleStage::Validating);
        let result = self.run_daily(&mut attempt, cycle, || Ok(reader));
        self.finish(attempt, result)
    }

    pub fn submit_daily_file(&mut self, cycle: Option<NaiveDate>, path: &Path) -> CycleOutcome {
        let mut attempt = Attempt::new(cycle);
        attempt.enter(CycleStage::Validating);
        let result = self.run_daily(&mut attempt, cycle, || {
            Ok(BufReader::new(File::open(path)?))
        });
        self.finish(attempt, result)
    }

    // ── Queries ────────────────────────────────────────────────────

    /// The snapshot the current pointer names; None before the first commit.
    pub fn get_current_snapshot(&self) -> EngineResult<Option<ConsolidatedSnapshot>> {
        match self.store.current_snapshot_cycle()? {
            Some(cycle) => self.store.load_snapshot(cycle),
            None => Ok(None),
        }
    }

    pub fn get_snapshot(&self, cycle: NaiveDate) -> EngineResult<Option<ConsolidatedSnapshot>> {
        self.store.load_snapshot(cycle)
    }

    /// Look a player up by any accepted spelling of their mobile number.
    pub fn get_player(&self, mobile: &str) -> EngineResult<Player> {
        let mobile = self.normalize(mobile)?;
        self.store
            .load_player(&mobile, self.config.early_window)?
            .ok_or_else(|| EngineError::PlayerNotFound { mobile: mobile.to_string() })
    }

    pub fn player_history(&self, mobile: &str) -> EngineResult<Vec<PlayerCycleRecord>> {
        let player = self.get_player(mobile)?;
        self.store.player_history(&player.mobile)
    }

    pub fn audit_player(&self, mobile: &str) -> EngineResult<PlayerAudit> {
        let mobile = self.normalize(mobile)?;
        self.store
            .audit_player(&mobile, self.config.early_window)?
            .ok_or_else(|| EngineError::PlayerNotFound { mobile: mobile.to_string() })
    }

    pub fn cycle_ledger(&self) -> EngineResult<Vec<CycleLedgerEntry>> {
        self.store.cycle_ledger()
    }

    pub fn events_for_cycle(&self, cycle: NaiveDate) -> EngineResult<Vec<EventLogEntry>> {
        self.store.events_for_cycle(cycle)
    }

    fn normalize(&self, raw: &str) -> EngineResult<MobileNumber> {
        MobileNumber::normalize(raw, &self.config.mobile)
            .map_err(|_| EngineError::InvalidMobile { raw: raw.to_string() })
    }

    // ── Pipeline ───────────────────────────────────────────────────

    /// A consolidated date is refused before its input is read, so a
    /// resubmission is a no-op whatever the file holds.
    fn refuse_duplicate(&self, cycle: NaiveDate) -> EngineResult<()> {
        if self.store.is_cycle_consolidated(cycle)? {
            return Err(EngineError::DuplicateCycle { cycle });
        }
        Ok(())
    }

    fn run_daily<R: Read>(
        &mut self,
        attempt: &mut Attempt,
        cycle: Option<NaiveDate>,
        open: impl FnOnce() -> EngineResult<R>,
    ) -> EngineResult<CycleReceipt> {
        if let Some(cycle) = cycle {
            self.refuse_duplicate(cycle)?;
        }
        let (cycle, intake) = self.parse_daily(cycle, open()?)?;
        attempt.cycle = Some(cycle);
        self.consolidate(attempt, cycle, intake)
    }

    fn parse_sessions<M: Read, E: Read>(
        &self,
        cycle: NaiveDate,
        morning: Option<M>,
        evening: Option<E>,
    ) -> EngineResult<Intake> {
        let mut intake = Intake::default();
        if let Some(r) = morning {
            intake.morning = self.parse_session(cycle, Session::Morning, r, &mut intake)?;
        }
        if let Some(r) = evening {
            intake.evening = self.parse_session(cycle, Session::Evening, r, &mut intake)?;
        }
        Ok(intake)
    }

    fn parse_session<R: Read>(
        &self,
        cycle: NaiveDate,
        session: Session,
        reader: R,
        intake: &mut Intake,
    ) -> Result<Vec<TicketRow>, ParseError> {
        let table = parser::read_table(reader)?;
        let columns = validator::check_structure(&table)?;
        let ctx = ParseContext {
            cycle,
            declared: Some(session),
            config: &self.config,
        };
        let parsed = parser::parse_rows(&table, &columns, &ctx);
        let (rows, skipped) = validator::apply_row_policy(parsed, self.config.row_policy)?;
        if rows.is_empty() && !skipped.is_empty() {
            intake.emptied.push((session, skipped.len()));
        }
        if let Some(w) = skipped_warning(Some(session), &skipped) {
            intake.warnings.push(w);
        }
        debug!("Parsed {} {session} row(s) for {cycle}", rows.len());
        Ok(rows)
    }

    fn parse_daily<R: Read>(
        &self,
        cycle: Option<NaiveDate>,
        reader: R,
    ) -> EngineResult<(NaiveDate, Intake)> {
        let table = parser::read_table(reader)?;
        let columns = validator::check_structure(&table)?;
        let cycle = match cycle {
            Some(c) => c,
            None => {
                let inferred = parser::infer_cycle(&table, &columns, &self.config)?;
                self.refuse_duplicate(inferred)?;
                inferred
            }
        };
        let ctx = ParseContext {
            cycle,
            declared: None,
            config: &self.config,
        };
        let parsed = parser::parse_rows(&table, &columns, &ctx);
        let (rows, skipped) = validator::apply_row_policy(parsed, self.config.row_policy)?;

        let mut intake = Intake::default();
        if let Some(w) = skipped_warning(None, &skipped) {
            intake.warnings.push(w);
        }
        let (morning, evening): (Vec<_>, Vec<_>) =
            rows.into_iter().partition(|r| r.session == Session::Morning);
        intake.morning = morning;
        intake.evening = evening;
        Ok((cycle, intake))
    }

    fn consolidate(
        &mut self,
        attempt: &mut Attempt,
        cycle: NaiveDate,
        intake: Intake,
    ) -> EngineResult<CycleReceipt> {
        let Intake { morning, evening, mut warnings, emptied } = intake;

        // 2. Validate
        attempt.enter(CycleStage::Validating);
        let check = validator::validate_cycle(
            &self.store,
            &self.config,
            cycle,
            &morning,
            &evening,
            &emptied,
        )?;
        warnings.extend(check.warnings.iter().cloned());

        // 3. Aggregate
        attempt.enter(CycleStage::Aggregating);
        let morning_rows = morning.len() as u64;
        let evening_rows = evening.len() as u64;
        let mut rows = morning;
        rows.extend(evening);
        let facts = aggregator::aggregate(&rows, self.config.aggregation_partitions);

        // 4. Stage + 5. Commit
        attempt.enter(CycleStage::Committing);
        let mut registry = PlayerRegistry::load(&self.store, &self.config)?;
        let base = registry.base();
        stage_cycle(&mut registry, cycle, &facts)?;
        debug!("Staged {} player(s) for {cycle}", registry.len());

        let snapshot = build_snapshot(&registry, cycle, &facts, &check, &warnings);
        let changes = registry.into_changes();
        let events = cycle_events(cycle, &snapshot, &changes.created, check.missing_session);

        let ledger = CycleLedgerEntry {
            cycle,
            status: CycleStage::Consolidated,
            partial: check.is_partial(),
            morning_rows,
            evening_rows,
            attempt_id: attempt.id.to_string(),
        };
        self.store.commit_cycle(&CycleCommit {
            ledger,
            base,
            players: &changes.players,
            facts: &facts,
            snapshot: &snapshot,
            events: &events,
        })?;

        Ok(CycleReceipt {
            attempt_id: attempt.id,
            snapshot_version: snapshot.version(),
            partial: check.is_partial(),
            warnings,
            players_updated: changes.players.len() as u64,
            players_created: changes.created.len() as u64,
            tickets_total: snapshot.meta.tickets_total,
        })
    }

    fn finish(&self, mut attempt: Attempt, result: EngineResult<CycleReceipt>) -> CycleOutcome {
        match result {
            Ok(receipt) => {
                attempt.enter(CycleStage::Consolidated);
                info!(
                    "Cycle {} consolidated (attempt {}): {} player(s), {} new, {} ticket(s){}",
                    receipt.snapshot_version,
                    receipt.attempt_id,
                    receipt.players_updated,
                    receipt.players_created,
                    receipt.tickets_total,
                    if receipt.partial { ", partial" } else { "" },
                );
                CycleOutcome::Consolidated(receipt)
            }
            Err(error) => {
                let stage = attempt.stage;
                attempt.enter(CycleStage::Rejected);
                let rejection = CycleRejection {
                    attempt_id: attempt.id,
                    cycle: attempt.cycle,
                    stage,
                    error,
                };
                warn!("{rejection} (attempt {})", attempt.id);
                CycleOutcome::Rejected(rejection)
            }
        }
    }
}

fn open_optional(path: Option<&Path>) -> EngineResult<Option<BufReader<File>>> {
    path.map(|p| File::open(p).map(BufReader::new))
        .transpose()
        .map_err(EngineError::from)
}

fn skipped_warning(session: Option<Session>, skipped: &[RowError]) -> Option<CycleWarning> {
    if skipped.is_empty() {
        return None;
    }
    Some(CycleWarning::SkippedRows {
        session,
        count: skipped.len(),
        first_lines: skipped
            .iter()
            .filter_map(|e| e.line)
            .take(SKIPPED_LINES_SHOWN)
            .collect(),
    })
}

/// Register new purchasers, then fold a fact into every player. Any player
/// whose history does not line up fails the whole cycle with every such
/// player listed.
fn stage_cycle(
    registry: &mut PlayerRegistry,
    cycle: NaiveDate,
    facts: &DailyFacts,
) -> EngineResult<()> {
    for (mobile, fact) in facts {
        let (Some(first_seen), Some(latest)) = (fact.first_seen, fact.latest.as_ref()) else {
            continue;
        };
        registry.get_or_create(
            mobile,
            &latest.last_name,
            &latest.other_names,
            latest.promotional_consent,
            first_seen,
        );
    }

    let absent = DailyFact::absent();
    let mut faults = Vec::new();
    for mobile in registry.mobiles() {
        let fact = facts.get(&mobile).unwrap_or(&absent);
        if let Err(fault) = registry.apply_cycle_fact(&mobile, cycle, fact) {
            faults.push(fault);
        }
    }

    if faults.is_empty() {
        return Ok(());
    }
    Err(EngineError::OutOfOrderCycle {
        cycle,
        expected: faults[0].expected,
        players: faults,
    })
}

fn build_snapshot(
    registry: &PlayerRegistry,
    cycle: NaiveDate,
    facts: &DailyFacts,
    check: &validator::CycleCheck,
    warnings: &[CycleWarning],
) -> ConsolidatedSnapshot {
    let rows: Vec<SnapshotRow> = registry
        .players()
        .map(|p| SnapshotRow::from_player(p, facts.get(&p.mobile)))
        .collect();
    ConsolidatedSnapshot {
        meta: SnapshotMeta {
            cycle,
            partial: check.is_partial(),
            missing_session: check.missing_session,
            warnings: warnings.to_vec(),
            player_count: rows.len() as u64,
            new_players: registry.created_count() as u64,
            tickets_total: facts.values().map(|f| f.ticket_count).sum(),
        },
        rows,
    }
}

fn cycle_events(
    cycle: NaiveDate,
    snapshot: &ConsolidatedSnapshot,
    created: &[MobileNumber],
    missing: Option<Session>,
) -> Vec<CycleEvent> {
    let mut events: Vec<CycleEvent> = created
        .iter()
        .map(|mobile| CycleEvent::PlayerRegistered {
            cycle,
            mobile: mobile.clone(),
        })
        .collect();
    if let Some(missing) = missing {
        events.push(CycleEvent::PartialCycleAccepted { cycle, missing });
    }
    events.push(CycleEvent::CycleConsolidated {
        cycle,
        players: snapshot.meta.player_count,
        tickets_total: snapshot.meta.tickets_total,
        partial: snapshot.meta.partial,
    });
    events
}
