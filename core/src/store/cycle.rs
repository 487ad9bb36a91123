use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use super::Store;
use crate::{
    cycle::{CycleLedgerEntry, CycleStage},
    error::{EngineError, EngineResult},
    event::{CycleEvent, EventLogEntry},
};

// ── Transaction helpers ────────────────────────────────────────────
// Free functions over `&Connection` so they run equally against the
// plain connection and an open transaction.

pub(super) fn is_consolidated(conn: &Connection, cycle: NaiveDate) -> EngineResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM cycle_ledger WHERE cycle_date = ?1 AND status = ?2",
            params![cycle, CycleStage::Consolidated.as_str()],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(super) fn latest_consolidated(conn: &Connection) -> EngineResult<Option<NaiveDate>> {
    let latest: Option<NaiveDate> = conn.query_row(
        "SELECT MAX(cycle_date) FROM cycle_ledger WHERE status = ?1",
        params![CycleStage::Consolidated.as_str()],
        |r| r.get(0),
    )?;
    Ok(latest)
}

pub(super) fn insert_ledger_entry(conn: &Connection, entry: &CycleLedgerEntry) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO cycle_ledger
         (cycle_date, status, partial, morning_rows, evening_rows, attempt_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.cycle,
            entry.status.as_str(),
            entry.partial as i64,
            entry.morning_rows as i64,
            entry.evening_rows as i64,
            entry.attempt_id,
        ],
    )?;
    Ok(())
}

pub(super) fn set_pointer(conn: &Connection, cycle: NaiveDate) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO snapshot_pointer (id, cycle_date) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET cycle_date = excluded.cycle_date",
        params![cycle],
    )?;
    Ok(())
}

pub(super) fn append_event(
    conn: &Connection,
    cycle: NaiveDate,
    event: &CycleEvent,
) -> EngineResult<()> {
    let payload = serde_json::to_string(event)?;
    conn.execute(
        "INSERT INTO event_log (cycle_date, event_type, payload) VALUES (?1, ?2, ?3)",
        params![cycle, event.type_name(), payload],
    )?;
    Ok(())
}

fn parse_stage(raw: &str) -> Option<CycleStage> {
    [
        CycleStage::Received,
        CycleStage::Validating,
        CycleStage::Aggregating,
        CycleStage::Committing,
        CycleStage::Consolidated,
        CycleStage::Rejected,
    ]
    .into_iter()
    .find(|s| s.as_str() == raw)
}

// ── Reads ──────────────────────────────────────────────────────────

impl Store {
    pub fn is_cycle_consolidated(&self, cycle: NaiveDate) -> EngineResult<bool> {
        is_consolidated(&self.conn, cycle)
    }

    /// Latest consolidated cycle date, or None on an empty store.
    pub fn latest_consolidated_cycle(&self) -> EngineResult<Option<NaiveDate>> {
        latest_consolidated(&self.conn)
    }

    /// Cycle the current-snapshot pointer names.
    pub fn current_snapshot_cycle(&self) -> EngineResult<Option<NaiveDate>> {
        let cycle = self
            .conn
            .query_row(
                "SELECT cycle_date FROM snapshot_pointer WHERE id = 1",
                [],
                |r| r.get(0),
            )
            .optional()?;
        Ok(cycle)
    }

    /// Full cycle ledger, oldest first.
    pub fn cycle_ledger(&self) -> EngineResult<Vec<CycleLedgerEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT cycle_date, status, partial, morning_rows, evening_rows, attempt_id
             FROM cycle_ledger ORDER BY cycle_date",
        )?;
        let raw = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, NaiveDate>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, i64>(4)?,
                    r.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(cycle, status, partial, morning, evening, attempt_id)| {
                let status = parse_stage(&status).ok_or_else(|| {
                    EngineError::Other(anyhow::anyhow!(
                        "Unknown ledger status '{status}' for cycle {cycle}"
                    ))
                })?;
                Ok(CycleLedgerEntry {
                    cycle,
                    status,
                    partial: partial != 0,
                    morning_rows: morning as u64,
                    evening_rows: evening as u64,
                    attempt_id,
                })
            })
            .collect()
    }

    pub fn events_for_cycle(&self, cycle: NaiveDate) -> EngineResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, cycle_date, event_type, payload
             FROM event_log WHERE cycle_date = ?1 ORDER BY id",
        )?;
        let entries = stmt
            .query_map(params![cycle], |r| {
                Ok(EventLogEntry {
                    id:         r.get(0)?,
                    cycle:      r.get(1)?,
                    event_type: r.get(2)?,
                    payload:    r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
