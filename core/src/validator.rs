//! Gatekeeping before any state mutation.
//!
//! File-level: required columns, encoding, and the row failure policy.
//! Cycle-level: duplicate guard, ledger ordering, trading calendar, row
//! consistency with the declared cycle/session, and session completeness.

use std::collections::HashSet;

use chrono::{Datelike, NaiveDate};
use log::warn;

use crate::{
    config::{EngineConfig, RowPolicy},
    error::{EngineError, EngineResult, ParseError, RowError, RowFault, ValidationError},
    parser::{ColumnMap, RawTable, TicketRow},
    snapshot::CycleWarning,
    store::Store,
    types::Session,
};

/// Result of a passed cycle check.
#[derive(Debug, Clone, Default)]
pub struct CycleCheck {
    /// Session that delivered no rows, making the cycle partial.
    pub missing_session: Option<Session>,
    pub warnings:        Vec<CycleWarning>,
}

impl CycleCheck {
    pub fn is_partial(&self) -> bool {
        self.missing_session.is_some()
    }
}

/// Required columns present. Encoding has already been checked by the
/// time a `RawTable` exists.
pub fn check_structure(table: &RawTable) -> Result<ColumnMap, ParseError> {
    ColumnMap::resolve(&table.headers).map_err(|columns| ParseError::MissingColumns { columns })
}

/// Split parsed rows into accepted rows and the policy outcome for the
/// rejected ones. Under `RejectFile` any bad row fails the file.
pub fn apply_row_policy(
    rows: Vec<Result<TicketRow, RowError>>,
    policy: RowPolicy,
) -> Result<(Vec<TicketRow>, Vec<RowError>), ParseError> {
    let mut accepted = Vec::with_capacity(rows.len());
    let mut rejected = Vec::new();
    for row in rows {
        match row {
            Ok(r) => accepted.push(r),
            Err(e) => rejected.push(e),
        }
    }
    match policy {
        RowPolicy::RejectFile if !rejected.is_empty() => {
            Err(ParseError::InvalidRows { rows: rejected })
        }
        _ => {
            if !rejected.is_empty() {
                warn!("Skipping {} invalid row(s): first {}", rejected.len(), rejected[0]);
            }
            Ok((accepted, rejected))
        }
    }
}

/// Every check that must pass before a cycle is aggregated.
///
/// `emptied` lists sessions that arrived with rows but lost all of them to
/// the skip-invalid policy, with the number skipped.
pub fn validate_cycle(
    store: &Store,
    config: &EngineConfig,
    cycle: NaiveDate,
    morning: &[TicketRow],
    evening: &[TicketRow],
    emptied: &[(Session, usize)],
) -> EngineResult<CycleCheck> {
    if store.is_cycle_consolidated(cycle)? {
        return Err(EngineError::DuplicateCycle { cycle });
    }

    if let Some(latest) = store.latest_consolidated_cycle()? {
        if !config.calendar.follows(latest, cycle) {
            return Err(EngineError::OutOfOrderCycle {
                cycle,
                expected: config.calendar.next_cycle_after(latest),
                players: Vec::new(),
            });
        }
    }

    if !config.calendar.is_trading_day(cycle) {
        return Err(ValidationError::NonTradingDay {
            cycle,
            weekday: cycle.weekday(),
        }
        .into());
    }

    if morning.is_empty() && evening.is_empty() {
        return Err(ValidationError::EmptyCycle { cycle }.into());
    }

    let inconsistent = check_rows(cycle, morning, evening);
    if !inconsistent.is_empty() {
        return Err(ValidationError::InconsistentRows { cycle, rows: inconsistent }.into());
    }

    let mut check = CycleCheck::default();
    for (session, rows) in [(Session::Morning, morning), (Session::Evening, evening)] {
        if !rows.is_empty() {
            continue;
        }
        check.missing_session = Some(session);
        match emptied.iter().find(|(s, _)| *s == session) {
            Some(&(_, skipped)) => {
                warn!("Cycle {cycle}: all {skipped} {session} row(s) skipped, processing as partial");
                check.warnings.push(CycleWarning::SessionRowsSkipped { session, skipped });
            }
            None => {
                warn!("Cycle {cycle}: {session} session has no rows, processing as partial");
                check.warnings.push(CycleWarning::PartialSession { missing: session });
            }
        }
    }
    Ok(check)
}

/// Rows must belong to the cycle and session they were delivered under,
/// ticket numbers must be unique across the cycle, and each session must
/// carry a single draw of its own.
fn check_rows(cycle: NaiveDate, morning: &[TicketRow], evening: &[TicketRow]) -> Vec<RowError> {
    let mut faults = Vec::new();
    let mut tickets: HashSet<&str> = HashSet::new();
    let mut morning_draw: Option<&str> = None;

    for (declared, rows) in [(Session::Morning, morning), (Session::Evening, evening)] {
        let mut session_draw: Option<&str> = None;
        for row in rows {
            let draw = row.draw_id.as_deref();
            let fault = if row.cycle != cycle {
                Some(RowFault::DateMismatch { expected: cycle, found: row.cycle })
            } else if row.first_seen.date() != cycle {
                Some(RowFault::DateMismatch { expected: cycle, found: row.first_seen.date() })
            } else if row.session != declared {
                Some(RowFault::SessionMismatch { declared, found: row.session })
            } else if row.quantity == 0 {
                Some(RowFault::InvalidQuantity { raw: "0".into() })
            } else if let Some(fault) = check_draw(draw, &mut session_draw, morning_draw) {
                Some(fault)
            } else {
                match row.ticket_id.as_deref() {
                    Some(ticket) if !tickets.insert(ticket) => {
                        Some(RowFault::DuplicateTicket { ticket: ticket.to_string() })
                    }
                    _ => None,
                }
            };
            if let Some(fault) = fault {
                faults.push(RowError {
                    line: row.line,
                    session: Some(declared),
                    fault,
                });
            }
        }
        if declared == Session::Morning {
            morning_draw = session_draw;
        }
    }
    faults
}

/// The first draw seen in a session is that session's draw. Rows without a
/// draw id are not checked.
fn check_draw<'a>(
    draw: Option<&'a str>,
    session_draw: &mut Option<&'a str>,
    morning_draw: Option<&str>,
) -> Option<RowFault> {
    let draw = draw?;
    match *session_draw {
        Some(expected) if expected != draw => Some(RowFault::ForeignDraw {
            expected: expected.to_string(),
            found:    draw.to_string(),
        }),
        Some(_) => None,
        None if morning_draw == Some(draw) => Some(RowFault::SharedDraw { draw: draw.to_string() }),
        None => {
            *session_draw = Some(draw);
            None
        }
    }
}
