use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::Store;
use crate::{
    aggregator::DailyFact,
    config::EarlyWindowPolicy,
    error::{EngineError, EngineResult},
    registry::Player,
    scoring,
    types::{MobileNumber, Segment, Session},
    window::RollingWindow,
};

/// Tickets one player bought in one cycle, split by session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerCycleRecord {
    pub cycle:           NaiveDate,
    pub morning_tickets: u64,
    pub evening_tickets: u64,
}

impl PlayerCycleRecord {
    pub fn total(&self) -> u64 {
        self.morning_tickets + self.evening_tickets
    }

    pub fn tickets_in(&self, session: Session) -> u64 {
        match session {
            Session::Morning => self.morning_tickets,
            Session::Evening => self.evening_tickets,
        }
    }
}

/// Stored derived columns next to the values recomputed from the window
/// and the purchase history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerAudit {
    pub mobile:           MobileNumber,
    pub window:           String,
    pub stored_segment:   Segment,
    pub stored_gear:      u8,
    pub computed_segment: Segment,
    pub computed_gear:    u8,
    pub e_score:          u64,
    pub history_tickets:  u64,
}

impl PlayerAudit {
    pub fn is_consistent(&self) -> bool {
        self.stored_segment == self.computed_segment
            && self.stored_gear == self.computed_gear
            && self.e_score == self.history_tickets
    }
}

const PLAYER_COLUMNS: &str = "mobile, last_name, other_names, promotional_consent, created_at,
     e_score, purchase_window, last_processed_cycle";

struct PlayerColumns {
    mobile:      String,
    last_name:   String,
    other_names: String,
    consent:     i64,
    created_at:  NaiveDateTime,
    e_score:     i64,
    window:      String,
    last_cycle:  Option<NaiveDate>,
}

fn read_columns(r: &Row<'_>) -> rusqlite::Result<PlayerColumns> {
    Ok(PlayerColumns {
        mobile:      r.get(0)?,
        last_name:   r.get(1)?,
        other_names: r.get(2)?,
        consent:     r.get(3)?,
        created_at:  r.get(4)?,
        e_score:     r.get(5)?,
        window:      r.get(6)?,
        last_cycle:  r.get(7)?,
    })
}

fn decode_window(mobile: &str, encoded: &str) -> EngineResult<RollingWindow> {
    RollingWindow::decode(encoded).ok_or_else(|| EngineError::CorruptState {
        mobile: mobile.to_string(),
        detail: format!("unreadable purchase window '{encoded}'"),
    })
}

fn into_player(c: PlayerColumns, policy: EarlyWindowPolicy) -> EngineResult<Player> {
    if c.e_score < 0 {
        return Err(EngineError::CorruptState {
            mobile: c.mobile,
            detail: format!("negative e_score {}", c.e_score),
        });
    }
    let window = decode_window(&c.mobile, &c.window)?;
    Ok(Player::restore(
        MobileNumber::from_canonical(c.mobile),
        c.last_name,
        c.other_names,
        c.consent != 0,
        c.created_at,
        c.e_score as u64,
        window,
        c.last_cycle,
        policy,
    ))
}

// ── Transaction helpers ────────────────────────────────────────────

pub(super) fn upsert(conn: &Connection, p: &Player) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO player
         (mobile, last_name, other_names, promotional_consent, created_at,
          e_score, purchase_window, segment, gear, last_processed_cycle)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(mobile) DO UPDATE SET
           last_name            = excluded.last_name,
           other_names          = excluded.other_names,
           promotional_consent  = excluded.promotional_consent,
           e_score              = excluded.e_score,
           purchase_window      = excluded.purchase_window,
           segment              = excluded.segment,
           gear                 = excluded.gear,
           last_processed_cycle = excluded.last_processed_cycle",
        params![
            p.mobile.as_str(),
            p.last_name,
            p.other_names,
            p.promotional_consent as i64,
            p.created_at,
            p.e_score as i64,
            p.window().encode(),
            p.segment().as_str(),
            p.gear() as i64,
            p.last_processed_cycle,
        ],
    )?;
    Ok(())
}

pub(super) fn insert_cycle_record(
    conn: &Connection,
    mobile: &MobileNumber,
    cycle: NaiveDate,
    fact: &DailyFact,
) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO player_cycle (mobile, cycle_date, morning_tickets, evening_tickets)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            mobile.as_str(),
            cycle,
            fact.morning_tickets as i64,
            fact.evening_tickets as i64,
        ],
    )?;
    Ok(())
}

// ── Reads ──────────────────────────────────────────────────────────

impl Store {
    /// Every registered player, in mobile order.
    pub fn all_players(&self, policy: EarlyWindowPolicy) -> EngineResult<Vec<Player>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {PLAYER_COLUMNS} FROM player ORDER BY mobile"))?;
        let rows = stmt
            .query_map([], read_columns)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(|c| into_player(c, policy)).collect()
    }

    pub fn load_player(
        &self,
        mobile: &MobileNumber,
        policy: EarlyWindowPolicy,
    ) -> EngineResult<Option<Player>> {
        let columns = self
            .conn
            .query_row(
                &format!("SELECT {PLAYER_COLUMNS} FROM player WHERE mobile = ?1"),
                params![mobile.as_str()],
                read_columns,
            )
            .optional()?;
        columns.map(|c| into_player(c, policy)).transpose()
    }

    pub fn player_count(&self) -> EngineResult<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM player", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    /// Cycles in which the player bought at least one ticket, oldest first.
    pub fn player_history(&self, mobile: &MobileNumber) -> EngineResult<Vec<PlayerCycleRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT cycle_date, morning_tickets, evening_tickets
             FROM player_cycle WHERE mobile = ?1 ORDER BY cycle_date",
        )?;
        let records = stmt
            .query_map(params![mobile.as_str()], |r| {
                Ok(PlayerCycleRecord {
                    cycle:           r.get(0)?,
                    morning_tickets: r.get::<_, i64>(1)? as u64,
                    evening_tickets: r.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Compare the cached segment/gear columns with values recomputed from
    /// the stored window, and e_score with the recorded history.
    pub fn audit_player(
        &self,
        mobile: &MobileNumber,
        policy: EarlyWindowPolicy,
    ) -> EngineResult<Option<PlayerAudit>> {
        let stored: Option<(String, String, i64, i64)> = self
            .conn
            .query_row(
                "SELECT purchase_window, segment, gear, e_score FROM player WHERE mobile = ?1",
                params![mobile.as_str()],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;
        let Some((encoded, segment, gear, e_score)) = stored else {
            return Ok(None);
        };

        let window = decode_window(mobile.as_str(), &encoded)?;
        let stored_segment: Segment =
            segment.parse().map_err(|detail| EngineError::CorruptState {
                mobile: mobile.to_string(),
                detail,
            })?;
        let history_tickets = self
            .player_history(mobile)?
            .iter()
            .map(PlayerCycleRecord::total)
            .sum();

        Ok(Some(PlayerAudit {
            mobile: mobile.clone(),
            window: encoded,
            stored_segment,
            stored_gear: gear as u8,
            computed_segment: scoring::segment(&window, policy),
            computed_gear: scoring::gear(&window),
            e_score: e_score as u64,
            history_tickets,
        }))
    }
}
