use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};

use super::Store;
use crate::{
    error::{EngineError, EngineResult},
    snapshot::{ConsolidatedSnapshot, CycleWarning, SnapshotMeta, SnapshotRow},
    types::{MobileNumber, Segment, Session},
};

pub(super) fn insert(conn: &Connection, snapshot: &ConsolidatedSnapshot) -> EngineResult<()> {
    let meta = &snapshot.meta;
    conn.execute(
        "INSERT INTO snapshot_meta
         (cycle_date, partial, missing_session, warnings_json, player_count,
          new_players, tickets_total)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            meta.cycle,
            meta.partial as i64,
            meta.missing_session.map(|s| s.as_str()),
            serde_json::to_string(&meta.warnings)?,
            meta.player_count as i64,
            meta.new_players as i64,
            meta.tickets_total as i64,
        ],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO snapshot_row
         (cycle_date, mobile, last_name, other_names, promotional_consent,
          created_at, e_score, segment, gear, cycle_tickets)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for row in &snapshot.rows {
        stmt.execute(params![
            meta.cycle,
            row.mobile.as_str(),
            row.last_name,
            row.other_names,
            row.promotional_consent as i64,
            row.created_at,
            row.e_score as i64,
            row.segment.as_str(),
            row.gear as i64,
            row.cycle_tickets as i64,
        ])?;
    }
    Ok(())
}

fn corrupt(cycle: NaiveDate, detail: String) -> EngineError {
    EngineError::Other(anyhow::anyhow!("Snapshot {cycle} is unreadable: {detail}"))
}

impl Store {
    /// The immutable snapshot written by `cycle`, if that cycle committed.
    pub fn load_snapshot(&self, cycle: NaiveDate) -> EngineResult<Option<ConsolidatedSnapshot>> {
        let meta_row: Option<(i64, Option<String>, String, i64, i64, i64)> = self
            .conn
            .query_row(
                "SELECT partial, missing_session, warnings_json, player_count,
                        new_players, tickets_total
                 FROM snapshot_meta WHERE cycle_date = ?1",
                params![cycle],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
            )
            .optional()?;
        let Some((partial, missing, warnings_json, player_count, new_players, tickets_total)) =
            meta_row
        else {
            return Ok(None);
        };

        let missing_session = missing
            .map(|s| s.parse::<Session>())
            .transpose()
            .map_err(|e| corrupt(cycle, e.to_string()))?;
        let warnings: Vec<CycleWarning> = serde_json::from_str(&warnings_json)?;

        let mut stmt = self.conn.prepare(
            "SELECT mobile, last_name, other_names, promotional_consent, created_at,
                    e_score, segment, gear, cycle_tickets
             FROM snapshot_row WHERE cycle_date = ?1 ORDER BY mobile",
        )?;
        let raw = stmt
            .query_map(params![cycle], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, NaiveDateTime>(4)?,
                    r.get::<_, i64>(5)?,
                    r.get::<_, String>(6)?,
                    r.get::<_, i64>(7)?,
                    r.get::<_, i64>(8)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let rows = raw
            .into_iter()
            .map(
                |(mobile, last_name, other_names, consent, created_at, e_score, segment, gear, tickets)| {
                    let segment: Segment =
                        segment.parse().map_err(|e: String| corrupt(cycle, e))?;
                    Ok(SnapshotRow {
                        last_name,
                        other_names,
                        mobile: MobileNumber::from_canonical(mobile),
                        promotional_consent: consent != 0,
                        created_at,
                        e_score: e_score as u64,
                        segment,
                        gear: gear as u8,
                        cycle_tickets: tickets as u64,
                    })
                },
            )
            .collect::<EngineResult<Vec<_>>>()?;

        Ok(Some(ConsolidatedSnapshot {
            meta: SnapshotMeta {
                cycle,
                partial: partial != 0,
                missing_session,
                warnings,
                player_count: player_count as u64,
                new_players: new_players as u64,
                tickets_total: tickets_total as u64,
            },
            rows,
        }))
    }
}
