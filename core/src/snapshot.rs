//! Consolidated snapshot, the per-cycle materialized view.
//!
//! Each successful commit writes one immutable snapshot versioned by its
//! cycle date. "Current" is a pointer to the latest version, moved only
//! inside the commit transaction.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{
    aggregator::DailyFact,
    registry::Player,
    types::{MobileNumber, Segment, Session},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub last_name:           String,
    pub other_names:         String,
    pub mobile:              MobileNumber,
    pub promotional_consent: bool,
    pub created_at:          NaiveDateTime,
    pub e_score:             u64,
    pub segment:             Segment,
    pub gear:                u8,
    /// Tickets this player bought in the snapshot's own cycle.
    pub cycle_tickets:       u64,
}

impl SnapshotRow {
    pub fn from_player(player: &Player, fact: Option<&DailyFact>) -> Self {
        Self {
            last_name: player.last_name.clone(),
            other_names: player.other_names.clone(),
            mobile: player.mobile.clone(),
            promotional_consent: player.promotional_consent,
            created_at: player.created_at,
            e_score: player.e_score,
            segment: player.segment(),
            gear: player.gear(),
            cycle_tickets: fact.map(|f| f.ticket_count).unwrap_or(0),
        }
    }
}

/// Non-fatal conditions recorded with a committed cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CycleWarning {
    /// One session delivered no rows; it counted as zero purchases.
    PartialSession { missing: Session },
    /// A session arrived but every one of its rows was skipped. The cycle
    /// is partial as with a missing session.
    SessionRowsSkipped { session: Session, skipped: usize },
    /// Rows dropped under the skip-invalid policy.
    SkippedRows { session: Option<Session>, count: usize, first_lines: Vec<u64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub cycle:           NaiveDate,
    pub partial:         bool,
    pub missing_session: Option<Session>,
    pub warnings:        Vec<CycleWarning>,
    pub player_count:    u64,
    pub new_players:     u64,
    pub tickets_total:   u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedSnapshot {
    pub meta: SnapshotMeta,
    /// One row per registered player, in mobile order.
    pub rows: Vec<SnapshotRow>,
}

impl ConsolidatedSnapshot {
    /// The snapshot version is the cycle date that produced it.
    pub fn version(&self) -> NaiveDate {
        self.meta.cycle
    }

    pub fn row(&self, mobile: &MobileNumber) -> Option<&SnapshotRow> {
        self.rows
            .binary_search_by(|r| r.mobile.cmp(mobile))
            .ok()
            .map(|i| &self.rows[i])
    }

    /// Player count per segment, A first.
    pub fn segment_counts(&self) -> [(Segment, usize); 5] {
        let mut counts = [
            (Segment::A, 0),
            (Segment::B, 0),
            (Segment::C, 0),
            (Segment::D, 0),
            (Segment::E, 0),
        ];
        for row in &self.rows {
            if let Some(slot) = counts.iter_mut().find(|(s, _)| *s == row.segment) {
                slot.1 += 1;
            }
        }
        counts
    }
}
