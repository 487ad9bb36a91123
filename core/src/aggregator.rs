//! Reduce a cycle's rows to one `DailyFact` per player.
//!
//! The merge is commutative and associative, so rows are fanned out over
//! hash partitions and reduced in parallel; the partitions hold disjoint
//! keys and are concatenated at the end. Row order never affects output.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use chrono::NaiveDateTime;
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    parser::TicketRow,
    types::{MobileNumber, Session},
};

/// Identity fields carried by the most recent row of the cycle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LatestIdentity {
    // Field order is the tie-break order: time first, then content, so
    // two rows with the same timestamp resolve the same way every run.
    pub seen_at:             NaiveDateTime,
    pub last_name:           String,
    pub other_names:         String,
    pub promotional_consent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyFact {
    pub ticket_count:    u64,
    pub morning_tickets: u64,
    pub evening_tickets: u64,
    /// Earliest sale of the cycle; becomes `created_at` for new players.
    pub first_seen:      Option<NaiveDateTime>,
    /// None for players with no rows this cycle.
    pub latest:          Option<LatestIdentity>,
}

impl DailyFact {
    /// The fact recorded for a registered player absent from the cycle.
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn purchased(&self) -> bool {
        self.ticket_count > 0
    }

    fn from_row(row: &TicketRow) -> Self {
        let qty = u64::from(row.quantity);
        let (morning_tickets, evening_tickets) = match row.session {
            Session::Morning => (qty, 0),
            Session::Evening => (0, qty),
        };
        Self {
            ticket_count: qty,
            morning_tickets,
            evening_tickets,
            first_seen: Some(row.first_seen),
            latest: Some(LatestIdentity {
                seen_at: row.first_seen,
                last_name: row.last_name.clone(),
                other_names: row.other_names.clone(),
                promotional_consent: row.promotional_consent,
            }),
        }
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            ticket_count: self.ticket_count + other.ticket_count,
            morning_tickets: self.morning_tickets + other.morning_tickets,
            evening_tickets: self.evening_tickets + other.evening_tickets,
            first_seen: min_some(self.first_seen, other.first_seen),
            latest: self.latest.max(other.latest),
        }
    }
}

fn min_some(a: Option<NaiveDateTime>, b: Option<NaiveDateTime>) -> Option<NaiveDateTime> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

pub type DailyFacts = BTreeMap<MobileNumber, DailyFact>;

fn partition_of(mobile: &MobileNumber, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    mobile.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as usize
}

fn fold_rows<'a>(rows: impl Iterator<Item = &'a TicketRow>) -> DailyFacts {
    let mut facts = DailyFacts::new();
    for row in rows {
        let fact = DailyFact::from_row(row);
        match facts.remove(&row.mobile) {
            Some(prev) => facts.insert(row.mobile.clone(), prev.merge(fact)),
            None => facts.insert(row.mobile.clone(), fact),
        };
    }
    facts
}

/// Sum rows into per-player facts across both sessions.
pub fn aggregate(rows: &[TicketRow], partitions: usize) -> DailyFacts {
    let partitions = partitions.max(1);
    if partitions == 1 {
        return fold_rows(rows.iter());
    }

    let mut buckets: Vec<Vec<&TicketRow>> = vec![Vec::new(); partitions];
    for row in rows {
        buckets[partition_of(&row.mobile, partitions)].push(row);
    }

    let partials: Vec<DailyFacts> = buckets
        .par_iter()
        .map(|bucket| fold_rows(bucket.iter().copied()))
        .collect();

    let mut merged = DailyFacts::new();
    for (i, partial) in partials.into_iter().enumerate() {
        debug!("Aggregation partition {i}: {} player(s)", partial.len());
        merged.extend(partial);
    }
    merged
}
