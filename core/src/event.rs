//! The cycle event log.
//!
//! RULE: events are written only inside the commit transaction, so the
//! log never mentions a cycle whose state did not land.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{MobileNumber, Session};

/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CycleEvent {
    CycleConsolidated {
        cycle:         NaiveDate,
        players:       u64,
        tickets_total: u64,
        partial:       bool,
    },
    PlayerRegistered {
        cycle:  NaiveDate,
        mobile: MobileNumber,
    },
    PartialCycleAccepted {
        cycle:   NaiveDate,
        missing: Session,
    },
}

impl CycleEvent {
    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::CycleConsolidated { .. }    => "cycle_consolidated",
            Self::PlayerRegistered { .. }     => "player_registered",
            Self::PartialCycleAccepted { .. } => "partial_cycle_accepted",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub cycle:      NaiveDate,
    pub event_type: String,
    pub payload:    String, // JSON-serialized CycleEvent
}
