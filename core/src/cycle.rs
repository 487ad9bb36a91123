//! Cycle lifecycle: stages, ledger entries, and submission outcomes.
//!
//!   Received → Validating → Aggregating → Committing → Consolidated
//!                  └────────────┴─────────────┴──────→ Rejected
//!
//! There is no retry state. A rejected cycle is resubmitted as a new
//! attempt and runs validation again from the top.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{
    error::{EngineError, EngineResult},
    snapshot::CycleWarning,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    Received,
    Validating,
    Aggregating,
    Committing,
    Consolidated,
    Rejected,
}

impl CycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received     => "received",
            Self::Validating   => "validating",
            Self::Aggregating  => "aggregating",
            Self::Committing   => "committing",
            Self::Consolidated => "consolidated",
            Self::Rejected     => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Consolidated | Self::Rejected)
    }
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the cycle ledger. Only consolidated cycles are recorded;
/// rejected attempts leave no trace in durable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleLedgerEntry {
    pub cycle:        NaiveDate,
    pub status:       CycleStage,
    pub partial:      bool,
    pub morning_rows: u64,
    pub evening_rows: u64,
    pub attempt_id:   String,
}

/// What the caller gets back from a consolidated cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReceipt {
    pub attempt_id:      Uuid,
    /// Snapshot version, equal to the cycle date.
    pub snapshot_version: NaiveDate,
    pub partial:         bool,
    pub warnings:        Vec<CycleWarning>,
    pub players_updated: u64,
    pub players_created: u64,
    pub tickets_total:   u64,
}

#[derive(Debug)]
pub struct CycleRejection {
    pub attempt_id: Uuid,
    pub cycle:      Option<NaiveDate>,
    /// Stage the pipeline was in when it stopped.
    pub stage:      CycleStage,
    pub error:      EngineError,
}

impl fmt::Display for CycleRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cycle {
            Some(cycle) => write!(f, "cycle {cycle} rejected while {}: {}", self.stage, self.error),
            None => write!(f, "cycle rejected while {}: {}", self.stage, self.error),
        }
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    Consolidated(CycleReceipt),
    Rejected(CycleRejection),
}

impl CycleOutcome {
    pub fn is_consolidated(&self) -> bool {
        matches!(self, Self::Consolidated(_))
    }

    pub fn receipt(&self) -> Option<&CycleReceipt> {
        match self {
            Self::Consolidated(r) => Some(r),
            Self::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&CycleRejection> {
        match self {
            Self::Consolidated(_) => None,
            Self::Rejected(r) => Some(r),
        }
    }

    /// Collapse into a plain result, dropping the stage on rejection.
    pub fn into_result(self) -> EngineResult<CycleReceipt> {
        match self {
            Self::Consolidated(r) => Ok(r),
            Self::Rejected(r) => Err(r.error),
        }
    }
}
