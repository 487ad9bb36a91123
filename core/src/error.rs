use chrono::{NaiveDate, Weekday};
use thiserror::Error;

use crate::types::{MobileNumber, Session};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Cycle {cycle} has already been consolidated")]
    DuplicateCycle { cycle: NaiveDate },

    #[error(
        "Cycle {} is out of order (expected {}); {} player(s) affected{}",
        .cycle, .expected, .players.len(), describe_faults(.players)
    )]
    OutOfOrderCycle {
        cycle:    NaiveDate,
        expected: NaiveDate,
        players:  Vec<OrderFault>,
    },

    #[error("Player {mobile} not found")]
    PlayerNotFound { mobile: String },

    #[error("Invalid mobile number '{raw}'")]
    InvalidMobile { raw: String },

    #[error("Stored state for player {mobile} is corrupt: {detail}")]
    CorruptState { mobile: String, detail: String },

    #[error("Ledger moved underneath cycle {cycle}: expected base {expected:?}, found {found:?}")]
    StaleRegistry {
        cycle:    NaiveDate,
        expected: Option<NaiveDate>,
        found:    Option<NaiveDate>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// File-level failures. Any of these rejects the whole file.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("File is not valid UTF-8 (near line {line:?})")]
    Encoding { line: Option<u64> },

    #[error("Malformed CSV near line {line:?}: {message}")]
    Malformed { line: Option<u64>, message: String },

    #[error("Missing required columns: {}", .columns.join(", "))]
    MissingColumns { columns: Vec<String> },

    #[error("{} invalid row(s); first: {}", .rows.len(), first_row(.rows))]
    InvalidRows { rows: Vec<RowError> },

    #[error("Cannot determine the cycle date: {reason}")]
    Undated { reason: String },
}

/// Cycle-level checks that run before aggregation.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Cycle {cycle} has no rows in either session")]
    EmptyCycle { cycle: NaiveDate },

    #[error("Cycle {cycle} falls on a closed trading day ({weekday})")]
    NonTradingDay { cycle: NaiveDate, weekday: Weekday },

    #[error("Cycle {cycle} has {} inconsistent row(s); first: {}", .rows.len(), first_row(.rows))]
    InconsistentRows { cycle: NaiveDate, rows: Vec<RowError> },
}

/// A single rejected row with its source line when known.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("line {}: {fault}", describe_line(.line))]
pub struct RowError {
    pub line:    Option<u64>,
    pub session: Option<Session>,
    pub fault:   RowFault,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowFault {
    #[error("missing mobile number")]
    MissingMobile,

    #[error("invalid mobile number '{raw}'")]
    InvalidMobile { raw: String },

    #[error("missing player name")]
    MissingName,

    #[error("player name '{raw}' needs a last name and other names")]
    InvalidName { raw: String },

    #[error("invalid ticket number '{raw}'")]
    InvalidTicket { raw: String },

    #[error("invalid price '{raw}'")]
    InvalidPrice { raw: String },

    #[error("invalid timestamp '{raw}'")]
    InvalidTimestamp { raw: String },

    #[error("invalid ticket quantity '{raw}'")]
    InvalidQuantity { raw: String },

    #[error("invalid promotional consent flag '{raw}'")]
    InvalidConsent { raw: String },

    #[error("unknown session '{raw}'")]
    UnknownSession { raw: String },

    #[error("row belongs to the {found} session but was delivered as {declared}")]
    SessionMismatch { declared: Session, found: Session },

    #[error("row is dated {found}, cycle is {expected}")]
    DateMismatch { expected: NaiveDate, found: NaiveDate },

    #[error("duplicate ticket '{ticket}'")]
    DuplicateTicket { ticket: String },

    #[error("draw '{found}' differs from the session's draw '{expected}'")]
    ForeignDraw { expected: String, found: String },

    #[error("draw '{draw}' appears in both sessions")]
    SharedDraw { draw: String },
}

/// A player whose history does not line up with the submitted cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFault {
    pub mobile:         MobileNumber,
    pub last_processed: NaiveDate,
    pub expected:       NaiveDate,
}

fn first_row(rows: &[RowError]) -> String {
    rows.first().map(ToString::to_string).unwrap_or_default()
}

fn describe_line(line: &Option<u64>) -> String {
    line.map(|l| l.to_string()).unwrap_or_else(|| "?".into())
}

fn describe_faults(players: &[OrderFault]) -> String {
    const SHOWN: usize = 3;
    if players.is_empty() {
        return String::new();
    }
    let listed: Vec<String> = players
        .iter()
        .take(SHOWN)
        .map(|p| format!("{} (last {})", p.mobile, p.last_processed))
        .collect();
    let more = players.len().saturating_sub(SHOWN);
    if more > 0 {
        format!(": {} and {more} more", listed.join(", "))
    } else {
        format!(": {}", listed.join(", "))
    }
}
