//! Daily ticket file → typed rows.
//!
//! Two steps: `read_table` turns bytes into a header plus raw records
//! (failing the file on encoding or CSV framing errors), and `parse_rows`
//! turns each record into a `TicketRow` or a `RowError`. Whether a bad row
//! sinks the whole file is decided by the validator, not here.

use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{io::Read, sync::OnceLock};

use crate::{
    config::EngineConfig,
    error::{ParseError, RowError, RowFault},
    types::{MobileNumber, Session},
};

pub const COL_MOBILE: &str = "PLAYER_MOBILE";
pub const COL_PLAYER_NAME: &str = "PLAYER_NAME";
pub const COL_LAST_NAME: &str = "LAST_NAME";
pub const COL_OTHER_NAMES: &str = "OTHER_NAMES";
pub const COL_CREATED: &str = "CREATED";
pub const COL_QUANTITY: &str = "QUANTITY";
pub const COL_SESSION: &str = "SESSION";
pub const COL_CONSENT: &str = "PROMOTIONAL_CONSENT";
pub const COL_TICKET: &str = "TICKET";
pub const COL_DRAW: &str = "DRAW_ID";
pub const COL_PRICE: &str = "PRICE";

/// `787-` + nine digits + one capital letter.
pub const TICKET_PATTERN: &str = r"^787-\d{9}[A-Z]$";
pub const PRICE_PATTERN: &str = r"^GHS \d+\.\d{2}$";
/// A PLAYER_NAME shorter than this cannot hold two names.
const MIN_PLAYER_NAME_LEN: usize = 3;

static TICKET_RE: OnceLock<Option<Regex>> = OnceLock::new();
static PRICE_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// One purchase record after parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRow {
    pub mobile:              MobileNumber,
    pub last_name:           String,
    pub other_names:         String,
    pub promotional_consent: bool,
    pub first_seen:          NaiveDateTime,
    pub quantity:            u32,
    pub session:             Session,
    pub cycle:               NaiveDate,
    pub ticket_id:           Option<String>,
    pub draw_id:             Option<String>,
    /// Source line, for error reporting.
    pub line:                Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RawRecord {
    pub line:   Option<u64>,
    pub fields: StringRecord,
}

#[derive(Debug, Clone)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub records: Vec<RawRecord>,
}

/// Column positions resolved from a header row.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    pub mobile:      usize,
    pub created:     usize,
    pub player_name: Option<usize>,
    pub last_name:   Option<usize>,
    pub other_names: Option<usize>,
    pub quantity:    Option<usize>,
    pub session:     Option<usize>,
    pub consent:     Option<usize>,
    pub ticket:      Option<usize>,
    pub draw:        Option<usize>,
    pub price:       Option<usize>,
}

impl ColumnMap {
    /// Resolve positions, returning the names of missing required columns
    /// on failure. A name is required as either PLAYER_NAME or LAST_NAME.
    pub fn resolve(headers: &[String]) -> Result<Self, Vec<String>> {
        let find = |name: &str| headers.iter().position(|h| h == name);

        let mobile = find(COL_MOBILE);
        let created = find(COL_CREATED);
        let player_name = find(COL_PLAYER_NAME);
        let last_name = find(COL_LAST_NAME);

        let mut missing = Vec::new();
        if mobile.is_none() {
            missing.push(COL_MOBILE.to_string());
        }
        if created.is_none() {
            missing.push(COL_CREATED.to_string());
        }
        if player_name.is_none() && last_name.is_none() {
            missing.push(format!("{COL_PLAYER_NAME} or {COL_LAST_NAME}"));
        }

        match (mobile, created) {
            (Some(mobile), Some(created)) if missing.is_empty() => Ok(Self {
                mobile,
                created,
                player_name,
                last_name,
                other_names: find(COL_OTHER_NAMES),
                quantity: find(COL_QUANTITY),
                session: find(COL_SESSION),
                consent: find(COL_CONSENT),
                ticket: find(COL_TICKET),
                draw: find(COL_DRAW),
                price: find(COL_PRICE),
            }),
            _ => Err(missing),
        }
    }
}

/// Everything a row needs to be interpreted besides its own fields.
pub struct ParseContext<'a> {
    pub cycle:    NaiveDate,
    /// Session label attached by the ingestion transport, if any.
    pub declared: Option<Session>,
    pub config:   &'a EngineConfig,
}

pub fn read_table<R: Read>(reader: R) -> Result<RawTable, ParseError> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(false)
        .from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()
        .map_err(classify_csv_error)?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_ascii_uppercase())
        .collect();

    let mut records = Vec::new();
    for result in rdr.records() {
        let fields = result.map_err(classify_csv_error)?;
        if fields.iter().all(str::is_empty) {
            continue;
        }
        let line = fields.position().map(|p| p.line());
        records.push(RawRecord { line, fields });
    }
    Ok(RawTable { headers, records })
}

fn classify_csv_error(err: csv::Error) -> ParseError {
    let line = err.position().map(|p| p.line());
    match err.kind() {
        csv::ErrorKind::Utf8 { .. } => ParseError::Encoding { line },
        _ => ParseError::Malformed {
            line,
            message: err.to_string(),
        },
    }
}

pub fn parse_rows(
    table: &RawTable,
    columns: &ColumnMap,
    ctx: &ParseContext<'_>,
) -> Vec<Result<TicketRow, RowError>> {
    table
        .records
        .iter()
        .map(|record| {
            parse_record(record, columns, ctx).map_err(|fault| RowError {
                line: record.line,
                session: ctx.declared,
                fault,
            })
        })
        .collect()
}

/// Cycle date implied by the first dated row, for files delivered
/// without one.
pub fn infer_cycle(
    table: &RawTable,
    columns: &ColumnMap,
    config: &EngineConfig,
) -> Result<NaiveDate, ParseError> {
    let first = table.records.first().ok_or_else(|| ParseError::Undated {
        reason: "file has no rows".into(),
    })?;
    let raw = first.fields.get(columns.created).unwrap_or_default();
    config
        .parse_timestamp(raw)
        .map(|ts| ts.date())
        .ok_or_else(|| ParseError::Undated {
            reason: format!("first row has unreadable {COL_CREATED} '{raw}'"),
        })
}

fn field<'r>(record: &'r RawRecord, idx: Option<usize>) -> Option<&'r str> {
    idx.and_then(|i| record.fields.get(i))
        .filter(|v| !v.is_empty())
}

fn parse_record(
    record: &RawRecord,
    columns: &ColumnMap,
    ctx: &ParseContext<'_>,
) -> Result<TicketRow, RowFault> {
    let config = ctx.config;

    let raw_mobile = field(record, Some(columns.mobile)).ok_or(RowFault::MissingMobile)?;
    let mobile = MobileNumber::normalize(raw_mobile, &config.mobile)?;

    let (last_name, other_names) = parse_names(record, columns)?;

    let ticket_id = field(record, columns.ticket);
    if let Some(raw) = ticket_id {
        if !fits_pattern(&TICKET_RE, TICKET_PATTERN, raw) {
            return Err(RowFault::InvalidTicket { raw: raw.to_string() });
        }
    }
    if let Some(raw) = field(record, columns.price) {
        if !fits_pattern(&PRICE_RE, PRICE_PATTERN, raw) {
            return Err(RowFault::InvalidPrice { raw: raw.to_string() });
        }
    }

    let raw_created = field(record, Some(columns.created)).unwrap_or_default();
    let first_seen = config
        .parse_timestamp(raw_created)
        .ok_or_else(|| RowFault::InvalidTimestamp { raw: raw_created.to_string() })?;

    let quantity = match field(record, columns.quantity) {
        None => 1,
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .filter(|q| *q > 0)
            .ok_or_else(|| RowFault::InvalidQuantity { raw: raw.to_string() })?,
    };

    let promotional_consent = match field(record, columns.consent) {
        None => false,
        Some(raw) => parse_flag(raw).ok_or_else(|| RowFault::InvalidConsent { raw: raw.to_string() })?,
    };

    let session = resolve_session(record, columns, ctx, first_seen)?;

    if first_seen.date() != ctx.cycle {
        return Err(RowFault::DateMismatch {
            expected: ctx.cycle,
            found:    first_seen.date(),
        });
    }

    Ok(TicketRow {
        mobile,
        last_name,
        other_names,
        promotional_consent,
        first_seen,
        quantity,
        session,
        cycle: ctx.cycle,
        ticket_id: ticket_id.map(str::to_string),
        draw_id: field(record, columns.draw).map(str::to_string),
        line: record.line,
    })
}

/// PLAYER_NAME is "<last> <other names...>"; explicit columns win.
fn parse_names(record: &RawRecord, columns: &ColumnMap) -> Result<(String, String), RowFault> {
    if let Some(last) = field(record, columns.last_name) {
        let other = field(record, columns.other_names).unwrap_or_default();
        return Ok((last.to_string(), other.to_string()));
    }
    let full = field(record, columns.player_name).ok_or(RowFault::MissingName)?;
    if full.chars().count() < MIN_PLAYER_NAME_LEN || !full.contains(' ') {
        return Err(RowFault::InvalidName { raw: full.to_string() });
    }
    let mut parts = full.split_whitespace();
    let last = parts.next().ok_or(RowFault::MissingName)?;
    let other = parts.collect::<Vec<_>>().join(" ");
    Ok((last.to_string(), other))
}

fn resolve_session(
    record: &RawRecord,
    columns: &ColumnMap,
    ctx: &ParseContext<'_>,
    first_seen: NaiveDateTime,
) -> Result<Session, RowFault> {
    let labelled = field(record, columns.session)
        .map(str::parse::<Session>)
        .transpose()?;

    match (labelled, ctx.declared) {
        (Some(found), Some(declared)) if found != declared => {
            Err(RowFault::SessionMismatch { declared, found })
        }
        (Some(session), _) | (None, Some(session)) => Ok(session),
        (None, None) => ctx.config.sessions.classify(first_seen).ok_or_else(|| {
            RowFault::UnknownSession {
                raw: first_seen.format("%H:%M").to_string(),
            }
        }),
    }
}

fn fits_pattern(cell: &OnceLock<Option<Regex>>, pattern: &str, value: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(value))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" | "1" => Some(true),
        "n" | "no" | "false" | "0" => Some(false),
        _ => None,
    }
}
