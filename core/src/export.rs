//! CSV rendition of a consolidated snapshot, in the column layout the
//! downstream dashboards already read.

use std::io::Write;

use csv::WriterBuilder;

use crate::{error::EngineResult, snapshot::ConsolidatedSnapshot};

pub const EXPORT_HEADERS: [&str; 9] = [
    "LAST_NAME",
    "OTHER_NAMES",
    "MOBILE",
    "PROMOTIONAL_CONSENT",
    "CREATED",
    "E-Score",
    "Indicative Segment",
    "Gear",
    "CYCLE_TICKETS",
];

const CREATED_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Write one row per player, in mobile order. Returns the row count.
pub fn write_snapshot_csv<W: Write>(snapshot: &ConsolidatedSnapshot, out: W) -> EngineResult<usize> {
    let mut wtr = WriterBuilder::new().from_writer(out);
    wtr.write_record(EXPORT_HEADERS)?;
    for row in &snapshot.rows {
        wtr.write_record([
            row.last_name.as_str(),
            row.other_names.as_str(),
            row.mobile.as_str(),
            if row.promotional_consent { "Y" } else { "N" },
            &row.created_at.format(CREATED_FORMAT).to_string(),
            &row.e_score.to_string(),
            row.segment.as_str(),
            &row.gear.to_string(),
            &row.cycle_tickets.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(snapshot.rows.len())
}
