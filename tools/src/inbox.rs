//! One-shot inbox sweep.
//!
//! Every `*.csv` in the inbox is submitted as a combined daily file, in
//! file-name order. A consolidated file is moved to `processed/` next to a
//! `consolidated_<stem>.csv` export of its snapshot; a rejected one goes to
//! `failed/`. Moved files get a timestamp prefix so a re-delivered file
//! never overwrites an earlier copy.

use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use log::{info, warn};
use lottery_core::{cycle::CycleOutcome, engine::CycleEngine, export};

pub const PROCESSED_DIR: &str = "processed";
pub const FAILED_DIR: &str = "failed";
const EXPORT_PREFIX: &str = "consolidated_";

#[derive(Debug, Default)]
pub struct InboxReport {
    /// Destination paths of consolidated files.
    pub processed:       Vec<PathBuf>,
    /// Destination path and rejection message of each failed file.
    pub failed:          Vec<(PathBuf, String)>,
    /// Consolidated files whose snapshot export could not be written.
    pub export_failures: Vec<(PathBuf, String)>,
    /// Files left in the inbox because they could not be moved.
    pub unmoved:         Vec<(PathBuf, String)>,
}

/// Process the inbox once. `stamp` prefixes every moved file name.
///
/// A file's own I/O problems are recorded in the report and the sweep goes
/// on; only an unreadable inbox aborts it.
pub fn process_inbox(engine: &mut CycleEngine, dir: &Path, stamp: &str) -> Result<InboxReport> {
    let processed_dir = dir.join(PROCESSED_DIR);
    let failed_dir = dir.join(FAILED_DIR);
    fs::create_dir_all(&processed_dir)
        .with_context(|| format!("Cannot create {}", processed_dir.display()))?;
    fs::create_dir_all(&failed_dir)
        .with_context(|| format!("Cannot create {}", failed_dir.display()))?;

    let mut report = InboxReport::default();
    for path in pending_files(dir)? {
        let name = file_name(&path);
        info!("Processing {name}");

        let (dest_dir, rejection) = match engine.submit_daily_file(None, &path) {
            CycleOutcome::Consolidated(receipt) => {
                let cycle = receipt.snapshot_version;
                if let Err(err) = export_snapshot(engine, &path, &processed_dir, cycle) {
                    warn!("{name}: cycle {cycle} consolidated but not exported: {err:#}");
                    report.export_failures.push((path.clone(), format!("{err:#}")));
                }
                (&processed_dir, None)
            }
            CycleOutcome::Rejected(rejection) => {
                warn!("{name}: {rejection}");
                (&failed_dir, Some(rejection.to_string()))
            }
        };

        match (move_with_stamp(&path, dest_dir, stamp), rejection) {
            (Ok(dest), None) => report.processed.push(dest),
            (Ok(dest), Some(reason)) => report.failed.push((dest, reason)),
            (Err(err), _) => {
                warn!("{name}: {err:#}");
                report.unmoved.push((path.clone(), format!("{err:#}")));
            }
        }
    }
    Ok(report)
}

fn export_snapshot(
    engine: &CycleEngine,
    path: &Path,
    processed_dir: &Path,
    cycle: NaiveDate,
) -> Result<()> {
    let snapshot = engine
        .get_snapshot(cycle)?
        .ok_or_else(|| anyhow!("No snapshot stored for cycle {cycle}"))?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name(path));
    let export_path = processed_dir.join(format!("{EXPORT_PREFIX}{stem}.csv"));
    let out = File::create(&export_path)
        .with_context(|| format!("Cannot create {}", export_path.display()))?;
    let rows = export::write_snapshot_csv(&snapshot, BufWriter::new(out))?;
    info!("Saved {rows} consolidated row(s) to {}", export_path.display());
    Ok(())
}

/// CSV files directly in `dir`, by name. Earlier exports are not input.
fn pending_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Cannot read inbox {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("Cannot read inbox {}", dir.display()))?
            .path();
        let is_csv = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if path.is_file() && is_csv && !file_name(&path).starts_with(EXPORT_PREFIX) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn move_with_stamp(path: &Path, dest_dir: &Path, stamp: &str) -> Result<PathBuf> {
    let dest = dest_dir.join(format!("{stamp}_{}", file_name(path)));
    fs::rename(path, &dest)
        .with_context(|| format!("Cannot move {} to {}", path.display(), dest.display()))?;
    Ok(dest)
}
