use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::types::Session;

pub const CONFIG_FILE: &str = "engine_config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobileFormat {
    /// Prefix of every canonical number, e.g. "233".
    pub country_code: String,
    /// Digits after the country code.
    pub subscriber_digits: usize,
}

/// Inclusive hour range in which tickets for a draw are sold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionWindow {
    pub first_hour: u32,
    pub last_hour:  u32,
}

impl SessionWindow {
    pub fn contains(&self, hour: u32) -> bool {
        (self.first_hour..=self.last_hour).contains(&hour)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionWindows {
    pub morning: SessionWindow,
    pub evening: SessionWindow,
}

impl SessionWindows {
    /// Session for a sale timestamp, if it falls inside a draw window.
    pub fn classify(&self, at: NaiveDateTime) -> Option<Session> {
        let hour = at.hour();
        if self.morning.contains(hour) {
            Some(Session::Morning)
        } else if self.evening.contains(hour) {
            Some(Session::Evening)
        } else {
            None
        }
    }
}

/// What a single bad row does to the file it came in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowPolicy {
    RejectFile,
    SkipInvalid,
}

/// How players with fewer than four processed cycles are graded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarlyWindowPolicy {
    /// Scale the purchase count to a four-cycle equivalent.
    Proportional,
    /// Grade the raw count, as if missing history were non-purchase.
    Unscaled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleCalendar {
    /// Weekdays with no draws. Cycles are never expected on these days.
    #[serde(default)]
    pub closed_weekdays: Vec<Weekday>,
    /// Require each cycle to be the next trading day after the last one.
    pub enforce_contiguity: bool,
}

impl CycleCalendar {
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !self.closed_weekdays.contains(&date.weekday())
    }

    /// First trading day strictly after `date`.
    pub fn next_cycle_after(&self, date: NaiveDate) -> NaiveDate {
        let mut next = date + Duration::days(1);
        // A week always has at least one trading day unless every day is
        // closed; the bound keeps that misconfiguration from spinning.
        for _ in 0..7 {
            if self.is_trading_day(next) {
                return next;
            }
            next += Duration::days(1);
        }
        date + Duration::days(1)
    }

    /// Whether `cycle` may follow `last` for the same player or ledger.
    pub fn follows(&self, last: NaiveDate, cycle: NaiveDate) -> bool {
        if cycle <= last {
            return false;
        }
        !self.enforce_contiguity || cycle == self.next_cycle_after(last)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub mobile:             MobileFormat,
    pub sessions:           SessionWindows,
    /// chrono formats tried in order for the CREATED column.
    pub timestamp_formats:  Vec<String>,
    pub row_policy:         RowPolicy,
    pub early_window:       EarlyWindowPolicy,
    pub calendar:           CycleCalendar,
    /// Hash partitions the aggregator fans out over.
    pub aggregation_partitions: usize,
}

impl EngineConfig {
    /// Load from the data/ directory.
    /// In tests, use EngineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/{CONFIG_FILE}");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.check()?;
        Ok(config)
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            mobile: MobileFormat {
                country_code: "233".into(),
                subscriber_digits: 9,
            },
            sessions: SessionWindows {
                morning: SessionWindow { first_hour: 6, last_hour: 16 },
                evening: SessionWindow { first_hour: 17, last_hour: 23 },
            },
            timestamp_formats: vec![
                "%d/%m/%Y %H:%M".into(),
                "%Y-%m-%d %H:%M:%S".into(),
                "%Y-%m-%dT%H:%M:%S".into(),
            ],
            row_policy: RowPolicy::RejectFile,
            early_window: EarlyWindowPolicy::Proportional,
            calendar: CycleCalendar {
                closed_weekdays: Vec::new(),
                enforce_contiguity: true,
            },
            aggregation_partitions: 4,
        }
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.mobile.country_code.is_empty()
            || !self.mobile.country_code.chars().all(|c| c.is_ascii_digit())
        {
            anyhow::bail!("mobile.country_code must be a non-empty digit string");
        }
        if self.mobile.subscriber_digits == 0 {
            anyhow::bail!("mobile.subscriber_digits must be positive");
        }
        if self.timestamp_formats.is_empty() {
            anyhow::bail!("timestamp_formats must list at least one format");
        }
        if self.calendar.closed_weekdays.len() >= 7 {
            anyhow::bail!("calendar.closed_weekdays closes every day of the week");
        }
        Ok(())
    }

    /// Parse a CREATED value with the first matching configured format.
    pub fn parse_timestamp(&self, raw: &str) -> Option<NaiveDateTime> {
        let raw = raw.trim();
        self.timestamp_formats
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    }
}
