//! Shared primitive types used across the whole engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{config::MobileFormat, error::RowFault};

/// A cycle is one calendar day of trading. The date is its identity
/// and the version number of the snapshot it produces.
pub type CycleDate = NaiveDate;

/// Canonical mobile number: country code followed by subscriber digits.
/// Only `normalize` (and the store, for already-canonical values) builds one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MobileNumber(String);

impl MobileNumber {
    /// Strip formatting and bring the number into canonical form.
    ///
    /// Accepted shapes after removing every non-digit:
    ///   - `<country code><subscriber digits>`
    ///   - `0<subscriber digits>` (national trunk prefix)
    ///   - `<subscriber digits>`
    pub fn normalize(raw: &str, format: &MobileFormat) -> Result<Self, RowFault> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Err(RowFault::MissingMobile);
        }
        let n = format.subscriber_digits;
        let cc = format.country_code.as_str();

        let subscriber = if digits.len() == cc.len() + n && digits.starts_with(cc) {
            &digits[cc.len()..]
        } else if digits.len() == n + 1 && digits.starts_with('0') {
            &digits[1..]
        } else if digits.len() == n {
            digits.as_str()
        } else {
            return Err(RowFault::InvalidMobile { raw: raw.to_string() });
        };

        if subscriber.starts_with('0') {
            return Err(RowFault::InvalidMobile { raw: raw.to_string() });
        }
        Ok(Self(format!("{cc}{subscriber}")))
    }

    /// Wrap a value that is already canonical (read back from the store).
    pub(crate) fn from_canonical(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MobileNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One of the two daily draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Session {
    Morning,
    Evening,
}

impl Session {
    pub const ALL: [Session; 2] = [Session::Morning, Session::Evening];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Evening => "evening",
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Session {
    type Err = RowFault;

    /// The upstream feed calls the first draw "afternoon"; both spellings
    /// land on `Morning`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "morning" | "am" | "afternoon" => Ok(Self::Morning),
            "evening" | "pm" => Ok(Self::Evening),
            _ => Err(RowFault::UnknownSession { raw: s.to_string() }),
        }
    }
}

/// Loyalty grade over the rolling window. A is every cycle, E is none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Segment {
    A,
    B,
    C,
    D,
    E,
}

impl Segment {
    /// Grade for a purchase count out of four cycles. Counts above four
    /// saturate at A.
    pub fn from_count(purchased_cycles: u8) -> Self {
        match purchased_cycles {
            0 => Self::E,
            1 => Self::D,
            2 => Self::C,
            3 => Self::B,
            _ => Self::A,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Segment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            "E" => Ok(Self::E),
            other => Err(format!("unknown segment '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ghana() -> MobileFormat {
        MobileFormat {
            country_code: "233".into(),
            subscriber_digits: 9,
        }
    }

    #[test]
    fn local_and_international_forms_normalize_to_the_same_key() {
        let fmt = ghana();
        let a = MobileNumber::normalize("0551234567", &fmt).unwrap();
        let b = MobileNumber::normalize("+233 55 123 4567", &fmt).unwrap();
        let c = MobileNumber::normalize("233551234567", &fmt).unwrap();
        let d = MobileNumber::normalize("55-123-4567", &fmt).unwrap();
        assert_eq!(a.as_str(), "233551234567");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a, d);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let fmt = ghana();
        assert!(matches!(
            MobileNumber::normalize("05512345", &fmt),
            Err(RowFault::InvalidMobile { .. })
        ));
        assert!(matches!(
            MobileNumber::normalize("", &fmt),
            Err(RowFault::MissingMobile)
        ));
        assert!(matches!(
            MobileNumber::normalize("  -- ", &fmt),
            Err(RowFault::MissingMobile)
        ));
    }

    #[test]
    fn session_labels_parse_case_insensitively() {
        assert_eq!("Morning".parse::<Session>().unwrap(), Session::Morning);
        assert_eq!("AFTERNOON".parse::<Session>().unwrap(), Session::Morning);
        assert_eq!(" evening ".parse::<Session>().unwrap(), Session::Evening);
        assert!("midnight".parse::<Session>().is_err());
    }

    #[test]
    fn segment_table_is_total() {
        let letters: Vec<_> = (0..=4).map(Segment::from_count).collect();
        assert_eq!(
            letters,
            vec![Segment::E, Segment::D, Segment::C, Segment::B, Segment::A]
        );
        assert_eq!(Segment::from_count(9), Segment::A);
    }
}
