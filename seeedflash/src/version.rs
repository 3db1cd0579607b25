//! Date-based firmware versions.
//!
//! ArduPy firmware and library releases are identified by their build date
//! (`YYYY-MM-DD`). The date is only used as a total order: a later date is a
//! newer release.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Text format of a version date.
const VERSION_FORMAT: &str = "%Y-%m-%d";

/// Length of a formatted version (`YYYY-MM-DD`).
pub const VERSION_LEN: usize = 10;

/// A calendar date identifying a firmware or library release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FirmwareVersion(NaiveDate);

impl FirmwareVersion {
    /// Baseline used when nothing is cached locally.
    pub const BASELINE: Self = Self(match NaiveDate::from_ymd_opt(2000, 1, 1) {
        Some(date) => date,
        None => NaiveDate::MIN,
    });

    /// Build a version from year, month and day.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    /// Parse a `YYYY-MM-DD` string.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.len() != VERSION_LEN {
            return Err(Error::Metadata(format!("bad version '{text}'")));
        }
        NaiveDate::parse_from_str(text, VERSION_FORMAT)
            .map(Self)
            .map_err(|e| Error::Metadata(format!("bad version '{text}': {e}")))
    }

    /// Year component.
    pub fn year(&self) -> i32 {
        self.0.year()
    }

    /// Month component (1-12).
    pub fn month(&self) -> u32 {
        self.0.month()
    }

    /// Day component (1-31).
    pub fn day(&self) -> u32 {
        self.0.day()
    }

    /// Whether `self` is strictly newer than `other`.
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self > other
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(VERSION_FORMAT))
    }
}

impl FromStr for FirmwareVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for FirmwareVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FirmwareVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> FirmwareVersion {
        FirmwareVersion::parse(s).unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let version = v("2021-06-01");
        assert_eq!(version.year(), 2021);
        assert_eq!(version.month(), 6);
        assert_eq!(version.day(), 1);
        assert_eq!(version.to_string(), "2021-06-01");
    }

    #[test]
    fn test_order_follows_calendar() {
        assert!(v("2021-01-02") > v("2021-01-01"));
        assert!(v("2021-02-01") > v("2021-01-31"));
        assert!(v("2022-01-01") > v("2021-12-31"));
        assert_eq!(v("2020-01-01"), v("2020-01-01"));
        assert!(v("2021-06-01").is_newer_than(&v("2020-01-01")));
        assert!(!v("2020-01-01").is_newer_than(&v("2020-01-01")));
    }

    #[test]
    fn test_order_is_total() {
        let mut versions = vec![v("2020-05-05"), v("2019-12-31"), v("2020-05-04"), v("2021-01-01")];
        versions.sort();
        let sorted: Vec<String> = versions.iter().map(ToString::to_string).collect();
        assert_eq!(sorted, ["2019-12-31", "2020-05-04", "2020-05-05", "2021-01-01"]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(FirmwareVersion::parse("2021-13-01").is_err());
        assert!(FirmwareVersion::parse("2021-02-30").is_err());
        assert!(FirmwareVersion::parse("21-01-01").is_err());
        assert!(FirmwareVersion::parse("garbage!!!").is_err());
        assert!(FirmwareVersion::parse("").is_err());
    }

    #[test]
    fn test_baseline() {
        assert_eq!(FirmwareVersion::BASELINE.to_string(), "2000-01-01");
        assert!(v("2020-01-01") > FirmwareVersion::BASELINE);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&v("2020-03-04")).unwrap();
        assert_eq!(json, "\"2020-03-04\"");
        let back: FirmwareVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("2020-03-04"));
        assert!(serde_json::from_str::<FirmwareVersion>("\"not-a-date\"").is_err());
    }
}
