//! Date-partitioned object layout.
//!
//! ```text
//! {year}/{MonthName}/Week-{N}/{YYYY-MM-DD}/{images|candidates|selected|archive}/...
//! ```
//!
//! `N` is the ISO 8601 week number of the date. Every path is a pure function
//! of the processing date and the status bucket, and parses back to both.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Editorial status folder under a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusBucket {
    Images,
    Candidates,
    Selected,
    Archive,
}

impl StatusBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusBucket::Images => "images",
            StatusBucket::Candidates => "candidates",
            StatusBucket::Selected => "selected",
            StatusBucket::Archive => "archive",
        }
    }
}

impl fmt::Display for StatusBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusBucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "images" => Ok(StatusBucket::Images),
            "candidates" => Ok(StatusBucket::Candidates),
            "selected" => Ok(StatusBucket::Selected),
            "archive" => Ok(StatusBucket::Archive),
            other => Err(format!("unknown status bucket `{other}`")),
        }
    }
}

/// Where an object lives. Always recomputed from the date, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageLocation {
    pub year: i32,
    pub month_name: String,
    pub week_number: u32,
    pub date: NaiveDate,
    pub bucket: StatusBucket,
}

impl StorageLocation {
    pub fn for_date(date: NaiveDate, bucket: StatusBucket) -> Self {
        Self {
            year: date.year(),
            month_name: date.format("%B").to_string(),
            week_number: date.iso_week().week(),
            date,
            bucket,
        }
    }

    /// Same date, different bucket.
    pub fn with_bucket(&self, bucket: StatusBucket) -> Self {
        Self::for_date(self.date, bucket)
    }

    /// `2026/January/Week-4/2026-01-20`
    pub fn date_prefix(&self) -> String {
        format!(
            "{}/{}/Week-{}/{}",
            self.year,
            self.month_name,
            self.week_number,
            self.date.format("%Y-%m-%d")
        )
    }

    /// `2026/January/Week-4/2026-01-20/candidates`
    pub fn prefix(&self) -> String {
        format!("{}/{}", self.date_prefix(), self.bucket)
    }

    /// Full object key for `name` inside this location.
    pub fn key(&self, name: &str) -> String {
        format!("{}/{}", self.prefix(), name)
    }

    /// Recover the location from a prefix or any object key beneath one.
    ///
    /// Returns `None` unless every component agrees with the date.
    pub fn parse(path: &str) -> Option<Self> {
        let mut parts = path.trim_start_matches('/').split('/');
        let year: i32 = parts.next()?.parse().ok()?;
        let month_name = parts.next()?;
        let week_number: u32 = parts.next()?.strip_prefix("Week-")?.parse().ok()?;
        let date = NaiveDate::parse_from_str(parts.next()?, "%Y-%m-%d").ok()?;
        let bucket: StatusBucket = parts.next()?.parse().ok()?;

        let location = Self::for_date(date, bucket);
        (location.year == year
            && location.month_name == month_name
            && location.week_number == week_number)
            .then_some(location)
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_prefix_layout() {
        let loc = StorageLocation::for_date(date(2026, 1, 20), StatusBucket::Candidates);
        assert_eq!(loc.prefix(), "2026/January/Week-4/2026-01-20/candidates");
        assert_eq!(
            loc.with_bucket(StatusBucket::Images).key("domus-1a2b.jpg"),
            "2026/January/Week-4/2026-01-20/images/domus-1a2b.jpg"
        );
    }

    #[test]
    fn test_iso_week_at_year_boundary() {
        // 2027-01-01 is a Friday in ISO week 53 of 2026.
        let loc = StorageLocation::for_date(date(2027, 1, 1), StatusBucket::Archive);
        assert_eq!(loc.prefix(), "2027/January/Week-53/2027-01-01/archive");
    }

    #[test]
    fn test_distinct_dates_distinct_paths() {
        let a = StorageLocation::for_date(date(2026, 3, 9), StatusBucket::Candidates);
        let b = StorageLocation::for_date(date(2026, 3, 10), StatusBucket::Candidates);
        assert_ne!(a.prefix(), b.prefix());
    }

    #[test]
    fn test_parse_roundtrip_over_a_year() {
        let mut d = date(2026, 1, 1);
        while d.year() == 2026 {
            for bucket in [
                StatusBucket::Images,
                StatusBucket::Candidates,
                StatusBucket::Selected,
                StatusBucket::Archive,
            ] {
                let loc = StorageLocation::for_date(d, bucket);
                assert_eq!(StorageLocation::parse(&loc.key("x.json")), Some(loc));
            }
            d = d.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_parse_rejects_inconsistent_paths() {
        assert!(StorageLocation::parse("2026/February/Week-4/2026-01-20/candidates").is_none());
        assert!(StorageLocation::parse("2026/January/Week-5/2026-01-20/candidates").is_none());
        assert!(StorageLocation::parse("2026/January/Week-4/2026-01-20/drafts").is_none());
        assert!(StorageLocation::parse("2026/January").is_none());
    }
}
