//! Timestamped workspace names.

use crate::constants::SUFFIX_BOUND;
use crate::WorkspaceError;
use chrono::{Local, NaiveDateTime, Timelike};
use rand::rngs::OsRng;
use rand::Rng;
use std::{fmt, str::FromStr};

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Directory name of a run workspace: `YYYYMMDD-HHMMSS-RRR`.
///
/// `RRR` is a zero-padded suffix in `0..=999`. Two names generated in the same second differ
/// only by their suffix, so the suffix is drawn from the OS CSPRNG rather than a seeded PRNG.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorkspaceName {
    timestamp: NaiveDateTime,
    suffix: u16,
}

impl WorkspaceName {
    /// Generate a name for the current local second.
    pub fn generate() -> Self {
        Self::at(Local::now().naive_local(), OsRng.gen_range(0..SUFFIX_BOUND))
    }

    /// Build a name from explicit parts.
    ///
    /// Sub-second precision is discarded and the suffix is reduced into `0..=999`.
    pub fn at(timestamp: NaiveDateTime, suffix: u16) -> Self {
        Self {
            timestamp: timestamp.with_nanosecond(0).unwrap_or(timestamp),
            suffix: suffix % SUFFIX_BOUND,
        }
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn suffix(&self) -> u16 {
        self.suffix
    }
}

impl fmt::Display for WorkspaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:03}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.suffix
        )
    }
}

impl FromStr for WorkspaceName {
    type Err = WorkspaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ts_str, suffix_str) = s
            .rsplit_once('-')
            .ok_or_else(|| WorkspaceError::InvalidName(s.to_string()))?;

        if suffix_str.len() != 3 || !suffix_str.chars().all(|c| c.is_ascii_digit()) {
            return Err(WorkspaceError::InvalidName(format!(
                "suffix must be three digits: '{s}'"
            )));
        }

        let TimestampOnly(timestamp) = ts_str.parse()?;
        let suffix = suffix_str
            .parse::<u16>()
            .map_err(|e| WorkspaceError::InvalidName(format!("'{s}': {e}")))?;

        Ok(Self { timestamp, suffix })
    }
}

/// `YYYYMMDD-HHMMSS` without a suffix.
struct TimestampOnly(NaiveDateTime);

impl FromStr for TimestampOnly {
    type Err = WorkspaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .map(TimestampOnly)
            .map_err(|e| WorkspaceError::InvalidName(format!("'{s}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 31)
            .unwrap()
            .and_hms_milli_opt(14, 25, 2, 750)
            .unwrap()
    }

    #[test]
    fn test_display_format() {
        let name = WorkspaceName::at(ts(), 17);
        assert_eq!(name.to_string(), "20240131-142502-017");
    }

    #[test]
    fn test_suffix_is_reduced_into_range() {
        assert_eq!(WorkspaceName::at(ts(), 1017).suffix(), 17);
    }

    #[test]
    fn test_parse_round_trip() {
        let name = WorkspaceName::at(ts(), 999);
        let parsed: WorkspaceName = name.to_string().parse().unwrap();
        assert_eq!(parsed, name);
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        assert!("20240131-142502".parse::<WorkspaceName>().is_err());
        assert!("20240131-142502-17".parse::<WorkspaceName>().is_err());
        assert!("2024-01-31-000".parse::<WorkspaceName>().is_err());
        assert!("../etc-000".parse::<WorkspaceName>().is_err());
    }

    #[test]
    fn test_generated_names_are_well_formed() {
        for _ in 0..50 {
            let name = WorkspaceName::generate();
            assert!(name.suffix() < 1000);
            let parsed: WorkspaceName = name.to_string().parse().unwrap();
            assert_eq!(parsed, name);
        }
    }
}
