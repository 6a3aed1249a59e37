//! Date windows and their integer encoding.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::SyncEngineError;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive calendar-day window a job synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
}

impl SyncWindow {
    pub fn new(from_date: NaiveDate, to_date: NaiveDate) -> Result<Self, SyncEngineError> {
        if from_date > to_date {
            return Err(SyncEngineError::InvalidWindow(format!(
                "from_date {from_date} is after to_date {to_date}"
            )));
        }
        Ok(Self { from_date, to_date })
    }

    /// Parse a window from two `YYYY-MM-DD` strings.
    pub fn parse(from_date: &str, to_date: &str) -> Result<Self, SyncEngineError> {
        Self::new(parse_date(from_date)?, parse_date(to_date)?)
    }

    pub fn from_int(&self) -> i32 {
        date_to_int(self.from_date)
    }

    pub fn to_int(&self) -> i32 {
        date_to_int(self.to_date)
    }
}

impl std::fmt::Display for SyncWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} to {}", self.from_date, self.to_date)
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, SyncEngineError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|e| {
        SyncEngineError::InvalidWindow(format!("'{value}' is not a YYYY-MM-DD date: {e}"))
    })
}

/// Encodes a date as the `YYYYMMDD` integer stored in `sale_transactions.date_int`.
pub fn date_to_int(date: NaiveDate) -> i32 {
    date.year() * 10_000 + date.month() as i32 * 100 + date.day() as i32
}
