//! Date windows ("seasons") in months from a baseline date.

use std::fmt;
use std::str::FromStr;

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Half-open interval `[start, end)` in months from the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: i32,
    pub end: i32,
}

impl DateWindow {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    /// Calendar range `[from, to)` for this window.
    pub fn date_range(&self, baseline: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
        Ok((advance_months(baseline, self.start)?, advance_months(baseline, self.end)?))
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.start, self.end)
    }
}

fn advance_months(date: NaiveDate, months: i32) -> Result<NaiveDate> {
    let shifted = if months >= 0 {
        date.checked_add_months(Months::new(months.unsigned_abs()))
    } else {
        date.checked_sub_months(Months::new(months.unsigned_abs()))
    };
    shifted.ok_or_else(|| PipelineError::config(format!("{date} + {months} months is out of range")))
}

/// Ordered list of windows, parsed from `"start,end:start,end:..."`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Seasons(Vec<DateWindow>);

impl Seasons {
    pub fn windows(&self) -> &[DateWindow] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Calendar ranges for every window, in order.
    pub fn date_ranges(&self, baseline: NaiveDate) -> Result<Vec<(NaiveDate, NaiveDate)>> {
        self.0.iter().map(|w| w.date_range(baseline)).collect()
    }
}

/// Parse a window string. Any malformed entry fails the whole parse.
pub fn parse_windows(input: &str) -> Result<Seasons> {
    let err = |reason: String| PipelineError::WindowParse { input: input.to_string(), reason };

    if input.trim().is_empty() {
        return Err(err("no windows given".into()));
    }

    let mut windows = Vec::new();
    for (i, chunk) in input.split(':').enumerate() {
        let mut bounds = chunk.split(',');
        let (Some(a), Some(b), None) = (bounds.next(), bounds.next(), bounds.next()) else {
            return Err(err(format!("window {} ({chunk:?}) must be `start,end`", i + 1)));
        };
        let parse = |s: &str| {
            s.trim()
                .parse::<i32>()
                .map_err(|e| err(format!("window {}: bound {s:?} is not an integer ({e})", i + 1)))
        };
        let (start, end) = (parse(a)?, parse(b)?);
        if start >= end {
            return Err(err(format!("window {}: start {start} must be before end {end}", i + 1)));
        }
        windows.push(DateWindow { start, end });
    }
    Ok(Seasons(windows))
}

impl FromStr for Seasons {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        parse_windows(s)
    }
}

impl TryFrom<String> for Seasons {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        parse_windows(&value)
    }
}

impl fmt::Display for Seasons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(DateWindow::to_string).collect();
        f.write_str(&parts.join(":"))
    }
}

impl From<Seasons> for String {
    fn from(s: Seasons) -> Self {
        s.to_string()
    }
}
