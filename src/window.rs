// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Date windows that phases extract, record and purge.
//!
//! A window is inclusive on both ends. Named windows are resolved against
//! an explicit "today" so callers (and tests) control the clock.
//!
//! | Name         | Start             | End       |
//! |--------------|-------------------|-----------|
//! | `today`      | today             | today     |
//! | `yesterday`  | today - 1 day     | yesterday |
//! | `last-week`  | today - 7 days    | yesterday |
//! | `last-month` | today - 1 month   | yesterday |
//! | `last-year`  | today - 1 year    | yesterday |

use crate::error::{EngineError, Result};
use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Names accepted by [`DateWindow::from_name`].
pub const WINDOW_NAMES: &[&str] = &["today", "yesterday", "last-week", "last-month", "last-year"];

/// Inclusive `[start, end]` range of days.
///
/// `start <= end` always holds; deserialization goes through
/// [`DateWindow::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawWindow", into = "RawWindow")]
pub struct DateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

/// Wire form of [`DateWindow`], validated on the way in.
#[derive(Serialize, Deserialize)]
struct RawWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawWindow> for DateWindow {
    type Error = EngineError;

    fn try_from(raw: RawWindow) -> Result<Self> {
        Self::new(raw.start, raw.end)
    }
}

impl From<DateWindow> for RawWindow {
    fn from(window: DateWindow) -> Self {
        Self {
            start: window.start,
            end: window.end,
        }
    }
}

impl DateWindow {
    /// Create a window, rejecting `end < start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(EngineError::Config(format!(
                "window end {} is before start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// A window covering a single day.
    pub fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    /// First day of the window.
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last day of the window.
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Resolve a named window relative to `today`.
    pub fn from_name(name: &str, today: NaiveDate) -> Result<Self> {
        let unresolvable = || EngineError::Config(format!("cannot resolve {} from {}", name, today));
        let key = name.to_ascii_lowercase();
        if key == "today" {
            return Ok(Self::single(today));
        }
        let yesterday = today.checked_sub_days(Days::new(1)).ok_or_else(unresolvable)?;
        let start = match key.as_str() {
            "yesterday" => return Ok(Self::single(yesterday)),
            "last-week" => today.checked_sub_days(Days::new(7)).ok_or_else(unresolvable)?,
            "last-month" => today.checked_sub_months(Months::new(1)).ok_or_else(unresolvable)?,
            "last-year" => today.checked_sub_months(Months::new(12)).ok_or_else(unresolvable)?,
            other => {
                return Err(EngineError::Config(format!(
                    "unknown window {:?}, expected one of {}",
                    other,
                    WINDOW_NAMES.join(", ")
                )))
            }
        };
        Self::new(start, yesterday)
    }

    /// Resolve a named window relative to the current local date.
    pub fn from_name_today(name: &str) -> Result<Self> {
        Self::from_name(name, chrono::Local::now().date_naive())
    }

    /// Check whether two windows share at least one day.
    pub fn overlaps(&self, other: &DateWindow) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Number of days covered.
    pub fn days(&self) -> u64 {
        let span = self.end.num_days_from_ce() - self.start.num_days_from_ce();
        u64::try_from(span).unwrap_or(0).saturating_add(1)
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
