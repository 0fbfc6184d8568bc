//! The stretch of time in which dated lessons are reconciled.
//!
//! Past weeks are history and far-future weeks are not scheduled yet, so
//! event rows outside the window are carried through untouched.

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime};

use crate::error::SyncError;
use crate::kinds::row_starts_at;
use crate::row::Row;

/// Half-open interval `[from, until)` of local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventWindow {
    pub from: NaiveDateTime,
    pub until: NaiveDateTime,
}

impl EventWindow {
    /// From Monday 00:00 of the week containing `now` through `weeks_ahead`
    /// further full weeks.
    ///
    /// Fails with [`SyncError::Config`] when the end is not a representable
    /// date.
    pub fn around(now: NaiveDateTime, weeks_ahead: u32) -> Result<Self, SyncError> {
        let out_of_range =
            || SyncError::Config(format!("event window of {} weeks ahead is out of range", weeks_ahead));

        let monday = now.date() - Duration::days(i64::from(now.weekday().num_days_from_monday()));
        let from = monday.and_time(NaiveTime::MIN);
        let until = Duration::try_weeks(i64::from(weeks_ahead) + 1)
            .and_then(|span| from.checked_add_signed(span))
            .ok_or_else(out_of_range)?;
        Ok(Self { from, until })
    }

    pub fn contains(&self, ts: &NaiveDateTime) -> bool {
        *ts >= self.from && *ts < self.until
    }

    /// Split event rows into those reconciled this pass and those carried
    /// through. Rows whose timestamp does not parse are reconciled, so they
    /// surface as anomalies instead of hiding outside the window.
    pub fn partition(&self, rows: Vec<Row>) -> (Vec<Row>, Vec<Row>) {
        rows.into_iter().partition(|row| match row_starts_at(row) {
            Some(ts) => self.contains(&ts),
            None => true,
        })
    }
}
