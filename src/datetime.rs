//! Session clock used by date-relative posting statistics.
//!
//! Recency counters (posts in the last 7 or 30 days, posts this month)
//! are computed against a per-thread "current date" that defaults to the
//! wall clock. Pinning the date makes those counters reproducible.

use chrono::{Local, NaiveDate};
use std::cell::Cell;

thread_local! {
    static CURRENT_DATE: Cell<Option<NaiveDate>> = const { Cell::new(None) };
}

/// Returns the session's current date.
///
/// Defaults to today's local date unless a date has been pinned with
/// [`set_current_date`].
pub fn current_date() -> NaiveDate {
    CURRENT_DATE
        .with(Cell::get)
        .unwrap_or_else(|| Local::now().date_naive())
}

/// Pins the session's current date for the calling thread.
pub fn set_current_date(date: NaiveDate) {
    CURRENT_DATE.with(|cell| cell.set(Some(date)));
}

/// Restores the wall clock as the session's current date.
pub fn reset_current_date() {
    CURRENT_DATE.with(|cell| cell.set(None));
}
