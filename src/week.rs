use time::{Date, OffsetDateTime};

/// Default week for a submission: the calendar year and the ISO week number of `now`.
///
/// The year is deliberately the calendar year, not the ISO week-based year, so
/// the first days of January can report week 52/53 of the current year.
pub fn current_week(now: OffsetDateTime) -> (i32, u8) {
    (now.year(), iso_week(now.date()))
}

pub fn iso_week(date: Date) -> u8 {
    date.iso_week()
}

pub fn current_week_local() -> (i32, u8) {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    current_week(now)
}
