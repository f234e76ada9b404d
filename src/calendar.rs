//! Local calendar math in the deployment's reference offset.
//!
//! Everything here is pure: callers pass `now` in, nothing reads the clock.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

/// Calendar date of `now` in the reference offset.
pub fn local_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// Weekday index with 0 = Sunday .. 6 = Saturday.
pub fn weekday_index(date: NaiveDate) -> u32 {
    date.weekday().num_days_from_sunday()
}

/// Absolute instant of a local date + time-of-day.
pub fn local_instant(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    let utc = date.and_time(time) - chrono::Duration::seconds(i64::from(offset.local_minus_utc()));
    Utc.from_utc_datetime(&utc)
}

/// 1-based curriculum position for a batch started on `start` when it is
/// `today`. Values below 1 mean the batch has not started yet.
pub fn session_number(start: NaiveDate, today: NaiveDate) -> i64 {
    (today - start).num_days() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(330 * 60).unwrap()
    }

    #[test]
    fn local_date_crosses_midnight_before_utc() {
        // 20:00 UTC on Wed is 01:30 Thu in +05:30.
        let now = Utc.with_ymd_and_hms(2026, 10, 21, 20, 0, 0).unwrap();
        let today = local_date(now, ist());
        assert_eq!(today, NaiveDate::from_ymd_opt(2026, 10, 22).unwrap());
        assert_eq!(weekday_index(today), 4);
    }

    #[test]
    fn sunday_is_zero() {
        let sunday = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        assert_eq!(weekday_index(sunday), 0);
        assert_eq!(weekday_index(sunday + chrono::Duration::days(6)), 6);
    }

    #[test]
    fn local_instant_applies_offset() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 22).unwrap();
        let at = local_instant(date, NaiveTime::from_hms_opt(13, 0, 0).unwrap(), ist());
        assert_eq!(at, Utc.with_ymd_and_hms(2026, 10, 22, 7, 30, 0).unwrap());
    }

    #[test]
    fn session_number_counts_from_one() {
        let start = NaiveDate::from_ymd_opt(2026, 10, 22).unwrap();
        assert_eq!(session_number(start, start), 1);
        assert_eq!(session_number(start, start + chrono::Duration::days(5)), 6);
        assert_eq!(session_number(start, start - chrono::Duration::days(1)), 0);
    }
}
