//! Hourly cadence arithmetic.
//!
//! A run for logical date `T` covers the interval `[T, T + 1h)` and fires once
//! that interval has closed. Missed intervals are never replayed.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

pub fn interval() -> TimeDelta {
    TimeDelta::hours(1)
}

fn floor_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(interval()).unwrap_or(ts)
}

/// Logical date of the most recent interval that has fully closed at `now`.
pub fn latest_logical_date(now: DateTime<Utc>) -> DateTime<Utc> {
    floor_hour(now) - interval()
}

/// Logical date of the interval that closes at `tick`.
///
/// Depends only on the boundary, not on when the caller actually woke up.
pub fn logical_date_for_tick(tick: DateTime<Utc>) -> DateTime<Utc> {
    floor_hour(tick) - interval()
}

/// The next hour boundary strictly after `now`.
pub fn next_tick(now: DateTime<Utc>) -> DateTime<Utc> {
    floor_hour(now) + interval()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn latest_logical_date_is_previous_hour() {
        let now = Utc.with_ymd_and_hms(2022, 4, 15, 6, 0, 5).unwrap();
        assert_eq!(
            latest_logical_date(now),
            Utc.with_ymd_and_hms(2022, 4, 15, 5, 0, 0).unwrap()
        );
    }

    #[test]
    fn latest_logical_date_on_exact_boundary() {
        let now = Utc.with_ymd_and_hms(2022, 4, 15, 0, 0, 0).unwrap();
        assert_eq!(
            latest_logical_date(now),
            Utc.with_ymd_and_hms(2022, 4, 14, 23, 0, 0).unwrap()
        );
    }

    #[test]
    fn next_tick_is_strictly_after_now() {
        let on_boundary = Utc.with_ymd_and_hms(2022, 4, 15, 6, 0, 0).unwrap();
        assert_eq!(next_tick(on_boundary), Utc.with_ymd_and_hms(2022, 4, 15, 7, 0, 0).unwrap());

        let mid = Utc.with_ymd_and_hms(2022, 4, 15, 6, 59, 59).unwrap();
        assert_eq!(next_tick(mid), Utc.with_ymd_and_hms(2022, 4, 15, 7, 0, 0).unwrap());
    }

    #[test]
    fn tick_maps_to_the_interval_it_closes() {
        let now = Utc.with_ymd_and_hms(2022, 4, 15, 5, 30, 0).unwrap();
        let tick = next_tick(now);

        assert_eq!(
            logical_date_for_tick(tick),
            Utc.with_ymd_and_hms(2022, 4, 15, 5, 0, 0).unwrap()
        );
        // A wall clock read a moment before the boundary would land an hour early.
        assert_ne!(
            latest_logical_date(tick - TimeDelta::milliseconds(1)),
            logical_date_for_tick(tick)
        );
    }
}
