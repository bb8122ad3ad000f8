use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

/// Calendar day of `start` in the calendar timezone.
pub fn bucket_of(start: DateTime<Utc>, tz: Tz) -> NaiveDate {
    start.with_timezone(&tz).date_naive()
}

/// Every bucket a match for `start` could live in, ascending.
pub fn buckets_in_window(start: DateTime<Utc>, max_delta: Duration, same_day: bool, tz: Tz) -> Vec<NaiveDate> {
    let home = bucket_of(start, tz);
    if same_day {
        return vec![home];
    }
    let first = bucket_of(start - max_delta, tz);
    let last = bucket_of(start + max_delta, tz);
    first
        .iter_days()
        .take_while(|d| *d <= last)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Europe::Oslo;

    #[test]
    fn bucket_uses_local_calendar_day() {
        // 23:30 UTC on March 9 is already March 10 in Oslo.
        let start = Utc.with_ymd_and_hms(2025, 3, 9, 23, 30, 0).unwrap();
        assert_eq!(bucket_of(start, Oslo), NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        assert_eq!(bucket_of(start, Tz::UTC), NaiveDate::from_ymd_opt(2025, 3, 9).unwrap());
    }

    #[test]
    fn window_spans_midnight_when_same_day_is_off() {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, 22, 30, 0).unwrap(); // 23:30 in Oslo
        let window = buckets_in_window(start, Duration::minutes(120), false, Oslo);
        assert_eq!(
            window,
            vec![
                NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
                NaiveDate::from_ymd_opt(2025, 3, 11).unwrap()
            ]
        );
        assert_eq!(buckets_in_window(start, Duration::minutes(120), true, Oslo).len(), 1);
    }
}
