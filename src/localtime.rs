//! All display and bucketing happens in the shop's fixed local zone
//! (Asia/Bangkok, UTC+7, no daylight saving). Persisted `created_at`
//! values are stored pre-converted to local wall time, so stored and
//! displayed values match without further conversion.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};

const LOCAL_OFFSET_SECS: i32 = 7 * 3600;

pub fn local_offset() -> FixedOffset {
    FixedOffset::east_opt(LOCAL_OFFSET_SECS).expect("constant offset is in range")
}

/// Interprets a timezone-naive timestamp as UTC and converts it to local time.
pub fn utc_naive_to_local(dt: NaiveDateTime) -> DateTime<FixedOffset> {
    local_offset().from_utc_datetime(&dt)
}

/// Converts a timezone-aware timestamp to the local zone.
pub fn to_local(dt: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    dt.with_timezone(&local_offset())
}

/// Attaches the local offset to a wall-clock time without shifting it.
pub fn localize(wall: NaiveDateTime) -> DateTime<FixedOffset> {
    let offset = local_offset();
    DateTime::from_naive_utc_and_offset(wall - Duration::seconds(LOCAL_OFFSET_SECS as i64), offset)
}

/// Current instant, already expressed in the local zone.
pub fn now_local() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&local_offset())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn naive(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn naive_timestamps_are_treated_as_utc() {
        let dt = utc_naive_to_local(naive(2025, 1, 1, 10, 30, 0));
        assert_eq!(dt.naive_local(), naive(2025, 1, 1, 17, 30, 0));
        assert_eq!(dt.offset().local_minus_utc(), 7 * 3600);
    }

    #[test]
    fn utc_evening_rolls_into_the_next_local_day() {
        let dt = utc_naive_to_local(naive(2025, 12, 31, 20, 0, 0));
        assert_eq!(dt.naive_local(), naive(2026, 1, 1, 3, 0, 0));
    }

    #[test]
    fn localize_keeps_the_wall_clock() {
        let dt = localize(naive(2025, 5, 4, 9, 0, 0));
        assert_eq!(dt.naive_local(), naive(2025, 5, 4, 9, 0, 0));
        assert_eq!(dt.to_rfc3339(), "2025-05-04T09:00:00+07:00");
    }

    #[test]
    fn aware_timestamps_are_converted() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let dt = to_local(utc.from_utc_datetime(&naive(2025, 5, 4, 9, 0, 0)));
        assert_eq!(dt.naive_local(), naive(2025, 5, 4, 16, 0, 0));
    }
}
