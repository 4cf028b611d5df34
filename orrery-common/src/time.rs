//! Calendar helpers for the date dimension

use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// Attributes of one date-dimension row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateAttributes {
    /// YYYYMMDD surrogate key
    pub date_key: i64,
    pub full_date: NaiveDate,
    /// ISO weekday, 1 = Monday
    pub day_of_week: u32,
    pub day_of_month: u32,
    pub month: u32,
    pub quarter: u32,
    pub year: i32,
    pub is_weekend: bool,
}

/// Compute the YYYYMMDD date key for a date
pub fn date_key(date: NaiveDate) -> i64 {
    date.year() as i64 * 10_000 + date.month() as i64 * 100 + date.day() as i64
}

/// Expand a date into its dimension attributes
pub fn date_attributes(date: NaiveDate) -> DateAttributes {
    let dow = date.weekday().number_from_monday();
    DateAttributes {
        date_key: date_key(date),
        full_date: date,
        day_of_week: dow,
        day_of_month: date.day(),
        month: date.month(),
        quarter: (date.month() - 1) / 3 + 1,
        year: date.year(),
        is_weekend: dow >= 6,
    }
}

/// Whole days elapsed between a past instant and `now`
///
/// Clamped at zero so clock skew on freshly arrived events never
/// produces a negative recency.
pub fn days_between(past: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - past).num_days().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_date_key_format() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        assert_eq!(date_key(date), 20250307);
    }

    #[test]
    fn test_date_attributes_weekend() {
        // 2025-03-08 is a Saturday
        let attrs = date_attributes(NaiveDate::from_ymd_opt(2025, 3, 8).unwrap());
        assert_eq!(attrs.day_of_week, 6);
        assert!(attrs.is_weekend);
        assert_eq!(attrs.quarter, 1);
    }

    #[test]
    fn test_days_between_clamps_negative() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let future = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(days_between(future, now), 0);
        assert_eq!(days_between(now, future), 1);
    }
}
