//! Weekly expiry selection, ported from the reference implementation's
//! `get_weekly_expiry_date`: nearest upcoming Thursday, advanced a week when
//! it lands on a market holiday (Dec 25, Jan 1).

use chrono::{Datelike, Duration, NaiveDate, Weekday};

fn is_market_holiday(date: NaiveDate) -> bool {
    (date.month() == 12 && date.day() == 25) || (date.month() == 1 && date.day() == 1)
}

/// The next weekly expiry Thursday at or after `from`, advanced a week for
/// each holiday Thursday encountered.
pub fn next_weekly_expiry(from: NaiveDate) -> NaiveDate {
    let days_to_thursday =
        (Weekday::Thu.num_days_from_monday() as i64 - from.weekday().num_days_from_monday() as i64
            + 7)
            % 7;
    let mut expiry = from + Duration::days(days_to_thursday);
    while is_market_holiday(expiry) {
        expiry += Duration::days(7);
    }
    expiry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monday_rolls_forward_to_thursday() {
        let monday = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        assert_eq!(monday.weekday(), Weekday::Mon);
        let expiry = next_weekly_expiry(monday);
        assert_eq!(expiry.weekday(), Weekday::Thu);
        assert_eq!(expiry, NaiveDate::from_ymd_opt(2026, 1, 8).unwrap());
    }

    #[test]
    fn thursday_itself_is_its_own_expiry() {
        let thursday = NaiveDate::from_ymd_opt(2026, 1, 8).unwrap();
        assert_eq!(next_weekly_expiry(thursday), thursday);
    }

    #[test]
    fn back_to_back_holiday_thursdays_advance_twice() {
        // Dec 25 2025 and Jan 1 2026 both fall on a Thursday; starting from
        // the Monday before Christmas should skip both and land on Jan 8.
        let dec22 = NaiveDate::from_ymd_opt(2025, 12, 22).unwrap();
        assert_eq!(dec22.weekday(), Weekday::Mon);
        let expiry = next_weekly_expiry(dec22);
        assert_eq!(expiry, NaiveDate::from_ymd_opt(2026, 1, 8).unwrap());
    }
}
