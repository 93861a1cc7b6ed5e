use chrono::{Months, NaiveDate};

/// End of a report's evaluation window: the same calendar day one year later.
/// Feb 29 maps to Feb 28 of the following year.
pub fn one_year_after(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_add_months(Months::new(12))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_one_calendar_year() {
        let d = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        assert_eq!(one_year_after(d), NaiveDate::from_ymd_opt(2024, 1, 1));
    }

    #[test]
    fn leap_day_clamps_to_end_of_february() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(one_year_after(d), NaiveDate::from_ymd_opt(2025, 2, 28));
    }

    #[test]
    fn overflow_has_no_window() {
        assert_eq!(one_year_after(NaiveDate::MAX), None);
    }
}
