//! Period label parsing and date-range resolution.
//!
//! Report requests carry a free-text period label produced by the front-end
//! ("November 20, 2025", "Nov 19 - 20, 2025", "Oct 28 - Nov 2, 2025",
//! "November 2025") together with a period kind. Parsing is fail-soft: an
//! unparseable label degrades to today's range and logs a warning, it never
//! errors out a report.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl ReportPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Postgres `date_trunc` unit for this period's calendar bucket.
    /// Weekly buckets are ISO weeks (Monday start).
    pub fn trunc_unit(self) -> &'static str {
        match self {
            Self::Daily => "day",
            Self::Weekly => "week",
            Self::Monthly => "month",
        }
    }
}

/// Inclusive start-of-day to end-of-day timestamp range. Derived from a
/// period label, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateRange {
    pub fn days(start: NaiveDate, end: NaiveDate) -> Self {
        let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).expect("valid time");
        Self {
            start: start.and_time(NaiveTime::MIN),
            end: end.and_time(end_of_day),
        }
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end.date()
    }
}

/// Resolves a period label to a concrete range, falling back to today (in the
/// business timezone) when the label cannot be parsed.
pub fn resolve_range(label: &str, period: ReportPeriod, tz: Tz) -> DateRange {
    let today = Utc::now().with_timezone(&tz).date_naive();
    resolve_range_on(label, period, today)
}

fn resolve_range_on(label: &str, period: ReportPeriod, today: NaiveDate) -> DateRange {
    let parsed = match period {
        ReportPeriod::Daily => parse_daily(label).map(|date| (date, date)),
        ReportPeriod::Weekly => parse_weekly(label),
        ReportPeriod::Monthly => parse_monthly(label).map(month_bounds),
    };

    match parsed {
        Some((start, end)) if start <= end => DateRange::days(start, end),
        Some(_) => {
            tracing::warn!(
                label,
                period = period.as_str(),
                "Period label parsed to an inverted range, using today"
            );
            DateRange::days(today, today)
        }
        None => {
            tracing::warn!(
                label,
                period = period.as_str(),
                "Unparseable period label, using today"
            );
            DateRange::days(today, today)
        }
    }
}

/// Strict "Month Day, Year" first (guards against ambiguous day/month
/// ordering), free-form ISO as the safety net.
fn parse_daily(label: &str) -> Option<NaiveDate> {
    let trimmed = label.trim();
    NaiveDate::parse_from_str(trimmed, "%B %d, %Y")
        .ok()
        .or_else(|| trimmed.parse::<NaiveDate>().ok())
}

fn parse_monthly(label: &str) -> Option<NaiveDate> {
    let trimmed = label.trim();
    if trimmed.contains(' ') {
        // "November 2025" — pin to the first of the month for parsing.
        if let Ok(date) = NaiveDate::parse_from_str(&format!("{trimmed} 1"), "%B %Y %d") {
            return Some(date);
        }
    }
    trimmed.parse::<NaiveDate>().ok()
}

/// Weekly labels encode either a same-month range ("Nov 19 - 20, 2025") or a
/// cross-month range ("Oct 28 - Nov 2, 2025"). The segment after the dash is
/// a bare day number in the first case and names its own month in the second.
/// A label with no dash yields the ISO week containing the parsed date.
fn parse_weekly(label: &str) -> Option<(NaiveDate, NaiveDate)> {
    let trimmed = label.trim();
    let Some((left, right)) = trimmed.split_once('-') else {
        let date = parse_daily(trimmed)?;
        let week = date.week(Weekday::Mon);
        return Some((week.first_day(), week.last_day()));
    };

    let left = left.trim();
    let (end_segment, year) = right.rsplit_once(',')?;
    let end_segment = end_segment.trim();
    let year = year.trim();

    let start = NaiveDate::parse_from_str(&format!("{left}, {year}"), "%B %d, %Y").ok()?;
    let end = if end_segment.contains(char::is_whitespace) {
        // Cross-month: second segment carries its own month name.
        NaiveDate::parse_from_str(&format!("{end_segment}, {year}"), "%B %d, %Y").ok()?
    } else {
        // Same-month: bare day number inherits the start month.
        let month = left.split_whitespace().next()?;
        NaiveDate::parse_from_str(&format!("{month} {end_segment}, {year}"), "%B %d, %Y").ok()?
    };

    Some((start, end))
}

fn month_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = date.with_day(1).expect("day 1 is always valid");
    let next_month = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    }
    .expect("first of month is always valid");
    (first, next_month.pred_opt().unwrap_or(first))
}

/// "November 20, 2025"
pub fn format_daily(date: NaiveDate) -> String {
    format!("{} {}, {}", date.format("%B"), date.day(), date.year())
}

/// "November 2025"
pub fn format_monthly(date: NaiveDate) -> String {
    date.format("%B %Y").to_string()
}

/// "Nov 19 - 20, 2025" when both ends share a month, otherwise
/// "Oct 28 - Nov 2, 2025".
pub fn format_weekly(start: NaiveDate, end: NaiveDate) -> String {
    if start.year() == end.year() && start.month() == end.month() {
        format!(
            "{} {} - {}, {}",
            start.format("%b"),
            start.day(),
            end.day(),
            end.year()
        )
    } else {
        format!(
            "{} {} - {} {}, {}",
            start.format("%b"),
            start.day(),
            end.format("%b"),
            end.day(),
            end.year()
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, NaiveDate};

    use super::{
        format_daily, format_monthly, format_weekly, parse_daily, parse_monthly, parse_weekly,
        resolve_range_on, DateRange, ReportPeriod,
    };

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn daily_label_round_trips() {
        let label = "November 20, 2025";
        let parsed = parse_daily(label).unwrap();
        assert_eq!(parsed, date(2025, 11, 20));
        assert_eq!(format_daily(parsed), label);
    }

    #[test]
    fn daily_accepts_iso_fallback() {
        assert_eq!(parse_daily("2025-11-20"), Some(date(2025, 11, 20)));
    }

    #[test]
    fn monthly_label_resolves_to_full_month() {
        let range = resolve_range_on("November 2025", ReportPeriod::Monthly, date(2020, 1, 1));
        assert_eq!(range.start_date(), date(2025, 11, 1));
        assert_eq!(range.end_date(), date(2025, 11, 30));
        assert_eq!(range.start.format("%H:%M:%S").to_string(), "00:00:00");
        assert_eq!(range.end.format("%H:%M:%S").to_string(), "23:59:59");
    }

    #[test]
    fn monthly_handles_december() {
        let range = resolve_range_on("December 2025", ReportPeriod::Monthly, date(2020, 1, 1));
        assert_eq!(range.end_date(), date(2025, 12, 31));
    }

    #[test]
    fn monthly_without_space_uses_iso_fallback() {
        assert_eq!(parse_monthly("2025-11-05"), Some(date(2025, 11, 5)));
    }

    #[test]
    fn weekly_same_month_shares_the_month() {
        let (start, end) = parse_weekly("Nov 19 - 20, 2025").unwrap();
        assert_eq!(start, date(2025, 11, 19));
        assert_eq!(end, date(2025, 11, 20));
        assert_eq!(start.month(), end.month());
    }

    #[test]
    fn weekly_cross_month_differs_in_month() {
        let (start, end) = parse_weekly("Oct 28 - Nov 2, 2025").unwrap();
        assert_eq!(start, date(2025, 10, 28));
        assert_eq!(end, date(2025, 11, 2));
        assert_ne!(start.month(), end.month());
    }

    #[test]
    fn weekly_without_dash_falls_back_to_iso_week() {
        // 2025-11-20 is a Thursday; ISO week runs Mon 17 through Sun 23.
        let (start, end) = parse_weekly("November 20, 2025").unwrap();
        assert_eq!(start, date(2025, 11, 17));
        assert_eq!(end, date(2025, 11, 23));
    }

    #[test]
    fn unparseable_label_falls_back_to_today() {
        let today = date(2025, 11, 20);
        for period in [ReportPeriod::Daily, ReportPeriod::Weekly, ReportPeriod::Monthly] {
            let range = resolve_range_on("banana", period, today);
            assert_eq!(range, DateRange::days(today, today));
        }
    }

    #[test]
    fn start_never_exceeds_end() {
        let today = date(2025, 6, 15);
        let cases = [
            ("November 20, 2025", ReportPeriod::Daily),
            ("Nov 19 - 20, 2025", ReportPeriod::Weekly),
            ("Oct 28 - Nov 2, 2025", ReportPeriod::Weekly),
            ("November 2025", ReportPeriod::Monthly),
            ("garbage", ReportPeriod::Daily),
        ];
        for (label, period) in cases {
            let range = resolve_range_on(label, period, today);
            assert!(range.start <= range.end, "inverted range for {label:?}");
        }
    }

    #[test]
    fn inverted_weekly_label_degrades_to_today() {
        let today = date(2025, 6, 15);
        let range = resolve_range_on("Nov 20 - 19, 2025", ReportPeriod::Weekly, today);
        assert_eq!(range, DateRange::days(today, today));
    }

    #[test]
    fn weekly_labels_format_both_shapes() {
        assert_eq!(
            format_weekly(date(2025, 11, 19), date(2025, 11, 20)),
            "Nov 19 - 20, 2025"
        );
        assert_eq!(
            format_weekly(date(2025, 10, 28), date(2025, 11, 2)),
            "Oct 28 - Nov 2, 2025"
        );
    }

    #[test]
    fn month_label_formats_from_bucket() {
        assert_eq!(format_monthly(date(2025, 11, 1)), "November 2025");
    }
}
