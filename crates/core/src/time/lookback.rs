use anyhow::Context;
use chrono::{DateTime, Duration, Months, NaiveDate, Utc};

/// Dividends paid within this many days before the reference date count as trailing.
pub const TRAILING_DAYS: i64 = 365;

/// Resolves the reference date for a run: an explicit `YYYY-MM-DD` argument wins,
/// otherwise the UTC calendar date of `now_utc`.
pub fn resolve_as_of_date(
    as_of_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<NaiveDate> {
    match as_of_date_arg.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("invalid as-of date {s:?} (expected YYYY-MM-DD)")),
        None => Ok(now_utc.date_naive()),
    }
}

pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// First day of a `years`-long history window ending at `end`. Calendar arithmetic:
/// Feb 29 minus one year clamps to Feb 28.
pub fn lookback_start(end: NaiveDate, years: u32) -> NaiveDate {
    end.checked_sub_months(Months::new(years.saturating_mul(12)))
        .unwrap_or(NaiveDate::MIN)
}

/// Exclusive lower bound of the trailing dividend window ending at `as_of`.
pub fn trailing_year_start(as_of: NaiveDate) -> NaiveDate {
    as_of - Duration::days(TRAILING_DAYS)
}
