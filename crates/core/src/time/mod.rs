pub mod lookback;

pub use lookback::{lookback_start, resolve_as_of_date, today_utc, trailing_year_start};
