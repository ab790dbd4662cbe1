//! Daily staleness policy.

use chrono::NaiveDateTime;

/// Whether data last fetched at `last_fetched` should be fetched again at `now`.
///
/// Data is fresh for the rest of the local calendar day it was fetched on,
/// regardless of how many hours have passed. Never-fetched data is stale.
///
/// # Examples
///
/// ```
/// use departures_server::fetch::is_stale;
/// use chrono::NaiveDate;
///
/// let day = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
/// let morning = day.and_hms_opt(0, 1, 0).unwrap();
/// let night = day.and_hms_opt(23, 59, 0).unwrap();
///
/// assert!(is_stale(None, morning));
/// assert!(!is_stale(Some(morning), night));
/// ```
pub fn is_stale(last_fetched: Option<NaiveDateTime>, now: NaiveDateTime) -> bool {
    match last_fetched {
        None => true,
        Some(at) => at.date() < now.date(),
    }
}
