//! Human-readable "time until departure" phrases.

use std::fmt;

use chrono::NaiveDateTime;

/// Coarse time until a departure, for display.
///
/// # Examples
///
/// ```
/// use departures_server::domain::Eta;
/// use chrono::NaiveDate;
///
/// let now = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap().and_hms_opt(7, 55, 0).unwrap();
/// let at = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap().and_hms_opt(8, 0, 0).unwrap();
/// assert_eq!(Eta::between(now, at).to_string(), "in 5 minutes");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eta {
    /// Less than a minute away, or already departed.
    Now,
    Minutes(i64),
    Hours(i64),
}

impl Eta {
    /// Compute the ETA of a departure at `departs_at` seen from `now`.
    ///
    /// Partial minutes and hours are truncated.
    pub fn between(now: NaiveDateTime, departs_at: NaiveDateTime) -> Self {
        let mins = (departs_at - now).num_minutes();
        if mins < 1 {
            Eta::Now
        } else if mins < 60 {
            Eta::Minutes(mins)
        } else {
            Eta::Hours(mins / 60)
        }
    }
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eta::Now => f.write_str("now"),
            Eta::Minutes(1) => f.write_str("in 1 minute"),
            Eta::Minutes(n) => write!(f, "in {n} minutes"),
            Eta::Hours(1) => f.write_str("in 1 hour"),
            Eta::Hours(n) => write!(f, "in {n} hours"),
        }
    }
}
