//! Centralized time service.
//!
//! All tenant-local time arithmetic lives here: business-hours windows and
//! the regulatory calling window (08:00–21:00 local). Business logic passes
//! a `DateTime<Utc>` in and gets a `DateTime<Utc>` back; nothing outside
//! this module touches `chrono-tz` directly.
//!
//! Window search walks forward day by day (up to 14 days, which covers any
//! weekday/weekend window combination) and re-resolves the local offset on
//! each candidate day so DST transitions land on the correct instant.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CadenceError, Result};

/// Regulatory calling window: [08:00, 21:00) tenant-local, sms and voice.
pub const COMPLIANCE_OPEN_HOUR: u32 = 8;
pub const COMPLIANCE_CLOSE_HOUR: u32 = 21;

/// Upper bound on the forward day-walk when searching for an open window.
const MAX_WINDOW_SEARCH_DAYS: i64 = 14;

/// One open–close span in local hours. `open == close` means closed all day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayWindow {
    pub open_hour: u32,
    pub close_hour: u32,
}

impl DayWindow {
    pub fn contains(&self, hour: u32) -> bool {
        self.open_hour <= hour && hour < self.close_hour
    }

    pub fn is_closed(&self) -> bool {
        self.open_hour >= self.close_hour
    }
}

/// Tenant business hours: separate weekday and weekend windows, with an
/// escape hatch for 24/7 emergency tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    pub weekday: DayWindow,
    pub weekend: DayWindow,
    /// 24/7 tenants bypass the business-hours gate entirely (the regulatory
    /// gate still applies).
    pub always_open: bool,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            weekday: DayWindow {
                open_hour: 9,
                close_hour: 18,
            },
            weekend: DayWindow {
                open_hour: 10,
                close_hour: 16,
            },
            always_open: false,
        }
    }
}

impl BusinessHours {
    fn window_for(&self, day: Weekday) -> DayWindow {
        match day {
            Weekday::Sat | Weekday::Sun => self.weekend,
            _ => self.weekday,
        }
    }
}

/// Resolve an IANA timezone name, falling back to UTC with a warning.
/// Tenant rows are written by an external admin surface; a typo there must
/// not stall the whole batch.
pub fn tenant_tz(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = %name, "unknown tenant timezone, falling back to UTC");
            Tz::UTC
        }
    }
}

/// Strict variant for boundaries that should reject bad input outright.
pub fn parse_tz(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| CadenceError::UnknownTimezone(name.to_string()))
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn local_now(tz: Tz) -> DateTime<Tz> {
    Utc::now().with_timezone(&tz)
}

/// True when `at` falls inside the tenant's business window.
pub fn within_business_hours(tz: Tz, hours: &BusinessHours, at: DateTime<Utc>) -> bool {
    if hours.always_open {
        return true;
    }
    let local = at.with_timezone(&tz);
    hours.window_for(local.weekday()).contains(local.hour())
}

/// True when `at` falls inside the regulatory [08:00, 21:00) local window.
pub fn within_compliance_hours(tz: Tz, at: DateTime<Utc>) -> bool {
    let hour = at.with_timezone(&tz).hour();
    (COMPLIANCE_OPEN_HOUR..COMPLIANCE_CLOSE_HOUR).contains(&hour)
}

/// Next instant at or after `from` when the business window is open.
/// Returns `from` unchanged if already open (or the tenant is 24/7).
pub fn next_business_open(tz: Tz, hours: &BusinessHours, from: DateTime<Utc>) -> DateTime<Utc> {
    if within_business_hours(tz, hours, from) {
        return from;
    }
    next_open(tz, from, |day| {
        let w = hours.window_for(day);
        if w.is_closed() {
            None
        } else {
            Some(w.open_hour)
        }
    })
    .unwrap_or(from)
}

/// Next instant at or after `from` inside the regulatory window.
/// Returns `from` unchanged if already compliant.
pub fn next_compliance_open(tz: Tz, from: DateTime<Utc>) -> DateTime<Utc> {
    if within_compliance_hours(tz, from) {
        return from;
    }
    next_open(tz, from, |_| Some(COMPLIANCE_OPEN_HOUR)).unwrap_or(from)
}

/// Walk forward from `from` looking for the first `open_hour(weekday)`
/// local instant at or after `from`. The per-day offset resolution handles
/// DST gaps (a nonexistent local time falls through to the next candidate
/// day).
fn next_open<F>(tz: Tz, from: DateTime<Utc>, open_hour: F) -> Option<DateTime<Utc>>
where
    F: Fn(Weekday) -> Option<u32>,
{
    let local_from = from.with_timezone(&tz);

    for day_offset in 0..MAX_WINDOW_SEARCH_DAYS {
        let day = local_from.date_naive() + Duration::days(day_offset);
        let Some(hour) = open_hour(day.weekday()) else {
            continue;
        };

        let candidate = match tz
            .with_ymd_and_hms(day.year(), day.month(), day.day(), hour, 0, 0)
            .earliest()
        {
            Some(dt) => dt.with_timezone(&Utc),
            // DST gap swallowed this local time — try the next day.
            None => continue,
        };

        if candidate >= from {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn la() -> Tz {
        "America/Los_Angeles".parse().unwrap()
    }

    fn la_instant(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        la().with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        assert_eq!(tenant_tz("Mars/Olympus_Mons"), Tz::UTC);
        assert_eq!(tenant_tz("America/Los_Angeles"), la());
    }

    #[test]
    fn strict_parse_rejects_unknown() {
        assert!(parse_tz("Nowhere/Nope").is_err());
        assert!(parse_tz("Europe/Berlin").is_ok());
    }

    #[test]
    fn late_evening_defers_to_next_morning() {
        // 22:15 local in LA — outside [08:00, 21:00).
        let at = la_instant(2025, 3, 3, 22, 15);
        assert!(!within_compliance_hours(la(), at));

        let next = next_compliance_open(la(), at);
        let local = next.with_timezone(&la());
        assert_eq!(local.hour(), 8);
        assert_eq!(local.minute(), 0);
        assert_eq!(local.day(), 4);
    }

    #[test]
    fn early_morning_defers_to_same_day_open() {
        let at = la_instant(2025, 3, 3, 5, 30);
        let next = next_compliance_open(la(), at);
        let local = next.with_timezone(&la());
        assert_eq!(local.hour(), 8);
        assert_eq!(local.day(), 3);
    }

    #[test]
    fn compliant_instant_passes_through() {
        let at = la_instant(2025, 3, 3, 14, 0);
        assert!(within_compliance_hours(la(), at));
        assert_eq!(next_compliance_open(la(), at), at);
    }

    #[test]
    fn boundary_hours_are_half_open() {
        // 08:00 is in; 21:00 is out.
        assert!(within_compliance_hours(la(), la_instant(2025, 3, 3, 8, 0)));
        assert!(!within_compliance_hours(la(), la_instant(2025, 3, 3, 21, 0)));
        assert!(within_compliance_hours(la(), la_instant(2025, 3, 3, 20, 59)));
    }

    #[test]
    fn business_hours_weekend_window_applies_on_saturday() {
        let hours = BusinessHours::default(); // weekend opens 10
        // Saturday 2025-03-08, 09:00 local — weekday window would be open,
        // weekend window is not yet.
        let at = la_instant(2025, 3, 8, 9, 0);
        assert!(!within_business_hours(la(), &hours, at));

        let next = next_business_open(la(), &hours, at);
        let local = next.with_timezone(&la());
        assert_eq!(local.hour(), 10);
        assert_eq!(local.day(), 8);
    }

    #[test]
    fn closed_weekend_rolls_to_monday() {
        let hours = BusinessHours {
            weekday: DayWindow {
                open_hour: 9,
                close_hour: 17,
            },
            weekend: DayWindow {
                open_hour: 0,
                close_hour: 0,
            },
            always_open: false,
        };
        // Saturday evening — weekend closed entirely.
        let at = la_instant(2025, 3, 8, 18, 0);
        let next = next_business_open(la(), &hours, at);
        let local = next.with_timezone(&la());
        assert_eq!(local.weekday(), Weekday::Mon);
        assert_eq!(local.hour(), 9);
    }

    #[test]
    fn always_open_bypasses_business_gate() {
        let hours = BusinessHours {
            always_open: true,
            ..BusinessHours::default()
        };
        let at = la_instant(2025, 3, 3, 3, 0);
        assert!(within_business_hours(la(), &hours, at));
        assert_eq!(next_business_open(la(), &hours, at), at);
    }

    #[test]
    fn dst_spring_forward_resolves_next_morning() {
        // US DST starts 2025-03-09 at 02:00 local. 23:00 the night before
        // must land on 08:00 PDT the next day, not a phantom hour.
        let at = la_instant(2025, 3, 8, 23, 0);
        let next = next_compliance_open(la(), at);
        let local = next.with_timezone(&la());
        assert_eq!(local.day(), 9);
        assert_eq!(local.hour(), 8);
    }
}
