//! Recurrence rules and next-fire-time computation.
//!
//! Calendar units (`daily`, `weekly`, `monthly`) advance in the task's
//! timezone preserving the local wall-clock time, so a daylight-saving
//! transition shifts the absolute instant, not the local time-of-day.
//! Fixed intervals (`every_N_minutes`, `every_N_hours`) advance from the
//! previous fire time, never from "now", so they cannot drift.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, Duration, Months, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::SchedulerError;

/// How a scheduled task repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    Once,
    Daily,
    Weekly,
    Monthly,
    EveryMinutes(u32),
    EveryHours(u32),
}

impl Recurrence {
    /// Compute the fire time following `prev`, or `None` for one-time tasks.
    pub fn next_occurrence(&self, prev: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match *self {
            Recurrence::Once => None,
            Recurrence::EveryMinutes(n) => Some(prev + Duration::minutes(i64::from(n))),
            Recurrence::EveryHours(n) => Some(prev + Duration::hours(i64::from(n))),
            Recurrence::Daily => advance_local(prev, tz, |naive| naive.checked_add_days(Days::new(1))),
            Recurrence::Weekly => {
                advance_local(prev, tz, |naive| naive.checked_add_days(Days::new(7)))
            }
            Recurrence::Monthly => {
                advance_local(prev, tz, |naive| naive.checked_add_months(Months::new(1)))
            }
        }
    }

    /// Advance past any occurrences at or before `now`, returning the first
    /// strictly-future one. Missed occurrences are skipped, not replayed.
    pub fn skip_forward(
        &self,
        from: DateTime<Utc>,
        now: DateTime<Utc>,
        tz: Tz,
    ) -> Option<DateTime<Utc>> {
        let mut next = from;
        while next <= now {
            next = self.next_occurrence(next, tz)?;
        }
        Some(next)
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Recurrence::Once)
    }
}

/// Advance in local wall-clock time, then resolve back to an instant.
fn advance_local<F>(prev: DateTime<Utc>, tz: Tz, step: F) -> Option<DateTime<Utc>>
where
    F: Fn(NaiveDateTime) -> Option<NaiveDateTime>,
{
    let local = prev.with_timezone(&tz).naive_local();
    let advanced = step(local)?;
    Some(resolve_local(advanced, tz))
}

/// Map a local wall-clock time to an instant. Ambiguous times (clocks fell
/// back) take the earlier instant; nonexistent times (clocks sprang
/// forward) shift into the following hour.
pub(crate) fn resolve_local(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        chrono::LocalResult::None => {
            let shifted = naive + Duration::hours(1);
            match tz.from_local_datetime(&shifted) {
                chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
                    dt.with_timezone(&Utc)
                }
                // Two consecutive nonexistent local hours do not occur in
                // tzdb; fall back to interpreting the time as UTC.
                chrono::LocalResult::None => Utc.from_utc_datetime(&naive),
            }
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Recurrence::Once => write!(f, "once"),
            Recurrence::Daily => write!(f, "daily"),
            Recurrence::Weekly => write!(f, "weekly"),
            Recurrence::Monthly => write!(f, "monthly"),
            Recurrence::EveryMinutes(n) => write!(f, "every_{n}_minutes"),
            Recurrence::EveryHours(n) => write!(f, "every_{n}_hours"),
        }
    }
}

impl FromStr for Recurrence {
    type Err = SchedulerError;

    /// Parse the wire patterns: `once`, `daily`, `weekly`, `monthly`,
    /// `every_<N>_minutes`, `every_<N>_hours`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" | "none" => return Ok(Recurrence::Once),
            "daily" => return Ok(Recurrence::Daily),
            "weekly" => return Ok(Recurrence::Weekly),
            "monthly" => return Ok(Recurrence::Monthly),
            _ => {}
        }

        let invalid = || SchedulerError::InvalidRecurrence(s.to_string());

        let mut parts = s.split('_');
        if parts.next() != Some("every") {
            return Err(invalid());
        }
        let n: u32 = parts
            .next()
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(invalid)?;
        if n == 0 {
            return Err(invalid());
        }
        let unit = parts.next().ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        match unit {
            "minute" | "minutes" => Ok(Recurrence::EveryMinutes(n)),
            "hour" | "hours" => Ok(Recurrence::EveryHours(n)),
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono_tz::America::New_York;
    use chrono_tz::Tz::UTC;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn parses_wire_patterns() {
        assert_eq!("once".parse::<Recurrence>().unwrap(), Recurrence::Once);
        assert_eq!("daily".parse::<Recurrence>().unwrap(), Recurrence::Daily);
        assert_eq!(
            "every_30_minutes".parse::<Recurrence>().unwrap(),
            Recurrence::EveryMinutes(30)
        );
        assert_eq!(
            "every_2_hours".parse::<Recurrence>().unwrap(),
            Recurrence::EveryHours(2)
        );

        assert!("every_0_hours".parse::<Recurrence>().is_err());
        assert!("every_two_hours".parse::<Recurrence>().is_err());
        assert!("fortnightly".parse::<Recurrence>().is_err());
        assert!("every_5_days".parse::<Recurrence>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for rec in [
            Recurrence::Once,
            Recurrence::Daily,
            Recurrence::Weekly,
            Recurrence::Monthly,
            Recurrence::EveryMinutes(30),
            Recurrence::EveryHours(2),
        ] {
            assert_eq!(rec.to_string().parse::<Recurrence>().unwrap(), rec);
        }
    }

    #[test]
    fn fixed_intervals_advance_from_previous_fire_time() {
        let prev = utc(2026, 3, 1, 10, 0);
        assert_eq!(
            Recurrence::EveryHours(2).next_occurrence(prev, UTC).unwrap(),
            utc(2026, 3, 1, 12, 0)
        );
        assert_eq!(
            Recurrence::EveryMinutes(30).next_occurrence(prev, UTC).unwrap(),
            utc(2026, 3, 1, 10, 30)
        );
    }

    #[test]
    fn daily_preserves_wall_clock_across_spring_forward() {
        // US DST begins 2026-03-08: 09:00 EST is UTC-5, 09:00 EDT is UTC-4.
        let before = New_York
            .with_ymd_and_hms(2026, 3, 7, 9, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(before, utc(2026, 3, 7, 14, 0));

        let after = Recurrence::Daily.next_occurrence(before, New_York).unwrap();
        assert_eq!(after, utc(2026, 3, 8, 13, 0));
        let local = after.with_timezone(&New_York);
        assert_eq!(local.format("%H:%M").to_string(), "09:00");
    }

    #[test]
    fn daily_preserves_wall_clock_across_fall_back() {
        // US DST ends 2026-11-01.
        let before = New_York
            .with_ymd_and_hms(2026, 10, 31, 9, 0, 0)
            .unwrap()
            .with_timezone(&Utc);

        let after = Recurrence::Daily.next_occurrence(before, New_York).unwrap();
        let local = after.with_timezone(&New_York);
        assert_eq!(local.format("%Y-%m-%d %H:%M").to_string(), "2026-11-01 09:00");
    }

    #[test]
    fn nonexistent_local_time_shifts_forward() {
        // 02:30 does not exist on 2026-03-08 in New York; the occurrence
        // lands in the following hour instead of vanishing.
        let before = New_York
            .with_ymd_and_hms(2026, 3, 7, 2, 30, 0)
            .unwrap()
            .with_timezone(&Utc);

        let after = Recurrence::Daily.next_occurrence(before, New_York).unwrap();
        let local = after.with_timezone(&New_York);
        assert_eq!(local.format("%Y-%m-%d %H:%M").to_string(), "2026-03-08 03:30");
    }

    #[test]
    fn monthly_clamps_to_shorter_months() {
        let jan31 = utc(2026, 1, 31, 8, 0);
        let next = Recurrence::Monthly.next_occurrence(jan31, UTC).unwrap();
        assert_eq!(next, utc(2026, 2, 28, 8, 0));
    }

    #[test]
    fn skip_forward_jumps_past_missed_occurrences() {
        // Fired at T, offline from T+1h to T+5h: resume at T+6h, the first
        // 2-hour boundary strictly after "now", with zero backfires.
        let fired = utc(2026, 3, 1, 10, 0);
        let now = utc(2026, 3, 1, 15, 0);

        let next = Recurrence::EveryHours(2)
            .skip_forward(fired + Duration::hours(2), now, UTC)
            .unwrap();
        assert_eq!(next, utc(2026, 3, 1, 16, 0));
    }

    #[test]
    fn skip_forward_keeps_future_times_untouched() {
        let future = utc(2026, 3, 1, 10, 0);
        let now = utc(2026, 3, 1, 9, 0);
        assert_eq!(
            Recurrence::Daily.skip_forward(future, now, UTC).unwrap(),
            future
        );
    }
}
