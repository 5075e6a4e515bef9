//! Recurring schedule calculator.
//!
//! A path's schedule is stored as a loose [`ScheduleSpec`] (the shape the
//! dashboard writes) and validated into a typed [`Recurrence`] before any
//! calendar arithmetic happens.
//!
//! ```
//! use chrono::NaiveDate;
//! use pathframe::{next_occurrence, Recurrence, TimeOfDay};
//!
//! let rule = Recurrence::Daily { time: TimeOfDay::new(9, 0).unwrap() };
//! let now = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap().and_hms_opt(9, 0, 0).unwrap();
//! let next = next_occurrence(&rule, now).unwrap();
//! assert_eq!(next.to_string(), "2024-06-11 09:00:00");
//! ```

use std::fmt;

use chrono::{
    DateTime, Datelike, Days, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Weekday,
};
use rocket::serde::{Deserialize, Serialize};

use crate::{error::ScheduleError, path::AutomationPath};

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

/// Stored form of a recurrence rule, `{ "type": "weekly", "time": "12:00", "day": 1 }`.
///
/// `day` is 0-6 (Sunday first) for weekly rules and 1-31 for monthly ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct ScheduleSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
}

impl ScheduleSpec {
    pub fn daily(time: &str) -> Self {
        ScheduleSpec {
            kind: "daily".into(),
            time: time.into(),
            day: None,
        }
    }

    pub fn weekly(time: &str, day: u32) -> Self {
        ScheduleSpec {
            kind: "weekly".into(),
            time: time.into(),
            day: Some(day),
        }
    }

    pub fn monthly(time: &str, day: u32) -> Self {
        ScheduleSpec {
            kind: "monthly".into(),
            time: time.into(),
            day: Some(day),
        }
    }

    /// Returns a copy with `time` rewritten to zero-padded `HH:MM` and `kind` lowercased.
    pub fn normalized(&self) -> Result<Self, ScheduleError> {
        Ok(ScheduleSpec {
            kind: self.kind.trim().to_lowercase(),
            time: TimeOfDay::normalize(&self.time)?.to_string(),
            day: self.day,
        })
    }
}

/// A validated 24-hour time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        if hour <= 23 && minute <= 59 {
            Some(TimeOfDay { hour, minute })
        } else {
            None
        }
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    /// Strict parse of a zero-padded `HH:MM` string.
    pub fn parse(input: &str) -> Result<Self, ScheduleError> {
        let invalid = || ScheduleError::InvalidTime(input.to_string());
        let bytes = input.as_bytes();

        if bytes.len() != 5 || bytes[2] != b':' {
            return Err(invalid());
        }
        let digits = [bytes[0], bytes[1], bytes[3], bytes[4]];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(invalid());
        }

        let hour = u32::from(digits[0] - b'0') * 10 + u32::from(digits[1] - b'0');
        let minute = u32::from(digits[2] - b'0') * 10 + u32::from(digits[3] - b'0');
        TimeOfDay::new(hour, minute).ok_or_else(invalid)
    }

    /// Lenient parse used when reading stored paths: accepts `H:MM`, `HH:MM:SS`
    /// and 12-hour `h:MM AM` forms besides the canonical one.
    pub fn normalize(input: &str) -> Result<Self, ScheduleError> {
        let invalid = || ScheduleError::InvalidTime(input.to_string());
        let trimmed = input.trim();
        let upper = trimmed.to_ascii_uppercase();

        let (clock, meridiem) = if let Some(rest) = upper.strip_suffix("AM") {
            (rest.trim_end(), Some(false))
        } else if let Some(rest) = upper.strip_suffix("PM") {
            (rest.trim_end(), Some(true))
        } else {
            (upper.as_str(), None)
        };

        let parts: Vec<&str> = clock.split(':').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(invalid());
        }
        let field = |s: &str, width: std::ops::RangeInclusive<usize>| -> Option<u32> {
            if width.contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit()) {
                s.parse().ok()
            } else {
                None
            }
        };

        let hour = field(parts[0], 1..=2).ok_or_else(invalid)?;
        let minute = field(parts[1], 2..=2).ok_or_else(invalid)?;
        if let Some(seconds) = parts.get(2) {
            if field(*seconds, 2..=2).filter(|s| *s <= 59).is_none() {
                return Err(invalid());
            }
        }

        let hour = match meridiem {
            None => hour,
            Some(_) if !(1..=12).contains(&hour) => return Err(invalid()),
            Some(false) => hour % 12,
            Some(true) => hour % 12 + 12,
        };

        TimeOfDay::new(hour, minute).ok_or_else(invalid)
    }

    fn as_naive(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// A validated recurrence rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    Daily { time: TimeOfDay },
    Weekly { time: TimeOfDay, day: Weekday },
    /// `day` is 1-31, clamped to the month length when evaluated.
    Monthly { time: TimeOfDay, day: u32 },
}

impl Recurrence {
    pub fn time(&self) -> TimeOfDay {
        match self {
            Recurrence::Daily { time }
            | Recurrence::Weekly { time, .. }
            | Recurrence::Monthly { time, .. } => *time,
        }
    }
}

impl TryFrom<&ScheduleSpec> for Recurrence {
    type Error = ScheduleError;

    fn try_from(spec: &ScheduleSpec) -> Result<Self, Self::Error> {
        let invalid_day = || ScheduleError::InvalidDay {
            kind: spec.kind.clone(),
            day: spec.day,
        };

        match spec.kind.as_str() {
            "daily" => Ok(Recurrence::Daily {
                time: TimeOfDay::parse(&spec.time)?,
            }),
            "weekly" => {
                let time = TimeOfDay::parse(&spec.time)?;
                let day = spec
                    .day
                    .and_then(|d| WEEKDAYS.get(d as usize).copied())
                    .ok_or_else(invalid_day)?;
                Ok(Recurrence::Weekly { time, day })
            }
            "monthly" => {
                let time = TimeOfDay::parse(&spec.time)?;
                let day = spec
                    .day
                    .filter(|d| (1..=31).contains(d))
                    .ok_or_else(invalid_day)?;
                Ok(Recurrence::Monthly { time, day })
            }
            other => Err(ScheduleError::UnsupportedRecurrence(other.to_string())),
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::Daily { time } => write!(f, "daily at {time}"),
            Recurrence::Weekly { time, day } => write!(f, "weekly on {day} at {time}"),
            Recurrence::Monthly { time, day } => write!(f, "monthly on day {day} at {time}"),
        }
    }
}

/// Number of days in the given month.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// Next wall-clock occurrence strictly after `now`.
///
/// A candidate equal to `now` counts as already passed. Returns `None` only
/// when the result would fall outside chrono's calendar range.
pub fn next_occurrence(recurrence: &Recurrence, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let today = now.date();
    let at = recurrence.time().as_naive();

    match recurrence {
        Recurrence::Daily { .. } => {
            let candidate = today.and_time(at);
            if candidate > now {
                Some(candidate)
            } else {
                today.succ_opt().map(|d| d.and_time(at))
            }
        }
        Recurrence::Weekly { day, .. } => {
            let delta = (day.num_days_from_sunday() + 7 - today.weekday().num_days_from_sunday()) % 7;
            let candidate = today
                .checked_add_days(Days::new(u64::from(delta)))?
                .and_time(at);
            if candidate > now {
                Some(candidate)
            } else {
                candidate.checked_add_days(Days::new(7))
            }
        }
        Recurrence::Monthly { day, .. } => {
            // the candidate is in the future only when today is before the
            // clamped target day, or on it with the time still ahead
            let this_month = clamped_day(today.year(), today.month(), *day, at)?;
            if this_month > now {
                return Some(this_month);
            }
            let (year, month) = if today.month() == 12 {
                (today.year() + 1, 1)
            } else {
                (today.year(), today.month() + 1)
            };
            clamped_day(year, month, *day, at)
        }
    }
}

fn clamped_day(year: i32, month: u32, day: u32, at: NaiveTime) -> Option<NaiveDateTime> {
    let day = day.min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).map(|d| d.and_time(at))
}

/// Next occurrence of `recurrence` strictly after `now`, in `now`'s time zone.
///
/// Ambiguous local times resolve to the earliest instant, and times that fall
/// into a daylight-saving gap are pushed forward to the first valid hour.
pub fn next_after<Tz: TimeZone>(recurrence: &Recurrence, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let mut after = now.naive_local();
    loop {
        let next = next_occurrence(recurrence, after)?;
        if let Some(at) = resolve_local(&tz, next) {
            if at > *now {
                return Some(at);
            }
        }
        after = next;
    }
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    (0..=3).find_map(|shift| {
        tz.from_local_datetime(&(naive + Duration::hours(shift)))
            .earliest()
    })
}

/// Computes when `path` should run next.
///
/// Returns `Ok(None)` for inactive paths and paths without a schedule.
/// ```
/// use chrono::{TimeZone, Utc};
/// use pathframe::{compute_next_run, AutomationPath, ScheduleSpec};
///
/// let path = AutomationPath::new("Weekly digest", ScheduleSpec::weekly("12:00", 1));
/// let now = Utc.with_ymd_and_hms(2024, 6, 10, 13, 0, 0).unwrap();
/// let next = compute_next_run(&path, &now).unwrap().unwrap();
/// assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 17, 12, 0, 0).unwrap());
/// ```
pub fn compute_next_run<Tz: TimeZone>(
    path: &AutomationPath,
    now: &DateTime<Tz>,
) -> Result<Option<DateTime<Tz>>, ScheduleError> {
    if !path.active {
        return Ok(None);
    }
    let Some(spec) = &path.schedule else {
        return Ok(None);
    };
    let recurrence = Recurrence::try_from(spec)?;
    Ok(next_after(&recurrence, now))
}

/// Iterator over successive occurrences of a recurrence.
pub struct Upcoming<Tz: TimeZone> {
    recurrence: Recurrence,
    cursor: DateTime<Tz>,
}

impl<Tz: TimeZone> Iterator for Upcoming<Tz> {
    type Item = DateTime<Tz>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = next_after(&self.recurrence, &self.cursor)?;
        self.cursor = next.clone();
        Some(next)
    }
}

/// Occurrences of `recurrence` strictly after `after`, in order.
pub fn upcoming<Tz: TimeZone>(recurrence: Recurrence, after: DateTime<Tz>) -> Upcoming<Tz> {
    Upcoming {
        recurrence,
        cursor: after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, LocalResult, Timelike, Utc};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn time(s: &str) -> TimeOfDay {
        TimeOfDay::parse(s).unwrap()
    }

    #[test]
    fn daily_before_time_runs_today() {
        let rule = Recurrence::Daily { time: time("09:00") };
        assert_eq!(
            next_occurrence(&rule, at(2024, 6, 10, 8, 0)),
            Some(at(2024, 6, 10, 9, 0))
        );
    }

    #[test]
    fn daily_exact_match_counts_as_passed() {
        let rule = Recurrence::Daily { time: time("09:00") };
        assert_eq!(
            next_occurrence(&rule, at(2024, 6, 10, 9, 0)),
            Some(at(2024, 6, 11, 9, 0))
        );
    }

    #[test]
    fn daily_rolls_over_year_end() {
        let rule = Recurrence::Daily { time: time("06:30") };
        assert_eq!(
            next_occurrence(&rule, at(2024, 12, 31, 23, 59)),
            Some(at(2025, 1, 1, 6, 30))
        );
    }

    #[test]
    fn daily_is_always_strictly_after_now() {
        for hour in [0, 5, 9, 12, 23] {
            for minute in [0, 1, 30, 59] {
                let rule = Recurrence::Daily {
                    time: TimeOfDay::new(hour, minute).unwrap(),
                };
                for now_hour in 0..24 {
                    for now_minute in [0, 29, 30, 59] {
                        let now = at(2024, 2, 29, now_hour, now_minute);
                        let next = next_occurrence(&rule, now).unwrap();
                        assert!(next > now);
                        assert!(next - now <= Duration::days(1));
                        assert_eq!((next.hour(), next.minute()), (hour, minute));
                    }
                }
            }
        }
    }

    #[test]
    fn weekly_same_day_before_time() {
        let rule = Recurrence::Weekly {
            time: time("12:00"),
            day: Weekday::Mon,
        };
        assert_eq!(
            next_occurrence(&rule, at(2024, 6, 10, 0, 0)),
            Some(at(2024, 6, 10, 12, 0))
        );
    }

    #[test]
    fn weekly_same_day_after_time_waits_a_week() {
        let rule = Recurrence::Weekly {
            time: time("12:00"),
            day: Weekday::Mon,
        };
        assert_eq!(
            next_occurrence(&rule, at(2024, 6, 10, 13, 0)),
            Some(at(2024, 6, 17, 12, 0))
        );
        assert_eq!(
            next_occurrence(&rule, at(2024, 6, 10, 12, 0)),
            Some(at(2024, 6, 17, 12, 0))
        );
    }

    #[test]
    fn weekly_wraps_around_the_week() {
        // Saturday to Sunday
        let rule = Recurrence::Weekly {
            time: time("08:15"),
            day: Weekday::Sun,
        };
        assert_eq!(
            next_occurrence(&rule, at(2024, 6, 15, 22, 0)),
            Some(at(2024, 6, 16, 8, 15))
        );
    }

    #[test]
    fn weekly_lands_on_requested_weekday() {
        for (index, weekday) in WEEKDAYS.iter().enumerate() {
            let spec = ScheduleSpec::weekly("07:45", index as u32);
            let rule = Recurrence::try_from(&spec).unwrap();
            for offset in 0..14 {
                let now = at(2024, 6, 1, 10, 0) + Duration::hours(offset * 13);
                let next = next_occurrence(&rule, now).unwrap();
                assert_eq!(next.weekday(), *weekday);
                assert!(next > now);
                assert!(next - now <= Duration::days(7));
            }
        }
    }

    #[test]
    fn monthly_clamps_to_end_of_february() {
        let rule = Recurrence::Monthly {
            time: time("00:00"),
            day: 31,
        };
        assert_eq!(
            next_occurrence(&rule, at(2023, 2, 10, 12, 0)),
            Some(at(2023, 2, 28, 0, 0))
        );
        assert_eq!(
            next_occurrence(&rule, at(2024, 2, 10, 12, 0)),
            Some(at(2024, 2, 29, 0, 0))
        );
    }

    #[test]
    fn monthly_after_target_moves_to_next_month_and_reclamps() {
        let rule = Recurrence::Monthly {
            time: time("10:00"),
            day: 31,
        };
        // January 31st at 10:00 has passed, February only has 29 days in 2024
        assert_eq!(
            next_occurrence(&rule, at(2024, 1, 31, 10, 0)),
            Some(at(2024, 2, 29, 10, 0))
        );
        // the rule day is restored once the month is long enough again
        assert_eq!(
            next_occurrence(&rule, at(2024, 2, 29, 11, 0)),
            Some(at(2024, 3, 31, 10, 0))
        );
    }

    #[test]
    fn monthly_same_day_before_time_runs_today() {
        let rule = Recurrence::Monthly {
            time: time("18:00"),
            day: 15,
        };
        assert_eq!(
            next_occurrence(&rule, at(2024, 6, 15, 17, 59)),
            Some(at(2024, 6, 15, 18, 0))
        );
        assert_eq!(
            next_occurrence(&rule, at(2024, 12, 20, 9, 0)),
            Some(at(2025, 1, 15, 18, 0))
        );
    }

    #[test]
    fn monthly_day_matches_clamped_month_length() {
        for day in 1..=31 {
            let rule = Recurrence::Monthly {
                time: time("03:00"),
                day,
            };
            let mut now = at(2023, 1, 1, 0, 0);
            for _ in 0..30 {
                let next = next_occurrence(&rule, now).unwrap();
                assert!(next > now);
                assert_eq!(next.day(), day.min(days_in_month(next.year(), next.month())));
                now = next;
            }
        }
    }

    #[test]
    fn strict_parse_rejects_loose_forms() {
        assert_eq!(time("00:00"), TimeOfDay::new(0, 0).unwrap());
        assert_eq!(time("23:59"), TimeOfDay::new(23, 59).unwrap());
        for bad in ["9:00", "24:00", "12:60", "12-00", "ab:cd", "", "12:000"] {
            assert_eq!(
                TimeOfDay::parse(bad),
                Err(ScheduleError::InvalidTime(bad.to_string()))
            );
        }
    }

    #[test]
    fn normalize_accepts_common_variants() {
        assert_eq!(TimeOfDay::normalize("9:00").unwrap().to_string(), "09:00");
        assert_eq!(TimeOfDay::normalize(" 09:05:00 ").unwrap().to_string(), "09:05");
        assert_eq!(TimeOfDay::normalize("9:05 PM").unwrap().to_string(), "21:05");
        assert_eq!(TimeOfDay::normalize("12:00am").unwrap().to_string(), "00:00");
        assert_eq!(TimeOfDay::normalize("12:30 PM").unwrap().to_string(), "12:30");
        for bad in ["25:00", "13:00 PM", "9", "9:5", "noon", "09:00:75"] {
            assert!(TimeOfDay::normalize(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn spec_validation_errors() {
        let unknown = ScheduleSpec {
            kind: "hourly".into(),
            time: "10:00".into(),
            day: None,
        };
        assert_eq!(
            Recurrence::try_from(&unknown),
            Err(ScheduleError::UnsupportedRecurrence("hourly".into()))
        );
        assert_eq!(
            Recurrence::try_from(&ScheduleSpec::daily("9am")),
            Err(ScheduleError::InvalidTime("9am".into()))
        );
        assert!(matches!(
            Recurrence::try_from(&ScheduleSpec::weekly("10:00", 7)),
            Err(ScheduleError::InvalidDay { .. })
        ));
        assert!(matches!(
            Recurrence::try_from(&ScheduleSpec::monthly("10:00", 0)),
            Err(ScheduleError::InvalidDay { .. })
        ));
    }

    #[test]
    fn compute_next_run_skips_inactive_and_unscheduled() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 8, 0, 0).unwrap();

        let mut path = AutomationPath::new("Specials", ScheduleSpec::daily("09:00"));
        path.active = false;
        assert_eq!(compute_next_run(&path, &now), Ok(None));

        path.active = true;
        path.schedule = None;
        assert_eq!(compute_next_run(&path, &now), Ok(None));
    }

    #[test]
    fn compute_next_run_keeps_the_offset_of_now() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = offset.with_ymd_and_hms(2024, 6, 10, 8, 0, 0).unwrap();
        let path = AutomationPath::new("Menu", ScheduleSpec::daily("09:00"));

        let next = compute_next_run(&path, &now).unwrap().unwrap();
        assert_eq!(next, offset.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap());
        assert_eq!(next.naive_utc(), at(2024, 6, 10, 7, 0));
    }

    #[test]
    fn compute_next_run_rejects_malformed_time() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 8, 0, 0).unwrap();
        let path = AutomationPath::new("Broken", ScheduleSpec::daily("nine"));
        assert_eq!(
            compute_next_run(&path, &now),
            Err(ScheduleError::InvalidTime("nine".into()))
        );
    }

    #[test]
    fn upcoming_yields_consecutive_occurrences() {
        let rule = Recurrence::try_from(&ScheduleSpec::weekly("12:00", 1)).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap();
        let runs: Vec<_> = upcoming(rule, start).take(3).collect();
        assert_eq!(
            runs,
            vec![
                Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 6, 17, 12, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 6, 24, 12, 0, 0).unwrap(),
            ]
        );
    }

    fn hours(h: i32) -> FixedOffset {
        FixedOffset::east_opt(h * 3600).unwrap()
    }

    // +01:00, moving to +02:00 on 2024-03-31 at 02:00 local time and back on
    // 2024-10-27 at 03:00 local time
    #[derive(Debug, Clone, Copy)]
    struct Seasonal;

    impl TimeZone for Seasonal {
        type Offset = FixedOffset;

        fn from_offset(_offset: &FixedOffset) -> Self {
            Seasonal
        }

        fn offset_from_local_date(&self, local: &NaiveDate) -> LocalResult<FixedOffset> {
            self.offset_from_local_datetime(&local.and_hms_opt(0, 0, 0).unwrap())
        }

        fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
            let spring = at(2024, 3, 31, 2, 0);
            let autumn = at(2024, 10, 27, 2, 0);
            if (spring..spring + Duration::hours(1)).contains(local) {
                LocalResult::None
            } else if (autumn..autumn + Duration::hours(1)).contains(local) {
                LocalResult::Ambiguous(hours(2), hours(1))
            } else if *local > spring && *local < autumn {
                LocalResult::Single(hours(2))
            } else {
                LocalResult::Single(hours(1))
            }
        }

        fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
            self.offset_from_utc_datetime(&utc.and_hms_opt(0, 0, 0).unwrap())
        }

        fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
            if *utc >= at(2024, 3, 31, 1, 0) && *utc < at(2024, 10, 27, 1, 0) {
                hours(2)
            } else {
                hours(1)
            }
        }
    }

    #[test]
    fn times_in_a_spring_gap_move_forward() {
        let rule = Recurrence::Daily { time: time("02:30") };
        let now = Seasonal
            .from_local_datetime(&at(2024, 3, 30, 12, 0))
            .single()
            .unwrap();

        let next = next_after(&rule, &now).unwrap();
        assert!(next > now);
        assert_eq!(next.naive_local(), at(2024, 3, 31, 3, 30));
        assert_eq!(next.naive_utc(), at(2024, 3, 31, 1, 30));

        let following = next_after(&rule, &next).unwrap();
        assert_eq!(following.naive_local(), at(2024, 4, 1, 2, 30));
        assert_eq!(following.offset(), &hours(2));
    }

    #[test]
    fn repeated_autumn_times_run_once_at_the_earliest_instant() {
        let rule = Recurrence::Daily { time: time("02:30") };
        let now = Seasonal
            .from_local_datetime(&at(2024, 10, 26, 12, 0))
            .single()
            .unwrap();

        let first = next_after(&rule, &now).unwrap();
        assert_eq!(first.naive_utc(), at(2024, 10, 27, 0, 30));
        assert_eq!(first.offset(), &hours(2));

        let second = next_after(&rule, &first).unwrap();
        assert_eq!(second.naive_local(), at(2024, 10, 28, 2, 30));
        assert_eq!(second.naive_utc(), at(2024, 10, 28, 1, 30));

        // in the second pass through the hour the earlier 02:30 is already gone
        let late = Seasonal.from_utc_datetime(&at(2024, 10, 27, 1, 15));
        assert_eq!(late.naive_local(), at(2024, 10, 27, 2, 15));
        let next = next_after(&rule, &late).unwrap();
        assert!(next > late);
        assert_eq!(next.naive_local(), at(2024, 10, 28, 2, 30));
    }

    #[test]
    fn runs_around_transitions_are_strictly_later() {
        let rules = [
            Recurrence::Daily { time: time("02:00") },
            Recurrence::Daily { time: time("02:30") },
            Recurrence::Daily { time: time("03:00") },
            Recurrence::Weekly {
                time: time("02:30"),
                day: Weekday::Sun,
            },
        ];

        for start in [at(2024, 3, 29, 0, 0), at(2024, 10, 25, 0, 0)] {
            for step in 0..(4 * 24 * 4) {
                let now = Seasonal.from_utc_datetime(&(start + Duration::minutes(step * 15)));
                for rule in &rules {
                    let next = next_after(rule, &now).unwrap();
                    assert!(next > now, "{rule} after {now}");
                    assert!(next - now <= Duration::days(8), "{rule} after {now}");
                }
            }
        }
    }
}
