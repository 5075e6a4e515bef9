use chrono::{DateTime, Local, TimeZone, Utc};

/// Convertion from UTC to Local time
pub fn local_time(utc_time: DateTime<Utc>) -> DateTime<Local> {
    let local_time: DateTime<Local> = DateTime::from(utc_time);
    local_time
}

pub fn home_dir() -> String {
    home::home_dir()
        .map(|dir| dir.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string())
}

/// Human readable form of a next run, relative to `now`'s calendar date.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use pathframe::utils::next_run_label;
///
/// let now = Utc.with_ymd_and_hms(2024, 6, 10, 8, 0, 0).unwrap();
/// let next = Utc.with_ymd_and_hms(2024, 6, 11, 9, 0, 0).unwrap();
/// assert_eq!(next_run_label(&next, &now), "Tomorrow, 09:00");
/// ```
pub fn next_run_label<Tz: TimeZone>(next: &DateTime<Tz>, now: &DateTime<Tz>) -> String {
    let next_day = next.date_naive();
    let today = now.date_naive();
    let clock = next.naive_local().format("%H:%M");

    if next_day == today {
        format!("Today, {clock}")
    } else if today.succ_opt() == Some(next_day) {
        format!("Tomorrow, {clock}")
    } else {
        next.naive_local().format("%a %d %b, %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn labels_today_tomorrow_and_later() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 8, 0, 0).unwrap();
        let at = |d, h, m| Utc.with_ymd_and_hms(2024, 6, d, h, m, 0).unwrap();

        assert_eq!(next_run_label(&at(10, 9, 0), &now), "Today, 09:00");
        assert_eq!(next_run_label(&at(11, 9, 0), &now), "Tomorrow, 09:00");
        assert_eq!(next_run_label(&at(17, 12, 0), &now), "Mon 17 Jun, 12:00");
    }

    #[test]
    fn labels_use_the_local_calendar() {
        // 23:30 UTC is already the next day two hours east
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = offset.with_ymd_and_hms(2024, 6, 10, 20, 0, 0).unwrap();
        let next = Utc
            .with_ymd_and_hms(2024, 6, 10, 23, 30, 0)
            .unwrap()
            .with_timezone(&offset);
        assert_eq!(next_run_label(&next, &now), "Tomorrow, 01:30");
    }
}
