//! Recurring reboot admission window.
//!
//! A window is a `(start, length)` descriptor that recurs daily
//! (`"23:00"`) or weekly (`"Thu 23:00"`). The operator admits new reboots
//! only while the current time falls inside the most recent occurrence,
//! treating each occurrence as half-open: `[start, start + length)`.

use chrono::{DateTime, Datelike, Days, Duration as ChronoDuration, NaiveTime, Utc, Weekday};

use crate::error::OperatorError;

#[derive(Debug, Clone)]
pub struct RebootWindow {
    /// `None` recurs daily.
    weekday: Option<Weekday>,
    start: NaiveTime,
    length: ChronoDuration,
}

impl RebootWindow {
    /// Parse a window from its start descriptor (`"HH:MM"` with an optional
    /// leading weekday) and a length such as `"1h30m"`.
    pub fn parse(start: &str, length: &str) -> Result<Self, OperatorError> {
        let mut parts = start.split_whitespace();
        let first = parts.next().ok_or_else(|| {
            OperatorError::InvalidConfig("reboot window start must not be empty".to_string())
        })?;

        let (weekday, time_part) = match parts.next() {
            Some(time_part) => {
                let weekday = first.parse::<Weekday>().map_err(|_| {
                    OperatorError::InvalidConfig(format!(
                        "unrecognized weekday in reboot window start: {first:?}"
                    ))
                })?;
                (Some(weekday), time_part)
            }
            None => (None, first),
        };

        if parts.next().is_some() {
            return Err(OperatorError::InvalidConfig(format!(
                "malformed reboot window start: {start:?}"
            )));
        }

        let start = NaiveTime::parse_from_str(time_part, "%H:%M").map_err(|err| {
            OperatorError::InvalidConfig(format!(
                "malformed reboot window start time {time_part:?}: {err}"
            ))
        })?;

        let length = humantime::parse_duration(length).map_err(|err| {
            OperatorError::InvalidConfig(format!(
                "malformed reboot window length {length:?}: {err}"
            ))
        })?;
        let length = ChronoDuration::from_std(length).map_err(|err| {
            OperatorError::InvalidConfig(format!("reboot window length out of range: {err}"))
        })?;

        if length <= ChronoDuration::zero() {
            return Err(OperatorError::InvalidConfig(
                "reboot window length must be positive".to_string(),
            ));
        }

        Ok(Self {
            weekday,
            start,
            length,
        })
    }

    /// True when `now` falls inside the most recent occurrence.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        now < self.previous_start(now) + self.length
    }

    /// Start of the most recent occurrence at or before `now`.
    fn previous_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();

        let candidate = match self.weekday {
            None => today.and_time(self.start).and_utc(),
            Some(weekday) => {
                let days_back = (now.weekday().num_days_from_monday() + 7
                    - weekday.num_days_from_monday())
                    % 7;
                (today - Days::new(u64::from(days_back)))
                    .and_time(self.start)
                    .and_utc()
            }
        };

        if candidate <= now {
            candidate
        } else if self.weekday.is_some() {
            candidate - ChronoDuration::days(7)
        } else {
            candidate - ChronoDuration::days(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(weekday_date: (i32, u32, u32), time: (u32, u32)) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(weekday_date.0, weekday_date.1, weekday_date.2, time.0, time.1, 0)
            .unwrap()
    }

    #[test]
    fn test_daily_window_half_open() {
        let window = RebootWindow::parse("23:00", "2h").unwrap();

        // 2024-03-05 is a Tuesday.
        assert!(window.contains(at((2024, 3, 5), (23, 0))), "open at start");
        assert!(window.contains(at((2024, 3, 6), (0, 59))), "open across midnight");
        assert!(!window.contains(at((2024, 3, 6), (1, 0))), "closed at end");
        assert!(!window.contains(at((2024, 3, 5), (22, 59))), "closed before start");
    }

    #[test]
    fn test_weekly_window() {
        let window = RebootWindow::parse("Thu 04:00", "90m").unwrap();

        // 2024-03-07 is a Thursday.
        assert!(window.contains(at((2024, 3, 7), (4, 30))));
        assert!(!window.contains(at((2024, 3, 7), (5, 30))));
        assert!(!window.contains(at((2024, 3, 8), (4, 30))), "friday is outside");
        assert!(!window.contains(at((2024, 3, 6), (4, 30))), "wednesday is outside");
    }

    #[test]
    fn test_previous_occurrence_wraps_backwards() {
        let window = RebootWindow::parse("Thu 04:00", "1h").unwrap();

        // Monday: previous occurrence was the Thursday four days earlier.
        let monday = at((2024, 3, 11), (4, 30));
        assert_eq!(window.previous_start(monday), at((2024, 3, 7), (4, 0)));

        let window = RebootWindow::parse("12:00", "1h").unwrap();
        let morning = at((2024, 3, 5), (8, 0));
        assert_eq!(window.previous_start(morning), at((2024, 3, 4), (12, 0)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(RebootWindow::parse("", "1h").is_err());
        assert!(RebootWindow::parse("25:00", "1h").is_err());
        assert!(RebootWindow::parse("Someday 23:00", "1h").is_err());
        assert!(RebootWindow::parse("Thu 23:00 extra", "1h").is_err());
        assert!(RebootWindow::parse("23:00", "an hour").is_err());
        assert!(RebootWindow::parse("23:00", "0s").is_err());
    }

    #[test]
    fn test_parse_accepts_compound_lengths() {
        let window = RebootWindow::parse("Mon 00:00", "1h 30m").unwrap();
        assert!(window.contains(at((2024, 3, 4), (1, 29))));
        assert!(!window.contains(at((2024, 3, 4), (1, 30))));
    }
}
