//! Maintenance windows such as `"sat,sun 02:00-05:00"`

use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use tracing::warn;

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Daily UTC time range, optionally limited to some weekdays.
///
/// A range whose end is before its start wraps past midnight; the part after
/// midnight belongs to the day the window opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateWindow {
    /// Indexed from Monday; all true when no days were given
    days: [bool; 7],
    start_minute: u32,
    end_minute: u32,
}

impl UpdateWindow {
    pub fn parse(raw: &str) -> Result<UpdateWindow, String> {
        let raw = raw.trim();
        let (days_part, range_part) = match raw.rsplit_once(char::is_whitespace) {
            Some((days, range)) => (Some(days.trim()), range),
            None => (None, raw),
        };

        let (start, end) = range_part
            .split_once('-')
            .ok_or_else(|| format!("missing '-' in time range {:?}", range_part))?;
        let start_minute = parse_clock(start)?;
        let end_minute = parse_clock(end)?;

        let days = match days_part {
            None => [true; 7],
            Some(list) => parse_days(list)?,
        };

        Ok(UpdateWindow {
            days,
            start_minute,
            end_minute,
        })
    }

    fn day_allowed(&self, day: Weekday) -> bool {
        self.days[day.num_days_from_monday() as usize]
    }

    /// Whether `now` falls inside the window
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let minute = now.hour() * 60 + now.minute();
        let today = now.weekday();

        if self.start_minute == self.end_minute {
            return self.day_allowed(today);
        }
        if self.start_minute < self.end_minute {
            return self.day_allowed(today) && minute >= self.start_minute && minute < self.end_minute;
        }

        if minute >= self.start_minute {
            self.day_allowed(today)
        } else if minute < self.end_minute {
            self.day_allowed((now - Duration::days(1)).weekday())
        } else {
            false
        }
    }
}

/// Whether a container's optional window allows work now.
///
/// No window, or one that does not parse, means no constraint.
pub fn window_allows(window: Option<&str>, now: DateTime<Utc>) -> bool {
    let Some(raw) = window.filter(|w| !w.trim().is_empty()) else {
        return true;
    };
    match UpdateWindow::parse(raw) {
        Ok(window) => window.contains(now),
        Err(e) => {
            warn!("Ignoring invalid update window {:?}: {}", raw, e);
            true
        }
    }
}

fn parse_clock(raw: &str) -> Result<u32, String> {
    let (h, m) = raw
        .trim()
        .split_once(':')
        .ok_or_else(|| format!("invalid time {:?}", raw))?;
    let hour: u32 = h.parse().map_err(|_| format!("invalid hour {:?}", h))?;
    let minute: u32 = m.parse().map_err(|_| format!("invalid minute {:?}", m))?;
    if hour > 24 || minute > 59 || (hour == 24 && minute != 0) {
        return Err(format!("time out of range {:?}", raw));
    }
    Ok(hour * 60 + minute)
}

fn parse_day(raw: &str) -> Result<usize, String> {
    let day = match raw.trim().to_ascii_lowercase().as_str() {
        "mon" | "monday" => Weekday::Mon,
        "tue" | "tues" | "tuesday" => Weekday::Tue,
        "wed" | "wednesday" => Weekday::Wed,
        "thu" | "thur" | "thurs" | "thursday" => Weekday::Thu,
        "fri" | "friday" => Weekday::Fri,
        "sat" | "saturday" => Weekday::Sat,
        "sun" | "sunday" => Weekday::Sun,
        other => return Err(format!("unknown day {:?}", other)),
    };
    Ok(day.num_days_from_monday() as usize)
}

/// `sat,sun` or `mon-fri`, ranges may wrap (`fri-mon`)
fn parse_days(raw: &str) -> Result<[bool; 7], String> {
    let mut days = [false; 7];
    for item in raw.split(',').filter(|s| !s.trim().is_empty()) {
        match item.split_once('-') {
            Some((from, to)) => {
                let from = parse_day(from)?;
                let to = parse_day(to)?;
                let mut i = from;
                loop {
                    days[i] = true;
                    if i == to {
                        break;
                    }
                    i = (i + 1) % WEEK.len();
                }
            }
            None => days[parse_day(item)?] = true,
        }
    }
    if !days.iter().any(|d| *d) {
        return Err(format!("no days in {:?}", raw));
    }
    Ok(days)
}
