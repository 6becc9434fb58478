//! Minute-granularity run windows.
//!
//! A pipeline's `ActiveTime` is a five-field cron expression
//! (`minute hour day-of-month month day-of-week`). A pipeline runs on a tick
//! only when the tick's minute is itself an occurrence of the expression.

use std::str::FromStr;

use chrono::{DateTime, Duration, Local, TimeZone, Timelike};
use cron::Schedule;
use tracing::debug;

/// Parsed `ActiveTime` expression.
///
/// An expression that does not parse, including the empty string, is never
/// active.
#[derive(Debug, Clone)]
pub struct ActiveWindow {
    expr: String,
    schedule: Option<Schedule>,
}

impl ActiveWindow {
    pub fn parse(expr: &str) -> Self {
        let schedule = to_schedule(expr);
        if schedule.is_none() {
            debug!(expr, "Active window expression does not parse");
        }
        Self {
            expr: expr.to_string(),
            schedule,
        }
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn is_valid(&self) -> bool {
        self.schedule.is_some()
    }

    /// Returns whether the minute containing `t` is an occurrence.
    ///
    /// The check is "first occurrence strictly after `t - 1min` equals `t`"
    /// with `t` truncated to the minute.
    pub fn is_active_at<Tz: TimeZone>(&self, t: &DateTime<Tz>) -> bool {
        let Some(schedule) = &self.schedule else {
            return false;
        };
        let Some(minute) = t.with_second(0).and_then(|t| t.with_nanosecond(0)) else {
            return false;
        };
        let previous = minute.clone() - Duration::minutes(1);
        schedule.after(&previous).next() == Some(minute)
    }

    pub fn is_active_now(&self) -> bool {
        self.is_active_at(&Local::now())
    }
}

fn to_schedule(expr: &str) -> Option<Schedule> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let [minute, hour, day, month, weekday] = fields.as_slice() else {
        return None;
    };
    let full = format!(
        "0 {} {} {} {} {} *",
        minute,
        hour,
        day,
        month,
        translate_weekday(weekday)
    );
    Schedule::from_str(&full).ok()
}

/// Rewrites a standard day-of-week field (0 or 7 is Sunday, 6 is Saturday)
/// into the 1-based numbering of the `cron` crate (1 is Sunday, 7 is
/// Saturday). Names, `*` and step values are left untouched.
fn translate_weekday(field: &str) -> String {
    field
        .split(',')
        .map(translate_weekday_item)
        .collect::<Vec<_>>()
        .join(",")
}

fn translate_weekday_item(item: &str) -> String {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };

    let translated = match range.split_once('-') {
        Some((start, end)) => match (start.parse::<u8>(), end.parse::<u8>()) {
            // A range ending on Sunday (7) wraps past Saturday.
            (Ok(0), Ok(7)) if step.is_none() => "1-7".to_string(),
            (Ok(start), Ok(7)) if step.is_none() && start <= 6 => {
                format!("{}-7,1", start + 1)
            }
            (Ok(start), Ok(end)) if start <= 6 && end <= 6 => {
                format!("{}-{}", start + 1, end + 1)
            }
            _ => range.to_string(),
        },
        None => match range.parse::<u8>() {
            Ok(7) => "1".to_string(),
            Ok(day) if day <= 6 => (day + 1).to_string(),
            _ => range.to_string(),
        },
    };

    match step {
        Some(step) => format!("{}/{}", translated, step),
        None => translated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).single().expect("valid time")
    }

    #[test]
    fn test_exact_minute() {
        let window = ActiveWindow::parse("1 * * * *");
        assert!(!window.is_active_at(&at(2024, 3, 5, 10, 0)));
        assert!(window.is_active_at(&at(2024, 3, 5, 10, 1)));
    }

    #[test]
    fn test_hour_range() {
        let window = ActiveWindow::parse("* 9-20 * * *");
        assert!(window.is_active_at(&at(2024, 3, 5, 20, 0)));
        assert!(window.is_active_at(&at(2024, 3, 5, 9, 0)));
        assert!(!window.is_active_at(&at(2024, 3, 5, 21, 0)));
        assert!(!window.is_active_at(&at(2024, 3, 5, 8, 59)));
    }

    #[test]
    fn test_seconds_are_truncated() {
        let window = ActiveWindow::parse("1 * * * *");
        let t = Utc
            .with_ymd_and_hms(2024, 3, 5, 10, 1, 42)
            .single()
            .expect("valid time");
        assert!(window.is_active_at(&t));
    }

    #[test]
    fn test_invalid_expressions_are_inactive() {
        for expr in ["", "* * * *", "* * * * * *", "61 * * * *", "nonsense"] {
            let window = ActiveWindow::parse(expr);
            assert!(!window.is_valid(), "{expr:?} should not parse");
            assert!(!window.is_active_at(&at(2024, 3, 5, 10, 0)));
        }
    }

    #[test]
    fn test_weekday_numbering() {
        // 2024-01-01 is a Monday, 2024-01-06 a Saturday, 2024-01-07 a Sunday.
        let monday = at(2024, 1, 1, 12, 0);
        let saturday = at(2024, 1, 6, 12, 0);
        let sunday = at(2024, 1, 7, 12, 0);

        let weekdays = ActiveWindow::parse("* * * * 1-5");
        assert!(weekdays.is_active_at(&monday));
        assert!(!weekdays.is_active_at(&saturday));
        assert!(!weekdays.is_active_at(&sunday));

        assert!(ActiveWindow::parse("* * * * 0").is_active_at(&sunday));
        assert!(ActiveWindow::parse("* * * * 7").is_active_at(&sunday));
        assert!(ActiveWindow::parse("* * * * 6").is_active_at(&saturday));
        assert!(!ActiveWindow::parse("* * * * 0").is_active_at(&monday));

        let weekend = ActiveWindow::parse("* * * * 6-7");
        assert!(weekend.is_active_at(&saturday));
        assert!(weekend.is_active_at(&sunday));
        assert!(!weekend.is_active_at(&monday));
    }

    #[test]
    fn test_translate_weekday() {
        assert_eq!(translate_weekday("*"), "*");
        assert_eq!(translate_weekday("0"), "1");
        assert_eq!(translate_weekday("1-5"), "2-6");
        assert_eq!(translate_weekday("0,6"), "1,7");
        assert_eq!(translate_weekday("5-7"), "6-7,1");
        assert_eq!(translate_weekday("0-7"), "1-7");
        assert_eq!(translate_weekday("1-5/2"), "2-6/2");
        assert_eq!(translate_weekday("Mon-Fri"), "Mon-Fri");
    }
}
