//! Zero-dependency cron expression parser and next-fire-time evaluator.
//!
//! Supports standard 5-field expressions (`minute hour day-of-month month
//! day-of-week`) with `*`, `*/N` steps, `N-M` ranges, and `N,M` lists.
//! Evaluation is minute-granular and always in UTC.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};

/// A parsed 5-field cron expression.
#[derive(Debug, Clone)]
pub struct CronExpr {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>, // 0=Sun, 6=Sat
}

impl CronExpr {
    /// Parse a standard 5-field cron expression.
    pub fn parse(expr: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expr.trim().split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!(
                "Expected 5 fields (minute hour dom month dow), got {}",
                fields.len()
            ));
        }

        Ok(CronExpr {
            minutes: Self::parse_field(fields[0], 0, 59)?,
            hours: Self::parse_field(fields[1], 0, 23)?,
            days_of_month: Self::parse_field(fields[2], 1, 31)?,
            months: Self::parse_field(fields[3], 1, 12)?,
            days_of_week: Self::parse_field(fields[4], 0, 6)?,
        })
    }

    fn parse_field(field: &str, min: u32, max: u32) -> Result<Vec<u32>, String> {
        let mut values = Vec::new();

        for part in field.split(',') {
            let part = part.trim();

            if part.contains('/') {
                // Step: */N or M-N/S
                let pieces: Vec<&str> = part.splitn(2, '/').collect();
                let step: u32 = pieces[1]
                    .parse()
                    .map_err(|_| format!("Invalid step: {}", pieces[1]))?;
                if step == 0 {
                    return Err("Step cannot be zero".into());
                }
                let (start, end) = if pieces[0] == "*" {
                    (min, max)
                } else if pieces[0].contains('-') {
                    Self::parse_range(pieces[0], min, max)?
                } else {
                    let s: u32 = pieces[0]
                        .parse()
                        .map_err(|_| format!("Invalid number: {}", pieces[0]))?;
                    (s, max)
                };
                let mut v = start;
                while v <= end {
                    values.push(v);
                    v += step;
                }
            } else if part.contains('-') {
                let (start, end) = Self::parse_range(part, min, max)?;
                for v in start..=end {
                    values.push(v);
                }
            } else if part == "*" {
                for v in min..=max {
                    values.push(v);
                }
            } else {
                let v: u32 = part
                    .parse()
                    .map_err(|_| format!("Invalid number: {part}"))?;
                if v < min || v > max {
                    return Err(format!("{v} out of range {min}-{max}"));
                }
                values.push(v);
            }
        }

        values.sort();
        values.dedup();
        if values.is_empty() {
            return Err("Field produced no values".into());
        }
        Ok(values)
    }

    fn parse_range(s: &str, min: u32, max: u32) -> Result<(u32, u32), String> {
        let pieces: Vec<&str> = s.splitn(2, '-').collect();
        let start: u32 = pieces[0]
            .parse()
            .map_err(|_| format!("Invalid range start: {}", pieces[0]))?;
        let end: u32 = pieces[1]
            .parse()
            .map_err(|_| format!("Invalid range end: {}", pieces[1]))?;
        if start < min || end > max || start > end {
            return Err(format!("Range {start}-{end} invalid for {min}-{max}"));
        }
        Ok((start, end))
    }

    fn day_matches(&self, date: chrono::NaiveDate) -> bool {
        self.months.contains(&date.month())
            && self.days_of_month.contains(&date.day())
            && self.days_of_week.contains(&date.weekday().num_days_from_sunday())
    }

    /// The first fire time strictly after `after`.
    ///
    /// Scans day-by-day (bounded at four years to cover the rarest
    /// combinations), then picks the earliest matching hour/minute.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        let earliest = (*after + Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;
        let mut date = earliest.date_naive();

        for offset in 0..(4 * 366) {
            if !self.day_matches(date) {
                date = date.succ_opt()?;
                continue;
            }

            let (floor_hour, floor_minute) = if offset == 0 && date == earliest.date_naive() {
                (earliest.hour(), earliest.minute())
            } else {
                (0, 0)
            };

            for &hour in &self.hours {
                if hour < floor_hour {
                    continue;
                }
                let minute_floor = if hour == floor_hour { floor_minute } else { 0 };
                if let Some(&minute) = self.minutes.iter().find(|&&m| m >= minute_floor) {
                    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
                    return Utc.from_utc_datetime(&date.and_time(time)).into();
                }
            }

            date = date.succ_opt()?;
        }
        None
    }

    /// Whether `dt` lands exactly on a fire minute.
    pub fn matches(&self, dt: &DateTime<Utc>) -> bool {
        self.minutes.contains(&dt.minute())
            && self.hours.contains(&dt.hour())
            && self.day_matches(dt.date_naive())
    }
}
