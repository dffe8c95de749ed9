//! Cron expression parsing and timezone-correct next-fire evaluation.
//!
//! Expressions use the 6-field form `second minute hour day-of-month month
//! day-of-week`. Each field accepts `*`, `?` (day fields only), comma-lists
//! of values and `a-b` ranges, with an optional `/step` suffix per element.
//! Day-of-week runs `0-7` where both `0` and `7` mean Sunday.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;

use crate::error::{CronParseError, SchedulerError};

/// Search horizon for `next`: a little over five years past the reference.
const HORIZON_DAYS: i64 = 366 * 5;

/// A single parsed cron field: the set of allowed values over a closed range.
///
/// Values are held in a bitmask; every field's range fits in a `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronField {
    bits: u64,
}

impl CronField {
    /// Whether `value` is in the allowed set.
    pub fn contains(&self, value: u32) -> bool {
        value < 64 && self.bits & (1 << value) != 0
    }

    fn from_bits(bits: u64) -> Self {
        Self { bits }
    }

    /// Parse one whitespace-delimited field over `[min, max]`.
    ///
    /// `allow_any_marker` permits `?`, which is only legal in the day fields.
    fn parse(text: &str, min: u32, max: u32, allow_any_marker: bool) -> Result<Self, String> {
        if text.is_empty() {
            return Err("empty field".to_string());
        }
        let mut bits = 0u64;
        for element in text.split(',') {
            bits |= Self::parse_element(element, min, max, allow_any_marker)?;
        }
        Ok(Self::from_bits(bits))
    }

    fn parse_element(
        element: &str,
        min: u32,
        max: u32,
        allow_any_marker: bool,
    ) -> Result<u64, String> {
        let (base, step) = match element.split_once('/') {
            Some((base, step_text)) => {
                let step: u32 = step_text
                    .parse()
                    .map_err(|_| format!("invalid step {step_text:?}"))?;
                if step == 0 {
                    return Err("step must be a positive integer".to_string());
                }
                (base, step)
            }
            None => (element, 1),
        };

        let (lo, hi) = match base {
            "" => return Err(format!("empty element in {element:?}")),
            "*" => (min, max),
            "?" => {
                if !allow_any_marker {
                    return Err("'?' is only valid in the day-of-month and day-of-week fields"
                        .to_string());
                }
                (min, max)
            }
            _ => {
                if let Some((start, end)) = base.split_once('-') {
                    let start = parse_value(start, min, max)?;
                    let end = parse_value(end, min, max)?;
                    if start > end {
                        return Err(format!("range start {start} exceeds range end {end}"));
                    }
                    (start, end)
                } else {
                    let value = parse_value(base, min, max)?;
                    // A bare value with a step means "value..max by step".
                    if element.contains('/') {
                        (value, max)
                    } else {
                        (value, value)
                    }
                }
            }
        };

        let mut bits = 0u64;
        let mut value = lo;
        while value <= hi {
            bits |= 1 << value;
            value += step;
        }
        Ok(bits)
    }
}

fn parse_value(text: &str, min: u32, max: u32) -> Result<u32, String> {
    let value: u32 = text
        .parse()
        .map_err(|_| format!("invalid value {text:?}"))?;
    if value < min || value > max {
        return Err(format!("value {value} out of range {min}-{max}"));
    }
    Ok(value)
}

/// A parsed 6-field cron expression.
///
/// Immutable after parsing; safe to share between tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    expression: String,
    second: CronField,
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpression {
    /// Parse an expression of the form `second minute hour dom month dow`.
    ///
    /// # Errors
    ///
    /// Returns [`CronParseError`] when the string is empty, the field count
    /// differs from 6, or any field fails to parse.
    pub fn parse(expression: &str) -> Result<Self, CronParseError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(CronParseError::new(expression, "expression is empty"));
        }

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(CronParseError::new(
                expression,
                format!("expected 6 fields, found {}", fields.len()),
            ));
        }

        let field = |index: usize, name: &str, min: u32, max: u32, any_marker: bool| {
            CronField::parse(fields[index], min, max, any_marker)
                .map_err(|reason| CronParseError::new(expression, format!("{name} field: {reason}")))
        };

        let mut day_of_week = field(5, "day-of-week", 0, 7, true)?;
        // 7 is an alias for Sunday; fold it onto 0 so matching needs no modulo.
        if day_of_week.contains(7) {
            day_of_week = CronField::from_bits((day_of_week.bits | 1) & !(1 << 7));
        }

        Ok(Self {
            expression: trimmed.to_string(),
            second: field(0, "second", 0, 59, false)?,
            minute: field(1, "minute", 0, 59, false)?,
            hour: field(2, "hour", 0, 23, false)?,
            day_of_month: field(3, "day-of-month", 1, 31, true)?,
            month: field(4, "month", 1, 12, false)?,
            day_of_week,
        })
    }

    /// The original expression text.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether all six wall-clock components of `instant` are allowed.
    pub fn matches(&self, instant: &DateTime<Tz>) -> bool {
        self.second.contains(instant.second())
            && self.minute.contains(instant.minute())
            && self.hour.contains(instant.hour())
            && self.day_of_month.contains(instant.day())
            && self.month.contains(instant.month())
            && self
                .day_of_week
                .contains(instant.weekday().num_days_from_sunday())
    }

    /// The smallest instant strictly greater than `after` whose wall-clock
    /// components in `zone` all match.
    ///
    /// The search advances at the coarsest rejecting granularity (month, then
    /// day, hour, minute, second), which yields the same first match a
    /// one-second stepper would find. Ambiguous local times resolve to the
    /// earliest offset; times swallowed by a DST gap are slid forward.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::NoUpcomingFire`] when no match exists within five
    /// years of `after`.
    pub fn next(&self, after: DateTime<Utc>, zone: Tz) -> Result<DateTime<Utc>, SchedulerError> {
        let horizon = after + Duration::days(HORIZON_DAYS);

        // Whole-second candidates only; truncating after the +1s keeps the
        // candidate strictly greater than `after`.
        let mut candidate = (after + Duration::seconds(1)).with_timezone(&zone);
        let nanos = candidate.timestamp_subsec_nanos();
        if nanos > 0 {
            candidate = candidate - Duration::nanoseconds(i64::from(nanos));
        }

        loop {
            if candidate.with_timezone(&Utc) > horizon {
                return Err(SchedulerError::NoUpcomingFire {
                    expression: self.expression.clone(),
                });
            }

            let stepped = if !self.month.contains(candidate.month()) {
                start_of_next_month(&candidate, zone)
            } else if !(self.day_of_month.contains(candidate.day())
                && self
                    .day_of_week
                    .contains(candidate.weekday().num_days_from_sunday()))
            {
                start_of_next_day(&candidate, zone)
            } else if !self.hour.contains(candidate.hour()) {
                start_of_next_hour(&candidate, zone)
            } else if !self.minute.contains(candidate.minute()) {
                start_of_next_minute(&candidate, zone)
            } else if !self.second.contains(candidate.second()) {
                candidate.checked_add_signed(Duration::seconds(1))
            } else {
                return Ok(candidate.with_timezone(&Utc));
            };

            candidate = match stepped {
                Some(next) => next,
                None => {
                    return Err(SchedulerError::NoUpcomingFire {
                        expression: self.expression.clone(),
                    })
                }
            };
        }
    }
}

impl std::str::FromStr for CronExpression {
    type Err = CronParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for CronExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Map a wall-clock time onto the zone's timeline.
///
/// Ambiguous times (fall-back) take the earliest offset. Times inside a
/// spring-forward gap slide ahead in 30-minute probes; 96 probes cover the
/// largest known gap (a skipped calendar day).
fn resolve_local(zone: Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    let mut probe = naive;
    for _ in 0..96 {
        match zone.from_local_datetime(&probe) {
            LocalResult::Single(instant) => return Some(instant),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest),
            LocalResult::None => probe = probe.checked_add_signed(Duration::minutes(30))?,
        }
    }
    None
}

/// Resolve `naive` in `zone`, falling back to an absolute step when the
/// resolved instant would not move past `candidate` (possible inside a
/// repeated fall-back hour, where the earliest offset maps behind us).
fn resolve_after(
    candidate: &DateTime<Tz>,
    zone: Tz,
    naive: NaiveDateTime,
    fallback: Duration,
) -> Option<DateTime<Tz>> {
    let resolved = resolve_local(zone, naive)?;
    if resolved > *candidate {
        Some(resolved)
    } else {
        candidate.checked_add_signed(fallback)
    }
}

fn start_of_next_month(candidate: &DateTime<Tz>, zone: Tz) -> Option<DateTime<Tz>> {
    let local = candidate.naive_local();
    let (year, month) = if local.month() == 12 {
        (local.year() + 1, 1)
    } else {
        (local.year(), local.month() + 1)
    };
    let naive = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
    resolve_after(candidate, zone, naive, Duration::days(1))
}

fn start_of_next_day(candidate: &DateTime<Tz>, zone: Tz) -> Option<DateTime<Tz>> {
    let naive = candidate
        .naive_local()
        .date()
        .checked_add_days(chrono::Days::new(1))?
        .and_hms_opt(0, 0, 0)?;
    resolve_after(candidate, zone, naive, Duration::hours(1))
}

fn start_of_next_hour(candidate: &DateTime<Tz>, zone: Tz) -> Option<DateTime<Tz>> {
    let local = candidate.naive_local();
    let naive = local
        .date()
        .and_hms_opt(local.hour(), 0, 0)?
        .checked_add_signed(Duration::hours(1))?;
    resolve_after(candidate, zone, naive, Duration::minutes(1))
}

fn start_of_next_minute(candidate: &DateTime<Tz>, zone: Tz) -> Option<DateTime<Tz>> {
    let local = candidate.naive_local();
    let naive = local
        .date()
        .and_hms_opt(local.hour(), local.minute(), 0)?
        .checked_add_signed(Duration::minutes(1))?;
    resolve_after(candidate, zone, naive, Duration::seconds(1))
}
