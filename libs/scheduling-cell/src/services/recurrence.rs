// libs/scheduling-cell/src/services/recurrence.rs
//
// Recurrence expansion for blackout constraints. `expand` is a pure mapping
// from (rule, seed interval, window) to concrete intervals; the string form
// stored by clinic administration is handled separately by `FromStr`.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};
use std::str::FromStr;
use thiserror::Error;

use crate::models::{Frequency, RecurrenceRule, TimeRange};

/// Upper bound on generated steps for a single rule.
const MAX_STEPS: i64 = 20_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid recurrence rule: {0}")]
pub struct RecurrenceParseError(pub String);

/// Concrete occurrences of `seed` under `rule` that intersect `window`, sorted by start.
pub fn expand(rule: &RecurrenceRule, seed: TimeRange, window: TimeRange) -> Vec<TimeRange> {
    let length = seed.duration();
    let mut occurrences = Vec::new();
    let mut emitted: u32 = 0;

    for start in occurrence_starts(rule, seed, window) {
        if rule.count.is_some_and(|count| emitted >= count) {
            break;
        }
        if rule.until.is_some_and(|until| start > until) {
            break;
        }
        if start >= window.end {
            break;
        }
        let Some(end) = start.checked_add_signed(length) else {
            break;
        };
        emitted += 1;

        let occurrence = TimeRange { start, end };
        if occurrence.overlaps(&window) {
            occurrences.push(occurrence);
        }
    }

    occurrences
}

/// Expand an optional rule; no rule means the seed is the only occurrence.
pub fn expand_optional(
    rule: Option<&RecurrenceRule>,
    seed: TimeRange,
    window: TimeRange,
) -> Vec<TimeRange> {
    match rule {
        Some(rule) => expand(rule, seed, window),
        None => seed.intersect(&window).map(|_| vec![seed]).unwrap_or_default(),
    }
}

fn occurrence_starts(
    rule: &RecurrenceRule,
    seed: TimeRange,
    window: TimeRange,
) -> Box<dyn Iterator<Item = DateTime<Utc>>> {
    let interval = i64::from(rule.interval.max(1));
    let origin = seed.start;

    match rule.frequency {
        Frequency::Daily => stepped(rule, seed, window, Duration::try_days(interval)),
        Frequency::Weekly if rule.by_weekday.is_empty() => {
            stepped(rule, seed, window, Duration::try_weeks(interval))
        }
        Frequency::Weekly => {
            let mut weekdays: Vec<Weekday> = rule.by_weekday.clone();
            weekdays.sort_by_key(|day| day.num_days_from_monday());
            weekdays.dedup();

            let week_anchor = origin - Duration::days(i64::from(origin.weekday().num_days_from_monday()));
            let Some(step) = Duration::try_weeks(interval) else {
                return Box::new(std::iter::empty());
            };
            let first_week = fast_forward(rule, seed, window, step);

            Box::new(
                (first_week..MAX_STEPS)
                    .map_while(move |week| shifted(week_anchor, step, week))
                    .flat_map(move |base| {
                        weekdays
                            .clone()
                            .into_iter()
                            .filter_map(move |day| {
                                base.checked_add_signed(Duration::days(i64::from(day.num_days_from_monday())))
                            })
                    })
                    .filter(move |start| *start >= origin),
            )
        }
        Frequency::Monthly => {
            let day = origin.day();
            let time = origin.time();
            let base_month = i64::from(origin.year()) * 12 + i64::from(origin.month0());

            Box::new((0..MAX_STEPS).filter_map(move |k| {
                let absolute = base_month + k * interval;
                let year = i32::try_from(absolute.div_euclid(12)).ok()?;
                let month = u32::try_from(absolute.rem_euclid(12)).ok()? + 1;
                // Months without this day are skipped rather than clamped.
                let date = NaiveDate::from_ymd_opt(year, month, day)?;
                Some(date.and_time(time).and_utc())
            }))
        }
    }
}

/// Fixed-step series from the seed start. A step too large to represent
/// yields nothing.
fn stepped(
    rule: &RecurrenceRule,
    seed: TimeRange,
    window: TimeRange,
    step: Option<Duration>,
) -> Box<dyn Iterator<Item = DateTime<Utc>>> {
    let Some(step) = step else {
        return Box::new(std::iter::empty());
    };
    let origin = seed.start;
    let first = fast_forward(rule, seed, window, step);
    Box::new((first..MAX_STEPS).map_while(move |k| shifted(origin, step, k)))
}

/// `origin + step * k`, or `None` once the series leaves the representable range.
fn shifted(origin: DateTime<Utc>, step: Duration, k: i64) -> Option<DateTime<Utc>> {
    let offset = step.checked_mul(i32::try_from(k).ok()?)?;
    origin.checked_add_signed(offset)
}

/// First step index whose occurrence can still reach the window. Only valid
/// without `count`, which has to be counted from the seed.
fn fast_forward(rule: &RecurrenceRule, seed: TimeRange, window: TimeRange, step: Duration) -> i64 {
    if rule.count.is_some() {
        return 0;
    }
    let gap = window.start - seed.end;
    if gap <= Duration::zero() {
        return 0;
    }
    let step_seconds = step.num_seconds().max(1);
    (gap.num_seconds() / step_seconds).max(0)
}

impl FromStr for RecurrenceRule {
    type Err = RecurrenceParseError;

    /// Parses the RRULE-like form `FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE;UNTIL=...;COUNT=5`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let body = raw.trim();
        let body = body.strip_prefix("RRULE:").unwrap_or(body);

        let mut frequency = None;
        let mut rule = RecurrenceRule::new(Frequency::Daily);

        for part in body.split(';').map(str::trim).filter(|part| !part.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| RecurrenceParseError(format!("expected KEY=VALUE, got '{}'", part)))?;

            match key.to_ascii_uppercase().as_str() {
                "FREQ" => {
                    frequency = Some(match value.to_ascii_uppercase().as_str() {
                        "DAILY" => Frequency::Daily,
                        "WEEKLY" => Frequency::Weekly,
                        "MONTHLY" => Frequency::Monthly,
                        other => {
                            return Err(RecurrenceParseError(format!("unsupported FREQ '{}'", other)))
                        }
                    });
                }
                "INTERVAL" => {
                    let interval: u32 = value
                        .parse()
                        .map_err(|_| RecurrenceParseError(format!("INTERVAL '{}' is not a number", value)))?;
                    if interval == 0 {
                        return Err(RecurrenceParseError("INTERVAL must be positive".to_string()));
                    }
                    rule.interval = interval;
                }
                "BYDAY" => {
                    rule.by_weekday = value
                        .split(',')
                        .map(parse_weekday)
                        .collect::<Result<Vec<_>, _>>()?;
                }
                "UNTIL" => rule.until = Some(parse_until(value)?),
                "COUNT" => {
                    rule.count = Some(
                        value
                            .parse()
                            .map_err(|_| RecurrenceParseError(format!("COUNT '{}' is not a number", value)))?,
                    );
                }
                _ => {
                    // WKST and friends do not affect expansion here.
                }
            }
        }

        rule.frequency = frequency.ok_or_else(|| RecurrenceParseError("FREQ is required".to_string()))?;
        Ok(rule)
    }
}

fn parse_weekday(raw: &str) -> Result<Weekday, RecurrenceParseError> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "MO" => Ok(Weekday::Mon),
        "TU" => Ok(Weekday::Tue),
        "WE" => Ok(Weekday::Wed),
        "TH" => Ok(Weekday::Thu),
        "FR" => Ok(Weekday::Fri),
        "SA" => Ok(Weekday::Sat),
        "SU" => Ok(Weekday::Sun),
        other => Err(RecurrenceParseError(format!("unknown BYDAY value '{}'", other))),
    }
}

fn parse_until(raw: &str) -> Result<DateTime<Utc>, RecurrenceParseError> {
    let value = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value.trim_end_matches('Z'), "%Y%m%dT%H%M%S") {
        return Ok(Utc.from_utc_datetime(&parsed));
    }
    // A bare date bounds the whole day.
    for format in ["%Y%m%d", "%Y-%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            if let Some(end_of_day) = date.and_hms_opt(23, 59, 59) {
                return Ok(end_of_day.and_utc());
            }
        }
    }
    Err(RecurrenceParseError(format!("UNTIL '{}' is not a timestamp", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        // May 2024: the 6th is a Monday.
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    fn range(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeRange {
        TimeRange::new(start, end).unwrap()
    }

    #[test]
    fn daily_rule_repeats_inside_window() {
        let rule = RecurrenceRule::new(Frequency::Daily);
        let seed = range(ts(1, 12), ts(1, 13));
        let window = range(ts(6, 0), ts(9, 0));

        let occurrences = expand(&rule, seed, window);
        let starts: Vec<_> = occurrences.iter().map(|o| o.start).collect();
        assert_eq!(starts, vec![ts(6, 12), ts(7, 12), ts(8, 12)]);
    }

    #[test]
    fn weekly_by_day_skips_days_before_seed() {
        let mut rule = RecurrenceRule::new(Frequency::Weekly);
        rule.by_weekday = vec![Weekday::Mon, Weekday::Wed];
        // Seed on Wednesday the 8th; Monday the 6th precedes it.
        let seed = range(ts(8, 9), ts(8, 10));
        let window = range(ts(1, 0), ts(16, 0));

        let starts: Vec<_> = expand(&rule, seed, window).iter().map(|o| o.start).collect();
        assert_eq!(starts, vec![ts(8, 9), ts(13, 9), ts(15, 9)]);
    }

    #[test]
    fn count_is_counted_from_seed_not_window() {
        let mut rule = RecurrenceRule::new(Frequency::Daily);
        rule.count = Some(3);
        let seed = range(ts(1, 8), ts(1, 9));
        let window = range(ts(3, 0), ts(10, 0));

        let starts: Vec<_> = expand(&rule, seed, window).iter().map(|o| o.start).collect();
        assert_eq!(starts, vec![ts(3, 8)]);
    }

    #[test]
    fn until_is_inclusive() {
        let mut rule = RecurrenceRule::new(Frequency::Daily);
        rule.until = Some(ts(3, 8));
        let seed = range(ts(1, 8), ts(1, 9));
        let window = range(ts(1, 0), ts(10, 0));
        assert_eq!(expand(&rule, seed, window).len(), 3);
    }

    #[test]
    fn monthly_skips_short_months() {
        let rule = RecurrenceRule::new(Frequency::Monthly);
        let seed = range(
            Utc.with_ymd_and_hms(2024, 1, 31, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 31, 10, 0, 0).unwrap(),
        );
        let window = range(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        );
        let months: Vec<u32> = expand(&rule, seed, window).iter().map(|o| o.start.month()).collect();
        assert_eq!(months, vec![1, 3, 5]);
    }

    #[test]
    fn overlapping_occurrence_before_window_start_is_kept() {
        let rule = RecurrenceRule::new(Frequency::Daily);
        let seed = range(ts(1, 22), ts(2, 2));
        let window = range(ts(6, 0), ts(6, 12));
        let occurrences = expand(&rule, seed, window);
        assert_eq!(occurrences.first().map(|o| o.start), Some(ts(5, 22)));
    }

    #[test]
    fn huge_interval_ends_the_series_instead_of_overflowing() {
        let seed = range(ts(6, 9), ts(6, 10));
        let window = range(ts(1, 0), ts(20, 0));
        let later = range(ts(10, 0), ts(20, 0));

        for raw in [
            "FREQ=WEEKLY;INTERVAL=4000000000",
            "FREQ=WEEKLY;INTERVAL=4000000000;BYDAY=MO,TU",
            "FREQ=DAILY;INTERVAL=4294967295",
            "FREQ=MONTHLY;INTERVAL=4294967295",
        ] {
            let rule: RecurrenceRule = raw.parse().unwrap();
            let starts: Vec<_> = expand(&rule, seed, window).iter().map(|o| o.start).collect();
            let expected = if rule.by_weekday.is_empty() { vec![ts(6, 9)] } else { vec![ts(6, 9), ts(7, 9)] };
            assert_eq!(starts, expected, "{}", raw);
            assert!(expand(&rule, seed, later).is_empty(), "{}", raw);
        }
    }

    #[test]
    fn parses_rrule_string() {
        let rule: RecurrenceRule = "RRULE:FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,FR;COUNT=4".parse().unwrap();
        assert_eq!(rule.frequency, Frequency::Weekly);
        assert_eq!(rule.interval, 2);
        assert_eq!(rule.by_weekday, vec![Weekday::Mon, Weekday::Fri]);
        assert_eq!(rule.count, Some(4));

        let until: RecurrenceRule = "FREQ=DAILY;UNTIL=20240510T000000Z".parse().unwrap();
        assert_eq!(until.until, Some(ts(10, 0)));
    }

    #[test]
    fn rejects_rules_without_frequency() {
        assert!("INTERVAL=2".parse::<RecurrenceRule>().is_err());
        assert!("FREQ=YEARLY".parse::<RecurrenceRule>().is_err());
        assert!("FREQ=DAILY;INTERVAL=0".parse::<RecurrenceRule>().is_err());
    }
}
